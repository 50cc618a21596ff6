//! Domain-specific error types following panic-free policy.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// No usable runtime directory could be determined
    #[error("Unable to determine a runtime directory (no XDG_RUNTIME_DIR and no HOME)")]
    NoRuntimeDir,

    /// Runtime directory override was not an absolute path
    #[error("Runtime directory must be an absolute path: {0}")]
    RelativeRuntimeDir(PathBuf),

    /// Directory creation failed
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Integer does not name a container state
    #[error("Invalid container state: {0}")]
    InvalidState(String),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
