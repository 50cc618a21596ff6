//! Runtime directory resolution.
//!
//! Publishers and the monitor daemon must agree on where per-group runtime
//! state (the monitor FIFO, the daemon log) lives, so resolution is a pure
//! function of the environment and the effective uid.

use std::ffi::OsString;
use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Environment variable that overrides the runtime directory.
///
/// The daemon launcher exports it to the daemon when the caller configured
/// an explicit runtime root, so both ends compute the same FIFO path.
pub const RUNTIME_DIR_ENV: &str = "LXCMON_RUNTIME_DIR";

/// Runtime directory used by root.
const ROOT_RUNTIME_DIR: &str = "/run";

/// Fallback below `$HOME` when no `XDG_RUNTIME_DIR` is available.
const HOME_RUNTIME_SUBDIR: &str = ".cache/lxc/run";

/// Returns the runtime root for the current process.
///
/// Resolution order:
/// 1. `LXCMON_RUNTIME_DIR` (must be absolute)
/// 2. `/run` when running with euid 0
/// 3. `$XDG_RUNTIME_DIR`
/// 4. `$HOME/.cache/lxc/run`
pub fn runtime_dir() -> CoreResult<PathBuf> {
    resolve_runtime_dir(
        std::env::var_os(RUNTIME_DIR_ENV),
        nix::unistd::geteuid().is_root(),
        dirs::runtime_dir(),
        dirs::home_dir(),
    )
}

fn resolve_runtime_dir(
    override_dir: Option<OsString>,
    is_root: bool,
    xdg_runtime_dir: Option<PathBuf>,
    home_dir: Option<PathBuf>,
) -> CoreResult<PathBuf> {
    if let Some(dir) = override_dir.filter(|d| !d.is_empty()) {
        let dir = PathBuf::from(dir);
        if !dir.is_absolute() {
            return Err(CoreError::RelativeRuntimeDir(dir));
        }
        debug!(runtime_dir = %dir.display(), "Using runtime directory override");
        return Ok(dir);
    }

    if is_root {
        return Ok(PathBuf::from(ROOT_RUNTIME_DIR));
    }

    if let Some(dir) = xdg_runtime_dir {
        return Ok(dir);
    }

    home_dir
        .map(|home| home.join(HOME_RUNTIME_SUBDIR))
        .ok_or(CoreError::NoRuntimeDir)
}

/// Creates `path` and all missing parents with the given mode (`mkdir -p`).
///
/// Existing directories are not an error. The mode is subject to the
/// process umask.
pub fn mkdir_p(path: &Path, mode: u32) -> CoreResult<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(path)
        .map_err(|source| CoreError::CreateDir {
            path: path.to_path_buf(),
            source,
        })
}
