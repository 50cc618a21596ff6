//! Protocol error types.

use std::io;
use std::path::PathBuf;

use lxcmon_core::CoreError;
use thiserror::Error;

/// Errors raised while moving records over the FIFO or socket.
///
/// Any of these means the connection should be treated as dead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Fewer bytes than a full record were received
    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    /// Fewer bytes than a full record were written
    #[error("Short write: expected {expected} bytes, wrote {actual}")]
    ShortWrite { expected: usize, actual: usize },

    /// The record's kind field is not a known message kind
    #[error("Unknown message kind: {0}")]
    UnknownKind(u32),

    /// The peer closed the connection (monitord died?)
    #[error("Connection closed by peer")]
    PeerClosed,
}

/// Errors raised while deriving rendezvous addresses.
#[derive(Error, Debug)]
pub enum AddressError {
    /// The hashed socket name does not fit the abstract address buffer
    #[error("Monitor socket name for {group:?} is {len} bytes (max {max})")]
    TooLong {
        group: String,
        len: usize,
        max: usize,
    },

    /// The FIFO path exceeds PATH_MAX
    #[error("Monitor FIFO path {path} exceeds {max} bytes")]
    PathTooLong { path: PathBuf, max: usize },

    /// The FIFO parent directory could not be created
    #[error("Unable to create monitor FIFO directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Runtime directory resolution failed
    #[error(transparent)]
    RuntimeDir(#[from] CoreError),
}
