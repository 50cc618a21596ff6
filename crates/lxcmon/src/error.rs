//! Error types for monitor clients.
//!
//! Subscriber and launcher failures surface as [`MonitorError`] so the
//! caller decides whether to retry or give up. Publisher failures never
//! reach this type; see [`crate::publisher`].
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;

use lxcmon_core::CoreError;
use lxcmon_protocol::{AddressError, TransportError};
use nix::errno::Errno;
use thiserror::Error;

// ============================================================================
// Monitor Error Type
// ============================================================================

/// Errors returned by the subscriber and launcher APIs.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// The group's rendezvous address cannot be represented.
    ///
    /// Unrecoverable for this group identifier; retrying will not help.
    #[error("Invalid monitor address: {0}")]
    Address(#[from] AddressError),

    /// The daemon socket kept refusing connections.
    ///
    /// The daemon may still be starting up; callers can run
    /// `ensure_running` again or retry later.
    #[error("Connection to monitor socket refused after {attempts} attempts")]
    ConnectRefused {
        /// Number of connection attempts made.
        attempts: usize,
    },

    /// Connecting failed for a reason other than refusal.
    #[error("Failed to connect to monitor socket: {0}")]
    Connect(#[source] io::Error),

    /// A record could not be moved over the connection.
    ///
    /// The connection should be treated as dead.
    #[error("Monitor transport error: {0}")]
    Transport(#[from] TransportError),

    /// The readiness wait itself failed.
    #[error("Failed to wait for monitor events: {0}")]
    Wait(#[from] Errno),

    /// The wait reported readiness but no connection was ready, or there
    /// was nothing to wait on.
    #[error("No ready monitor connection found")]
    NoReadyConnection,

    /// The monitor daemon could not be started.
    #[error("Failed to spawn monitord: {0}")]
    SpawnFailed(String),

    /// The runtime directory could not be resolved.
    #[error("Runtime directory error: {0}")]
    Runtime(#[from] CoreError),

    /// I/O error passthrough.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Convenience Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_refused_display() {
        let error = MonitorError::ConnectRefused { attempts: 3 };
        let display = format!("{error}");
        assert!(display.contains("refused"));
        assert!(display.contains('3'));
    }

    #[test]
    fn test_transport_from_conversion() {
        let error: MonitorError = TransportError::PeerClosed.into();
        assert!(matches!(
            error,
            MonitorError::Transport(TransportError::PeerClosed)
        ));
    }

    #[test]
    fn test_wait_from_errno() {
        let error: MonitorError = Errno::EINTR.into();
        assert!(matches!(error, MonitorError::Wait(Errno::EINTR)));
        assert!(error.to_string().contains("wait"));
    }

    #[test]
    fn test_io_error_from_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "socket not found");
        let error: MonitorError = io_error.into();
        assert!(matches!(error, MonitorError::Io(_)));
    }

    #[test]
    fn test_spawn_failed_display() {
        let error = MonitorError::SpawnFailed("intermediate exited with 1".to_string());
        assert!(error.to_string().contains("intermediate exited with 1"));
    }
}
