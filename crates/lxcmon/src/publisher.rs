//! Fire-and-forget publishing of lifecycle events.
//!
//! Containers report state changes and exit codes by writing one record
//! into their group's monitor FIFO. Nothing here may block or fail the
//! caller: with no monitord reading the FIFO the record is simply dropped.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use lxcmon_core::{runtime_dir, ContainerState};
use lxcmon_protocol::{fifo_path, TransportError, WireMessage, RECORD_SIZE};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use tracing::{debug, warn};

use crate::config::MonitorConfig;

// ============================================================================
// Error classification
// ============================================================================

/// How a failure on the publish path is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Expected condition, not logged.
    Silent,
    /// Logged as a warning; still never propagated.
    Reported,
}

/// Classifies a FIFO open failure.
///
/// `ENXIO` (FIFO exists but no reader) and `ENOENT` (no FIFO yet) both mean
/// no monitord is running, which is normal.
pub fn classify_open_error(err: &io::Error) -> Disposition {
    match err.raw_os_error() {
        Some(libc::ENXIO) | Some(libc::ENOENT) => Disposition::Silent,
        _ => Disposition::Reported,
    }
}

/// Result of a publish attempt. Callers are free to ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The whole record was written to the FIFO.
    Delivered,
    /// No monitord is listening; nothing was written.
    NoListener,
    /// The record was lost to an unexpected failure (already logged).
    Dropped,
}

// ============================================================================
// Publisher
// ============================================================================

/// Writes lifecycle events into a group's monitor FIFO.
#[derive(Debug, Clone, Default)]
pub struct Publisher {
    /// Runtime root override; resolved per send when `None`.
    runtime_root: Option<PathBuf>,
}

impl Publisher {
    /// Creates a publisher rooted at `runtime_root`.
    pub fn new(runtime_root: impl Into<PathBuf>) -> Self {
        Self {
            runtime_root: Some(runtime_root.into()),
        }
    }

    /// Creates a publisher honouring the configured runtime root.
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            runtime_root: config.runtime_dir.clone(),
        }
    }

    /// Reports a state transition of container `name` in `group`.
    pub fn send_state(&self, group: &str, name: &str, state: ContainerState) -> PublishOutcome {
        self.send(group, &WireMessage::state_changed(name, state))
    }

    /// Reports the exit code of container `name` in `group`.
    pub fn send_exit_code(&self, group: &str, name: &str, code: i32) -> PublishOutcome {
        self.send(group, &WireMessage::exit_code(name, code))
    }

    /// Writes `message` into the FIFO of `group`.
    ///
    /// Never blocks waiting for a reader and never returns an error.
    pub fn send(&self, group: &str, message: &WireMessage) -> PublishOutcome {
        let root = match &self.runtime_root {
            Some(root) => root.clone(),
            None => match runtime_dir() {
                Ok(root) => root,
                Err(e) => {
                    warn!(error = %e, "Failed to resolve runtime directory for monitor fifo");
                    return PublishOutcome::Dropped;
                }
            },
        };

        let path = match fifo_path(&root, group, false) {
            Ok(path) => path,
            Err(e) => {
                warn!(group, error = %e, "Failed to build monitor fifo path");
                return PublishOutcome::Dropped;
            }
        };

        // Non-blocking open so a dead monitor never makes us wait for a
        // reader that may never come.
        let fifo = match OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
        {
            Ok(fifo) => fifo,
            Err(e) => {
                return match classify_open_error(&e) {
                    Disposition::Silent => PublishOutcome::NoListener,
                    Disposition::Reported => {
                        warn!(fifo = %path.display(), error = %e, "Failed to open fifo to send message");
                        PublishOutcome::Dropped
                    }
                };
            }
        };

        if let Err(e) = fcntl(fifo.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_WRONLY)) {
            debug!(fifo = %path.display(), error = %e, "Failed to clear O_NONBLOCK on monitor fifo");
            return PublishOutcome::Dropped;
        }

        write_record(&fifo, &path, &message.encode())
    }
}

fn write_record(mut fifo: &File, path: &Path, record: &[u8; RECORD_SIZE]) -> PublishOutcome {
    let written = loop {
        match fifo.write(record) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => break other,
        }
    };

    match written {
        Ok(n) if n == RECORD_SIZE => PublishOutcome::Delivered,
        Ok(n) => {
            let e = TransportError::ShortWrite {
                expected: RECORD_SIZE,
                actual: n,
            };
            warn!(fifo = %path.display(), error = %e, "Failed to write to monitor fifo");
            PublishOutcome::Dropped
        }
        Err(e) => {
            warn!(fifo = %path.display(), error = %e, "Failed to write to monitor fifo");
            PublishOutcome::Dropped
        }
    }
}
