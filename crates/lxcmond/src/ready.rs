//! Readiness handshake with the launcher.
//!
//! The launcher passes the write end of a pipe as `READY_FD`. Writing a
//! byte to it (or closing it) tells the launcher the socket is bound and
//! subscribers may connect.

use std::fs::File;
use std::io::Write;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use tracing::{debug, warn};

use crate::server::ServerError;

/// Byte written once the daemon is ready.
const READY_BYTE: u8 = b'S';

/// One-shot readiness notification.
#[derive(Debug, Default)]
pub struct ReadySignal {
    fd: Option<OwnedFd>,
}

impl ReadySignal {
    /// A signal with nobody to notify (daemon started by hand).
    pub fn none() -> Self {
        Self::default()
    }

    /// Takes ownership of the descriptor inherited from the launcher.
    ///
    /// The descriptor is checked to be open and marked close-on-exec.
    pub fn inherited(fd: RawFd) -> Result<Self, ServerError> {
        if fd < 0 {
            return Err(ServerError::Ready(std::io::Error::from_raw_os_error(
                libc::EBADF,
            )));
        }
        fcntl(fd, FcntlArg::F_GETFD).map_err(|e| ServerError::Ready(e.into()))?;
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(|e| ServerError::Ready(e.into()))?;

        // SAFETY: the descriptor is open (checked above) and was handed to
        // this process for its exclusive use.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { fd: Some(fd) })
    }

    /// Returns true until [`signal`](Self::signal) has run.
    pub fn is_pending(&self) -> bool {
        self.fd.is_some()
    }

    /// Notifies the launcher and closes the descriptor. Later calls do nothing.
    pub fn signal(&mut self) {
        let Some(fd) = self.fd.take() else {
            return;
        };

        let mut pipe = File::from(fd);
        match pipe.write_all(&[READY_BYTE]) {
            Ok(()) => debug!("Signalled readiness to launcher"),
            // The launcher still sees EOF when the fd closes below.
            Err(e) => warn!(error = %e, "Failed to write readiness byte"),
        }
    }
}
