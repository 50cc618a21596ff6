//! Subscriber side of the monitor channel.
//!
//! A subscriber connects to the abstract socket of one or more container
//! groups and pulls events pushed by monitord. Reads are multiplexed and
//! timeout-bounded, and consume exactly one record per call so the caller
//! keeps control over per-event processing.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io::{self, Read};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::{SocketAddr, UnixStream};
use std::thread;
use std::time::Duration;

use lxcmon_protocol::{SocketName, TransportError, WireMessage, RECORD_SIZE};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, error, warn};

use crate::error::{MonitorError, Result};

// ============================================================================
// Read timeouts and outcomes
// ============================================================================

/// How long a read waits for a connection to become ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTimeout {
    /// Wait until an event arrives.
    Never,
    /// Wait at most this long. `Duration::ZERO` only checks readiness.
    After(Duration),
}

impl ReadTimeout {
    /// Converts a timeout in seconds; negative values mean wait forever.
    pub fn from_secs(secs: i64) -> Self {
        match u64::try_from(secs) {
            Ok(secs) => ReadTimeout::After(Duration::from_secs(secs)),
            Err(_) => ReadTimeout::Never,
        }
    }

    fn as_poll_timeout(self) -> PollTimeout {
        match self {
            ReadTimeout::Never => PollTimeout::NONE,
            ReadTimeout::After(d) => PollTimeout::try_from(d).unwrap_or(PollTimeout::MAX),
        }
    }
}

/// Result of a successful wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// One record was read from `connections[index]`.
    Message { index: usize, message: WireMessage },
    /// The timeout elapsed with no connection ready.
    TimedOut,
}

// ============================================================================
// Connection
// ============================================================================

/// A subscriber connection to one group's monitord.
#[derive(Debug)]
pub struct MonitorConnection {
    stream: UnixStream,
    group: String,
}

impl MonitorConnection {
    /// Connects to the monitor socket of `group`.
    ///
    /// Refused connections are retried after each delay in `backoff`;
    /// any other failure aborts immediately.
    pub fn connect(group: &str, backoff: &[Duration]) -> Result<Self> {
        let name = SocketName::for_group(group)?;
        debug!(socket = %name, len = name.len(), "Opening monitor socket");

        let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
        let stream = connect_with_backoff(backoff, || UnixStream::connect_addr(&addr))?;

        Ok(Self::from_stream(stream, group))
    }

    /// Wraps an already connected stream.
    pub fn from_stream(stream: UnixStream, group: impl Into<String>) -> Self {
        Self {
            stream,
            group: group.into(),
        }
    }

    /// Group this connection subscribes to.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Blocks until one event arrives on this connection.
    pub fn read(&self) -> Result<WireMessage> {
        loop {
            if let ReadOutcome::Message { message, .. } = self.read_timeout(ReadTimeout::Never)? {
                return Ok(message);
            }
        }
    }

    /// Waits up to `timeout` for one event on this connection.
    pub fn read_timeout(&self, timeout: ReadTimeout) -> Result<ReadOutcome> {
        read_any(std::slice::from_ref(self), timeout)
    }

    /// Closes the connection.
    pub fn close(self) {
        debug!(group = %self.group, "Closing monitor connection");
    }

    /// Reads exactly one record from the stream.
    fn receive(&self) -> Result<WireMessage> {
        let mut buf = [0u8; RECORD_SIZE];
        let received = loop {
            match (&self.stream).read(&mut buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        match received {
            Ok(0) => {
                error!(group = %self.group, "Failed to receive message. Did monitord die?");
                Err(TransportError::PeerClosed.into())
            }
            Ok(n) => Ok(WireMessage::decode(buf.get(..n).unwrap_or_default())?),
            Err(e) => {
                error!(group = %self.group, error = %e, "Failed to receive message");
                Err(MonitorError::Io(e))
            }
        }
    }
}

impl AsFd for MonitorConnection {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

// ============================================================================
// Multiplexed read
// ============================================================================

/// Waits for an event on any of `connections` and reads one record.
///
/// Only the first ready connection is read; others stay ready and are
/// reported by the next call.
///
/// # Errors
///
/// - [`MonitorError::Wait`] if the readiness wait fails
/// - [`MonitorError::Transport`] if the peer closed or sent a bad record
/// - [`MonitorError::NoReadyConnection`] if `connections` is empty or the
///   wait reported readiness without a ready entry
pub fn read_any(connections: &[MonitorConnection], timeout: ReadTimeout) -> Result<ReadOutcome> {
    if connections.is_empty() {
        return Err(MonitorError::NoReadyConnection);
    }

    let mut fds: Vec<PollFd<'_>> = connections
        .iter()
        .map(|c| PollFd::new(c.as_fd(), PollFlags::POLLIN | PollFlags::POLLPRI))
        .collect();

    let ready = poll(&mut fds, timeout.as_poll_timeout())?;
    if ready == 0 {
        return Ok(ReadOutcome::TimedOut);
    }

    let index = fds
        .iter()
        .position(|fd| fd.revents().is_some_and(|events| !events.is_empty()));
    drop(fds);

    let Some((index, connection)) = index.and_then(|i| connections.get(i).map(|c| (i, c))) else {
        error!("No ready fd found");
        return Err(MonitorError::NoReadyConnection);
    };

    let message = connection.receive()?;
    Ok(ReadOutcome::Message { index, message })
}

// ============================================================================
// Connection retry
// ============================================================================

/// Runs `attempt` until it succeeds, retrying only refused connections.
///
/// One attempt is made per entry in `backoff`, sleeping that entry's delay
/// after each refusal. An empty `backoff` still makes a single attempt.
pub fn connect_with_backoff<T, F>(backoff: &[Duration], mut attempt: F) -> Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    let single = [Duration::ZERO];
    let delays = if backoff.is_empty() { &single[..] } else { backoff };

    for (n, delay) in delays.iter().enumerate() {
        match attempt() {
            Ok(connected) => {
                debug!(attempt = n + 1, "Connected to monitor socket");
                return Ok(connected);
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                warn!(
                    attempt = n + 1,
                    retry_in = ?delay,
                    "Failed to connect to monitor socket. Retrying"
                );
                thread::sleep(*delay);
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to monitor socket");
                return Err(MonitorError::Connect(e));
            }
        }
    }

    error!(attempts = delays.len(), "Failed to connect to monitor socket");
    Err(MonitorError::ConnectRefused {
        attempts: delays.len(),
    })
}
