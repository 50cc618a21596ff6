//! Fan-out server for one lxcpath.
//!
//! The server:
//! - Owns the group's abstract socket; binding it is the "one daemon per
//!   group" lock
//! - Reads whole records from the publish FIFO
//! - Pushes every record to each connected subscriber
//! - Exits after an idle period with no subscribers, or on cancellation
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────┐       ┌────────────────────────────┐
//! │   monitor-fifo    │──────▶│       MonitorServer        │
//! │ (O_RDWR, no EOF)  │ read  │                            │
//! └───────────────────┘       │  select! {                 │
//!                             │    cancel / idle timeout   │
//! ┌───────────────────┐accept │    accept ──▶ Subscriber   │
//! │ @lxc/{hash}/{G}   │──────▶│    hang-up ──▶ remove      │
//! └───────────────────┘       │    record ──▶ fan-out      │
//!                             │  }                         │
//!                             └────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the project's panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Subscriber errors are logged and only end that subscriber

mod connection;

pub use connection::{ClientId, Delivery, Subscriber};

use std::collections::HashMap;
use std::io;
use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lxcmon_core::runtime_dir;
use lxcmon_protocol::{fifo_path, AddressError, GroupAddress, SocketName, WireMessage, RECORD_SIZE};
use nix::errno::Errno;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Time without subscribers after which the daemon exits.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable overriding the idle timeout, in seconds.
pub const IDLE_TIMEOUT_ENV: &str = "LXC_MONITORD_IDLE_TIMEOUT";

/// Log file name, next to the FIFO.
pub const LOG_FILE_NAME: &str = "lxc-monitord.log";

// ============================================================================
// Configuration
// ============================================================================

/// Settings for one daemon instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Group (lxcpath) served by this daemon.
    pub group: String,

    /// Runtime root holding the FIFO directory.
    pub runtime_root: PathBuf,

    /// How long to linger with no subscribers.
    pub idle_timeout: Duration,
}

impl ServerConfig {
    /// Creates a configuration with the default idle timeout.
    pub fn new(group: impl Into<String>, runtime_root: impl Into<PathBuf>) -> Self {
        Self {
            group: group.into(),
            runtime_root: runtime_root.into(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Resolves the runtime root and idle timeout from the environment.
    pub fn from_env(group: impl Into<String>) -> Result<Self, ServerError> {
        let runtime_root = runtime_dir().map_err(AddressError::from)?;
        let idle_timeout = parse_idle_timeout(std::env::var(IDLE_TIMEOUT_ENV).ok().as_deref());
        Ok(Self::new(group, runtime_root).with_idle_timeout(idle_timeout))
    }

    /// Overrides the idle timeout.
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Path of the daemon log file. Creates its directory.
    pub fn log_path(&self) -> Result<PathBuf, ServerError> {
        Ok(fifo_path(&self.runtime_root, &self.group, true)?.with_file_name(LOG_FILE_NAME))
    }
}

fn parse_idle_timeout(value: Option<&str>) -> Duration {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return DEFAULT_IDLE_TIMEOUT;
    };
    match value.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(e) => {
            warn!(value, error = %e, "Ignoring invalid {IDLE_TIMEOUT_ENV}");
            DEFAULT_IDLE_TIMEOUT
        }
    }
}

// ============================================================================
// Server
// ============================================================================

/// Monitor daemon server for one group.
pub struct MonitorServer {
    config: ServerConfig,
    socket_name: SocketName,
    fifo_path: PathBuf,
    listener: UnixListener,
    fifo: pipe::Receiver,
    cancel_token: CancellationToken,
}

impl MonitorServer {
    /// Binds the group's socket, then creates and opens its FIFO.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AlreadyRunning`] if another monitord owns
    /// the group; in that case no FIFO is touched.
    pub fn bind(config: ServerConfig, cancel_token: CancellationToken) -> Result<Self, ServerError> {
        let address = GroupAddress::resolve(&config.runtime_root, &config.group, true)?;

        let listener = bind_abstract(&address.socket_name)?;
        info!(socket = %address.socket_name, "Monitor socket bound");

        let fifo = open_fifo(&address.fifo_path)?;
        info!(fifo = %address.fifo_path.display(), "Monitor fifo open");

        Ok(Self {
            config,
            socket_name: address.socket_name,
            fifo_path: address.fifo_path,
            listener,
            fifo,
            cancel_token,
        })
    }

    /// Returns the bound socket name.
    pub fn socket_name(&self) -> &SocketName {
        &self.socket_name
    }

    /// Returns the FIFO path.
    pub fn fifo_path(&self) -> &Path {
        &self.fifo_path
    }

    /// Runs the fan-out loop until cancelled or idle, then removes the FIFO.
    pub async fn run(self) -> Result<(), ServerError> {
        let MonitorServer {
            config,
            socket_name,
            fifo_path,
            listener,
            mut fifo,
            cancel_token,
        } = self;

        let (hangup_tx, mut hangup_rx) = mpsc::unbounded_channel::<ClientId>();
        let mut subscribers: HashMap<ClientId, Subscriber> = HashMap::new();
        let mut next_id: ClientId = 0;

        let mut record = [0u8; RECORD_SIZE];
        let mut filled = 0usize;

        let idle = time::sleep(config.idle_timeout);
        tokio::pin!(idle);

        info!(
            group = %config.group,
            socket = %socket_name,
            idle_timeout = ?config.idle_timeout,
            "Monitor server running"
        );

        let result = loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break Ok(());
                }

                _ = &mut idle, if subscribers.is_empty() => {
                    info!("No subscribers for {:?}, exiting", config.idle_timeout);
                    break Ok(());
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let id = next_id;
                            next_id += 1;
                            subscribers.insert(id, Subscriber::spawn(id, stream, hangup_tx.clone()));
                            debug!(client_id = id, subscribers = subscribers.len(), "Subscriber connected");
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }

                Some(id) = hangup_rx.recv() => {
                    if subscribers.remove(&id).is_some() {
                        debug!(client_id = id, subscribers = subscribers.len(), "Subscriber disconnected");
                    }
                    if subscribers.is_empty() {
                        idle.as_mut().reset(Instant::now() + config.idle_timeout);
                    }
                }

                // `read` is cancel-safe; a record split across reads is
                // reassembled through `filled`.
                read = fifo.read(&mut record[filled..]) => {
                    match read {
                        Ok(0) => {
                            break Err(ServerError::Fifo {
                                path: fifo_path.clone(),
                                source: io::ErrorKind::UnexpectedEof.into(),
                            });
                        }
                        Ok(n) => {
                            filled += n;
                            if filled == RECORD_SIZE {
                                filled = 0;
                                fan_out(&mut subscribers, &record);
                                if subscribers.is_empty() {
                                    idle.as_mut().reset(Instant::now() + config.idle_timeout);
                                }
                            }
                        }
                        Err(e) => {
                            error!(fifo = %fifo_path.display(), error = %e, "Failed to read monitor fifo");
                            break Err(ServerError::Fifo { path: fifo_path.clone(), source: e });
                        }
                    }
                }
            }
        };

        subscribers.clear();
        cleanup(&fifo_path);
        result
    }
}

/// Offers `record` to every subscriber, dropping the broken ones.
fn fan_out(subscribers: &mut HashMap<ClientId, Subscriber>, record: &[u8; RECORD_SIZE]) {
    match WireMessage::decode(record) {
        Ok(message) => debug!(event = %message, subscribers = subscribers.len(), "Forwarding event"),
        Err(e) => warn!(error = %e, "Forwarding malformed record"),
    }

    subscribers.retain(|id, subscriber| match subscriber.deliver(record) {
        Delivery::Sent | Delivery::Dropped => true,
        Delivery::Disconnected => {
            debug!(client_id = *id, "Removed failed subscriber");
            false
        }
    });
}

fn bind_abstract(name: &SocketName) -> Result<UnixListener, ServerError> {
    let setup_error = |source: io::Error| ServerError::SocketSetup {
        socket: name.to_string(),
        source,
    };

    let addr = SocketAddr::from_abstract_name(name.as_bytes()).map_err(setup_error)?;
    let listener = match std::os::unix::net::UnixListener::bind_addr(&addr) {
        Ok(listener) => listener,
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
            return Err(ServerError::AlreadyRunning {
                socket: name.to_string(),
            })
        }
        Err(e) => return Err(setup_error(e)),
    };
    listener.set_nonblocking(true).map_err(setup_error)?;
    UnixListener::from_std(listener).map_err(setup_error)
}

/// Creates the FIFO if needed and opens it read-write, so the read side
/// never sees EOF when the last publisher closes.
fn open_fifo(path: &Path) -> Result<pipe::Receiver, ServerError> {
    let fifo_error = |source: io::Error| ServerError::Fifo {
        path: path.to_path_buf(),
        source,
    };

    match mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR) {
        // A leftover from a daemon that died; we own the socket now.
        Ok(()) | Err(Errno::EEXIST) => {}
        Err(e) => return Err(fifo_error(e.into())),
    }

    pipe::OpenOptions::new()
        .read_write(true)
        .open_receiver(path)
        .map_err(fifo_error)
}

fn cleanup(fifo_path: &Path) {
    match std::fs::remove_file(fifo_path) {
        Ok(()) => debug!(fifo = %fifo_path.display(), "Removed monitor fifo"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(fifo = %fifo_path.display(), error = %e, "Failed to remove monitor fifo"),
    }
    info!("Server cleanup complete");
}

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Another monitord already serves this group.
    #[error("Monitor socket {socket} is already in use")]
    AlreadyRunning { socket: String },

    #[error("Failed to setup socket {socket}: {source}")]
    SocketSetup {
        socket: String,
        #[source]
        source: io::Error,
    },

    #[error("Monitor fifo {path} failed: {source}")]
    Fifo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The readiness descriptor handed over by the launcher is unusable.
    #[error("Invalid ready descriptor: {0}")]
    Ready(#[source] io::Error),

    #[error("Invalid monitor address: {0}")]
    Address(#[from] AddressError),
}
