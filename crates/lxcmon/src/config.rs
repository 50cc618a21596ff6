//! Client configuration.
//!
//! Controls where runtime state lives, which monitord executable the
//! launcher starts, and how connection attempts back off.

use std::path::PathBuf;
use std::time::Duration;

use lxcmon_core::{runtime_dir, RUNTIME_DIR_ENV};

use crate::error::Result;

/// Environment variable naming the monitord executable.
pub const MONITORD_PATH_ENV: &str = "LXC_MONITORD_PATH";

/// Installed location of the monitor daemon.
pub const DEFAULT_MONITORD_PATH: &str = "/usr/libexec/lxc/lxc-monitord";

/// Executable name looked up next to the running binary.
const MONITORD_BIN: &str = "lxc-monitord";

/// Delays applied after each refused connection attempt.
pub const DEFAULT_CONNECT_BACKOFF: [Duration; 3] = [
    Duration::from_millis(10),
    Duration::from_millis(50),
    Duration::from_millis(100),
];

/// Configuration shared by the publisher, launcher and subscriber.
///
/// # Example
///
/// ```rust
/// use lxcmon::MonitorConfig;
/// use std::path::PathBuf;
///
/// let config = MonitorConfig {
///     runtime_dir: Some(PathBuf::from("/tmp/lxcmon")),
///     ..Default::default()
/// };
/// assert_eq!(config.connect_backoff.len(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Runtime root override. `None` resolves it from the environment.
    pub runtime_dir: Option<PathBuf>,

    /// Daemon executable started by the launcher.
    pub monitord_path: PathBuf,

    /// One connection attempt is made per entry; the entry is the delay
    /// slept after that attempt is refused.
    pub connect_backoff: Vec<Duration>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            runtime_dir: None,
            monitord_path: default_monitord_path(),
            connect_backoff: DEFAULT_CONNECT_BACKOFF.to_vec(),
        }
    }
}

impl MonitorConfig {
    /// Builds a configuration from `LXCMON_RUNTIME_DIR` and `LXC_MONITORD_PATH`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(dir) = std::env::var_os(RUNTIME_DIR_ENV).filter(|d| !d.is_empty()) {
            config.runtime_dir = Some(PathBuf::from(dir));
        }
        if let Some(path) = std::env::var_os(MONITORD_PATH_ENV).filter(|p| !p.is_empty()) {
            config.monitord_path = PathBuf::from(path);
        }
        config
    }

    /// Returns the runtime root, resolving it when no override is set.
    pub fn runtime_root(&self) -> Result<PathBuf> {
        match &self.runtime_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(runtime_dir()?),
        }
    }
}

/// Prefers an `lxc-monitord` installed beside the current executable.
fn default_monitord_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join(MONITORD_BIN)))
        .filter(|p| p.exists())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MONITORD_PATH))
}
