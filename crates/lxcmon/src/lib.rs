//! lxcmon - Container lifecycle monitor client
//!
//! This library implements the client side of the monitor channel used by
//! container tooling to broadcast lifecycle events.
//!
//! # Architecture
//!
//! Events flow through a per-group monitor daemon (monitord):
//!
//! 1. **Publisher**: Containers write fixed-size records into the group's
//!    FIFO. Publishing never blocks and never fails the caller.
//! 2. **Launcher**: Subscribers make sure a monitord serves the group,
//!    spawning one through a double fork and a readiness handshake.
//! 3. **Subscriber**: Clients connect to the group's abstract socket and
//!    read records, multiplexed over any number of groups.
//!
//! **Panic-Free Policy:** This crate follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`
//! outside of tests.

pub mod cli;
pub mod config;
pub mod error;
pub mod launcher;
pub mod publisher;
pub mod subscriber;

// Re-export commonly used types
pub use config::MonitorConfig;
pub use error::{MonitorError, Result};
pub use launcher::DaemonLauncher;
pub use publisher::{PublishOutcome, Publisher};
pub use subscriber::{connect_with_backoff, read_any, MonitorConnection, ReadOutcome, ReadTimeout};
