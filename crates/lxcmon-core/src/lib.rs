//! lxcmon Core - Shared types for container lifecycle monitoring
//!
//! This crate provides the domain types shared between publishers,
//! the monitor daemon (lxc-monitord) and subscribers (lxc-monitor):
//! - `state` - Container lifecycle states carried in state-change events
//! - `rundir` - Runtime directory resolution and directory creation
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod rundir;
pub mod state;

// Re-exports for convenience
pub use error::{CoreError, CoreResult};
pub use rundir::{mkdir_p, runtime_dir, RUNTIME_DIR_ENV};
pub use state::ContainerState;
