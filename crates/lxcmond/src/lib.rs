//! lxc-monitord - Per-lxcpath event fan-out daemon
//!
//! This crate provides the monitor daemon started on demand by subscribers:
//! - `server` - Abstract socket listener, FIFO reader and record fan-out
//! - `ready` - Readiness handshake with the process that spawned us
//! - `cli` - Command line entry point and logging setup
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   264-byte records   ┌─────────────────────────────┐
//! │  publishers  │ ───────────────────▶ │        MonitorServer        │
//! │ (containers) │    monitor-fifo      │                             │
//! └──────────────┘                      │  FIFO reader ──▶ fan-out    │
//!                                       │                   │         │
//!                                       │  accept() ◀── @lxc/{hash}/G │
//!                                       └───────────────────┼─────────┘
//!                                                           │ try_write
//!                                                           ▼
//!                                                 ┌──────────────────┐
//!                                                 │   subscribers    │
//!                                                 └──────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the project's panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - A misbehaving subscriber is disconnected, never fatal

pub mod cli;
pub mod ready;
pub mod server;

pub use ready::ReadySignal;
pub use server::{MonitorServer, ServerConfig, ServerError};
