//! lxcmon Protocol - Wire format and rendezvous addressing
//!
//! This crate provides the pieces every participant of the monitor channel
//! must agree on bit-for-bit:
//! - `message` - the fixed-size event record carried on the FIFO and socket
//! - `address` - the FIFO path and abstract socket name for a container group

pub mod address;
pub mod error;
pub mod message;

pub use address::{fifo_path, fnv1a_64, GroupAddress, SocketName, FNV1A_64_INIT};
pub use error::{AddressError, TransportError};
pub use message::{MessageKind, WireMessage, NAME_CAPACITY, PIPE_BUF, RECORD_SIZE};
