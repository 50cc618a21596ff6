//! The fixed-size event record.
//!
//! One record is the unit of transport on both the publish FIFO and the
//! subscriber socket. The layout mirrors the native C struct every
//! participant on the host uses:
//!
//! ```text
//! offset  size  field
//!      0     4  kind   (u32, native endian: 0 = state, 1 = exit code)
//!      4   256  name   (NUL-terminated, NUL-padded)
//!    260     4  value  (i32, native endian)
//! ```
//!
//! Records are written and read as one atomic unit. A partial record is a
//! transport failure, never a message.

use std::borrow::Cow;
use std::fmt;

use lxcmon_core::ContainerState;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Capacity of the name field, including the terminating NUL (NAME_MAX + 1).
pub const NAME_CAPACITY: usize = 256;

/// Atomic write guarantee for pipes on Linux.
pub const PIPE_BUF: usize = 4096;

const KIND_LEN: usize = 4;
const VALUE_LEN: usize = 4;

/// Encoded size of one record.
pub const RECORD_SIZE: usize = KIND_LEN + NAME_CAPACITY + VALUE_LEN;

// Larger records would lose write atomicity on the FIFO.
const _: () = assert!(RECORD_SIZE <= PIPE_BUF);

/// What a record reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum MessageKind {
    /// `value` is a container state ordinal
    StateChanged = 0,
    /// `value` is the container init's exit code
    ExitCode = 1,
}

impl TryFrom<u32> for MessageKind {
    type Error = TransportError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(MessageKind::StateChanged),
            1 => Ok(MessageKind::ExitCode),
            other => Err(TransportError::UnknownKind(other)),
        }
    }
}

/// A decoded lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    kind: MessageKind,
    name: String,
    value: i32,
}

impl WireMessage {
    /// Creates a record, silently truncating `name` to fit the name field.
    ///
    /// Truncation keeps at most `NAME_CAPACITY - 1` bytes and never splits a
    /// UTF-8 character.
    pub fn new(kind: MessageKind, name: &str, value: i32) -> Self {
        Self {
            kind,
            name: truncate_name(name).to_string(),
            value,
        }
    }

    /// Creates a state-change record.
    pub fn state_changed(name: &str, state: ContainerState) -> Self {
        Self::new(MessageKind::StateChanged, name, state.ordinal())
    }

    /// Creates an exit-code record.
    pub fn exit_code(name: &str, code: i32) -> Self {
        Self::new(MessageKind::ExitCode, name, code)
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Container name, as truncated for the wire.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> i32 {
        self.value
    }

    /// Returns the reported state for state-change records.
    ///
    /// `None` for exit-code records and for ordinals this build does not know.
    pub fn state(&self) -> Option<ContainerState> {
        match self.kind {
            MessageKind::StateChanged => ContainerState::from_ordinal(self.value),
            MessageKind::ExitCode => None,
        }
    }

    /// Encodes the record into its fixed wire layout.
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut record = [0u8; RECORD_SIZE];
        let (kind, rest) = record.split_at_mut(KIND_LEN);
        let (name, value) = rest.split_at_mut(NAME_CAPACITY);

        kind.copy_from_slice(&(self.kind as u32).to_ne_bytes());
        // Name is at most NAME_CAPACITY - 1 bytes, so a NUL always follows.
        for (dst, src) in name.iter_mut().zip(self.name.as_bytes()) {
            *dst = *src;
        }
        value.copy_from_slice(&self.value.to_ne_bytes());

        record
    }

    /// Decodes one record from the start of `bytes`.
    ///
    /// Bytes past the first record are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, TransportError> {
        let record = bytes.get(..RECORD_SIZE).ok_or(TransportError::ShortRead {
            expected: RECORD_SIZE,
            actual: bytes.len(),
        })?;

        let (kind, rest) = record.split_at(KIND_LEN);
        let (name, value) = rest.split_at(NAME_CAPACITY);

        let mut raw_kind = [0u8; KIND_LEN];
        raw_kind.copy_from_slice(kind);
        let kind = MessageKind::try_from(u32::from_ne_bytes(raw_kind))?;

        let mut raw_value = [0u8; VALUE_LEN];
        raw_value.copy_from_slice(value);

        let name = name.split(|b| *b == 0).next().unwrap_or_default();

        Ok(Self {
            kind,
            name: match String::from_utf8_lossy(name) {
                Cow::Borrowed(s) => s.to_string(),
                Cow::Owned(s) => s,
            },
            value: i32::from_ne_bytes(raw_value),
        })
    }
}

impl fmt::Display for WireMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.state()) {
            (MessageKind::StateChanged, Some(state)) => {
                write!(f, "'{}' changed state to [{}]", self.name, state)
            }
            (MessageKind::StateChanged, None) => {
                write!(f, "'{}' changed state to [{}]", self.name, self.value)
            }
            (MessageKind::ExitCode, _) => {
                write!(f, "'{}' exited with status [{}]", self.name, self.value)
            }
        }
    }
}

fn truncate_name(name: &str) -> &str {
    let max = NAME_CAPACITY - 1;
    if name.len() <= max {
        return name;
    }
    let end = (0..=max)
        .rev()
        .find(|&i| name.is_char_boundary(i))
        .unwrap_or(0);
    name.get(..end).unwrap_or_default()
}
