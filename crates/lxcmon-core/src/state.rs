//! Container lifecycle states.
//!
//! The ordinal of each state is what travels in the `value` field of a
//! state-change record, so the numbering is part of the wire contract.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum ContainerState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Aborting = 4,
    Freezing = 5,
    Frozen = 6,
    Thawed = 7,
}

impl ContainerState {
    /// All states in ordinal order.
    pub const ALL: [ContainerState; 8] = [
        ContainerState::Stopped,
        ContainerState::Starting,
        ContainerState::Running,
        ContainerState::Stopping,
        ContainerState::Aborting,
        ContainerState::Freezing,
        ContainerState::Frozen,
        ContainerState::Thawed,
    ];

    /// Returns the wire ordinal of this state.
    pub const fn ordinal(self) -> i32 {
        self as i32
    }

    /// Looks up a state by its wire ordinal.
    pub fn from_ordinal(value: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.ordinal() == value)
    }

    /// Returns the canonical upper-case name (e.g. "RUNNING").
    pub const fn as_str(self) -> &'static str {
        match self {
            ContainerState::Stopped => "STOPPED",
            ContainerState::Starting => "STARTING",
            ContainerState::Running => "RUNNING",
            ContainerState::Stopping => "STOPPING",
            ContainerState::Aborting => "ABORTING",
            ContainerState::Freezing => "FREEZING",
            ContainerState::Frozen => "FROZEN",
            ContainerState::Thawed => "THAWED",
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::InvalidState(s.to_string()))
    }
}

impl TryFrom<i32> for ContainerState {
    type Error = CoreError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::from_ordinal(value).ok_or_else(|| CoreError::InvalidState(value.to_string()))
    }
}
