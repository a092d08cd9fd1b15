//! Delivery gate

use std::fmt;

use serde::Serialize;

/// Whether batches go straight to the consumer or wait in the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GateState {
    #[default]
    Flowing,
    /// A live pause record exists
    BufferingPaused,
    /// Some participant is working
    BufferingBusy,
}

impl GateState {
    /// Gate for the given signals; an explicit pause wins over busy
    pub fn resolve(paused: bool, busy: bool) -> Self {
        if paused {
            Self::BufferingPaused
        } else if busy {
            Self::BufferingBusy
        } else {
            Self::Flowing
        }
    }

    pub fn is_flowing(&self) -> bool {
        *self == Self::Flowing
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flowing => write!(f, "flowing"),
            Self::BufferingPaused => write!(f, "buffering (paused)"),
            Self::BufferingBusy => write!(f, "buffering (busy)"),
        }
    }
}
