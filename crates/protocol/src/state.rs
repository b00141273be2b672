//! Service lifecycle state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Lifecycle state of the tethering service.
///
/// The only legal moves are `Stopped -> Starting -> Running -> Stopped`, plus
/// `Starting -> Stopped` when a startup is aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// No worker is active.
    #[default]
    Stopped,
    /// A worker has been asked to start and has not reported back yet.
    Starting,
    /// The worker reported that tethering is up.
    Running,
}

impl ServiceState {
    /// Numeric code used in external state broadcasts.
    pub fn code(self) -> u8 {
        match self {
            ServiceState::Stopped => 0,
            ServiceState::Starting => 1,
            ServiceState::Running => 2,
        }
    }

    /// Parses a numeric state code.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(ServiceState::Stopped),
            1 => Ok(ServiceState::Starting),
            2 => Ok(ServiceState::Running),
            other => Err(ProtocolError::UnknownStateCode(other)),
        }
    }

    /// Returns whether `self -> next` is a legal transition.
    ///
    /// Self-transitions are never legal.
    pub fn can_transition_to(self, next: ServiceState) -> bool {
        matches!(
            (self, next),
            (ServiceState::Stopped, ServiceState::Starting)
                | (ServiceState::Starting, ServiceState::Running)
                | (ServiceState::Starting, ServiceState::Stopped)
                | (ServiceState::Running, ServiceState::Stopped)
        )
    }

    pub fn is_stopped(self) -> bool {
        self == ServiceState::Stopped
    }

    pub fn is_starting(self) -> bool {
        self == ServiceState::Starting
    }

    pub fn is_running(self) -> bool {
        self == ServiceState::Running
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Stopped => write!(f, "stopped"),
            ServiceState::Starting => write!(f, "starting"),
            ServiceState::Running => write!(f, "running"),
        }
    }
}
