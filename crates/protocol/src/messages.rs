//! Externally visible event and action names.
//!
//! The daemon announces every state change as a [`StateBroadcast`] named
//! [`ACTION_CHANGED`]. Only subscribers holding the capability token for
//! [`ACCESS_STATE_SCOPE`] may receive it.

use serde::{Deserialize, Serialize};

use crate::state::ServiceState;

/// Action asking the status view to show the client list.
pub const ACTION_CLIENTS: &str = "meshtether.SHOW_CLIENTS";

/// Action toggling the service between stopped and started.
pub const ACTION_TOGGLE: &str = "meshtether.TOGGLE_STATE";

/// Action asking for the current state to be re-broadcast.
pub const ACTION_CHECK: &str = "meshtether.CHECK_STATE";

/// Name of the state-change broadcast.
pub const ACTION_CHANGED: &str = "meshtether.STATE_CHANGED";

/// Capability scope a subscriber must hold to receive [`StateBroadcast`]s.
pub const ACCESS_STATE_SCOPE: &str = "meshtether.ACCESS_STATE";

/// Kind tag carried by a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastKind {
    /// Emitted on every fanout, whether or not the state changed.
    #[default]
    Generic,
}

/// Payload of the state-change broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateBroadcast {
    /// Current service state.
    pub state: ServiceState,
    /// Kind of broadcast.
    #[serde(default)]
    pub kind: BroadcastKind,
}

impl StateBroadcast {
    /// Creates a generic broadcast for `state`.
    pub fn new(state: ServiceState) -> Self {
        Self {
            state,
            kind: BroadcastKind::Generic,
        }
    }
}
