//! Observer roles and the capabilities a view exposes to the daemon.

use std::fmt;

use meshtether_protocol::ServiceState;

/// The fixed set of views that can observe the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObserverRole {
    /// Main status view; the only one that can host dialogs.
    Status,
    /// Mesh links and client list.
    Links,
    /// Node information.
    Info,
}

impl ObserverRole {
    /// Every role, in table order.
    pub const ALL: [ObserverRole; 3] = [ObserverRole::Status, ObserverRole::Links, ObserverRole::Info];

    /// Slot index in the observer table.
    pub(crate) fn index(self) -> usize {
        match self {
            ObserverRole::Status => 0,
            ObserverRole::Links => 1,
            ObserverRole::Info => 2,
        }
    }
}

impl fmt::Display for ObserverRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObserverRole::Status => write!(f, "status"),
            ObserverRole::Links => write!(f, "links"),
            ObserverRole::Info => write!(f, "info"),
        }
    }
}

/// Modal dialogs the status view can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialog {
    /// Explains that root access was denied.
    RootAccess,
    /// Explains that the wifi supplicant could not be reconfigured.
    Supplicant,
    /// Generic failure; details are on the links tab.
    Error,
}

/// Tabs of the status view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewTab {
    /// Links tab, also used for diagnostics.
    Links,
    /// Info tab.
    Info,
}

/// A consumer of state-change notifications.
///
/// Observers are held weakly: dropping the last `Arc` is enough to stop
/// deliveries, explicit unregistration is only needed to stop them earlier.
pub trait StatusObserver: Send + Sync {
    /// Called with the current state on every fanout.
    fn update(&self, state: ServiceState);

    /// The interactive surface of this view, if it has one.
    fn interactive(&self) -> Option<&dyn InteractiveView> {
        None
    }
}

/// Interactive capabilities of the status view.
pub trait InteractiveView: Send + Sync {
    /// Whether the view is visible and focused.
    fn has_focus(&self) -> bool;

    /// Shows a modal dialog.
    fn show_dialog(&self, dialog: Dialog);

    /// Switches the visible tab.
    fn select_tab(&self, tab: ViewTab);

    /// Shows or updates the progress indicator.
    fn show_progress(&self, message: &str);

    /// Dismisses the progress indicator, if shown.
    fn hide_progress(&self);
}
