//! User preferences.
//!
//! This module provides the persistent preference store and the interface
//! discovery helpers that write into it.

pub mod network;
pub mod store;

pub use network::{default_route_interface, generate_adhoc_ip, ROUTE_TABLE_PATH};
pub use store::{PrefValue, PreferenceStore};

/// Preference keys and their defaults.
pub mod keys {
    use super::PrefValue;

    /// LAN (mesh) interface name reported by the worker.
    pub const IF_LAN: &str = "if_lan";
    /// WAN (uplink) interface name.
    pub const IF_WAN: &str = "if_wan";
    /// Address of this node on the ad-hoc network.
    pub const ADHOC_IP: &str = "adhoc_ip";
    /// Alert when a client joins.
    pub const CLIENT_NOTIFY: &str = "client_notify";
    /// Blink the indicator light on client alerts.
    pub const CLIENT_LIGHT: &str = "client_light";
    /// Suppress sound on client alerts.
    pub const CLIENT_QUIET: &str = "client_quiet";
    /// Sound URI for client alerts; unset or empty means the default sound.
    pub const CLIENT_SOUND: &str = "client_sound";
    /// Start even without a WAN uplink.
    pub const WAN_NOWAIT: &str = "wan_nowait";
    /// Name of the active mesh profile.
    pub const ACTIVE_PROFILE: &str = "active_profile";

    /// Profile used when none has been chosen.
    pub const DEFAULT_PROFILE: &str = "default";

    /// Keys that have a default value, with that value.
    pub fn defaults() -> Vec<(&'static str, PrefValue)> {
        vec![
            (IF_LAN, PrefValue::from("")),
            (IF_WAN, PrefValue::from("")),
            (ADHOC_IP, PrefValue::from("")),
            (CLIENT_NOTIFY, PrefValue::from(false)),
            (CLIENT_LIGHT, PrefValue::from(false)),
            (CLIENT_QUIET, PrefValue::from(false)),
            (WAN_NOWAIT, PrefValue::from(false)),
            (ACTIVE_PROFILE, PrefValue::from(DEFAULT_PROFILE)),
        ]
    }
}
