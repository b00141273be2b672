//! Tethered client records.

use std::net::IpAddr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// A client that joined the tethering session.
///
/// Records are created by the worker when it detects a client and are
/// read-only from then on. They are discarded when the session ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Address leased to the client.
    pub address: IpAddr,
    /// Hardware address, if the worker saw one.
    #[serde(default)]
    pub mac: Option<String>,
    /// Hostname announced in the DHCP request, if any.
    #[serde(default)]
    pub hostname: Option<String>,
    /// When the client was first seen.
    pub joined_at: SystemTime,
}

impl ClientRecord {
    /// Creates a record for a client seen now.
    pub fn new(address: IpAddr) -> Self {
        Self {
            address,
            mac: None,
            hostname: None,
            joined_at: SystemTime::now(),
        }
    }

    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        self.mac = Some(mac.into());
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Human-readable label used in alerts and listings.
    ///
    /// `"laptop (192.168.5.2)"` when a hostname is known, the bare address
    /// otherwise.
    pub fn nice_label(&self) -> String {
        match self.hostname.as_deref().filter(|h| !h.is_empty()) {
            Some(host) => format!("{} ({})", host, self.address),
            None => self.address.to_string(),
        }
    }
}
