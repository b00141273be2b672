//! Interface and address discovery backed by the preference store.

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use anyhow::Result;
use rand::Rng;

use super::keys;
use super::store::PreferenceStore;

/// Kernel routing table.
pub const ROUTE_TABLE_PATH: &str = "/proc/net/route";

/// Destination column value of the default route.
const DEFAULT_DESTINATION: &str = "00000000";

/// Generates a random address in `10.0.0.0/8`.
///
/// Each of the lower three octets is drawn from `0..254`.
pub fn generate_adhoc_ip<R: Rng + ?Sized>(rng: &mut R) -> Ipv4Addr {
    Ipv4Addr::new(
        10,
        rng.gen_range(0..254),
        rng.gen_range(0..254),
        rng.gen_range(0..254),
    )
}

/// Finds the interface carrying the default route in a `/proc/net/route`
/// style table. The first line is a header and is skipped.
pub fn default_route_interface(table: &str) -> Option<String> {
    table.lines().skip(1).find_map(|line| {
        let mut tokens = line.split_whitespace();
        let iface = tokens.next()?;
        let destination = tokens.next()?;
        (destination == DEFAULT_DESTINATION).then(|| iface.to_string())
    })
}

impl PreferenceStore {
    /// Returns the ad-hoc address, generating and storing one if unset.
    pub fn ensure_adhoc_ip<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        let current = self.get_string(keys::ADHOC_IP, "");
        if !current.is_empty() {
            return current;
        }

        let ip = generate_adhoc_ip(rng).to_string();
        self.set(keys::ADHOC_IP, ip.as_str());
        tracing::info!("Generated ad-hoc IP: {}", ip);
        ip
    }

    /// Determines whether a WAN uplink is available.
    ///
    /// A configured `if_wan` wins. Otherwise the default route in
    /// `route_table` is looked up and remembered. Without either, the
    /// `wan_nowait` preference decides.
    pub fn find_if_wan(&self, route_table: &Path) -> Result<bool> {
        if !self.get_string(keys::IF_WAN, "").is_empty() {
            return Ok(true);
        }

        let found = match fs::read_to_string(route_table) {
            Ok(table) => default_route_interface(&table),
            Err(e) => {
                tracing::warn!("Cannot read route table {:?}: {}", route_table, e);
                None
            }
        };

        if let Some(iface) = found {
            tracing::info!("WAN interface found: {}", iface);
            self.set(keys::IF_WAN, iface);
            self.save()?;
            return Ok(true);
        }

        Ok(self.get_bool(keys::WAN_NOWAIT, false))
    }

    /// Stores the LAN interface the worker reported.
    ///
    /// The reported name always replaces whatever was configured.
    pub fn found_if_lan(&self, iface: &str) -> Result<()> {
        if self.get_string(keys::IF_LAN, "").is_empty() {
            tracing::info!("LAN interface found: {}", iface);
        }
        self.set(keys::IF_LAN, iface);
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    const ROUTES: &str = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
wlan0\t0000A8C0\t00000000\t0001\t0\t0\t0\t00FFFFFF\t0\t0\t0
rmnet0\t00000000\t0100000A\t0003\t0\t0\t0\t00000000\t0\t0\t0
";

    #[test]
    fn test_generate_adhoc_ip_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let ip = generate_adhoc_ip(&mut rng);
            let [a, b, c, d] = ip.octets();
            assert_eq!(a, 10);
            assert!(b < 254 && c < 254 && d < 254);
        }
    }

    #[test]
    fn test_default_route_interface() {
        assert_eq!(default_route_interface(ROUTES), Some("rmnet0".to_string()));
    }

    #[test]
    fn test_default_route_interface_none() {
        let table = "Iface\tDestination\nwlan0\t0000A8C0\n";
        assert_eq!(default_route_interface(table), None);
        assert_eq!(default_route_interface(""), None);
    }

    #[test]
    fn test_default_route_skips_header_only() {
        // A header that happens to contain the default destination is ignored.
        let table = "eth0 00000000\n";
        assert_eq!(default_route_interface(table), None);
    }

    #[test]
    fn test_ensure_adhoc_ip_generates_once() {
        let temp_dir = TempDir::new().unwrap();
        let store = PreferenceStore::new(temp_dir.path().join("prefs.json"));
        let mut rng = StdRng::seed_from_u64(1);

        let first = store.ensure_adhoc_ip(&mut rng);
        assert!(first.starts_with("10."));
        let second = store.ensure_adhoc_ip(&mut rng);
        assert_eq!(first, second);
    }

    #[test]
    fn test_ensure_adhoc_ip_keeps_configured() {
        let temp_dir = TempDir::new().unwrap();
        let store = PreferenceStore::new(temp_dir.path().join("prefs.json"));
        store.set(keys::ADHOC_IP, "10.9.9.9");

        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(store.ensure_adhoc_ip(&mut rng), "10.9.9.9");
    }

    #[test]
    fn test_find_if_wan_configured() {
        let temp_dir = TempDir::new().unwrap();
        let store = PreferenceStore::new(temp_dir.path().join("prefs.json"));
        store.set(keys::IF_WAN, "eth1");

        assert!(store.find_if_wan(&temp_dir.path().join("no-route")).unwrap());
        assert_eq!(store.get_string(keys::IF_WAN, ""), "eth1");
    }

    #[test]
    fn test_find_if_wan_from_route_table() {
        let temp_dir = TempDir::new().unwrap();
        let routes = temp_dir.path().join("route");
        fs::write(&routes, ROUTES).unwrap();
        let store = PreferenceStore::new(temp_dir.path().join("prefs.json"));

        assert!(store.find_if_wan(&routes).unwrap());
        assert_eq!(store.get_string(keys::IF_WAN, ""), "rmnet0");
        assert!(store.path().exists());
    }

    #[test]
    fn test_find_if_wan_falls_back_to_nowait() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        let store = PreferenceStore::new(temp_dir.path().join("prefs.json"));

        assert!(!store.find_if_wan(&missing).unwrap());
        store.set(keys::WAN_NOWAIT, true);
        assert!(store.find_if_wan(&missing).unwrap());
    }

    #[test]
    fn test_found_if_lan_overrides() {
        let temp_dir = TempDir::new().unwrap();
        let store = PreferenceStore::new(temp_dir.path().join("prefs.json"));
        store.set(keys::IF_LAN, "wlan0");

        store.found_if_lan("adhoc0").unwrap();
        assert_eq!(store.get_string(keys::IF_LAN, ""), "adhoc0");
    }
}
