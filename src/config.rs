//! Static configuration for a Magellan session: discovery transports, the
//! housekeeper interval, and the REST link used to fetch device
//! configurations.
//!
//! Every default here matches the reference configuration schema so that a
//! configuration file written for that implementation loads unchanged.

use serde::{Deserialize, Serialize};

use crate::model::NetworkAddress;

/// Default SSDP multicast listener address.
const DEFAULT_SSDP_ADDRESS: &str = "239.255.255.250";
/// Default SSDP multicast listener port.
const DEFAULT_SSDP_PORT: i32 = 1900;
/// Default SSDP search target for Magellan gateways.
const DEFAULT_SSDP_ST: &str = "urn:rallytac-magellan:device:Gateway:1";
/// Default mDNS/DNS-SD service type browsed by the mDNS discoverer.
pub const DEFAULT_MDNS_SERVICE_TYPE: &str = "_magellan._tcp";

/// SSDP multicast listener address, defaulting to 239.255.255.250:1900.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SsdpNetworkAddress {
    #[serde(default = "SsdpNetworkAddress::default_address")]
    pub address: String,
    #[serde(default = "SsdpNetworkAddress::default_port")]
    pub port: i32,
}

impl SsdpNetworkAddress {
    fn default_address() -> String {
        DEFAULT_SSDP_ADDRESS.to_string()
    }

    fn default_port() -> i32 {
        DEFAULT_SSDP_PORT
    }

    /// Applies defaults to any field left unset (empty address, non-positive port).
    ///
    /// Only needed when a listener is assembled programmatically rather than
    /// parsed from JSON, since the `serde(default = ...)` attributes above
    /// already cover the deserialization path.
    pub fn set_defaults_if_necessary(&mut self) {
        if self.address.is_empty() {
            self.address = DEFAULT_SSDP_ADDRESS.to_string();
        }
        if self.port <= 0 {
            self.port = DEFAULT_SSDP_PORT;
        }
    }

    /// Returns the listener as a [`NetworkAddress`].
    pub fn as_network_address(&self) -> NetworkAddress {
        NetworkAddress {
            address: self.address.clone(),
            port: self.port,
        }
    }
}

impl Default for SsdpNetworkAddress {
    fn default() -> Self {
        Self {
            address: Self::default_address(),
            port: Self::default_port(),
        }
    }
}

/// SSDP discoverer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ssdp {
    #[serde(default)]
    pub listener: SsdpNetworkAddress,
    #[serde(default = "Ssdp::default_st")]
    pub st: String,
    #[serde(default = "Ssdp::default_mx")]
    pub mx: i32,
    #[serde(default = "Ssdp::default_user_agent")]
    pub user_agent: String,
    #[serde(default = "Ssdp::default_max_reconnect_ms")]
    pub max_reconnect_ms: u64,
    #[serde(default = "Ssdp::default_stale_neighor_check_interval_ms")]
    pub stale_neighor_check_interval_ms: u64,
}

impl Ssdp {
    fn default_st() -> String {
        DEFAULT_SSDP_ST.to_string()
    }
    fn default_mx() -> i32 {
        5
    }
    fn default_user_agent() -> String {
        "libmagellan".to_string()
    }
    fn default_max_reconnect_ms() -> u64 {
        10_000
    }
    fn default_stale_neighor_check_interval_ms() -> u64 {
        5_000
    }
}

impl Default for Ssdp {
    fn default() -> Self {
        Self {
            listener: SsdpNetworkAddress::default(),
            st: Self::default_st(),
            mx: Self::default_mx(),
            user_agent: Self::default_user_agent(),
            max_reconnect_ms: Self::default_max_reconnect_ms(),
            stale_neighor_check_interval_ms: Self::default_stale_neighor_check_interval_ms(),
        }
    }
}

/// mDNS discoverer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mdns {
    #[serde(default = "Mdns::default_service_type")]
    pub service_type: String,
}

impl Mdns {
    fn default_service_type() -> String {
        DEFAULT_MDNS_SERVICE_TYPE.to_string()
    }
}

impl Default for Mdns {
    fn default() -> Self {
        Self {
            service_type: Self::default_service_type(),
        }
    }
}

/// TLS material and retry policy for fetching a device's configuration over
/// its REST link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestLink {
    #[serde(default)]
    pub cert_file: String,
    #[serde(default)]
    pub cert_pass: String,
    #[serde(default)]
    pub key_file: String,
    #[serde(default)]
    pub key_pass: String,
    #[serde(default)]
    pub ca_bundle: String,
    #[serde(default = "RestLink::default_true")]
    pub verify_peer: bool,
    #[serde(default = "RestLink::default_true")]
    pub verify_host: bool,
    #[serde(default = "RestLink::default_url_checker_interval_ms")]
    pub url_checker_interval_ms: u64,
    #[serde(default = "RestLink::default_url_retry_interval_ms")]
    pub url_retry_interval_ms: u64,
    #[serde(default = "RestLink::default_max_url_consecutive_errors")]
    pub max_url_consecutive_errors: u64,
    #[serde(default)]
    pub abandon_urls_after_consecutive_errors: bool,
    #[serde(default)]
    pub log_url_operation: bool,
}

impl RestLink {
    fn default_true() -> bool {
        true
    }
    fn default_url_checker_interval_ms() -> u64 {
        2_500
    }
    fn default_url_retry_interval_ms() -> u64 {
        5_000
    }
    fn default_max_url_consecutive_errors() -> u64 {
        50
    }
}

impl Default for RestLink {
    fn default() -> Self {
        Self {
            cert_file: String::new(),
            cert_pass: String::new(),
            key_file: String::new(),
            key_pass: String::new(),
            ca_bundle: String::new(),
            verify_peer: true,
            verify_host: true,
            url_checker_interval_ms: Self::default_url_checker_interval_ms(),
            url_retry_interval_ms: Self::default_url_retry_interval_ms(),
            max_url_consecutive_errors: Self::default_max_url_consecutive_errors(),
            abandon_urls_after_consecutive_errors: false,
            log_url_operation: false,
        }
    }
}

/// Top-level session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MagellanConfiguration {
    #[serde(default = "MagellanConfiguration::default_housekeeper_interval_ms")]
    pub house_keeper_interval_ms: u64,
    #[serde(default)]
    pub rest_link: RestLink,
    #[serde(default)]
    pub mdns: Mdns,
    #[serde(default)]
    pub ssdp: Ssdp,
}

impl MagellanConfiguration {
    fn default_housekeeper_interval_ms() -> u64 {
        5_000
    }
}

impl Default for MagellanConfiguration {
    fn default() -> Self {
        Self {
            house_keeper_interval_ms: Self::default_housekeeper_interval_ms(),
            rest_link: RestLink::default(),
            mdns: Mdns::default(),
            ssdp: Ssdp::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_schema() {
        let cfg = MagellanConfiguration::default();
        assert_eq!(cfg.house_keeper_interval_ms, 5_000);
        assert_eq!(cfg.ssdp.listener.address, "239.255.255.250");
        assert_eq!(cfg.ssdp.listener.port, 1900);
        assert_eq!(cfg.ssdp.st, "urn:rallytac-magellan:device:Gateway:1");
        assert_eq!(cfg.ssdp.mx, 5);
        assert_eq!(cfg.mdns.service_type, DEFAULT_MDNS_SERVICE_TYPE);
        assert_eq!(cfg.rest_link.url_checker_interval_ms, 2_500);
        assert_eq!(cfg.rest_link.url_retry_interval_ms, 5_000);
        assert_eq!(cfg.rest_link.max_url_consecutive_errors, 50);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let cfg: MagellanConfiguration = serde_json::from_str(r#"{"ssdp": {"mx": 8}}"#).unwrap();
        assert_eq!(cfg.ssdp.mx, 8);
        assert_eq!(cfg.ssdp.st, "urn:rallytac-magellan:device:Gateway:1");
        assert_eq!(cfg.house_keeper_interval_ms, 5_000);
    }

    #[test]
    fn configuration_round_trips_through_json() {
        let mut cfg = MagellanConfiguration::default();
        cfg.rest_link.cert_file = "client.pem".into();
        cfg.rest_link.max_url_consecutive_errors = 12;
        cfg.ssdp.st = "urn:rallytac-magellan:device:Gateway:2".into();

        let json = serde_json::to_string(&cfg).unwrap();
        let parsed: MagellanConfiguration = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.rest_link.cert_file, cfg.rest_link.cert_file);
        assert_eq!(parsed.rest_link.max_url_consecutive_errors, cfg.rest_link.max_url_consecutive_errors);
        assert_eq!(parsed.ssdp.st, cfg.ssdp.st);
        assert_eq!(parsed.house_keeper_interval_ms, cfg.house_keeper_interval_ms);
    }
}
