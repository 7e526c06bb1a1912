//! The Magellan data model: devices, talkgroups, and their nested records.
//!
//! These types mirror the JSON wire format devices publish at their REST
//! root and that the core reconciler diffs against what it already knows.
//! Field names and defaults follow the original schema exactly so that a
//! device implementation written against that schema needs no translation
//! layer to talk to this crate.

use serde::{Deserialize, Serialize};

/// Structural equality used to decide whether a talkgroup (or one of its
/// nested records) changed between two fetches of the same device.
///
/// This is deliberately distinct from `PartialEq`: two configurations might
/// be `==` yet arrive from different sources, and callers may want to
/// special-case nested comparisons independently of derived equality later.
/// Keeping a single trait lets the reconciler diff `Talkgroup` values
/// without hand-writing a `matches` method per type.
pub trait Matches {
    /// Returns true if `self` and `other` are equivalent for reconciliation
    /// purposes.
    fn matches(&self, other: &Self) -> bool;
}

/// An address and port pair, used both for RX/TX socket endpoints and for
/// Rallypoint hosts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAddress {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: i32,
}

impl Matches for NetworkAddress {
    fn matches(&self, other: &Self) -> bool {
        self.address == other.address && self.port == other.port
    }
}

/// Presence beacon settings for a talkgroup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    #[serde(default)]
    pub force_on_audio_transmit: bool,
    #[serde(default = "Presence::default_format")]
    pub format: i32,
    #[serde(default = "Presence::default_interval_secs")]
    pub interval_secs: i32,
}

impl Presence {
    fn default_format() -> i32 {
        1
    }

    fn default_interval_secs() -> i32 {
        30
    }
}

impl Default for Presence {
    fn default() -> Self {
        Self {
            force_on_audio_transmit: false,
            format: Self::default_format(),
            interval_secs: Self::default_interval_secs(),
        }
    }
}

impl Matches for Presence {
    fn matches(&self, other: &Self) -> bool {
        self == other
    }
}

/// Transmit audio encoding parameters for a talkgroup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxAudio {
    #[serde(default = "TxAudio::default_encoder")]
    pub encoder: String,
    #[serde(default)]
    pub fdx: bool,
    #[serde(default = "TxAudio::default_max_tx_secs")]
    pub max_tx_secs: i32,
    #[serde(default = "TxAudio::default_framing_ms")]
    pub framing_ms: i32,
    #[serde(default)]
    pub no_hdr_ext: bool,
    #[serde(default = "TxAudio::default_extension_send_interval")]
    pub extension_send_interval: i32,
    #[serde(default = "TxAudio::default_header_burst")]
    pub initial_header_burst: i32,
    #[serde(default = "TxAudio::default_header_burst")]
    pub trailing_header_burst: i32,
}

impl TxAudio {
    fn default_encoder() -> String {
        "ctOpus8000".to_string()
    }
    fn default_max_tx_secs() -> i32 {
        30
    }
    fn default_framing_ms() -> i32 {
        60
    }
    fn default_extension_send_interval() -> i32 {
        10
    }
    fn default_header_burst() -> i32 {
        5
    }
}

impl Default for TxAudio {
    fn default() -> Self {
        Self {
            encoder: Self::default_encoder(),
            fdx: false,
            max_tx_secs: Self::default_max_tx_secs(),
            framing_ms: Self::default_framing_ms(),
            no_hdr_ext: false,
            extension_send_interval: Self::default_extension_send_interval(),
            initial_header_burst: Self::default_header_burst(),
            trailing_header_burst: Self::default_header_burst(),
        }
    }
}

impl Matches for TxAudio {
    fn matches(&self, other: &Self) -> bool {
        self == other
    }
}

/// QoS and TTL options for a talkgroup's network traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkOptions {
    #[serde(default = "NetworkOptions::default_priority")]
    pub priority: i32,
    #[serde(default = "NetworkOptions::default_ttl")]
    pub ttl: i32,
}

impl NetworkOptions {
    fn default_priority() -> i32 {
        4
    }
    fn default_ttl() -> i32 {
        1
    }
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            priority: Self::default_priority(),
            ttl: Self::default_ttl(),
        }
    }
}

impl Matches for NetworkOptions {
    fn matches(&self, other: &Self) -> bool {
        self == other
    }
}

/// Security level bounds a talkgroup requires of its participants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TalkgroupSecurity {
    #[serde(default)]
    pub min_level: i32,
    #[serde(default)]
    pub max_level: i32,
}

impl Matches for TalkgroupSecurity {
    fn matches(&self, other: &Self) -> bool {
        self == other
    }
}

/// A Rallypoint relay a talkgroup may route traffic through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rallypoint {
    #[serde(default)]
    pub host: NetworkAddress,
}

impl Matches for Rallypoint {
    fn matches(&self, other: &Self) -> bool {
        self.host.matches(&other.host)
    }
}

/// A single talkgroup offered by a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Talkgroup {
    #[serde(default)]
    pub device_key: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub r#type: i32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub crypto_password: String,
    #[serde(default)]
    pub presence: Presence,
    #[serde(default)]
    pub rallypoints: Vec<Rallypoint>,
    #[serde(default)]
    pub rx: NetworkAddress,
    #[serde(default)]
    pub tx: NetworkAddress,
    #[serde(default)]
    pub tx_audio: TxAudio,
    #[serde(default)]
    pub network_options: NetworkOptions,
    #[serde(default)]
    pub security: TalkgroupSecurity,
}

impl Matches for Talkgroup {
    fn matches(&self, other: &Self) -> bool {
        if self.device_key != other.device_key
            || self.id != other.id
            || self.r#type != other.r#type
            || self.name != other.name
            || self.crypto_password != other.crypto_password
            || !self.presence.matches(&other.presence)
            || !self.rx.matches(&other.rx)
            || !self.tx.matches(&other.tx)
            || !self.tx_audio.matches(&other.tx_audio)
            || !self.network_options.matches(&other.network_options)
            || !self.security.matches(&other.security)
        {
            return false;
        }

        if self.rallypoints.len() != other.rallypoints.len() {
            return false;
        }

        self.rallypoints
            .iter()
            .zip(other.rallypoints.iter())
            .all(|(a, b)| a.matches(b))
    }
}

/// Metadata describing the device itself, independent of its talkgroups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThingInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub r#type: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// A device's full configuration, as returned by its REST root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfiguration {
    #[serde(default)]
    pub discoverer_key: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub date_time_stamp: String,
    #[serde(default)]
    pub thing_info: ThingInfo,
    #[serde(default)]
    pub talkgroups: Vec<Talkgroup>,
}

/// A device as reported by a discovery transport, before its configuration
/// has been fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredDevice {
    /// Opaque key identifying which discoverer produced this sighting,
    /// e.g. `mdns/_magellan._tcp/local/gateway-1` or `ssdp/<ST>/<USN>`.
    pub discoverer_key: String,
    /// Device-provided identifier, typically a GUID.
    pub id: String,
    /// Configuration version advertised at discovery time.
    pub config_version: u64,
    /// URL of the device's REST root.
    pub root_url: String,
}

/// Summary of a discovery sighting handed to a
/// [`crate::events::DiscoveryFilterHook`] before the core reconciler begins
/// tracking the device (§4.3/§6): the JSON shape is
/// `{serviceType, implementation, name, hostName}`.
///
/// `hostName`/`implementation` aren't recoverable from a [`DiscoveredDevice`]
/// alone (its `discovererKey` is opaque to a filter hook), so each
/// discoverer builds this alongside the device it reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryFilterDetail {
    /// The service type or search target the sighting was discovered
    /// under, e.g. `_magellan._tcp` or the configured SSDP `ST`.
    pub service_type: String,
    /// Which transport produced the sighting: `"mdns"` or `"ssdp"`.
    pub implementation: String,
    /// The discoverer-scoped instance name (mDNS fullname, SSDP USN).
    pub name: String,
    /// The resolved host the device was reached at.
    pub host_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_address_matches_ignores_other_fields() {
        let a = NetworkAddress {
            address: "10.0.0.1".into(),
            port: 5061,
        };
        let b = a.clone();
        assert!(a.matches(&b));
    }

    #[test]
    fn talkgroup_matches_requires_equal_rallypoint_order() {
        let mut tg_a = Talkgroup {
            id: "tg1".into(),
            ..Default::default()
        };
        let mut tg_b = tg_a.clone();

        tg_a.rallypoints = vec![
            Rallypoint {
                host: NetworkAddress {
                    address: "10.0.0.1".into(),
                    port: 7001,
                },
            },
            Rallypoint {
                host: NetworkAddress {
                    address: "10.0.0.2".into(),
                    port: 7002,
                },
            },
        ];
        tg_b.rallypoints = vec![tg_a.rallypoints[1].clone(), tg_a.rallypoints[0].clone()];

        assert!(!tg_a.matches(&tg_b), "reordered rallypoints must not match");

        tg_b.rallypoints.reverse();
        assert!(tg_a.matches(&tg_b));
    }

    #[test]
    fn talkgroup_matches_detects_nested_audio_change() {
        let tg_a = Talkgroup {
            id: "tg1".into(),
            ..Default::default()
        };
        let mut tg_b = tg_a.clone();
        tg_b.tx_audio.max_tx_secs += 1;

        assert!(!tg_a.matches(&tg_b));
    }

    #[test]
    fn device_configuration_defaults_to_empty_talkgroups() {
        let parsed: DeviceConfiguration = serde_json::from_str("{}").unwrap();
        assert!(parsed.talkgroups.is_empty());
        assert_eq!(parsed.version, 0);
    }

    #[test]
    fn talkgroup_round_trips_through_json() {
        let tg = Talkgroup {
            device_key: "mdns/_magellan._tcp/local/gw-1".into(),
            id: "tg1".into(),
            name: "Dispatch".into(),
            crypto_password: "s3cret".into(),
            rallypoints: vec![Rallypoint {
                host: NetworkAddress {
                    address: "10.0.0.9".into(),
                    port: 7443,
                },
            }],
            ..Default::default()
        };

        let json = serde_json::to_string(&tg).unwrap();
        let parsed: Talkgroup = serde_json::from_str(&json).unwrap();
        assert_eq!(tg, parsed);
    }

    #[test]
    fn device_configuration_round_trips_through_json() {
        let config = DeviceConfiguration {
            discoverer_key: "ssdp/urn:rallytac-magellan:device:Gateway:1/uuid:abc/id1".into(),
            version: 42,
            date_time_stamp: "2026-07-27T00:00:00Z".into(),
            thing_info: ThingInfo {
                id: "dev-1".into(),
                r#type: "Gateway".into(),
                manufacturer: "RallyTac".into(),
                capabilities: vec!["voice".into(), "telemetry".into()],
            },
            talkgroups: vec![Talkgroup {
                id: "tg1".into(),
                ..Default::default()
            }],
        };

        let json = serde_json::to_string(&config).unwrap();
        let parsed: DeviceConfiguration = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn discovered_device_round_trips_through_json() {
        let device = DiscoveredDevice {
            discoverer_key: "mdns/_magellan._tcp/local/gw-1".into(),
            id: "dev-1".into(),
            config_version: 7,
            root_url: "https://10.0.0.9/config".into(),
        };

        let json = serde_json::to_string(&device).unwrap();
        assert!(json.contains("\"configVersion\":7"));
        let parsed: DiscoveredDevice = serde_json::from_str(&json).unwrap();
        assert_eq!(device, parsed);
    }
}
