//! Shared types for device discovery (mDNS, SSDP) and the events both
//! transports report up to the core reconciler.

use thiserror::Error;

use crate::model::{DiscoveredDevice, DiscoveryFilterDetail};

/// Errors that can occur while starting or running a discoverer.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Failed to bind the UDP socket used for SSDP.
    #[error("failed to bind UDP socket: {0}")]
    SocketBind(#[source] std::io::Error),

    /// Failed to send an SSDP M-SEARCH or NOTIFY datagram.
    #[error("failed to send SSDP message: {0}")]
    SendSearch(#[source] std::io::Error),

    /// No usable network interfaces were found for SSDP.
    #[error("no usable network interfaces found")]
    NoInterfaces,

    /// The mDNS daemon failed to start or browse.
    #[error("mDNS daemon error: {0}")]
    MdnsDaemon(String),
}

/// An event a discoverer reports to the core reconciler.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A device was seen (first sighting, refresh, or SSDP alive notify),
    /// alongside the filter detail summary the discoverer built it from
    /// (§4.3/§6) — carried with the event since it isn't recoverable from
    /// the `DiscoveredDevice` alone.
    Observed(DiscoveredDevice, DiscoveryFilterDetail),
    /// A device is no longer present (SSDP byebye, or its neighbor entry
    /// expired without a refresh).
    Lost {
        /// The discoverer key of the device that was lost.
        discoverer_key: String,
    },
}

/// Builds the discoverer key for an mDNS sighting.
///
/// Format: `mdns/<serviceType>/<domain>/<instanceName>`, matching the
/// shape devices are keyed by in the reconciler's device map.
pub fn mdns_discoverer_key(service_type: &str, domain: &str, instance_name: &str) -> String {
    format!("mdns/{}/{}/{}", service_type, domain, instance_name)
}

/// Builds the discoverer key for an SSDP sighting.
///
/// Format: `ssdp/<ST>/<USN>/<id>`.
pub fn ssdp_discoverer_key(st: &str, usn: &str, id: &str) -> String {
    format!("ssdp/{}/{}/{}", st, usn, id)
}
