//! Device discovery transports: mDNS/DNS-SD and SSDP.
//!
//! Both transports report the same [`types::DiscoveryEvent`] shape to the
//! core reconciler, which doesn't care which transport produced a sighting.

pub mod mdns;
pub mod ssdp;
pub mod types;

pub use types::{mdns_discoverer_key, ssdp_discoverer_key, DiscoveryError, DiscoveryEvent};
pub use mdns::MdnsDiscoverer;
pub use ssdp::SsdpDiscoverer;
