//! mDNS/DNS-SD based device discovery.
//!
//! Browses continuously for the configured service type (`_magellan._tcp`
//! by default) and reports every resolved or removed service to the core
//! reconciler. Runs for as long as the returned [`MdnsDiscoverer`] is kept
//! alive; call [`MdnsDiscoverer::stop`] to tear the browse down cleanly.
//!
//! # Key Design Points
//!
//! - Uses resolved record data (IP/port from SRV/A answers), not string
//!   parsing of the service name, as the authoritative address.
//! - Extracts `id` and `cv` (configuration version) from TXT records.
//! - Isolated in this module for forward compatibility (mdns-sd may
//!   deprecate `ServiceResolved` in favor of a richer event in the future).
//! - The filter hook a caller installs is applied once, centrally, in
//!   [`crate::reconciler::CoreReconciler::observe`] rather than separately
//!   in each transport: both discoverers produce the same
//!   [`DiscoveredDevice`] shape the hook examines, so a single call site
//!   covers mDNS and SSDP sightings alike.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::discovery::types::{mdns_discoverer_key, DiscoveryError, DiscoveryEvent};
use crate::model::{DiscoveredDevice, DiscoveryFilterDetail};
use crate::runtime::TaskSpawner;

/// A running mDNS browse for a single service type.
pub struct MdnsDiscoverer {
    cancel: CancellationToken,
    paused: Arc<AtomicBool>,
}

impl MdnsDiscoverer {
    /// Starts browsing `service_type` (e.g. `_magellan._tcp`), reporting
    /// every sighting to `events`.
    pub fn start(
        daemon: Arc<ServiceDaemon>,
        service_type: &str,
        events: mpsc::Sender<DiscoveryEvent>,
        spawner: &dyn TaskSpawner,
    ) -> Result<Self, DiscoveryError> {
        let fq_service_type = format!("{}.local.", service_type.trim_end_matches('.'));

        let receiver = daemon
            .browse(&fq_service_type)
            .map_err(|e| DiscoveryError::MdnsDaemon(e.to_string()))?;

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let paused = Arc::new(AtomicBool::new(false));
        let task_paused = Arc::clone(&paused);
        let service_type = service_type.to_string();

        spawner.spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    event = receiver.recv_async() => {
                        match event {
                            Ok(ServiceEvent::ServiceResolved(info)) => {
                                if task_paused.load(Ordering::SeqCst) {
                                    continue;
                                }
                                if let Some((device, detail)) = parse_resolved(&service_type, &info) {
                                    let key = device.discoverer_key.clone();
                                    log::debug!("[mDNS] resolved {} (id={})", key, device.id);
                                    let _ = events.send(DiscoveryEvent::Observed(device, detail)).await;
                                }
                            }
                            Ok(ServiceEvent::ServiceRemoved(_ty, fullname)) => {
                                let key = mdns_discoverer_key(&service_type, "local", &fullname);
                                log::debug!("[mDNS] removed {}", key);
                                let _ = events
                                    .send(DiscoveryEvent::Lost { discoverer_key: key })
                                    .await;
                            }
                            Ok(_) => {}
                            Err(_) => break,
                        }
                    }
                }
            }
        });

        Ok(Self { cancel, paused })
    }

    /// Stops the browse. Safe to call more than once.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Advisory pause: suppresses new `DeviceObserved` reports. Losses
    /// (`ServiceRemoved`) still flow through, since they reflect ground
    /// truth rather than new discovery work.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Reverses [`Self::pause`].
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }
}

impl Drop for MdnsDiscoverer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Parses a resolved mDNS service record into a [`DiscoveredDevice`] and the
/// [`DiscoveryFilterDetail`] summary (§4.3/§6) a caller's filter hook
/// inspects before the device is tracked.
///
/// Reads `id` and `cv` (configuration version) from TXT records, and an
/// optional `url` override; otherwise builds the root URL from the
/// resolved address and port.
fn parse_resolved(service_type: &str, info: &ServiceInfo) -> Option<(DiscoveredDevice, DiscoveryFilterDetail)> {
    let address = info.get_addresses().iter().next()?.to_string();
    let port = info.get_port();

    let properties = info.get_properties();
    let id = properties.get_property_val_str("id")?.to_string();
    let config_version = properties
        .get_property_val_str("cv")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    // `rootUrl = https://<host>[:port]/config`, port omitted when 0 (§4.3).
    let root_url = properties
        .get_property_val_str("url")
        .map(str::to_string)
        .unwrap_or_else(|| {
            if port == 0 {
                format!("https://{}/config", address)
            } else {
                format!("https://{}:{}/config", address, port)
            }
        });

    let fullname = info.get_fullname();
    let discoverer_key = mdns_discoverer_key(service_type, "local", fullname);
    let host_name = info.get_hostname();

    let device = DiscoveredDevice {
        discoverer_key,
        id,
        config_version,
        root_url,
    };
    let detail = DiscoveryFilterDetail {
        service_type: service_type.to_string(),
        implementation: "mdns".to_string(),
        name: fullname.to_string(),
        host_name: host_name.to_string(),
    };

    Some((device, detail))
}

/// Creates a new mDNS service daemon.
///
/// Should be called once and the daemon shared across discoverers; it
/// spawns its own background thread for mDNS I/O.
pub fn create_daemon() -> Result<ServiceDaemon, DiscoveryError> {
    ServiceDaemon::new().map_err(|e| DiscoveryError::MdnsDaemon(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discoverer_key_uses_service_type_and_fullname() {
        let key = mdns_discoverer_key("_magellan._tcp", "local", "gateway-1._magellan._tcp.local.");
        assert_eq!(key, "mdns/_magellan._tcp/local/gateway-1._magellan._tcp.local.");
    }
}
