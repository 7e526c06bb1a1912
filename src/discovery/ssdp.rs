//! SSDP-based device discovery.
//!
//! Maintains a neighbor table keyed by USN: every M-SEARCH response or
//! `ssdp:alive` NOTIFY refreshes (or creates) an entry; a `ssdp:byebye`
//! NOTIFY or an expired CACHE-CONTROL max-age removes it and reports the
//! device lost. Socket setup and header parsing follow the same
//! allocation-light style as the rest of the crate's discovery code: ASCII
//! case-insensitive matching, no per-header lowercasing.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::Ssdp;
use crate::discovery::types::{ssdp_discoverer_key, DiscoveryError, DiscoveryEvent};
use crate::model::{DiscoveredDevice, DiscoveryFilterDetail};
use crate::runtime::TaskSpawner;
use crate::utils::now_millis;

#[inline]
fn starts_with_ignore_ascii_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// Extracts the host (no scheme, no port, no path) from a `LOCATION`/root
/// URL for the filter detail summary (§4.3/§6). Deliberately minimal: this
/// crate has no other need for a URL-parsing dependency, and a `LOCATION`
/// header is always `scheme://host[:port][/path]`.
fn extract_host(url: &str) -> String {
    let after_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let authority = after_scheme.split(['/', '?', '#']).next().unwrap_or(after_scheme);
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            host.to_string()
        }
        _ => authority.to_string(),
    }
}

#[inline]
fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle.as_bytes()))
}

fn header_value<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    let prefix = format!("{}:", name);
    response
        .lines()
        .find(|l| starts_with_ignore_ascii_case(l, &prefix))
        .map(|l| l[prefix.len()..].trim())
}

fn build_msearch(st: &str, mx: i32, listener: SocketAddr, user_agent: &str) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\
         USER-AGENT: {}\r\n\r\n",
        listener, mx, st, user_agent
    )
}

/// A packet accepted past §4.4's acceptance rule: `ST` matches the
/// configured search target and `USN`/`X-Magellan-Id`/`X-Magellan-Cv` are
/// all present. Packets failing any of these are discarded before they
/// ever reach the neighbor table.
struct AcceptedPacket {
    usn: String,
    location: Option<String>,
    max_age_secs: u64,
    byebye: bool,
    magellan_id: String,
    magellan_cv: u64,
}

struct RawPacket {
    st_or_nt: String,
    usn: String,
    location: Option<String>,
    max_age_secs: u64,
    byebye: bool,
    magellan_id: Option<String>,
    magellan_cv: Option<u64>,
}

fn parse_ssdp_message(response: &str) -> Option<RawPacket> {
    let st_or_nt = header_value(response, "st")
        .or_else(|| header_value(response, "nt"))?
        .to_string();
    let usn = header_value(response, "usn")?.to_string();
    let location = header_value(response, "location").map(str::to_string);

    let max_age_secs = header_value(response, "cache-control")
        .and_then(|v| find_ignore_ascii_case(v, "max-age=").map(|idx| &v[idx + 8..]))
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(300);

    let byebye = header_value(response, "nts")
        .map(|v| v.eq_ignore_ascii_case("ssdp:byebye"))
        .unwrap_or(false);

    let magellan_id = header_value(response, "x-magellan-id").map(str::to_string);
    let magellan_cv = header_value(response, "x-magellan-cv").and_then(|v| v.parse::<u64>().ok());

    Some(RawPacket {
        st_or_nt,
        usn,
        location,
        max_age_secs,
        byebye,
        magellan_id,
        magellan_cv,
    })
}

/// Applies §4.4 step 4 ("Acceptance"): discards packets whose `ST` doesn't
/// match `configured_st`, or whose `USN`/`X-Magellan-Id`/`X-Magellan-Cv` is
/// missing. A `byebye` NOTIFY is exempt from the id/cv requirement since it
/// carries neither — its only job is removing a neighbor already known by
/// USN.
fn accept(raw: RawPacket, configured_st: &str) -> Option<AcceptedPacket> {
    if raw.st_or_nt != configured_st {
        return None;
    }

    if raw.byebye {
        return Some(AcceptedPacket {
            usn: raw.usn,
            location: raw.location,
            max_age_secs: raw.max_age_secs,
            byebye: true,
            magellan_id: String::new(),
            magellan_cv: 0,
        });
    }

    let magellan_id = raw.magellan_id?;
    let magellan_cv = raw.magellan_cv?;

    Some(AcceptedPacket {
        usn: raw.usn,
        location: raw.location,
        max_age_secs: raw.max_age_secs,
        byebye: false,
        magellan_id,
        magellan_cv,
    })
}

struct NeighborEntry {
    version: u64,
    expires_at_ms: u64,
}

/// A socket slot shared between the probe loop (sender) and the receive
/// loop (owner of reconnection): the receive loop swaps in a freshly bound
/// socket after a recv error, and the probe loop picks it up on its next
/// send without either task needing to restart.
type SharedSocket = Arc<RwLock<Arc<UdpSocket>>>;

fn create_multicast_socket(listener: SocketAddr, mx: i32) -> Result<UdpSocket, DiscoveryError> {
    let socket =
        Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(DiscoveryError::SocketBind)?;

    let _ = socket.set_reuse_address(true);
    #[cfg(unix)]
    let _ = socket.set_reuse_port(true);
    let _ = socket.set_multicast_ttl_v4(4);
    let _ = socket.set_read_timeout(Some(Duration::from_secs((mx.max(1) as u64) + 1)));

    socket.set_nonblocking(true).map_err(DiscoveryError::SocketBind)?;
    // Bind to the listener's own port (1900 by default), not an ephemeral
    // one: multicast delivery is keyed on destination port, so a socket
    // bound anywhere else never receives NOTIFY datagrams multicast to
    // `239.255.255.250:1900` (§4.4 step 1 — "a UDP socket bound to port
    // 1900"), only unicast M-SEARCH responses would arrive.
    socket
        .bind(&SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), listener.port()).into())
        .map_err(DiscoveryError::SocketBind)?;

    if let IpAddr::V4(group) = listener.ip() {
        socket
            .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
            .map_err(DiscoveryError::SocketBind)?;
    }

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(DiscoveryError::SocketBind)
}

/// A running SSDP discoverer: probe loop, receive loop, and stale-neighbor
/// sweep, all tied to the same cancellation token.
pub struct SsdpDiscoverer {
    cancel: CancellationToken,
    paused: Arc<AtomicBool>,
}

impl SsdpDiscoverer {
    /// Starts discovery using `config`, reporting sightings and losses to
    /// `events`.
    pub fn start(
        config: Ssdp,
        events: mpsc::Sender<DiscoveryEvent>,
        spawner: &dyn TaskSpawner,
    ) -> Result<Self, DiscoveryError> {
        let listener = SocketAddr::new(
            config
                .listener
                .address
                .parse()
                .unwrap_or(IpAddr::V4(Ipv4Addr::new(239, 255, 255, 250))),
            config.listener.port as u16,
        );

        let socket: SharedSocket = Arc::new(RwLock::new(Arc::new(create_multicast_socket(listener, config.mx)?)));
        let neighbors: Arc<Mutex<HashMap<String, NeighborEntry>>> = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();
        let paused = Arc::new(AtomicBool::new(false));

        spawn_probe_loop(
            Arc::clone(&socket),
            listener,
            config.clone(),
            cancel.clone(),
            Arc::clone(&paused),
            spawner,
        );
        spawn_receive_loop(
            Arc::clone(&socket),
            listener,
            Arc::clone(&neighbors),
            events.clone(),
            config.clone(),
            cancel.clone(),
            Arc::clone(&paused),
            spawner,
        );
        spawn_stale_sweep(neighbors, events, config, cancel.clone(), spawner);

        Ok(Self { cancel, paused })
    }

    /// Stops every task belonging to this discoverer.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Advisory pause: stops sending M-SEARCH probes and reporting new
    /// sightings. The neighbor table keeps tracking expiries underneath, so
    /// a `resume` immediately after doesn't re-announce devices that never
    /// actually left.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Reverses [`Self::pause`].
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }
}

impl Drop for SsdpDiscoverer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_probe_loop(
    socket: SharedSocket,
    listener: SocketAddr,
    config: Ssdp,
    cancel: CancellationToken,
    paused: Arc<AtomicBool>,
    spawner: &dyn TaskSpawner,
) {
    spawner.spawn(async move {
        let msg = build_msearch(&config.st, config.mx, listener, &config.user_agent);
        let mut backoff_ms = 1000u64;

        loop {
            if paused.load(Ordering::SeqCst) {
                backoff_ms = 1000;
            } else {
                let current = { Arc::clone(&*socket.read().await) };
                match current.send_to(msg.as_bytes(), listener).await {
                    Ok(_) => backoff_ms = 1000,
                    Err(e) => {
                        log::warn!("[SSDP] failed to send M-SEARCH: {}", e);
                        backoff_ms = (backoff_ms * 2).min(config.max_reconnect_ms);
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_millis(backoff_ms.max(1000))) => {}
            }
        }
    });
}

fn spawn_receive_loop(
    socket: SharedSocket,
    listener: SocketAddr,
    neighbors: Arc<Mutex<HashMap<String, NeighborEntry>>>,
    events: mpsc::Sender<DiscoveryEvent>,
    config: Ssdp,
    cancel: CancellationToken,
    paused: Arc<AtomicBool>,
    spawner: &dyn TaskSpawner,
) {
    spawner.spawn(async move {
        let mut buf = [0u8; 4096];
        // Reconnect loop (§4.4 step 1 / §7): on any recv error, back off
        // `errCount * 100ms` capped at `maxReconnectMs`, rebuild the
        // socket, and retry; the first successful recv resets `errCount`,
        // matching the source's `errCount = 0` on success.
        let mut err_count: u64 = 0;

        loop {
            let current = { Arc::clone(&*socket.read().await) };

            let recv = tokio::select! {
                _ = cancel.cancelled() => break,
                result = current.recv_from(&mut buf) => result,
            };

            let (amt, _src) = match recv {
                Ok(v) => v,
                Err(e) => {
                    err_count += 1;
                    let backoff_ms = (err_count * 100).min(config.max_reconnect_ms);
                    log::warn!(
                        "[SSDP] recv error (attempt {}): {}; reconnecting in {}ms",
                        err_count,
                        e,
                        backoff_ms
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
                    }

                    match create_multicast_socket(listener, config.mx) {
                        Ok(rebuilt) => {
                            *socket.write().await = Arc::new(rebuilt);
                        }
                        Err(e) => {
                            log::warn!("[SSDP] failed to rebuild socket: {}", e);
                        }
                    }
                    continue;
                }
            };
            err_count = 0;

            let text = String::from_utf8_lossy(&buf[..amt]);
            let Some(raw) = parse_ssdp_message(&text) else {
                continue;
            };
            let Some(packet) = accept(raw, &config.st) else {
                continue;
            };

            if packet.byebye {
                // A byebye carries no X-Magellan-Id, but the neighbor table
                // is keyed including id, so every entry for this USN (there
                // should be at most one) is removed.
                let mut map = neighbors.lock().await;
                let dead: Vec<String> = map
                    .keys()
                    .filter(|k| k.starts_with(&format!("ssdp/{}/{}/", config.st, packet.usn)))
                    .cloned()
                    .collect();
                for key in &dead {
                    map.remove(key);
                }
                drop(map);
                for key in dead {
                    let _ = events.send(DiscoveryEvent::Lost { discoverer_key: key }).await;
                }
                continue;
            }

            let key = ssdp_discoverer_key(&config.st, &packet.usn, &packet.magellan_id);
            let expires_at_ms = now_millis() + packet.max_age_secs * 1000;

            // Emission policy (§4.4 step 6): only post DeviceObserved when a
            // neighbor is new or its cv changed; otherwise just refresh its
            // expiry silently.
            let changed = {
                let mut map = neighbors.lock().await;
                match map.get_mut(&key) {
                    Some(existing) => {
                        let changed = existing.version != packet.magellan_cv;
                        existing.version = packet.magellan_cv;
                        existing.expires_at_ms = expires_at_ms;
                        changed
                    }
                    None => {
                        map.insert(
                            key.clone(),
                            NeighborEntry {
                                version: packet.magellan_cv,
                                expires_at_ms,
                            },
                        );
                        true
                    }
                }
            };

            if !changed || paused.load(Ordering::SeqCst) {
                continue;
            }

            let Some(root_url) = packet.location else {
                continue;
            };

            let detail = DiscoveryFilterDetail {
                service_type: config.st.clone(),
                implementation: "ssdp".to_string(),
                name: packet.usn.clone(),
                host_name: extract_host(&root_url),
            };
            let device = DiscoveredDevice {
                discoverer_key: key,
                id: packet.magellan_id,
                config_version: packet.magellan_cv,
                root_url,
            };
            let _ = events.send(DiscoveryEvent::Observed(device, detail)).await;
        }
    });
}

/// Removes every neighbor whose `expires_at_ms` has passed as of `now`,
/// returning their keys. Pulled out of [`spawn_stale_sweep`]'s loop body so
/// the eviction rule (§4.4 step 5/§8 "SSDP liveness") is testable without
/// spinning up a real socket and sleeping in wall-clock time.
fn sweep_expired(now: u64, map: &mut HashMap<String, NeighborEntry>) -> Vec<String> {
    let expired: Vec<String> = map
        .iter()
        .filter(|(_, n)| n.expires_at_ms <= now)
        .map(|(k, _)| k.clone())
        .collect();
    for key in &expired {
        map.remove(key);
    }
    expired
}

fn spawn_stale_sweep(
    neighbors: Arc<Mutex<HashMap<String, NeighborEntry>>>,
    events: mpsc::Sender<DiscoveryEvent>,
    config: Ssdp,
    cancel: CancellationToken,
    spawner: &dyn TaskSpawner,
) {
    spawner.spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_millis(config.stale_neighor_check_interval_ms)) => {}
            }

            let expired = {
                let mut map = neighbors.lock().await;
                sweep_expired(now_millis(), &mut map)
            };

            for key in expired {
                let _ = events
                    .send(DiscoveryEvent::Lost { discoverer_key: key })
                    .await;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_alive_notify_with_magellan_headers() {
        let msg = "NOTIFY * HTTP/1.1\r\n\
                    HOST: 239.255.255.250:1900\r\n\
                    CACHE-CONTROL: max-age=1800\r\n\
                    LOCATION: https://10.0.0.5:8443/\r\n\
                    NT: urn:rallytac-magellan:device:Gateway:1\r\n\
                    NTS: ssdp:alive\r\n\
                    USN: uuid:abc-123\r\n\
                    X-MAGELLAN-ID: {abc-123}\r\n\
                    X-MAGELLAN-CV: 7\r\n\r\n";

        let parsed = parse_ssdp_message(msg).unwrap();
        assert_eq!(parsed.st_or_nt, "urn:rallytac-magellan:device:Gateway:1");
        assert_eq!(parsed.usn, "uuid:abc-123");
        assert_eq!(parsed.max_age_secs, 1800);
        assert!(!parsed.byebye);
        assert_eq!(parsed.magellan_id.as_deref(), Some("{abc-123}"));
        assert_eq!(parsed.magellan_cv, Some(7));
    }

    #[test]
    fn parses_byebye_notify() {
        let msg = "NOTIFY * HTTP/1.1\r\n\
                    NT: urn:rallytac-magellan:device:Gateway:1\r\n\
                    NTS: ssdp:byebye\r\n\
                    USN: uuid:abc-123\r\n\r\n";

        let parsed = parse_ssdp_message(msg).unwrap();
        assert!(parsed.byebye);
    }

    #[test]
    fn extract_host_strips_scheme_port_and_path() {
        assert_eq!(extract_host("https://10.0.0.5:8443/config"), "10.0.0.5");
        assert_eq!(extract_host("http://gateway.local/"), "gateway.local");
        assert_eq!(extract_host("10.0.0.5:1900"), "10.0.0.5");
    }

    #[test]
    fn build_msearch_contains_st_and_mx() {
        let listener: SocketAddr = "239.255.255.250:1900".parse().unwrap();
        let msg = build_msearch("urn:rallytac-magellan:device:Gateway:1", 5, listener, "libmagellan");
        assert!(msg.contains("MX: 5"));
        assert!(msg.contains("ST: urn:rallytac-magellan:device:Gateway:1"));
        assert!(msg.contains("HOST: 239.255.255.250:1900"));
        assert!(msg.contains("USER-AGENT: libmagellan"));
    }

    #[test]
    fn accept_rejects_mismatched_search_target() {
        let raw = RawPacket {
            st_or_nt: "urn:other:device:1".into(),
            usn: "uuid:abc".into(),
            location: None,
            max_age_secs: 300,
            byebye: false,
            magellan_id: Some("id1".into()),
            magellan_cv: Some(1),
        };
        assert!(accept(raw, "urn:rallytac-magellan:device:Gateway:1").is_none());
    }

    #[test]
    fn accept_rejects_missing_magellan_headers() {
        let raw = RawPacket {
            st_or_nt: "urn:rallytac-magellan:device:Gateway:1".into(),
            usn: "uuid:abc".into(),
            location: Some("https://10.0.0.5/config".into()),
            max_age_secs: 300,
            byebye: false,
            magellan_id: None,
            magellan_cv: Some(1),
        };
        assert!(accept(raw, "urn:rallytac-magellan:device:Gateway:1").is_none());
    }

    #[test]
    fn sweep_expired_evicts_only_past_deadline_entries() {
        let mut neighbors = HashMap::new();
        neighbors.insert(
            "ssdp/st/usn-1/id1".to_string(),
            NeighborEntry {
                version: 1,
                expires_at_ms: 1_000,
            },
        );
        neighbors.insert(
            "ssdp/st/usn-2/id2".to_string(),
            NeighborEntry {
                version: 1,
                expires_at_ms: 5_000,
            },
        );

        let expired = sweep_expired(2_000, &mut neighbors);

        assert_eq!(expired, vec!["ssdp/st/usn-1/id1".to_string()]);
        assert_eq!(neighbors.len(), 1, "only the expired neighbor is evicted");
        assert!(neighbors.contains_key("ssdp/st/usn-2/id2"));
    }

    #[test]
    fn sweep_expired_is_empty_when_nothing_has_lapsed() {
        let mut neighbors = HashMap::new();
        neighbors.insert(
            "ssdp/st/usn-1/id1".to_string(),
            NeighborEntry {
                version: 1,
                expires_at_ms: 5_000,
            },
        );

        let expired = sweep_expired(1_000, &mut neighbors);

        assert!(expired.is_empty());
        assert_eq!(neighbors.len(), 1);
    }

    #[test]
    fn accept_passes_byebye_without_magellan_headers() {
        let raw = RawPacket {
            st_or_nt: "urn:rallytac-magellan:device:Gateway:1".into(),
            usn: "uuid:abc".into(),
            location: None,
            max_age_secs: 300,
            byebye: true,
            magellan_id: None,
            magellan_cv: None,
        };
        assert!(accept(raw, "urn:rallytac-magellan:device:Gateway:1").is_some());
    }
}
