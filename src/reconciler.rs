//! The core reconciler: tracks every discovered device, fetches its
//! configuration over HTTPS, diffs talkgroups between fetches, and delivers
//! [`TalkgroupCallbacks`] notifications through a [`WorkQueue`] so a host
//! application always observes them in a single, predictable order.
//!
//! Two [`TimerManager`] ticks drive the reconciler's background work: the
//! URL checker (`urlCheckerIntervalMs` for a first check, a jittered
//! `urlRetryIntervalMs`-scaled backoff after a failed fetch) and the
//! housekeeper (`houseKeeperIntervalMs`), which logs a device-map summary.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::mpsc;

use crate::config::{MagellanConfiguration, RestLink};
use crate::discovery::DiscoveryEvent;
use crate::events::{DiscoveryFilterHook, LogLevel, LoggingHook, TalkgroupCallbacks};
use crate::fetch::{ConfigFetcher, FetchError, ReqwestFetcher};
use crate::model::{DeviceConfiguration, DiscoveredDevice, DiscoveryFilterDetail, Matches, Talkgroup};
use crate::runtime::TaskSpawner;
use crate::utils::now_millis;
use crate::work_queue::WorkQueue;

/// A tracked device's position in the fetch lifecycle (§3 `DeviceTracker`).
///
/// `nextCheckTs > 0` iff `state == Pending`, so the timestamp lives inside
/// the `Pending` variant rather than as a separate field that would be
/// meaningless in every other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackerState {
    /// No fetch outstanding and none scheduled.
    None,
    /// Waiting for `next_check_at_ms` to elapse before the next fetch.
    Pending { next_check_at_ms: u64 },
    /// A fetch for this device is outstanding.
    InProgress,
    /// The most recent fetch succeeded; idle until the next observation or
    /// scheduled recheck.
    Complete,
}

struct TrackedDevice {
    discovered: DiscoveredDevice,
    state: TrackerState,
    cached: Option<DeviceConfiguration>,
    consecutive_errors: u64,
}

impl TrackedDevice {
    fn cached_talkgroup_ids(&self) -> Vec<String> {
        self.cached
            .as_ref()
            .map(|c| c.talkgroups.iter().map(|tg| tg.id.clone()).collect())
            .unwrap_or_default()
    }
}

/// Tracks discovered devices and reconciles their talkgroup configurations.
pub struct CoreReconciler {
    devices: DashMap<String, TrackedDevice>,
    rest_link: RestLink,
    fetcher: Arc<dyn ConfigFetcher>,
    callbacks: RwLock<Arc<dyn TalkgroupCallbacks>>,
    logging: RwLock<Arc<dyn LoggingHook>>,
    filter: Arc<dyn DiscoveryFilterHook>,
    work_queue: WorkQueue,
    spawner: Arc<dyn TaskSpawner>,
    shutting_down: std::sync::atomic::AtomicBool,
}

impl CoreReconciler {
    /// Builds a reconciler from `config`, wiring a production
    /// [`ReqwestFetcher`] and the hooks a [`crate::session::MagellanSession`]
    /// installed. Tests that need a fake network layer should use
    /// [`Self::with_fetcher`] instead.
    pub fn new(
        config: &MagellanConfiguration,
        callbacks: Arc<dyn TalkgroupCallbacks>,
        logging: Arc<dyn LoggingHook>,
        filter: Arc<dyn DiscoveryFilterHook>,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Result<Self, FetchError> {
        let fetcher = Arc::new(ReqwestFetcher::new(&config.rest_link)?);
        Ok(Self::with_fetcher(config, fetcher, callbacks, logging, filter, spawner))
    }

    /// Builds a reconciler with an explicit [`ConfigFetcher`], bypassing
    /// [`ReqwestFetcher`]'s TLS/client construction entirely. Used by tests
    /// that drive the reconciler against a fake fetcher instead of a real
    /// HTTPS client.
    pub fn with_fetcher(
        config: &MagellanConfiguration,
        fetcher: Arc<dyn ConfigFetcher>,
        callbacks: Arc<dyn TalkgroupCallbacks>,
        logging: Arc<dyn LoggingHook>,
        filter: Arc<dyn DiscoveryFilterHook>,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Self {
        Self {
            devices: DashMap::new(),
            rest_link: config.rest_link.clone(),
            fetcher,
            callbacks: RwLock::new(callbacks),
            logging: RwLock::new(logging),
            filter,
            work_queue: WorkQueue::start(spawner.as_ref()),
            spawner,
            shutting_down: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Marks the reconciler as shutting down: every subsequent `observe`,
    /// `lost`, and in-flight fetch result is dropped before it can enqueue a
    /// callback. Does not itself wait for work already queued; pair with
    /// [`Self::drain`].
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Blocks until every closure submitted to the work queue before this
    /// call has finished running. Used by [`crate::session::MagellanSession::shutdown`]
    /// to guarantee no callback fires after it returns.
    pub async fn drain(&self) {
        self.work_queue.submit_and_wait(|| {}).await;
    }

    fn log(&self, level: LogLevel, message: impl AsRef<str>) {
        self.logging.read().on_log(level, message.as_ref());
    }

    /// Installs a new talkgroup callback sink, effective for every
    /// notification dispatched from this point on; anything already
    /// submitted to the work queue keeps running against whatever sink was
    /// current at submission time.
    pub fn set_callbacks(&self, callbacks: Arc<dyn TalkgroupCallbacks>) {
        *self.callbacks.write() = callbacks;
    }

    /// Installs a new logging sink, same ordering guarantee as
    /// [`Self::set_callbacks`].
    pub fn set_logging(&self, logging: Arc<dyn LoggingHook>) {
        *self.logging.write() = logging;
    }

    /// Consumes discovery events from both transports until `receiver`
    /// closes (i.e. until every discoverer has been dropped).
    pub fn spawn_event_loop(self: &Arc<Self>, mut receiver: mpsc::Receiver<DiscoveryEvent>) {
        let reconciler = Arc::clone(self);
        self.spawner.spawn(async move {
            while let Some(event) = receiver.recv().await {
                match event {
                    DiscoveryEvent::Observed(device, detail) => reconciler.observe(device, detail),
                    DiscoveryEvent::Lost { discoverer_key } => reconciler.lost(&discoverer_key),
                }
            }
        });
    }

    /// Records a sighting, enqueuing a fetch when required.
    ///
    /// Implements the `observe` rule of §4.6: a never-seen key always
    /// starts a fetch; a cache hit (`dd.configVersion == cached.version`) is
    /// silent; otherwise a fetch is enqueued unless one is already
    /// `InProgress` or `Pending` — the state-precedence rule the spec
    /// adopts ("enqueue only if not already InProgress/Pending and not
    /// already Complete at same version"). A `Complete` tracker at a
    /// *different* version (a rediscovery after a version bump) does
    /// enqueue a fresh fetch; an in-flight or already-scheduled cycle is
    /// left alone and will see the newer version on its own completion.
    pub fn observe(self: &Arc<Self>, device: DiscoveredDevice, detail: DiscoveryFilterDetail) {
        if self.is_shutting_down() {
            return;
        }
        if !self.filter.should_track(&device, &detail) {
            self.log(LogLevel::Debug, format!("filter rejected device {}", device.id));
            return;
        }

        let key = device.discoverer_key.clone();
        let mut should_fetch = false;

        self.devices
            .entry(key.clone())
            .and_modify(|tracked| {
                tracked.discovered = device.clone();

                let cached_version = tracked.cached.as_ref().map(|c| c.version);
                if cached_version == Some(device.config_version) {
                    return; // Cache hit: no notification, no fetch.
                }

                if !matches!(tracked.state, TrackerState::InProgress | TrackerState::Pending { .. }) {
                    tracked.state = TrackerState::InProgress;
                    should_fetch = true;
                }
            })
            .or_insert_with(|| {
                should_fetch = true;
                TrackedDevice {
                    discovered: device,
                    state: TrackerState::InProgress,
                    cached: None,
                    consecutive_errors: 0,
                }
            });

        if should_fetch {
            self.spawn_fetch(key);
        }
    }

    /// Removes a device from the tracker, reporting any cached talkgroups
    /// as removed.
    pub fn lost(&self, discoverer_key: &str) {
        if self.is_shutting_down() {
            return;
        }
        let Some((_, tracked)) = self.devices.remove(discoverer_key) else {
            return;
        };

        self.log(LogLevel::Info, format!("lost device {}", tracked.discovered.id));
        self.emit_removal(tracked.discovered.id, tracked.cached_talkgroup_ids());
    }

    fn emit_removal(&self, device_id: String, ids: Vec<String>) {
        if ids.is_empty() {
            return;
        }
        let callbacks = self.callbacks.read().clone();
        let logging = self.logging.read().clone();
        self.work_queue.submit(move || {
            run_guarded(&logging, "on_removed_talkgroups", || {
                callbacks.on_removed_talkgroups(&device_id, &ids);
            });
        });
    }

    fn spawn_fetch(self: &Arc<Self>, discoverer_key: String) {
        let Some(root_url) = self.devices.get(&discoverer_key).map(|e| e.discovered.root_url.clone()) else {
            return;
        };

        let reconciler = Arc::clone(self);
        let fetcher = Arc::clone(&self.fetcher);

        self.spawner.spawn(async move {
            let result = fetcher.fetch(&root_url, &discoverer_key).await;
            reconciler.on_fetch_result(&discoverer_key, result);
        });
    }

    /// Applies the result of a configuration fetch for `discoverer_key`,
    /// diffing talkgroups against whatever was previously known and
    /// dispatching callbacks for every change.
    pub fn on_fetch_result(&self, discoverer_key: &str, result: Result<DeviceConfiguration, FetchError>) {
        if self.is_shutting_down() {
            return;
        }
        let Some(mut tracked) = self.devices.get_mut(discoverer_key) else {
            // Discoverer already declared this key lost; drop silently.
            return;
        };

        match result {
            Ok(new_config) => {
                tracked.consecutive_errors = 0;
                tracked.state = TrackerState::Complete;

                let old_talkgroups = tracked.cached.as_ref().map(|c| c.talkgroups.as_slice()).unwrap_or(&[]);
                let (added, modified, removed_tgs) = diff_talkgroups(old_talkgroups, &new_config.talkgroups);
                let device_id = tracked.discovered.id.clone();
                tracked.cached = Some(new_config);
                drop(tracked);

                let removed_ids: Vec<String> = removed_tgs.into_iter().map(|tg| tg.id).collect();
                self.dispatch_diff(device_id, added, modified, removed_ids);
            }
            Err(err) => {
                tracked.consecutive_errors += 1;
                let errors = tracked.consecutive_errors;

                if errors >= self.rest_link.max_url_consecutive_errors {
                    if self.rest_link.abandon_urls_after_consecutive_errors {
                        let device_id = tracked.discovered.id.clone();
                        let ids = tracked.cached_talkgroup_ids();
                        self.log(
                            LogLevel::Warning,
                            format!(
                                "abandoning device {} after {} consecutive fetch errors: {}",
                                device_id, errors, err
                            ),
                        );
                        drop(tracked);
                        self.devices.remove(discoverer_key);
                        self.emit_removal(device_id, ids);
                        return;
                    }
                    // Clamp at the ceiling and keep retrying indefinitely.
                    tracked.consecutive_errors = self.rest_link.max_url_consecutive_errors;
                }

                let errors = tracked.consecutive_errors;
                let jitter_span = (errors * self.rest_link.url_retry_interval_ms).max(1);
                let jitter = rand::thread_rng().gen_range(0..jitter_span);
                let next_check_at_ms = now_millis() + errors * 1000 + jitter;
                tracked.state = TrackerState::Pending { next_check_at_ms };

                self.log(
                    LogLevel::Warning,
                    format!(
                        "fetch failed for device {} ({} consecutive error(s), transient={}): {}",
                        tracked.discovered.id,
                        errors,
                        err.is_transient(),
                        err
                    ),
                );
            }
        }
    }

    fn dispatch_diff(&self, device_id: String, added: Vec<Talkgroup>, modified: Vec<Talkgroup>, removed_ids: Vec<String>) {
        // Emission order is removed -> modified -> added, per §4.6.
        if !removed_ids.is_empty() {
            let callbacks = self.callbacks.read().clone();
            let logging = self.logging.read().clone();
            let device_id = device_id.clone();
            self.work_queue.submit(move || {
                run_guarded(&logging, "on_removed_talkgroups", || {
                    callbacks.on_removed_talkgroups(&device_id, &removed_ids);
                });
            });
        }
        if !modified.is_empty() {
            let callbacks = self.callbacks.read().clone();
            let logging = self.logging.read().clone();
            let device_id = device_id.clone();
            self.work_queue.submit(move || {
                run_guarded(&logging, "on_modified_talkgroups", || {
                    callbacks.on_modified_talkgroups(&device_id, &modified);
                });
            });
        }
        if !added.is_empty() {
            let callbacks = self.callbacks.read().clone();
            let logging = self.logging.read().clone();
            self.work_queue.submit(move || {
                run_guarded(&logging, "on_new_talkgroups", || {
                    callbacks.on_new_talkgroups(&device_id, &added);
                });
            });
        }
    }

    /// One URL-checker tick: fetches configurations for every device whose
    /// `Pending.next_check_at_ms` has elapsed, flipping it to `InProgress`.
    pub fn url_checker_tick(self: &Arc<Self>) {
        let now = now_millis();
        let due: Vec<String> = self
            .devices
            .iter()
            .filter(|entry| matches!(entry.state, TrackerState::Pending { next_check_at_ms } if next_check_at_ms <= now))
            .map(|entry| entry.key().clone())
            .collect();

        for key in due {
            if let Some(mut tracked) = self.devices.get_mut(&key) {
                tracked.state = TrackerState::InProgress;
            } else {
                continue;
            }
            self.spawn_fetch(key);
        }
    }

    /// One housekeeper tick: logs a debug-level summary of the device map.
    /// No other observable behavior, matching the source's
    /// `performHousekeeping()` (§4.6).
    pub fn housekeeper_tick(&self) {
        self.log(LogLevel::Debug, format!("tracking {} device(s)", self.devices.len()));
    }

    /// Returns the number of devices currently tracked, for diagnostics and
    /// tests.
    pub fn tracked_device_count(&self) -> usize {
        self.devices.len()
    }
}

fn run_guarded<F: FnOnce()>(logging: &Arc<dyn LoggingHook>, what: &str, f: F) {
    // A panicking host callback must never take down the reconciler task
    // (§7: "callback exception... never allowed to propagate past the
    // reconciler thread").
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).is_err() {
        logging.on_log(LogLevel::Error, &format!("host callback '{}' panicked; suppressed", what));
    }
}

/// Diffs two talkgroup lists by `id`, returning (added, modified, removed).
fn diff_talkgroups(old: &[Talkgroup], new: &[Talkgroup]) -> (Vec<Talkgroup>, Vec<Talkgroup>, Vec<Talkgroup>) {
    let old_by_id: HashMap<&str, &Talkgroup> = old.iter().map(|tg| (tg.id.as_str(), tg)).collect();
    let new_by_id: HashMap<&str, &Talkgroup> = new.iter().map(|tg| (tg.id.as_str(), tg)).collect();

    let mut added = Vec::new();
    let mut modified = Vec::new();
    for tg in new {
        match old_by_id.get(tg.id.as_str()) {
            None => added.push(tg.clone()),
            Some(prev) if !prev.matches(tg) => modified.push(tg.clone()),
            Some(_) => {}
        }
    }

    let removed = old
        .iter()
        .filter(|tg| !new_by_id.contains_key(tg.id.as_str()))
        .cloned()
        .collect();

    (added, modified, removed)
}
