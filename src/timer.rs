//! One-shot and repeating timers backing the housekeeper and URL-checker
//! ticks.
//!
//! The dispatcher loop dozes for up to ten minutes when no timers are
//! armed, and otherwise wakes at a quarter of the shortest remaining delay
//! — a deliberately coarse damping factor that keeps wakeups cheap while
//! still firing callbacks within a few milliseconds of their deadline.
//! Any mutation (arm, cancel, restart) notifies the loop immediately so it
//! never sleeps past a newly-shortened deadline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::runtime::TaskSpawner;
use crate::utils::now_millis;

/// Time to sleep when no timers are armed.
const DOZING_MS: u64 = 1000 * 60 * 10;

/// A handle identifying an armed timer, returned by [`TimerManager::set_timer`].
pub type TimerHandle = u64;

/// Callback invoked when a timer fires. Runs on the timer manager's
/// dispatcher task, so it must not block.
pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

struct TimerEvent {
    callback: TimerCallback,
    period_ms: u64,
    expires_at_ms: u64,
    repeat: bool,
}

struct Inner {
    timers: Mutex<HashMap<TimerHandle, TimerEvent>>,
    next_id: AtomicU64,
    wake: Notify,
}

impl Inner {
    fn determine_sleep_ms(&self) -> u64 {
        let timers = self.timers.lock();
        if timers.is_empty() {
            return DOZING_MS;
        }

        let now = now_millis();
        let shortest = timers
            .values()
            .filter(|t| t.expires_at_ms >= now)
            .map(|t| t.expires_at_ms - now)
            .min();

        match shortest {
            Some(delta) => (delta / 4).max(1),
            // Every timer is already overdue; wake almost immediately.
            None => 1,
        }
    }
}

/// Manages one-shot and repeating timers on a single dispatcher task.
pub struct TimerManager {
    inner: Arc<Inner>,
    cancel: CancellationToken,
}

impl TimerManager {
    /// Creates a new, unstarted timer manager.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                timers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                wake: Notify::new(),
            }),
            cancel: CancellationToken::new(),
        }
    }

    /// Starts the dispatcher task on the given spawner.
    pub fn start(&self, spawner: &dyn TaskSpawner) {
        let inner = Arc::clone(&self.inner);
        let cancel = self.cancel.clone();
        spawner.spawn(async move {
            loop {
                let sleep_ms = inner.determine_sleep_ms();
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {}
                    _ = inner.wake.notified() => continue,
                }

                let now = now_millis();
                let fired: Vec<(TimerHandle, TimerCallback)> = {
                    let mut timers = inner.timers.lock();
                    let due: Vec<TimerHandle> = timers
                        .iter()
                        .filter(|(_, t)| t.expires_at_ms <= now)
                        .map(|(h, _)| *h)
                        .collect();

                    let mut fired = Vec::with_capacity(due.len());
                    for handle in due {
                        if let Some(event) = timers.get_mut(&handle) {
                            fired.push((handle, Arc::clone(&event.callback)));
                            if event.repeat {
                                event.expires_at_ms = now_millis() + event.period_ms;
                            } else {
                                timers.remove(&handle);
                            }
                        }
                    }
                    fired
                };

                for (_, callback) in fired {
                    callback();
                }
            }
        });
    }

    /// Stops the dispatcher task and discards all armed timers.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.inner.timers.lock().clear();
    }

    /// Arms a timer that fires after `duration`, repeating if `repeat` is set.
    pub fn set_timer(&self, callback: TimerCallback, duration: Duration, repeat: bool) -> TimerHandle {
        let handle = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let period_ms = duration.as_millis() as u64;

        self.inner.timers.lock().insert(
            handle,
            TimerEvent {
                callback,
                period_ms,
                expires_at_ms: now_millis() + period_ms,
                repeat,
            },
        );
        self.inner.wake.notify_one();
        handle
    }

    /// Cancels a timer. A no-op if the handle is unknown or already fired.
    pub fn cancel_timer(&self, handle: TimerHandle) {
        self.inner.timers.lock().remove(&handle);
        self.inner.wake.notify_one();
    }

    /// Resets a timer's expiry to `now + period` without changing its period
    /// or repeat flag.
    pub fn restart_timer(&self, handle: TimerHandle) {
        let mut timers = self.inner.timers.lock();
        if let Some(event) = timers.get_mut(&handle) {
            event.expires_at_ms = now_millis() + event.period_ms;
        }
        drop(timers);
        self.inner.wake.notify_one();
    }
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}
