//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where the
//! core reconciler, its HTTP client, and its periodic timers are
//! instantiated and wired together. This pattern provides:
//!
//! - **Clarity**: All dependency relationships are visible in one place
//! - **Testability**: Easy to swap implementations for testing
//! - **Maintainability**: Service creation logic is isolated from usage

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::MagellanConfiguration;
use crate::discovery::DiscoveryEvent;
use crate::error::MagellanResult;
use crate::events::{DiscoveryFilterHook, LoggingHook, TalkgroupCallbacks};
use crate::reconciler::CoreReconciler;
use crate::runtime::TaskSpawner;
use crate::timer::{TimerHandle, TimerManager};

/// Capacity of the channel both discovery transports post sightings onto.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Everything [`bootstrap_reconciler`] wires up: the reconciler itself, its
/// timer manager, and the sender end discoverers use to post events.
///
/// Held by [`crate::session::MagellanSession`] for the life of the session;
/// [`Self::shutdown`] tears it down in the reverse of the order it was
/// built in.
pub struct BootstrappedReconciler {
    /// The core device tracker and talkgroup diff/notify engine.
    pub reconciler: Arc<CoreReconciler>,
    /// Sender end discoverers use to post sightings and losses.
    pub event_tx: mpsc::Sender<DiscoveryEvent>,
    /// Shared task spawner, reused when starting discovery transports.
    pub spawner: Arc<dyn TaskSpawner>,
    timers: TimerManager,
    url_checker_timer: TimerHandle,
    housekeeper_timer: TimerHandle,
}

impl BootstrappedReconciler {
    /// Tears down the timers, then the reconciler, in the reverse of the
    /// order [`bootstrap_reconciler`] built them.
    ///
    /// After this returns, no talkgroup callback will fire again: the
    /// reconciler refuses new observations/losses/fetch results, and the
    /// work queue has drained everything submitted before the call.
    pub async fn shutdown(&self) {
        log::info!("[bootstrap] stopping periodic timers");
        self.timers.cancel_timer(self.url_checker_timer);
        self.timers.cancel_timer(self.housekeeper_timer);
        self.timers.stop();

        log::info!("[bootstrap] draining reconciler work queue");
        self.reconciler.begin_shutdown();
        self.reconciler.drain().await;
    }
}

/// Bootstraps the core reconciler and its periodic timers.
///
/// This is the composition root where the reconciler, its HTTP client, and
/// its timer-driven ticks are instantiated and wired together. The wiring
/// order matters - services are created in dependency order:
///
/// 1. The core reconciler (builds the shared HTTPS client from `config.rest_link`).
/// 2. The discovery event channel, with its consumer loop spawned on the reconciler.
/// 3. The timer manager, started immediately.
/// 4. The URL-checker and housekeeper periodic ticks, armed against the timer manager.
///
/// # Errors
///
/// Returns [`crate::error::MagellanError::Fetch`] if the reconciler's HTTPS
/// client cannot be built (e.g. malformed TLS material in `config.rest_link`).
pub fn bootstrap_reconciler(
    config: &MagellanConfiguration,
    callbacks: Arc<dyn TalkgroupCallbacks>,
    logging: Arc<dyn LoggingHook>,
    filter: Arc<dyn DiscoveryFilterHook>,
    spawner: Arc<dyn TaskSpawner>,
) -> MagellanResult<BootstrappedReconciler> {
    let reconciler = Arc::new(CoreReconciler::new(
        config,
        callbacks,
        logging,
        filter,
        Arc::clone(&spawner),
    )?);

    let (event_tx, event_rx) = mpsc::channel::<DiscoveryEvent>(EVENT_CHANNEL_CAPACITY);
    reconciler.spawn_event_loop(event_rx);

    let timers = TimerManager::new();
    timers.start(spawner.as_ref());

    let url_checker_timer = {
        let reconciler = Arc::clone(&reconciler);
        timers.set_timer(
            Arc::new(move || reconciler.url_checker_tick()),
            std::time::Duration::from_millis(config.rest_link.url_checker_interval_ms),
            true,
        )
    };

    let housekeeper_timer = {
        let reconciler = Arc::clone(&reconciler);
        timers.set_timer(
            Arc::new(move || reconciler.housekeeper_tick()),
            std::time::Duration::from_millis(config.house_keeper_interval_ms),
            true,
        )
    };

    Ok(BootstrappedReconciler {
        reconciler,
        event_tx,
        spawner,
        timers,
        url_checker_timer,
        housekeeper_timer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AcceptAllFilter, LoggingFacadeHook, NoopTalkgroupCallbacks};
    use crate::runtime::TokioSpawner;

    #[tokio::test]
    async fn bootstrap_wires_reconciler_and_timers() {
        let config = MagellanConfiguration::default();
        let spawner = Arc::new(TokioSpawner::current());

        let bootstrapped = bootstrap_reconciler(
            &config,
            Arc::new(NoopTalkgroupCallbacks),
            Arc::new(LoggingFacadeHook),
            Arc::new(AcceptAllFilter),
            spawner,
        )
        .unwrap();

        assert_eq!(bootstrapped.reconciler.tracked_device_count(), 0);
        bootstrapped.shutdown().await;
    }
}
