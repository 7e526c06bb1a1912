//! Session / API layer: the single entry point a host application uses to
//! start, configure, and stop Magellan discovery (§4.7).
//!
//! Mirrors the role the source's file-scope singletons played (logger, work
//! queues, timer manager, configuration) as one explicit object a caller
//! creates with [`MagellanSession::initialize`] and tears down with
//! [`MagellanSession::shutdown`], rather than process-wide statics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use mdns_sd::ServiceDaemon;
use parking_lot::Mutex;

use crate::bootstrap::{self, BootstrappedReconciler};
use crate::config::MagellanConfiguration;
use crate::discovery::mdns;
use crate::discovery::{MdnsDiscoverer, SsdpDiscoverer};
use crate::error::{MagellanError, MagellanResult};
use crate::events::{
    AcceptAllFilter, DiscoveryFilterHook, LoggingFacadeHook, LoggingHook, NoopTalkgroupCallbacks,
    TalkgroupCallbacks,
};
use crate::runtime::{TaskSpawner, TokioSpawner};

/// Opaque handle to a running discoverer, returned by
/// [`MagellanSession::begin_discovery`].
///
/// Owned exclusively by the session (see the design note on reference
/// counting): a caller holds only this token, never the discoverer itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiscoveryToken(u64);

enum DiscovererHandle {
    Mdns(MdnsDiscoverer),
    Ssdp(SsdpDiscoverer),
}

impl DiscovererHandle {
    fn pause(&self) {
        match self {
            Self::Mdns(d) => d.pause(),
            Self::Ssdp(d) => d.pause(),
        }
    }

    fn resume(&self) {
        match self {
            Self::Mdns(d) => d.resume(),
            Self::Ssdp(d) => d.resume(),
        }
    }
}

struct Running {
    config: MagellanConfiguration,
    bootstrapped: BootstrappedReconciler,
    discoverers: DashMap<DiscoveryToken, DiscovererHandle>,
    next_token: AtomicU64,
    // Shared across every mDNS discoverer the session starts; mdns-sd spawns
    // its own I/O thread per daemon, so sessions with multiple mDNS
    // discoverers reuse one rather than paying for several.
    mdns_daemon: Mutex<Option<Arc<ServiceDaemon>>>,
}

/// A running Magellan session: owns the reconciler, its timers, and every
/// active discovery transport.
pub struct MagellanSession {
    state: Mutex<Option<Running>>,
    spawner: Arc<dyn TaskSpawner>,
}

impl MagellanSession {
    /// Creates an uninitialized session bound to the calling task's Tokio
    /// runtime. Call [`Self::initialize`] before starting discovery.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context (see
    /// [`TokioSpawner::current`]).
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
            spawner: Arc::new(TokioSpawner::current()),
        }
    }

    /// Parses `config_json`, builds the reconciler and its periodic timers,
    /// and readies the session for [`Self::begin_discovery`].
    ///
    /// `filter` defaults to [`AcceptAllFilter`] when `None`. Talkgroup
    /// callbacks and the logging hook start as no-ops; install real ones
    /// with [`Self::set_talkgroup_callbacks`] and [`Self::set_logging_hook`]
    /// before or after this call.
    ///
    /// Idempotent in the sense that calling it again on an already-running
    /// session is always safe: it returns
    /// [`MagellanError::AlreadyInitialized`] and leaves the running session
    /// untouched, rather than tearing it down and rebuilding it.
    ///
    /// # Errors
    ///
    /// Returns [`MagellanError::InvalidParameters`] if `config_json` fails
    /// to parse, and whatever [`bootstrap::bootstrap_reconciler`] returns if
    /// the reconciler's HTTPS client can't be built.
    pub fn initialize(
        &self,
        config_json: &str,
        filter: Option<Arc<dyn DiscoveryFilterHook>>,
    ) -> MagellanResult<()> {
        let mut state = self.state.lock();
        if state.is_some() {
            return Err(MagellanError::AlreadyInitialized);
        }

        let config: MagellanConfiguration = serde_json::from_str(config_json)
            .map_err(|e| MagellanError::InvalidParameters(format!("invalid configuration JSON: {}", e)))?;

        tracing::info!("initializing magellan session");

        let filter = filter.unwrap_or_else(|| Arc::new(AcceptAllFilter) as Arc<dyn DiscoveryFilterHook>);
        let bootstrapped = bootstrap::bootstrap_reconciler(
            &config,
            Arc::new(NoopTalkgroupCallbacks),
            Arc::new(LoggingFacadeHook),
            filter,
            Arc::clone(&self.spawner),
        )?;

        *state = Some(Running {
            config,
            bootstrapped,
            discoverers: DashMap::new(),
            next_token: AtomicU64::new(1),
            mdns_daemon: Mutex::new(None),
        });

        Ok(())
    }

    /// Tears the session down in exact LIFO order: every discoverer a
    /// caller started (created after `initialize`) is stopped first, then
    /// the reconciler's periodic timers, then the reconciler's work queue
    /// is drained so no talkgroup callback fires after this returns.
    ///
    /// Idempotent: a session that was never initialized, or one already
    /// shut down, returns immediately.
    pub async fn shutdown(&self) {
        let running = self.state.lock().take();
        let Some(running) = running else {
            return;
        };

        tracing::info!("shutting down magellan session");
        running.discoverers.clear();
        running.bootstrapped.shutdown().await;
    }

    /// Starts a discovery transport (`"mdns"`, the default for an empty
    /// string, or `"ssdp"`) and returns an opaque token identifying it.
    ///
    /// # Errors
    ///
    /// Returns [`MagellanError::NotInitialized`] before `initialize`
    /// succeeds, [`MagellanError::InvalidParameters`] for an unrecognized
    /// discovery type, or [`MagellanError::Discovery`] if the transport
    /// fails to start (socket bind failure, mDNS daemon failure).
    pub fn begin_discovery(&self, discovery_type: &str) -> MagellanResult<DiscoveryToken> {
        let state = self.state.lock();
        let running = state.as_ref().ok_or(MagellanError::NotInitialized)?;

        let kind = if discovery_type.is_empty() { "mdns" } else { discovery_type };

        let handle = match kind {
            "mdns" => {
                let daemon = {
                    let mut guard = running.mdns_daemon.lock();
                    if guard.is_none() {
                        *guard = Some(Arc::new(mdns::create_daemon()?));
                    }
                    Arc::clone(guard.as_ref().expect("just initialized above"))
                };
                DiscovererHandle::Mdns(MdnsDiscoverer::start(
                    daemon,
                    &running.config.mdns.service_type,
                    running.bootstrapped.event_tx.clone(),
                    running.bootstrapped.spawner.as_ref(),
                )?)
            }
            "ssdp" => DiscovererHandle::Ssdp(SsdpDiscoverer::start(
                running.config.ssdp.clone(),
                running.bootstrapped.event_tx.clone(),
                running.bootstrapped.spawner.as_ref(),
            )?),
            other => {
                return Err(MagellanError::InvalidParameters(format!(
                    "unknown discovery type '{}'",
                    other
                )))
            }
        };

        let token = DiscoveryToken(running.next_token.fetch_add(1, Ordering::SeqCst));
        running.discoverers.insert(token, handle);
        Ok(token)
    }

    /// Stops a discoverer and removes its token. A no-op if `token` is
    /// already gone.
    pub fn end_discovery(&self, token: DiscoveryToken) -> MagellanResult<()> {
        let state = self.state.lock();
        let running = state.as_ref().ok_or(MagellanError::NotInitialized)?;
        running.discoverers.remove(&token);
        Ok(())
    }

    /// Advisory hint forwarded to `token`'s transport: stop sending probes
    /// and reporting new sightings, without tearing the transport down.
    pub fn pause_discovery(&self, token: DiscoveryToken) -> MagellanResult<()> {
        let state = self.state.lock();
        let running = state.as_ref().ok_or(MagellanError::NotInitialized)?;
        if let Some(handle) = running.discoverers.get(&token) {
            handle.pause();
        }
        Ok(())
    }

    /// Reverses [`Self::pause_discovery`].
    pub fn resume_discovery(&self, token: DiscoveryToken) -> MagellanResult<()> {
        let state = self.state.lock();
        let running = state.as_ref().ok_or(MagellanError::NotInitialized)?;
        if let Some(handle) = running.discoverers.get(&token) {
            handle.resume();
        }
        Ok(())
    }

    /// Installs a new talkgroup callback sink. Safe to call at any time
    /// after [`Self::initialize`]; takes effect for every notification
    /// dispatched from this point forward (see
    /// [`crate::reconciler::CoreReconciler::set_callbacks`]).
    pub fn set_talkgroup_callbacks(&self, callbacks: Arc<dyn TalkgroupCallbacks>) -> MagellanResult<()> {
        let state = self.state.lock();
        let running = state.as_ref().ok_or(MagellanError::NotInitialized)?;
        running.bootstrapped.reconciler.set_callbacks(callbacks);
        Ok(())
    }

    /// Installs a new logging hook, same timing guarantee as
    /// [`Self::set_talkgroup_callbacks`].
    pub fn set_logging_hook(&self, logging: Arc<dyn LoggingHook>) -> MagellanResult<()> {
        let state = self.state.lock();
        let running = state.as_ref().ok_or(MagellanError::NotInitialized)?;
        running.bootstrapped.reconciler.set_logging(logging);
        Ok(())
    }

    /// Returns the number of devices currently tracked, for diagnostics.
    ///
    /// Returns 0 for an uninitialized session rather than an error, since
    /// "how many devices" has an unambiguous answer even then.
    pub fn tracked_device_count(&self) -> usize {
        self.state
            .lock()
            .as_ref()
            .map(|r| r.bootstrapped.reconciler.tracked_device_count())
            .unwrap_or(0)
    }
}

impl Default for MagellanSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn operations_before_initialize_return_not_initialized() {
        let session = MagellanSession::new();
        assert!(matches!(
            session.begin_discovery("mdns"),
            Err(MagellanError::NotInitialized)
        ));
        assert!(matches!(
            session.set_talkgroup_callbacks(Arc::new(NoopTalkgroupCallbacks)),
            Err(MagellanError::NotInitialized)
        ));
        assert_eq!(session.tracked_device_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_before_initialize_is_a_noop() {
        let session = MagellanSession::new();
        session.shutdown().await;
    }

    #[tokio::test]
    async fn initialize_is_idempotent_against_double_call() {
        let session = MagellanSession::new();
        session.initialize("{}", None).unwrap();
        assert!(matches!(
            session.initialize("{}", None),
            Err(MagellanError::AlreadyInitialized)
        ));
        session.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_configuration_json_is_rejected() {
        let session = MagellanSession::new();
        let err = session.initialize("not json", None).unwrap_err();
        assert!(matches!(err, MagellanError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn unknown_discovery_type_is_rejected() {
        let session = MagellanSession::new();
        session.initialize("{}", None).unwrap();
        assert!(matches!(
            session.begin_discovery("bluetooth"),
            Err(MagellanError::InvalidParameters(_))
        ));
        session.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_across_repeated_calls() {
        let session = MagellanSession::new();
        session.initialize("{}", None).unwrap();
        session.shutdown().await;
        session.shutdown().await;
    }
}
