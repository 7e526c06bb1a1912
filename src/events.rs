//! Callback traits through which a host application observes session
//! activity: talkgroup changes, diagnostic logging, and discovery filtering.
//!
//! Mirrors the role the original C-ABI callback function pointers played,
//! but expressed as object-safe traits a caller implements and hands to
//! [`crate::session::MagellanSession`] rather than as `extern "C"` pointers.

use crate::model::{DiscoveredDevice, DiscoveryFilterDetail, Talkgroup};

/// Severity of a diagnostic message emitted through a [`LoggingHook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
}

/// Receives diagnostic messages from the core reconciler and discoverers.
///
/// The default [`LoggingFacadeHook`] forwards to the `log` crate, matching
/// the rest of the crate's ambient logging; a host application can supply
/// its own implementation to route messages elsewhere (e.g. into an
/// embedding application's own log sink).
pub trait LoggingHook: Send + Sync {
    /// Called for every diagnostic message the core produces.
    fn on_log(&self, level: LogLevel, message: &str);
}

/// Forwards log messages to the `log` facade. Used when no [`LoggingHook`]
/// is supplied to a session.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingFacadeHook;

impl LoggingHook for LoggingFacadeHook {
    fn on_log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => log::trace!("{}", message),
            LogLevel::Debug => log::debug!("{}", message),
            LogLevel::Info => log::info!("{}", message),
            LogLevel::Warning => log::warn!("{}", message),
            LogLevel::Error => log::error!("{}", message),
        }
    }
}

/// Lets a host application veto a device before the core reconciler begins
/// tracking it, e.g. to restrict discovery to an allow-list of device IDs.
pub trait DiscoveryFilterHook: Send + Sync {
    /// Returns true if the device should be tracked. Called once per
    /// sighting, before the device is added to (or refreshed in) the
    /// reconciler's device map. `detail` carries the
    /// `{serviceType, implementation, name, hostName}` summary (§4.3/§6) a
    /// caller's predicate inspects; it isn't recoverable from `device`
    /// alone.
    fn should_track(&self, device: &DiscoveredDevice, detail: &DiscoveryFilterDetail) -> bool;
}

/// Accepts every discovered device. The default filter when none is set.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllFilter;

impl DiscoveryFilterHook for AcceptAllFilter {
    fn should_track(&self, _device: &DiscoveredDevice, _detail: &DiscoveryFilterDetail) -> bool {
        true
    }
}

/// Receives talkgroup change notifications from the core reconciler.
///
/// A single trait carries all three notification kinds (as opposed to three
/// separate C function pointers) since a host application virtually always
/// implements all of them together; `#[allow(unused_variables)]` default
/// bodies let an implementer override only the ones it cares about.
pub trait TalkgroupCallbacks: Send + Sync {
    /// Called once per talkgroup that appeared in a device's configuration
    /// for the first time.
    #[allow(unused_variables)]
    fn on_new_talkgroups(&self, device_id: &str, talkgroups: &[Talkgroup]) {}

    /// Called once per talkgroup whose structural contents changed between
    /// fetches (per [`crate::model::Matches`]).
    #[allow(unused_variables)]
    fn on_modified_talkgroups(&self, device_id: &str, talkgroups: &[Talkgroup]) {}

    /// Called once per talkgroup no longer present in a device's
    /// configuration, or when the device itself is lost.
    ///
    /// Carries only the removed talkgroups' `id`s, matching the reference
    /// schema's `OnRemovedTalkgroups(Vec<String>)` shape — a removed
    /// talkgroup's full content is no longer meaningful to a host once it's
    /// gone, only which id to retire.
    #[allow(unused_variables)]
    fn on_removed_talkgroups(&self, device_id: &str, ids: &[String]) {}
}

/// Discards every notification. Used before a caller installs its own
/// [`TalkgroupCallbacks`] implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTalkgroupCallbacks;

impl TalkgroupCallbacks for NoopTalkgroupCallbacks {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCallbacks {
        new_count: AtomicUsize,
    }

    impl TalkgroupCallbacks for CountingCallbacks {
        fn on_new_talkgroups(&self, _device_id: &str, talkgroups: &[Talkgroup]) {
            self.new_count.fetch_add(talkgroups.len(), Ordering::SeqCst);
        }
    }

    #[test]
    fn default_methods_are_noops() {
        let cb = NoopTalkgroupCallbacks;
        cb.on_new_talkgroups("device-1", &[Talkgroup::default()]);
        cb.on_modified_talkgroups("device-1", &[Talkgroup::default()]);
        cb.on_removed_talkgroups("device-1", &["tg1".to_string()]);
    }

    #[test]
    fn custom_callback_observes_new_talkgroups() {
        let cb = CountingCallbacks {
            new_count: AtomicUsize::new(0),
        };
        cb.on_new_talkgroups("device-1", &[Talkgroup::default(), Talkgroup::default()]);
        assert_eq!(cb.new_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn accept_all_filter_tracks_everything() {
        let filter = AcceptAllFilter;
        assert!(filter.should_track(&DiscoveredDevice::default(), &DiscoveryFilterDetail::default()));
    }
}
