//! Magellan - continuous device discovery, configuration fetch, and
//! talkgroup reconciliation for RallyTac gateways.
//!
//! A host application calls [`session::MagellanSession::initialize`] with a
//! JSON configuration, registers a [`events::TalkgroupCallbacks`]
//! implementation, and starts one or more discovery transports with
//! [`session::MagellanSession::begin_discovery`]. From there the library
//! runs autonomously: discoverers report sightings, the core reconciler
//! fetches each device's configuration over HTTPS, diffs its talkgroups
//! against whatever was previously known, and delivers ordered
//! added/modified/removed notifications through a single-consumer work
//! queue.
//!
//! # Architecture
//!
//! - [`session`]: the public entry point — session lifecycle, discovery
//!   tokens, callback registration.
//! - [`bootstrap`]: the composition root wiring a [`config::MagellanConfiguration`]
//!   into a running reconciler, timer manager, and HTTP client.
//! - [`reconciler`]: the core device tracker and talkgroup diff/notify engine.
//! - [`discovery`]: the mDNS and SSDP transports.
//! - [`fetch`]: the HTTPS client that retrieves a device's configuration.
//! - [`timer`]: the adaptive-sleep timer manager driving periodic ticks.
//! - [`work_queue`]: the single-consumer FIFO queue callbacks are delivered on.
//! - [`model`]: the discovery and configuration data model.
//! - [`config`]: session configuration and its JSON schema.
//! - [`events`]: host-facing callback traits (talkgroups, logging, filtering).
//! - [`error`]: centralized error types.
//! - [`runtime`]: task spawning abstraction for runtime independence.

#![warn(clippy::all)]

pub mod bootstrap;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod fetch;
pub mod model;
pub mod reconciler;
pub mod runtime;
pub mod session;
pub mod timer;
pub mod utils;
pub mod work_queue;

pub use bootstrap::bootstrap_reconciler;
pub use config::MagellanConfiguration;
pub use discovery::{DiscoveryError, DiscoveryEvent};
pub use error::{ErrorCode, MagellanError, MagellanResult};
pub use events::{
    AcceptAllFilter, DiscoveryFilterHook, LogLevel, LoggingFacadeHook, LoggingHook,
    NoopTalkgroupCallbacks, TalkgroupCallbacks,
};
pub use fetch::{ConfigFetcher, FetchError, ReqwestFetcher};
pub use model::{
    DeviceConfiguration, DiscoveredDevice, DiscoveryFilterDetail, Matches, NetworkAddress,
    NetworkOptions, Presence, Rallypoint, Talkgroup, TalkgroupSecurity, ThingInfo, TxAudio,
};
pub use reconciler::CoreReconciler;
pub use runtime::{TaskSpawner, TokioSpawner};
pub use session::{DiscoveryToken, MagellanSession};
