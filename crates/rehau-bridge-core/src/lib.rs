// rehau-bridge-core: Zone identity, command synchronization and staleness
// tracking between the REHAU NEA SMART cloud and Home Assistant.

pub mod bridge;
pub mod clock;
pub mod config;
pub mod connector;
pub mod convert;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod model;
pub mod provider;
pub mod rate_limit;
pub mod referential;
pub mod registry;
pub mod schedule;
pub mod staleness;
pub mod store;
pub mod topics;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bridge::{Bridge, BridgeState};
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::BridgeConfig;
pub use connector::{CommandEvent, Connector, InboundEvent, MemoryLink};
pub use dispatcher::{CommandDispatcher, CommandReport, DispatcherConfig};
pub use error::{CommandError, CoreError};
pub use provider::{
    FileInstallationSource, HttpInstallationSource, InstallationSource, StaticTokenProvider,
    TokenFileProvider, TokenProvider, VendorCredentials,
};
pub use rate_limit::RateLimiter;
pub use referential::{ReferentialLoader, Referentials};
pub use registry::{TopicSpace, ZoneEntry, ZoneRegistry, build_topic_space};
pub use staleness::{Freshness, StalenessMonitor, StalenessThresholds};
pub use store::ZoneStateStore;

pub use model::{
    Channel, CommandKind, CommandRecord, CommandStatus, CommandValue, Group, HeatCoolMode,
    Installation, Zone, ZoneId, ZoneState,
};
