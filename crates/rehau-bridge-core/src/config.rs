// ── Runtime bridge configuration ──
//
// Timing and naming knobs for a running `Bridge`. Never touches disk:
// the binary loads files and environment, validates them, and hands a
// `BridgeConfig` in.

use std::time::Duration;

use crate::dispatcher::DispatcherConfig;
use crate::staleness::StalenessThresholds;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Installation poll period. Zero disables periodic polling.
    pub zone_reload_interval: Duration,
    /// Token refresh period. Zero disables it.
    pub token_refresh_interval: Duration,
    /// Referential reload period; the first load always runs at startup.
    pub referentials_reload_interval: Duration,
    pub referential_timeout: Duration,
    /// Live-data request period. Zero disables it.
    pub live_data_interval: Duration,
    /// Include the group name in entity display names.
    pub use_group_in_names: bool,
    pub dispatcher: DispatcherConfig,
    pub staleness: StalenessThresholds,
    pub staleness_scan_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            zone_reload_interval: Duration::from_secs(300),
            token_refresh_interval: Duration::from_secs(3600),
            referentials_reload_interval: Duration::from_secs(86_400),
            referential_timeout: crate::referential::DEFAULT_TIMEOUT,
            live_data_interval: Duration::from_secs(300),
            use_group_in_names: false,
            dispatcher: DispatcherConfig::default(),
            staleness: StalenessThresholds::default(),
            staleness_scan_interval: Duration::from_secs(60),
        }
    }
}
