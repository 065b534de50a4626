// ── Staleness monitor ──
//
// Tracks when each zone last produced inbound state and classifies the
// gap against two thresholds. A zone that was registered but never heard
// from counts as very stale. The recovery callback fires once per
// transition into `very_stale`; a zone has to be touched (or otherwise
// seen fresh) before it can fire again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use strum::Display;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::CoreError;
use crate::model::ZoneId;
use crate::schedule::{self, FirstRun, TaskHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Freshness {
    Fresh,
    Stale,
    VeryStale,
}

// ── Thresholds ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessThresholds {
    warning: Duration,
    stale: Duration,
}

impl StalenessThresholds {
    pub fn try_new(warning: Duration, stale: Duration) -> Result<Self, CoreError> {
        if warning.is_zero() || warning >= stale {
            return Err(CoreError::Config {
                message: format!(
                    "staleness warning threshold ({}ms) must be positive and below the stale threshold ({}ms)",
                    warning.as_millis(),
                    stale.as_millis()
                ),
            });
        }
        Ok(Self { warning, stale })
    }

    pub fn try_from_millis(warning_ms: i64, stale_ms: i64) -> Result<Self, CoreError> {
        let millis = |name: &str, value: i64| {
            u64::try_from(value)
                .map(Duration::from_millis)
                .map_err(|_| CoreError::Config {
                    message: format!("{name} must not be negative (got {value}ms)"),
                })
        };
        Self::try_new(
            millis("staleness_warning_ms", warning_ms)?,
            millis("staleness_stale_ms", stale_ms)?,
        )
    }

    pub fn warning(&self) -> Duration {
        self.warning
    }

    pub fn stale(&self) -> Duration {
        self.stale
    }

    /// Classify the time since the last update; `None` means never updated.
    pub fn classify(&self, elapsed: Option<Duration>) -> Freshness {
        match elapsed {
            Some(e) if e < self.warning => Freshness::Fresh,
            Some(e) if e < self.stale => Freshness::Stale,
            _ => Freshness::VeryStale,
        }
    }
}

impl Default for StalenessThresholds {
    fn default() -> Self {
        Self {
            warning: Duration::from_millis(600_000),
            stale: Duration::from_millis(1_800_000),
        }
    }
}

// ── Monitor ──────────────────────────────────────────────────────────

/// Invoked with the zones that just became very stale.
pub type RecoveryCallback = Arc<dyn Fn(&[ZoneId]) + Send + Sync>;

#[derive(Debug)]
struct Tracked {
    name: String,
    last_update: Option<Instant>,
    reported: Freshness,
}

/// Result of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StalenessReport {
    pub fresh: usize,
    pub stale: Vec<ZoneId>,
    pub very_stale: Vec<ZoneId>,
    /// Zones that crossed into `very_stale` since the previous scan.
    pub newly_very_stale: Vec<ZoneId>,
}

pub struct StalenessMonitor {
    thresholds: StalenessThresholds,
    clock: Arc<dyn Clock>,
    zones: Mutex<HashMap<ZoneId, Tracked>>,
    on_recovery: Mutex<Option<RecoveryCallback>>,
}

impl StalenessMonitor {
    pub fn new(thresholds: StalenessThresholds, clock: Arc<dyn Clock>) -> Self {
        Self {
            thresholds,
            clock,
            zones: Mutex::new(HashMap::new()),
            on_recovery: Mutex::new(None),
        }
    }

    pub fn set_recovery_callback(&self, callback: RecoveryCallback) {
        *self
            .on_recovery
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(callback);
    }

    fn zones(&self) -> std::sync::MutexGuard<'_, HashMap<ZoneId, Tracked>> {
        self.zones
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Start tracking a zone. Re-registering keeps its last update.
    pub fn register_zone(&self, id: &ZoneId, name: &str) {
        self.zones()
            .entry(id.clone())
            .and_modify(|t| name.clone_into(&mut t.name))
            .or_insert_with(|| Tracked {
                name: name.to_owned(),
                last_update: None,
                reported: Freshness::Fresh,
            });
    }

    /// Record inbound state for a zone. Unknown zones are ignored.
    pub fn touch(&self, id: &ZoneId) -> bool {
        let now = self.clock.now();
        match self.zones().get_mut(id) {
            Some(t) => {
                t.last_update = Some(now);
                t.reported = Freshness::Fresh;
                true
            }
            None => {
                debug!(zone = %id, "touch for unregistered zone");
                false
            }
        }
    }

    pub fn classify(&self, id: &ZoneId) -> Option<Freshness> {
        let now = self.clock.now();
        self.zones()
            .get(id)
            .map(|t| self.classify_at(t, now))
    }

    fn classify_at(&self, tracked: &Tracked, now: Instant) -> Freshness {
        self.thresholds
            .classify(tracked.last_update.map(|at| now.saturating_duration_since(at)))
    }

    pub fn len(&self) -> usize {
        self.zones().len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones().is_empty()
    }

    /// Classify every zone, log very-stale ones and fire the recovery
    /// callback for new transitions.
    pub fn scan(&self) -> StalenessReport {
        let now = self.clock.now();
        let mut report = StalenessReport::default();
        let mut names = Vec::new();

        {
            let mut zones = self.zones();
            let mut ids: Vec<ZoneId> = zones.keys().cloned().collect();
            ids.sort();

            for id in ids {
                let Some(tracked) = zones.get_mut(&id) else {
                    continue;
                };
                let freshness = self.classify_at(tracked, now);
                match freshness {
                    Freshness::Fresh => report.fresh += 1,
                    Freshness::Stale => report.stale.push(id.clone()),
                    Freshness::VeryStale => {
                        names.push(format!("{} ({id})", tracked.name));
                        if tracked.reported != Freshness::VeryStale {
                            report.newly_very_stale.push(id.clone());
                        }
                        report.very_stale.push(id.clone());
                    }
                }
                tracked.reported = freshness;
            }
        }

        if names.is_empty() {
            debug!(fresh = report.fresh, stale = report.stale.len(), "staleness scan");
        } else {
            warn!(
                count = names.len(),
                zones = %names.join(", "),
                "zones have not reported for too long"
            );
        }

        if !report.newly_very_stale.is_empty() {
            let callback = self
                .on_recovery
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone();
            if let Some(callback) = callback {
                callback(&report.newly_very_stale);
            }
        }

        report
    }

    /// Run [`scan`](Self::scan) every `period` until cancelled.
    pub fn spawn(self: &Arc<Self>, parent: &CancellationToken, period: Duration) -> TaskHandle {
        let monitor = Arc::clone(self);
        schedule::spawn_interval(parent, "staleness-scan", period, FirstRun::AfterPeriod, move || {
            let monitor = Arc::clone(&monitor);
            async move {
                monitor.scan();
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::clock::ManualClock;

    const MINUTE: Duration = Duration::from_secs(60);

    fn monitor() -> (Arc<ManualClock>, Arc<StalenessMonitor>) {
        let clock = Arc::new(ManualClock::new());
        let monitor = Arc::new(StalenessMonitor::new(StalenessThresholds::default(), clock.clone()));
        (clock, monitor)
    }

    fn zone(id: &str) -> ZoneId {
        ZoneId::parse(id).unwrap()
    }

    fn counting_callback(monitor: &StalenessMonitor) -> Arc<Mutex<Vec<Vec<ZoneId>>>> {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        monitor.set_recovery_callback(Arc::new(move |zones: &[ZoneId]| {
            sink.lock().unwrap().push(zones.to_vec());
        }));
        calls
    }

    #[test]
    fn thresholds_are_validated() {
        assert!(StalenessThresholds::try_from_millis(600_000, 1_800_000).is_ok());
        assert!(StalenessThresholds::try_from_millis(1_800_000, 600_000).is_err());
        assert!(StalenessThresholds::try_from_millis(5, 5).is_err());
        assert!(StalenessThresholds::try_from_millis(-1, 5).is_err());
        assert!(StalenessThresholds::try_from_millis(0, 5).is_err());
    }

    #[test]
    fn classification_progresses_with_time() {
        let (clock, monitor) = monitor();
        let a = zone("aaa111");
        monitor.register_zone(&a, "Living");

        assert_eq!(monitor.classify(&a), Some(Freshness::VeryStale));

        monitor.touch(&a);
        assert_eq!(monitor.classify(&a), Some(Freshness::Fresh));

        clock.advance(9 * MINUTE);
        assert_eq!(monitor.classify(&a), Some(Freshness::Fresh));
        clock.advance(MINUTE);
        assert_eq!(monitor.classify(&a), Some(Freshness::Stale));
        clock.advance(20 * MINUTE);
        assert_eq!(monitor.classify(&a), Some(Freshness::VeryStale));

        assert_eq!(monitor.classify(&zone("nope")), None);
    }

    #[test]
    fn recovery_fires_once_per_transition() {
        let (clock, monitor) = monitor();
        let calls = counting_callback(&monitor);
        let a = zone("aaa111");
        let b = zone("bbb222");
        monitor.register_zone(&a, "Living");
        monitor.register_zone(&b, "Bath");
        monitor.touch(&a);
        monitor.touch(&b);

        clock.advance(31 * MINUTE);
        let report = monitor.scan();
        assert_eq!(report.newly_very_stale, vec![a.clone(), b.clone()]);
        monitor.scan();
        monitor.scan();
        assert_eq!(calls.lock().unwrap().len(), 1);

        // Recovers, then goes silent again: one more call, for `a` only.
        monitor.touch(&a);
        monitor.scan();
        clock.advance(31 * MINUTE);
        let report = monitor.scan();
        assert_eq!(report.newly_very_stale, vec![a.clone()]);
        assert_eq!(report.very_stale, vec![a, b]);
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn never_updated_zone_fires_on_first_scan() {
        let (_, monitor) = monitor();
        let calls = counting_callback(&monitor);
        monitor.register_zone(&zone("ccc333"), "Office");

        monitor.scan();
        monitor.scan();
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn reregistering_keeps_last_update() {
        let (_, monitor) = monitor();
        let a = zone("aaa111");
        monitor.register_zone(&a, "Living");
        monitor.touch(&a);
        monitor.register_zone(&a, "Living room");
        assert_eq!(monitor.classify(&a), Some(Freshness::Fresh));
        assert!(!monitor.touch(&zone("unknown1")));
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_scan_runs_on_interval() {
        let clock: Arc<dyn Clock> = Arc::new(crate::clock::TokioClock);
        let monitor = Arc::new(StalenessMonitor::new(StalenessThresholds::default(), clock));
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&hits);
        monitor.set_recovery_callback(Arc::new(move |_: &[ZoneId]| {
            sink.fetch_add(1, Ordering::SeqCst);
        }));
        monitor.register_zone(&zone("aaa111"), "Living");

        let cancel = CancellationToken::new();
        let handle = monitor.spawn(&cancel, MINUTE);
        tokio::time::sleep(MINUTE + Duration::from_secs(1)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        cancel.cancel();
        handle.shutdown().await;
    }
}
