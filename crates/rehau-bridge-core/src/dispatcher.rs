// ── Command dispatcher ──
//
// Turns write intents into vendor write requests and tracks each one
// through `pending → confirmed | rejected | timeout | no-change`.
//
// `dispatch` owns the lifecycle of its command: it publishes, waits on a
// oneshot per command, republishes on timeout, and finalizes the record.
// Inbound handlers (`on_channel_update`, `on_command_error`) only resolve
// waiters, so a confirmation that lands after the command went terminal
// finds no waiter and is ignored. A `dispatch` future dropped mid-flight
// finishes its record as `timeout` through the `InFlight` guard.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use rehau_bridge_api::session::TransportKind;
use rehau_bridge_api::vendor::{self, ChannelUpdate, VendorRequest, WriteField, WriteRequest};

use crate::clock::Clock;
use crate::connector::Connector;
use crate::error::CommandError;
use crate::model::state::reported_value;
use crate::model::{CommandKind, CommandRecord, CommandStatus, CommandValue, HeatCoolMode, ZoneId};
use crate::rate_limit::RateLimiter;
use crate::referential::ReferentialLoader;
use crate::registry::{ZoneEntry, ZoneRegistry};
use crate::store::ZoneStateStore;

/// Accepted setpoint range in Celsius.
pub const SETPOINT_RANGE: std::ops::RangeInclusive<f64> = 5.0..=35.0;

/// Preset labels that select the reduced setpoint pair.
const REDUCED_PRESETS: &[&str] = &["reduced", "eco", "night", "standby"];

// ── Configuration ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How long each attempt waits for a confirmation.
    pub retry_timeout: Duration,
    /// Republishes after the first attempt (genuine changes only).
    pub max_retries: u32,
    /// How long terminal records are kept.
    pub retention: Duration,
    /// Minimum spacing between writes to one installation.
    pub min_interval: Duration,
    /// Finish zero-effect commands as `no-change` without publishing.
    pub suppress_no_op: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            retry_timeout: Duration::from_secs(30),
            max_retries: 3,
            retention: Duration::from_secs(60),
            min_interval: Duration::from_millis(1000),
            suppress_no_op: false,
        }
    }
}

// ── Report ───────────────────────────────────────────────────────────

/// Terminal outcome of a dispatched command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReport {
    pub id: Uuid,
    pub zone: ZoneId,
    pub kind: CommandKind,
    pub status: CommandStatus,
    pub attempts: u32,
    pub is_no_op: bool,
    /// Time from first publish to confirmation.
    pub latency: Option<Duration>,
    pub error: Option<String>,
}

impl CommandReport {
    /// `Err` for `rejected` and `timeout`, `Ok` otherwise.
    pub fn into_result(self) -> Result<Self, CommandError> {
        match self.status {
            CommandStatus::Rejected => Err(CommandError::Rejected {
                reason: self.error.unwrap_or_default(),
            }),
            CommandStatus::Timeout => Err(CommandError::Timeout {
                attempts: self.attempts,
            }),
            _ => Ok(self),
        }
    }
}

// ── Dispatcher ───────────────────────────────────────────────────────

#[derive(Debug)]
enum Resolution {
    Confirmed,
    Rejected(String),
}

struct Tracked {
    seq: u64,
    record: CommandRecord,
    finished: Option<Instant>,
}

pub struct CommandDispatcher {
    config: DispatcherConfig,
    clock: Arc<dyn Clock>,
    limiter: RateLimiter,
    registry: Arc<ZoneRegistry>,
    store: Arc<ZoneStateStore>,
    connector: Arc<Connector>,
    referentials: Arc<ReferentialLoader>,
    records: DashMap<Uuid, Tracked>,
    waiters: DashMap<Uuid, oneshot::Sender<Resolution>>,
    seq: AtomicU64,
}

impl CommandDispatcher {
    pub fn new(
        config: DispatcherConfig,
        clock: Arc<dyn Clock>,
        registry: Arc<ZoneRegistry>,
        store: Arc<ZoneStateStore>,
        connector: Arc<Connector>,
        referentials: Arc<ReferentialLoader>,
    ) -> Self {
        Self {
            limiter: RateLimiter::new(config.min_interval, Arc::clone(&clock)),
            config,
            clock,
            registry,
            store,
            connector,
            referentials,
            records: DashMap::new(),
            waiters: DashMap::new(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Send a write and wait for its terminal state.
    ///
    /// `Err` means nothing was published (unknown zone, bad value, rate
    /// limit). Every published command ends in a [`CommandReport`].
    pub async fn dispatch(
        &self,
        zone: &ZoneId,
        kind: CommandKind,
        value: CommandValue,
    ) -> Result<CommandReport, CommandError> {
        let space = self.registry.snapshot();
        let entry = space.zone(zone).ok_or_else(|| CommandError::UnknownZone {
            zone: zone.to_string(),
        })?;
        let field = self.write_field(entry, kind, value)?;

        let old_value = self.last_known_value(zone, kind);
        let is_no_op = old_value.is_some_and(|old| value.is_no_op(&old));

        let rate_key = entry.installation_id.as_str();
        if !self.limiter.can_execute(rate_key) {
            return Err(CommandError::RateLimited {
                retry_after: self.limiter.time_until_next_execution(rate_key),
            });
        }

        let id = Uuid::new_v4();
        self.records.insert(
            id,
            Tracked {
                seq: self.seq.fetch_add(1, Ordering::Relaxed),
                finished: None,
                record: CommandRecord {
                    id,
                    zone: zone.clone(),
                    installation: entry.installation_id.clone(),
                    kind,
                    old_value,
                    new_value: value,
                    is_no_op,
                    status: CommandStatus::Pending,
                    attempts: 0,
                    created_at: Utc::now(),
                    completed_at: None,
                    latency: None,
                    error: None,
                },
            },
        );
        let _in_flight = InFlight { dispatcher: self, id };

        let draft = CommandReport {
            id,
            zone: zone.clone(),
            kind,
            status: CommandStatus::Pending,
            attempts: 0,
            is_no_op,
            latency: None,
            error: None,
        };

        if is_no_op {
            warn!(%zone, %kind, %value, "command has no effect on the current value");
            if self.config.suppress_no_op {
                return Ok(self.finish(draft, CommandStatus::NoChange, None, None));
            }
        }

        let request = VendorRequest::Write(WriteRequest {
            request_id: id,
            installation: entry.installation_unique.clone(),
            channel: entry.primary_channel.clone(),
            field,
        });
        let payload = match request.to_payload() {
            Ok(payload) => bytes::Bytes::from(payload),
            Err(e) => {
                self.records.remove(&id);
                return Err(CommandError::InvalidValue {
                    kind,
                    value: value.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        let topic = vendor::command_topic(&entry.installation_unique);

        let (tx, mut rx) = oneshot::channel();
        self.waiters.insert(id, tx);
        if !is_no_op {
            self.limiter.record_execution(rate_key);
        }

        let max_attempts = if is_no_op { 1 } else { 1 + self.config.max_retries };
        let started = self.clock.now();
        let mut attempts = 0;

        let resolution = loop {
            attempts += 1;
            self.set_attempts(id, attempts);
            self.connector
                .publish(TransportKind::Vendor, &topic, payload.clone(), false);
            debug!(%id, %zone, %kind, attempt = attempts, "write published");

            match tokio::time::timeout(self.config.retry_timeout, &mut rx).await {
                Ok(Ok(resolution)) => break Some(resolution),
                Ok(Err(_)) => break None,
                Err(_) if attempts < max_attempts => {
                    debug!(%id, attempt = attempts, "no confirmation, republishing");
                }
                Err(_) => break None,
            }
        };
        self.waiters.remove(&id);

        let report = match resolution {
            Some(Resolution::Confirmed) => {
                let latency = self.clock.now().saturating_duration_since(started);
                info!(%id, %zone, %kind, %value, latency_ms = latency.as_millis(), "command confirmed");
                self.finish(draft, CommandStatus::Confirmed, Some(latency), None)
            }
            Some(Resolution::Rejected(reason)) => {
                warn!(%id, %zone, %kind, %reason, "command rejected");
                self.finish(draft, CommandStatus::Rejected, None, Some(reason))
            }
            None if is_no_op => self.finish(draft, CommandStatus::NoChange, None, None),
            None => {
                warn!(%id, %zone, %kind, attempts, "command timed out");
                self.finish(draft, CommandStatus::Timeout, None, None)
            }
        };
        Ok(report)
    }

    /// Resolve pending commands whose requested value this update reports.
    /// Returns how many were confirmed.
    pub fn on_channel_update(&self, zone: &ZoneId, update: &ChannelUpdate) -> usize {
        let matched: Vec<Uuid> = self
            .records
            .iter()
            .filter(|t| !t.record.status.is_terminal() && t.record.zone == *zone)
            .filter(|t| {
                reported_value(update, t.record.kind)
                    .is_some_and(|reported| t.record.new_value.is_no_op(&reported))
            })
            .map(|t| t.record.id)
            .collect();

        matched
            .into_iter()
            .filter(|id| self.resolve(*id, Resolution::Confirmed))
            .count()
    }

    pub fn on_command_ack(&self, request_id: Uuid) {
        if self.waiters.contains_key(&request_id) {
            debug!(%request_id, "vendor acknowledged write");
        }
    }

    pub fn on_command_error(&self, request_id: Option<Uuid>, message: &str) {
        match request_id {
            Some(id) => {
                if !self.resolve(id, Resolution::Rejected(message.to_owned())) {
                    debug!(%id, message, "vendor error for unknown or finished command");
                }
            }
            None => warn!(message, "vendor reported an error without request id"),
        }
    }

    /// Drop terminal records older than the retention window.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let retention = self.config.retention;
        let before = self.records.len();
        self.records.retain(|_, t| {
            let expired = t
                .finished
                .is_some_and(|at| now.saturating_duration_since(at) >= retention);
            !(t.record.status.is_terminal() && expired)
        });
        let purged = before.saturating_sub(self.records.len());
        if purged > 0 {
            debug!(purged, "expired command records purged");
        }
        purged
    }

    pub fn record(&self, id: Uuid) -> Option<CommandRecord> {
        self.records.get(&id).map(|t| t.record.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.waiters.len()
    }

    // ── Internals ────────────────────────────────────────────────────

    fn resolve(&self, id: Uuid, resolution: Resolution) -> bool {
        match self.waiters.remove(&id) {
            Some((_, tx)) => tx.send(resolution).is_ok(),
            None => false,
        }
    }

    /// Most recent pending request for the zone and kind, else observed state.
    fn last_known_value(&self, zone: &ZoneId, kind: CommandKind) -> Option<CommandValue> {
        self.records
            .iter()
            .filter(|t| {
                !t.record.status.is_terminal() && t.record.zone == *zone && t.record.kind == kind
            })
            .max_by_key(|t| t.seq)
            .map(|t| t.record.new_value)
            .or_else(|| self.store.get(zone).and_then(|s| s.value_of(kind)))
    }

    fn write_field(&self, entry: &ZoneEntry, kind: CommandKind, value: CommandValue) -> Result<WriteField, CommandError> {
        let invalid = |reason: &str| CommandError::InvalidValue {
            kind,
            value: value.to_string(),
            reason: reason.to_owned(),
        };

        match (kind, value) {
            (CommandKind::Temperature, CommandValue::Temperature(celsius)) => {
                if !SETPOINT_RANGE.contains(&celsius) {
                    return Err(invalid("setpoint out of range"));
                }
                let raw = vendor::celsius_to_vendor(celsius);
                let reduced = self.uses_reduced_setpoint(&entry.zone_id);
                Ok(match (entry.installation_mode, reduced) {
                    (HeatCoolMode::Heat, false) => WriteField::SetpointHeatNormal(raw),
                    (HeatCoolMode::Heat, true) => WriteField::SetpointHeatReduced(raw),
                    (HeatCoolMode::Cool, false) => WriteField::SetpointCoolNormal(raw),
                    (HeatCoolMode::Cool, true) => WriteField::SetpointCoolReduced(raw),
                })
            }
            (CommandKind::Mode, CommandValue::Code(code)) => Ok(WriteField::Mode(code)),
            (CommandKind::Preset, CommandValue::Code(code)) => Ok(WriteField::Preset(code)),
            (CommandKind::RingLight, CommandValue::Flag(on)) => Ok(WriteField::RingLight(on)),
            (CommandKind::Lock, CommandValue::Flag(locked)) => Ok(WriteField::Lock(locked)),
            _ => Err(invalid("value does not match command kind")),
        }
    }

    fn uses_reduced_setpoint(&self, zone: &ZoneId) -> bool {
        let Some(preset) = self.store.get(zone).and_then(|s| s.preset) else {
            return false;
        };
        let label = self.referentials.resolve_label(preset).to_lowercase();
        REDUCED_PRESETS.iter().any(|p| label.contains(p))
    }

    fn set_attempts(&self, id: Uuid, attempts: u32) {
        if let Some(mut t) = self.records.get_mut(&id) {
            t.record.attempts = attempts;
        }
    }

    fn finish(
        &self,
        mut report: CommandReport,
        status: CommandStatus,
        latency: Option<Duration>,
        error: Option<String>,
    ) -> CommandReport {
        if let Some(mut t) = self.records.get_mut(&report.id) {
            t.finished = Some(self.clock.now());
            let record = &mut t.record;
            record.status = status;
            record.completed_at = Some(Utc::now());
            record.latency = latency;
            record.error.clone_from(&error);
            report.attempts = record.attempts;
        }
        report.status = status;
        report.latency = latency;
        report.error = error;
        report
    }

    /// Finish a command whose `dispatch` stopped before a terminal state.
    fn abandon(&self, id: Uuid) {
        self.waiters.remove(&id);
        let Some(mut t) = self.records.get_mut(&id) else {
            return;
        };
        if t.record.status.is_terminal() {
            return;
        }
        t.finished = Some(self.clock.now());
        let record = &mut t.record;
        record.status = CommandStatus::Timeout;
        record.completed_at = Some(Utc::now());
        record.error = Some("dispatch cancelled".to_owned());
        warn!(%id, zone = %record.zone, kind = %record.kind, "command abandoned before completion");
    }
}

/// Finishes the command when the owning `dispatch` future is dropped.
/// A no-op once the record is terminal or removed.
struct InFlight<'a> {
    dispatcher: &'a CommandDispatcher,
    id: Uuid,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.dispatcher.abandon(self.id);
    }
}

// ── Payload parsing ──────────────────────────────────────────────────

/// Parse a Home Assistant command payload for `kind`.
///
/// Mode and preset accept a referential label or a raw numeric code.
pub fn parse_command_value(
    kind: CommandKind,
    payload: &str,
    referentials: &ReferentialLoader,
) -> Result<CommandValue, CommandError> {
    let payload = payload.trim();
    let invalid = |reason: &str| CommandError::InvalidValue {
        kind,
        value: payload.to_owned(),
        reason: reason.to_owned(),
    };

    match kind {
        CommandKind::Temperature => payload
            .parse::<f64>()
            .ok()
            .filter(|t| t.is_finite())
            .map(CommandValue::Temperature)
            .ok_or_else(|| invalid("not a number")),
        CommandKind::Mode | CommandKind::Preset => referentials
            .resolve_code(payload)
            .map(CommandValue::Code)
            .ok_or_else(|| invalid("unknown label")),
        CommandKind::RingLight => match payload.to_ascii_uppercase().as_str() {
            "ON" | "TRUE" | "1" => Ok(CommandValue::Flag(true)),
            "OFF" | "FALSE" | "0" => Ok(CommandValue::Flag(false)),
            _ => Err(invalid("expected ON or OFF")),
        },
        CommandKind::Lock => match payload.to_ascii_uppercase().as_str() {
            "LOCK" | "ON" | "TRUE" | "1" => Ok(CommandValue::Flag(true)),
            "UNLOCK" | "OFF" | "FALSE" | "0" => Ok(CommandValue::Flag(false)),
            _ => Err(invalid("expected LOCK or UNLOCK")),
        },
    }
}
