// ── Bridge orchestrator ──
//
// Single facade over every component. Owns the inbound event loop, the
// installation poll, and the schedules (referential reload, token
// refresh, live-data requests, staleness scan, command purge). All
// inbound traffic is handled on the event loop; writes requested from
// Home Assistant are dispatched on their own tasks so a pending command
// never stalls inbound processing.

use std::collections::BTreeSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Utc;
use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use rehau_bridge_api::session::TransportKind;
use rehau_bridge_api::vendor::{self, ChannelUpdate, VendorMessage, VendorRequest};

use crate::clock::Clock;
use crate::config::BridgeConfig;
use crate::connector::{CommandEvent, Connector, InboundEvent};
use crate::discovery::{DiscoveryPublisher, PAYLOAD_ONLINE};
use crate::dispatcher::{self, CommandDispatcher, CommandReport};
use crate::error::CoreError;
use crate::model::{CommandKind, CommandValue, Installation, ZoneId};
use crate::provider::{InstallationSource, TokenProvider};
use crate::referential::ReferentialLoader;
use crate::registry::{TopicSpace, ZoneRegistry, build_topic_space};
use crate::schedule::{self, FirstRun, TaskHandle};
use crate::staleness::StalenessMonitor;
use crate::store::ZoneStateStore;
use crate::topics;

// ── BridgeState ──────────────────────────────────────────────────────

/// Lifecycle state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeState {
    Stopped,
    Starting,
    Running,
    /// Unrecoverable, e.g. a broker kept rejecting credentials.
    Failed { reason: String },
}

// ── Bridge ───────────────────────────────────────────────────────────

/// Cheaply cloneable handle to a running bridge.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    config: BridgeConfig,
    connector: Arc<Connector>,
    tokens: Arc<dyn TokenProvider>,
    source: Arc<dyn InstallationSource>,
    registry: Arc<ZoneRegistry>,
    store: Arc<ZoneStateStore>,
    referentials: Arc<ReferentialLoader>,
    dispatcher: Arc<CommandDispatcher>,
    staleness: Arc<StalenessMonitor>,
    discovery: DiscoveryPublisher,
    installations: ArcSwap<Vec<Installation>>,
    state: watch::Sender<BridgeState>,
    recovery: Arc<Notify>,
    cancel: CancellationToken,
    poll_lock: Mutex<()>,
    tasks: Mutex<Vec<TaskHandle>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Bridge {
    /// Wire the components together. Does not start anything; call
    /// [`start`](Self::start).
    ///
    /// `cancel` should be the token the connector's sessions were started
    /// with, so [`shutdown`](Self::shutdown) closes them too.
    pub fn new(
        config: BridgeConfig,
        connector: Arc<Connector>,
        tokens: Arc<dyn TokenProvider>,
        source: Arc<dyn InstallationSource>,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        let registry = Arc::new(ZoneRegistry::new());
        let store = Arc::new(ZoneStateStore::new());
        let referentials = Arc::new(ReferentialLoader::new(
            Arc::clone(&connector),
            Arc::clone(&tokens),
            config.referential_timeout,
        ));
        let dispatcher = Arc::new(CommandDispatcher::new(
            config.dispatcher.clone(),
            Arc::clone(&clock),
            Arc::clone(&registry),
            Arc::clone(&store),
            Arc::clone(&connector),
            Arc::clone(&referentials),
        ));
        let staleness = Arc::new(StalenessMonitor::new(config.staleness, clock));

        let recovery = Arc::new(Notify::new());
        let notify = Arc::clone(&recovery);
        staleness.set_recovery_callback(Arc::new(move |zones: &[ZoneId]| {
            debug!(zones = zones.len(), "requesting recovery refresh");
            notify.notify_one();
        }));

        let (state, _) = watch::channel(BridgeState::Stopped);
        let discovery = DiscoveryPublisher::new(Arc::clone(&connector), Arc::clone(&referentials));

        Self {
            inner: Arc::new(BridgeInner {
                config,
                connector,
                tokens,
                source,
                registry,
                store,
                referentials,
                dispatcher,
                staleness,
                discovery,
                installations: ArcSwap::from_pointee(Vec::new()),
                state,
                recovery,
                cancel,
                poll_lock: Mutex::new(()),
                tasks: Mutex::new(Vec::new()),
                event_loop: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn connector(&self) -> &Arc<Connector> {
        &self.inner.connector
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.inner.dispatcher
    }

    pub fn staleness(&self) -> &Arc<StalenessMonitor> {
        &self.inner.staleness
    }

    pub fn referentials(&self) -> &Arc<ReferentialLoader> {
        &self.inner.referentials
    }

    pub fn store(&self) -> &Arc<ZoneStateStore> {
        &self.inner.store
    }

    pub fn topic_space(&self) -> Arc<TopicSpace> {
        self.inner.registry.snapshot()
    }

    pub fn state(&self) -> watch::Receiver<BridgeState> {
        self.inner.state.subscribe()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Poll installations, announce zones and start every background task.
    pub async fn start(&self) -> Result<(), CoreError> {
        let _ = self.inner.state.send(BridgeState::Starting);
        let inner = &self.inner;

        // Listen before anything is published so no response is missed.
        let events = inner.connector.subscribe_messages();
        inner.connector.subscribe(
            TransportKind::Vendor,
            &vendor::account_topic(inner.tokens.email()),
        );
        inner
            .connector
            .subscribe(TransportKind::HomeAutomation, topics::STATUS_TOPIC);

        if let Err(e) = self.refresh_installations().await {
            let _ = inner.state.send(BridgeState::Failed {
                reason: e.to_string(),
            });
            return Err(e);
        }

        *inner.event_loop.lock().await = Some(tokio::spawn(event_loop(self.clone(), events)));
        self.spawn_schedules().await;

        let _ = inner.state.send(BridgeState::Running);
        info!(zones = inner.registry.snapshot().len(), "bridge running");
        Ok(())
    }

    async fn spawn_schedules(&self) {
        let inner = &self.inner;
        let config = &inner.config;
        let cancel = &inner.cancel;
        let mut tasks = inner.tasks.lock().await;

        let bridge = self.clone();
        tasks.push(schedule::spawn_interval(
            cancel,
            "referential-reload",
            config.referentials_reload_interval,
            FirstRun::Immediately,
            move || {
                let referentials = Arc::clone(&bridge.inner.referentials);
                async move { referentials.reload().await }
            },
        ));

        if !config.zone_reload_interval.is_zero() {
            let bridge = self.clone();
            tasks.push(schedule::spawn_interval(
                cancel,
                "zone-reload",
                config.zone_reload_interval,
                FirstRun::AfterPeriod,
                move || {
                    let bridge = bridge.clone();
                    async move {
                        if let Err(e) = bridge.refresh_installations().await {
                            warn!(error = %e, "installation poll failed");
                        }
                    }
                },
            ));
        }

        if !config.token_refresh_interval.is_zero() {
            let tokens = Arc::clone(&inner.tokens);
            tasks.push(schedule::spawn_interval(
                cancel,
                "token-refresh",
                config.token_refresh_interval,
                FirstRun::AfterPeriod,
                move || {
                    let tokens = Arc::clone(&tokens);
                    async move {
                        match tokens.refresh().await {
                            Ok(()) => debug!("token refreshed"),
                            Err(e) => warn!(error = %e, "token refresh failed"),
                        }
                    }
                },
            ));
        }

        if !config.live_data_interval.is_zero() {
            let bridge = self.clone();
            tasks.push(schedule::spawn_interval(
                cancel,
                "live-data",
                config.live_data_interval,
                FirstRun::Immediately,
                move || {
                    let bridge = bridge.clone();
                    async move { bridge.request_live_data() }
                },
            ));
        }

        tasks.push(inner.staleness.spawn(cancel, config.staleness_scan_interval));

        let dispatcher = Arc::clone(&inner.dispatcher);
        tasks.push(schedule::spawn_interval(
            cancel,
            "command-purge",
            config.dispatcher.retention,
            FirstRun::AfterPeriod,
            move || {
                let dispatcher = Arc::clone(&dispatcher);
                async move {
                    dispatcher.purge_expired();
                }
            },
        ));

        let bridge = self.clone();
        tasks.push(schedule::spawn_after(
            cancel,
            "session-watch",
            std::time::Duration::ZERO,
            async move {
                let transport = bridge.inner.connector.wait_for_failure().await;
                bridge.fail(format!("{transport} broker rejected credentials repeatedly"));
            },
        ));
    }

    fn fail(&self, reason: String) {
        error!(%reason, "bridge failed");
        let _ = self.inner.state.send(BridgeState::Failed { reason });
        self.inner.cancel.cancel();
    }

    /// Resolve once the bridge has stopped or failed.
    pub async fn wait(&self) -> BridgeState {
        let mut rx = self.inner.state.subscribe();
        let terminal = rx
            .wait_for(|s| matches!(s, BridgeState::Stopped | BridgeState::Failed { .. }))
            .await
            .map(|s| s.clone());
        terminal.unwrap_or(BridgeState::Stopped)
    }

    /// Mark every zone offline, cancel all tasks and both sessions.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        for entry in inner.registry.snapshot().zones() {
            inner.discovery.publish_availability(entry, false);
        }

        inner.cancel.cancel();
        let mut tasks = inner.tasks.lock().await;
        for task in tasks.drain(..) {
            debug!(task = task.name(), "stopping task");
            task.shutdown().await;
        }
        if let Some(handle) = inner.event_loop.lock().await.take() {
            let _ = handle.await;
        }

        inner.state.send_if_modified(|state| {
            if matches!(state, BridgeState::Failed { .. }) {
                false
            } else {
                *state = BridgeState::Stopped;
                true
            }
        });
        info!("bridge stopped");
    }

    // ── Installation poll ────────────────────────────────────────────

    /// Fetch the installation tree and rebuild the identity space.
    /// Returns the number of registered zones.
    pub async fn refresh_installations(&self) -> Result<usize, CoreError> {
        let inner = &self.inner;
        let _guard = inner.poll_lock.lock().await;

        let installations = inner.source.fetch().await?;
        let space = build_topic_space(&installations, inner.config.use_group_in_names);
        let previous = inner.registry.replace(space);
        let current = inner.registry.snapshot();
        inner.store.replace_from(&installations, &current, Utc::now());

        for removed in previous.zones().filter(|z| current.zone(&z.zone_id).is_none()) {
            info!(zone = %removed.zone_id, name = %removed.name, "zone removed");
            inner.discovery.retract(removed);
        }

        let uniques: BTreeSet<&str> = current
            .zones()
            .map(|z| z.installation_unique.as_str())
            .collect();
        let previous_uniques: BTreeSet<&str> = previous
            .zones()
            .map(|z| z.installation_unique.as_str())
            .collect();
        for gone in previous_uniques.difference(&uniques) {
            info!(installation = %gone, "installation removed");
            inner
                .connector
                .unsubscribe(TransportKind::Vendor, &vendor::realtime_topic(gone));
        }
        for unique in uniques {
            inner
                .connector
                .subscribe(TransportKind::Vendor, &vendor::realtime_topic(unique));
        }

        for entry in current.zones() {
            if previous.zone(&entry.zone_id).is_none() {
                info!(zone = %entry.zone_id, name = %entry.display_name, "zone registered");
                inner.discovery.announce(entry);
            }
            inner.staleness.register_zone(&entry.zone_id, &entry.display_name);
            inner.staleness.touch(&entry.zone_id);
            inner.discovery.publish_availability(entry, true);
            if let Some(state) = inner.store.get(&entry.zone_id) {
                inner.discovery.publish_state(entry, &state);
            }
        }

        inner.installations.store(Arc::new(installations));
        debug!(zones = current.len(), rejected = current.rejected().len(), "installations refreshed");
        Ok(current.len())
    }

    /// Ask the vendor to push fresh channel state for every installation.
    pub fn request_live_data(&self) {
        for installation in self.inner.installations.load().iter() {
            let request = VendorRequest::LiveDataRequest {
                installation: installation.unique.clone(),
            };
            match request.to_payload() {
                Ok(payload) => self.inner.connector.publish(
                    TransportKind::Vendor,
                    &vendor::command_topic(&installation.unique),
                    payload,
                    false,
                ),
                Err(e) => warn!(error = %e, "cannot encode live data request"),
            }
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Dispatch a write and wait for its terminal state.
    pub async fn execute(
        &self,
        zone: &ZoneId,
        kind: CommandKind,
        value: CommandValue,
    ) -> Result<CommandReport, CoreError> {
        if self.inner.registry.snapshot().zone(zone).is_none() {
            return Err(CoreError::ZoneNotFound {
                identifier: zone.to_string(),
            });
        }
        Ok(self.inner.dispatcher.dispatch(zone, kind, value).await?)
    }

    async fn execute_event(&self, event: CommandEvent) {
        let zone = match self.inner.registry.snapshot().resolve(&event.target) {
            Ok(entry) => entry.zone_id.clone(),
            Err(e) => {
                warn!(topic = %event.topic, error = %e, "command for unresolvable zone");
                return;
            }
        };
        let value = match dispatcher::parse_command_value(event.kind, &event.payload, &self.inner.referentials) {
            Ok(value) => value,
            Err(e) => {
                warn!(topic = %event.topic, error = %e, "invalid command payload");
                return;
            }
        };

        match self.execute(&zone, event.kind, value).await {
            Ok(report) => match report.into_result() {
                Ok(report) => debug!(%zone, status = %report.status, "command finished"),
                Err(e) => warn!(%zone, kind = %event.kind, error = %e, "command failed"),
            },
            Err(e) => warn!(%zone, kind = %event.kind, error = %e, "command not dispatched"),
        }
    }

    // ── Inbound handling ─────────────────────────────────────────────

    /// Handle one inbound event.
    pub fn handle(&self, event: InboundEvent) {
        match event {
            InboundEvent::Vendor { message, .. } => self.handle_vendor(message),
            InboundEvent::HomeAutomation { topic, payload } => {
                if topic == topics::STATUS_TOPIC && payload.as_ref() == PAYLOAD_ONLINE.as_bytes() {
                    info!("home assistant online, republishing discovery");
                    self.republish_all();
                }
            }
            InboundEvent::Command(command) => {
                let bridge = self.clone();
                tokio::spawn(async move { bridge.execute_event(command).await });
            }
        }
    }

    fn handle_vendor(&self, message: VendorMessage) {
        let inner = &self.inner;
        match message {
            VendorMessage::Referential { data } => {
                inner.referentials.handle_response(data);
            }
            VendorMessage::ChannelUpdate(update) => self.handle_channel_update(&update),
            VendorMessage::CommandAck { request_id } => inner.dispatcher.on_command_ack(request_id),
            VendorMessage::CommandError {
                request_id,
                message,
            } => inner.dispatcher.on_command_error(request_id, &message),
            VendorMessage::InstallationUpdate { installation } => {
                debug!(%installation, "installation changed upstream");
                inner.recovery.notify_one();
            }
        }
    }

    fn handle_channel_update(&self, update: &ChannelUpdate) {
        let inner = &self.inner;
        let space = inner.registry.snapshot();
        let Some(entry) = space.zone_for_channel(&update.channel) else {
            debug!(channel = %update.channel, "update for unknown channel");
            return;
        };

        inner.staleness.touch(&entry.zone_id);
        if entry.primary_channel != update.channel {
            return;
        }

        inner.dispatcher.on_channel_update(&entry.zone_id, update);
        if let Some(state) = inner.store.apply_update(&entry.zone_id, update, Utc::now()) {
            inner.discovery.publish_state(entry, &state);
        }
    }

    fn republish_all(&self) {
        let inner = &self.inner;
        for entry in inner.registry.snapshot().zones() {
            inner.discovery.announce(entry);
            inner.discovery.publish_availability(entry, true);
            if let Some(state) = inner.store.get(&entry.zone_id) {
                inner.discovery.publish_state(entry, &state);
            }
        }
    }

    async fn recover(&self) {
        info!("refreshing after stale zones or upstream change");
        if let Err(e) = self.refresh_installations().await {
            warn!(error = %e, "recovery refresh failed");
        }
        self.request_live_data();
    }
}

// ── Event loop ───────────────────────────────────────────────────────

async fn event_loop(bridge: Bridge, mut events: mpsc::UnboundedReceiver<InboundEvent>) {
    let cancel = bridge.inner.cancel.clone();
    let recovery = Arc::clone(&bridge.inner.recovery);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = recovery.notified() => {
                let bridge = bridge.clone();
                tokio::spawn(async move { bridge.recover().await });
            }
            event = events.recv() => match event {
                Some(event) => bridge.handle(event),
                None => break,
            },
        }
    }
    debug!("event loop stopped");
}
