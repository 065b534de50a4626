//! Persistent MQTT session with auto-reconnect and subscription replay.
//!
//! One [`MqttSession`] owns one broker connection. It keeps the set of
//! topics the application asked for, replays that set (together with the
//! session's baseline topics) every time the broker acknowledges a new
//! connection, and forwards every inbound publish as an
//! [`InboundMessage`] through an `mpsc` channel owned by the caller.
//!
//! Reconnection uses a fixed backoff. Credential rejection is reported to
//! the [`CredentialSource`] so it can refresh the token; a second
//! consecutive rejection marks the session [`SessionStatus::Failed`].
//!
//! # Example
//!
//! ```rust,ignore
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let session = MqttSession::connect(config, credentials, tx, cancel.clone());
//! session.subscribe("client/me@example.com/realtime");
//!
//! while let Some(msg) = rx.recv().await {
//!     println!("{}: {} bytes", msg.topic, msg.payload.len());
//! }
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, ClientError, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Requests the client may queue before `try_*` calls start failing.
const CLIENT_CAPACITY: usize = 64;

/// Consecutive credential rejections tolerated before giving up.
const MAX_AUTH_REJECTIONS: u32 = 2;

// ── TransportKind ────────────────────────────────────────────────────

/// Which of the two bridged brokers a session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// The vendor cloud broker.
    Vendor,
    /// The home-automation broker (Home Assistant discovery).
    HomeAutomation,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vendor => f.write_str("vendor"),
            Self::HomeAutomation => f.write_str("home-automation"),
        }
    }
}

// ── InboundMessage ───────────────────────────────────────────────────

/// A publish received from one of the brokers.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub transport: TransportKind,
    pub topic: String,
    pub payload: Bytes,
}

// ── Configuration ────────────────────────────────────────────────────

/// Network transport for a broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MqttTransport {
    /// Plain TCP (local brokers).
    #[default]
    Tcp,
    /// TLS over TCP with the platform root store.
    Tls,
    /// MQTT over secure WebSocket (the vendor cloud).
    WebSocketSecure,
}

/// Connection parameters for one [`MqttSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub kind: TransportKind,
    pub host: String,
    pub port: u16,
    pub transport: MqttTransport,
    /// Path appended to the WebSocket URL (e.g. `/mqtt`).
    pub ws_path: String,
    pub client_id: String,
    pub keep_alive: Duration,
    pub connection_timeout: Duration,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Topics subscribed on every connection regardless of application calls.
    pub baseline_topics: Vec<String>,
}

impl SessionConfig {
    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Username/password pair presented in the MQTT CONNECT packet.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

/// Supplies credentials for each connection attempt and is told when the
/// broker rejects them.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Credentials for the next CONNECT, or `None` for anonymous brokers.
    async fn credentials(&self) -> Result<Option<Credentials>, Error>;

    /// Called after the broker refused the last credentials.
    async fn on_auth_rejected(&self) -> Result<(), Error>;
}

/// Fixed credentials (or none) for brokers without token rotation.
pub struct StaticCredentials(pub Option<Credentials>);

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn credentials(&self) -> Result<Option<Credentials>, Error> {
        Ok(self.0.clone())
    }

    async fn on_auth_rejected(&self) -> Result<(), Error> {
        Ok(())
    }
}

// ── Link ─────────────────────────────────────────────────────────────

/// Fire-and-forget operations the bridge needs from one transport.
///
/// Implemented by [`MqttSession`]; tests substitute an in-memory link.
pub trait Link: Send + Sync {
    /// Record `topic` and subscribe now if connected.
    fn subscribe(&self, topic: &str);
    /// Forget `topic` and unsubscribe now if connected.
    fn unsubscribe(&self, topic: &str);
    /// Queue a publish; failures are logged, not returned.
    fn publish(&self, topic: &str, payload: Bytes, retain: bool);
    /// `true` while the broker connection is acknowledged.
    fn is_connected(&self) -> bool;
}

// ── SessionStatus ────────────────────────────────────────────────────

/// Observable connection state of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Credentials were rejected repeatedly; the loop has stopped.
    Failed,
    Closed,
}

// ── SubscriptionSet ──────────────────────────────────────────────────

/// Topics a session must hold, split into the fixed baseline and the
/// topics recorded through [`Link::subscribe`].
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    baseline: BTreeSet<String>,
    recorded: BTreeSet<String>,
}

impl SubscriptionSet {
    pub fn new(baseline: impl IntoIterator<Item = String>) -> Self {
        Self {
            baseline: baseline.into_iter().collect(),
            recorded: BTreeSet::new(),
        }
    }

    /// Record a topic. Returns `true` when the topic was not held before.
    pub fn record(&mut self, topic: &str) -> bool {
        if self.baseline.contains(topic) {
            return false;
        }
        self.recorded.insert(topic.to_owned())
    }

    /// Drop a recorded topic. Baseline topics are never forgotten.
    pub fn forget(&mut self, topic: &str) -> bool {
        self.recorded.remove(topic)
    }

    /// Every topic to subscribe after a (re)connect, each exactly once.
    pub fn replay_plan(&self) -> Vec<String> {
        self.baseline
            .iter()
            .chain(self.recorded.iter().filter(|t| !self.baseline.contains(*t)))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.baseline.len() + self.recorded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.baseline.is_empty() && self.recorded.is_empty()
    }
}

// ── BrokerClient ─────────────────────────────────────────────────────

/// Requests a session issues on the client of its current connection.
trait BrokerClient: Send + Sync {
    fn subscribe(&self, topic: &str) -> Result<(), ClientError>;
    fn unsubscribe(&self, topic: &str) -> Result<(), ClientError>;
    fn publish(&self, topic: &str, payload: Bytes, retain: bool) -> Result<(), ClientError>;
}

impl BrokerClient for AsyncClient {
    fn subscribe(&self, topic: &str) -> Result<(), ClientError> {
        self.try_subscribe(topic, QoS::AtLeastOnce)
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), ClientError> {
        self.try_unsubscribe(topic)
    }

    fn publish(&self, topic: &str, payload: Bytes, retain: bool) -> Result<(), ClientError> {
        self.try_publish(topic, QoS::AtLeastOnce, retain, payload.to_vec())
    }
}

// ── MqttSession ──────────────────────────────────────────────────────

struct SessionState {
    subscriptions: SubscriptionSet,
    /// Client of the current connection; `None` between connections.
    client: Option<Arc<dyn BrokerClient>>,
    connected: bool,
}

/// Handle to a running broker session.
pub struct MqttSession {
    config: SessionConfig,
    state: Mutex<SessionState>,
    status: watch::Sender<SessionStatus>,
    cancel: CancellationToken,
}

impl MqttSession {
    /// Spawn the connection loop and return immediately.
    ///
    /// Inbound publishes are forwarded to `inbound_tx`. The loop runs until
    /// `cancel` fires or credentials are rejected repeatedly.
    pub fn connect(
        config: SessionConfig,
        credentials: Arc<dyn CredentialSource>,
        inbound_tx: mpsc::UnboundedSender<InboundMessage>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let session = Arc::new(Self::new(config, cancel));

        let task_session = Arc::clone(&session);
        tokio::spawn(async move {
            session_loop(task_session, credentials, inbound_tx).await;
        });

        session
    }

    fn new(config: SessionConfig, cancel: CancellationToken) -> Self {
        let (status, _) = watch::channel(SessionStatus::Connecting);
        let subscriptions = SubscriptionSet::new(config.baseline_topics.iter().cloned());
        Self {
            config,
            state: Mutex::new(SessionState {
                subscriptions,
                client: None,
                connected: false,
            }),
            status,
            cancel,
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.config.kind
    }

    /// Subscribe to status changes.
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Signal the background loop to disconnect and exit.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Mark the connection live and replay the full subscription set.
    fn on_connected(&self, client: &dyn BrokerClient) {
        let mut state = self.lock_state();
        state.connected = true;
        let plan = state.subscriptions.replay_plan();
        for topic in &plan {
            if let Err(e) = client.subscribe(topic) {
                tracing::warn!(transport = %self.config.kind, topic, error = %e, "Subscribe failed");
            }
        }
        drop(state);

        tracing::info!(
            transport = %self.config.kind,
            topics = plan.len(),
            "MQTT connected, subscriptions replayed"
        );
        let _ = self.status.send(SessionStatus::Connected);
    }

    fn on_disconnected(&self) {
        let mut state = self.lock_state();
        state.connected = false;
        state.client = None;
    }

    fn install_client(&self, client: Arc<dyn BrokerClient>) {
        self.lock_state().client = Some(client);
    }
}

impl Link for MqttSession {
    fn subscribe(&self, topic: &str) {
        let mut state = self.lock_state();
        if !state.subscriptions.record(topic) {
            return;
        }
        if !state.connected {
            tracing::debug!(transport = %self.config.kind, topic, "Subscription recorded for next connect");
            return;
        }
        if let Some(client) = state.client.as_ref() {
            if let Err(e) = client.subscribe(topic) {
                tracing::warn!(transport = %self.config.kind, topic, error = %e, "Subscribe failed");
            }
        }
    }

    fn unsubscribe(&self, topic: &str) {
        let mut state = self.lock_state();
        if !state.subscriptions.forget(topic) || !state.connected {
            return;
        }
        if let Some(client) = state.client.as_ref() {
            if let Err(e) = client.unsubscribe(topic) {
                tracing::warn!(transport = %self.config.kind, topic, error = %e, "Unsubscribe failed");
            }
        }
    }

    fn publish(&self, topic: &str, payload: Bytes, retain: bool) {
        let state = self.lock_state();
        let Some(client) = state.client.as_ref() else {
            tracing::warn!(transport = %self.config.kind, topic, "Publish dropped: not connected");
            return;
        };
        if let Err(e) = client.publish(topic, payload, retain) {
            tracing::warn!(transport = %self.config.kind, topic, error = %e, "Publish failed");
        }
    }

    fn is_connected(&self) -> bool {
        self.lock_state().connected
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → drive → on error, wait the fixed delay → reconnect.
async fn session_loop(
    session: Arc<MqttSession>,
    credentials: Arc<dyn CredentialSource>,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
) {
    let kind = session.config.kind;
    let cancel = session.cancel.clone();
    let mut attempt: u32 = 0;
    let mut auth_rejections: u32 = 0;

    loop {
        let options = match build_options(&session.config, credentials.as_ref()).await {
            Ok(o) => o,
            Err(e) => {
                tracing::warn!(transport = %kind, error = %e, "Could not obtain credentials");
                if !wait_or_cancel(&cancel, session.config.reconnect_delay).await {
                    break;
                }
                continue;
            }
        };

        let (client, mut eventloop) = AsyncClient::new(options, CLIENT_CAPACITY);
        eventloop
            .network_options
            .set_connection_timeout(session.config.connection_timeout.as_secs().max(1));
        session.install_client(Arc::new(client.clone()));

        tracing::info!(transport = %kind, endpoint = %session.config.endpoint(), attempt, "Connecting to MQTT broker");

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = client.try_disconnect();
                session.on_disconnected();
                break;
            }
            r = drive(&session, &client, &mut eventloop, &inbound_tx, &mut auth_rejections) => r,
        };

        session.on_disconnected();

        match result {
            // Inbound receiver dropped: nobody is listening any more.
            Ok(()) => {
                tracing::debug!(transport = %kind, "Inbound channel closed, stopping session");
                break;
            }
            Err(e) if e.is_auth_rejected() => {
                auth_rejections += 1;
                if auth_rejections >= MAX_AUTH_REJECTIONS {
                    tracing::error!(transport = %kind, error = %e, "Credentials rejected again, giving up");
                    let _ = session.status.send(SessionStatus::Failed);
                    return;
                }
                tracing::warn!(transport = %kind, error = %e, "Credentials rejected, requesting refresh");
                if let Err(refresh_err) = credentials.on_auth_rejected().await {
                    tracing::warn!(transport = %kind, error = %refresh_err, "Credential refresh failed");
                }
            }
            Err(e) => {
                tracing::warn!(transport = %kind, error = %e, attempt, "MQTT connection lost");
            }
        }

        attempt += 1;
        let _ = session.status.send(SessionStatus::Reconnecting { attempt });
        tracing::info!(
            transport = %kind,
            delay_ms = u64::try_from(session.config.reconnect_delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "Waiting before reconnect"
        );
        if !wait_or_cancel(&cancel, session.config.reconnect_delay).await {
            break;
        }
    }

    let _ = session.status.send(SessionStatus::Closed);
    tracing::debug!(transport = %kind, "MQTT session loop exiting");
}

/// Poll the event loop until the connection fails.
///
/// Returns `Ok(())` only when the inbound receiver has been dropped.
async fn drive(
    session: &MqttSession,
    client: &AsyncClient,
    eventloop: &mut EventLoop,
    inbound_tx: &mpsc::UnboundedSender<InboundMessage>,
    auth_rejections: &mut u32,
) -> Result<(), Error> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                *auth_rejections = 0;
                session.on_connected(client);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::trace!(transport = %session.config.kind, topic = %publish.topic, "Inbound publish");
                let message = InboundMessage {
                    transport: session.config.kind,
                    topic: publish.topic,
                    payload: publish.payload,
                };
                if inbound_tx.send(message).is_err() {
                    return Ok(());
                }
            }
            Ok(_) => {}
            Err(e) => return Err(map_connection_error(&session.config, e)),
        }
    }
}

/// Sleep for `delay`; returns `false` if cancelled first.
async fn wait_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

// ── Options & error mapping ──────────────────────────────────────────

async fn build_options(
    config: &SessionConfig,
    credentials: &dyn CredentialSource,
) -> Result<MqttOptions, Error> {
    let mut options = match config.transport {
        MqttTransport::Tcp => MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port),
        MqttTransport::Tls => {
            let mut o = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
            o.set_transport(Transport::tls_with_default_config());
            o
        }
        MqttTransport::WebSocketSecure => {
            let url = format!("wss://{}:{}{}", config.host, config.port, config.ws_path);
            let mut o = MqttOptions::new(config.client_id.clone(), url, config.port);
            o.set_transport(Transport::wss_with_default_config());
            o
        }
    };

    options.set_keep_alive(config.keep_alive);
    options.set_clean_session(true);

    if let Some(creds) = credentials.credentials().await? {
        options.set_credentials(creds.username, creds.password.expose_secret());
    }

    Ok(options)
}

fn map_connection_error(config: &SessionConfig, err: ConnectionError) -> Error {
    match err {
        ConnectionError::ConnectionRefused(
            code @ (ConnectReturnCode::NotAuthorized | ConnectReturnCode::BadUserNamePassword),
        ) => Error::Authentication {
            endpoint: config.endpoint(),
            message: format!("{code:?}"),
        },
        ConnectionError::NetworkTimeout => Error::Timeout {
            endpoint: config.endpoint(),
            timeout_secs: config.connection_timeout.as_secs(),
        },
        other => Error::MqttConnection {
            endpoint: config.endpoint(),
            reason: other.to_string(),
        },
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig {
            kind: TransportKind::HomeAutomation,
            host: "localhost".into(),
            port: 1883,
            transport: MqttTransport::Tcp,
            ws_path: String::new(),
            client_id: "test".into(),
            keep_alive: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(7),
            reconnect_delay: Duration::from_secs(5),
            baseline_topics: vec!["homeassistant/status".into()],
        }
    }

    #[test]
    fn replay_plan_contains_baseline_once() {
        let mut set = SubscriptionSet::new(["homeassistant/status".to_string()]);
        assert!(!set.record("homeassistant/status"));
        assert!(set.record("homeassistant/climate/rehau_a/mode_command"));

        let plan = set.replay_plan();
        assert_eq!(
            plan,
            vec![
                "homeassistant/status".to_string(),
                "homeassistant/climate/rehau_a/mode_command".to_string(),
            ]
        );
    }

    #[test]
    fn record_is_idempotent() {
        let mut set = SubscriptionSet::new(Vec::new());
        assert!(set.record("client/a/realtime"));
        assert!(!set.record("client/a/realtime"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn replay_after_each_reconnect_is_identical() {
        let mut set = SubscriptionSet::new(["client/me".to_string()]);
        set.record("client/inst1/realtime");
        set.record("client/inst2/realtime");
        set.record("client/me");

        let first = set.replay_plan();
        let second = set.replay_plan();
        assert_eq!(first, second);

        let unique: BTreeSet<_> = first.iter().collect();
        assert_eq!(unique.len(), first.len(), "no topic is replayed twice");
        assert_eq!(first.iter().filter(|t| *t == "client/me").count(), 1);
    }

    #[test]
    fn forget_drops_recorded_topics_only() {
        let mut set = SubscriptionSet::new(["client/me".to_string()]);
        set.record("client/inst1/realtime");

        assert!(set.forget("client/inst1/realtime"));
        assert!(!set.forget("client/inst1/realtime"));
        assert!(!set.forget("client/me"));
        assert_eq!(set.replay_plan(), vec!["client/me".to_string()]);
    }

    /// Client that records every request instead of sending it.
    #[derive(Default)]
    struct RecordingClient {
        subscribed: Mutex<Vec<String>>,
        unsubscribed: Mutex<Vec<String>>,
    }

    impl RecordingClient {
        fn subscribed(&self) -> Vec<String> {
            self.subscribed.lock().unwrap().clone()
        }

        fn unsubscribed(&self) -> Vec<String> {
            self.unsubscribed.lock().unwrap().clone()
        }
    }

    impl BrokerClient for RecordingClient {
        fn subscribe(&self, topic: &str) -> Result<(), ClientError> {
            self.subscribed.lock().unwrap().push(topic.to_owned());
            Ok(())
        }

        fn unsubscribe(&self, topic: &str) -> Result<(), ClientError> {
            self.unsubscribed.lock().unwrap().push(topic.to_owned());
            Ok(())
        }

        fn publish(&self, _topic: &str, _payload: Bytes, _retain: bool) -> Result<(), ClientError> {
            Ok(())
        }
    }

    /// Attach a fresh recording client and acknowledge the connection.
    fn connect_with(session: &MqttSession) -> Arc<RecordingClient> {
        let client = Arc::new(RecordingClient::default());
        session.install_client(client.clone());
        session.on_connected(client.as_ref());
        client
    }

    fn sorted(mut topics: Vec<String>) -> Vec<String> {
        topics.sort();
        topics
    }

    #[test]
    fn reconnect_resubscribes_every_topic_once() {
        for (kind, baseline) in [
            (TransportKind::Vendor, "client/me@example.com"),
            (TransportKind::HomeAutomation, "homeassistant/status"),
        ] {
            let session = MqttSession::new(
                SessionConfig {
                    kind,
                    baseline_topics: vec![baseline.into()],
                    ..config()
                },
                CancellationToken::new(),
            );

            // Recorded while offline, including a repeat of the baseline.
            session.subscribe("a/one");
            session.subscribe(baseline);
            assert!(!session.is_connected());

            let first = connect_with(&session);
            assert!(session.is_connected());
            session.subscribe("a/two");
            session.subscribe("a/two");
            assert_eq!(
                sorted(first.subscribed()),
                sorted(vec![baseline.into(), "a/one".into(), "a/two".into()])
            );

            session.on_disconnected();
            assert!(!session.is_connected());
            session.subscribe("a/three");
            assert_eq!(first.subscribed().len(), 3, "nothing sent while offline");

            let second = connect_with(&session);
            assert_eq!(
                sorted(second.subscribed()),
                sorted(vec![baseline.into(), "a/one".into(), "a/two".into(), "a/three".into()]),
                "{kind} replays each topic exactly once"
            );

            session.on_disconnected();
            let third = connect_with(&session);
            assert_eq!(sorted(third.subscribed()), sorted(second.subscribed()));
        }
    }

    #[test]
    fn unsubscribed_topics_are_not_replayed() {
        let session = MqttSession::new(config(), CancellationToken::new());
        session.subscribe("homeassistant/climate/rehau_a/mode_command");
        session.subscribe("homeassistant/climate/rehau_b/mode_command");

        let first = connect_with(&session);
        session.unsubscribe("homeassistant/climate/rehau_a/mode_command");
        session.unsubscribe("homeassistant/status");
        assert_eq!(
            first.unsubscribed(),
            vec!["homeassistant/climate/rehau_a/mode_command".to_string()]
        );

        session.on_disconnected();
        let second = connect_with(&session);
        assert_eq!(
            sorted(second.subscribed()),
            sorted(vec![
                "homeassistant/status".into(),
                "homeassistant/climate/rehau_b/mode_command".into(),
            ])
        );
    }

    #[test]
    fn refused_credentials_map_to_auth_error() {
        let err = map_connection_error(
            &config(),
            ConnectionError::ConnectionRefused(ConnectReturnCode::NotAuthorized),
        );
        assert!(err.is_auth_rejected());

        let err = map_connection_error(&config(), ConnectionError::NetworkTimeout);
        assert!(matches!(err, Error::Timeout { timeout_secs: 7, .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn transport_kind_display() {
        assert_eq!(TransportKind::Vendor.to_string(), "vendor");
        assert_eq!(TransportKind::HomeAutomation.to_string(), "home-automation");
    }
}
