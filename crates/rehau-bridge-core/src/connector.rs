// ── Dual-transport connector ──
//
// Owns the two broker links (vendor cloud, home automation) and the
// single inbound pump. Raw publishes from both sessions are funnelled
// through one `mpsc` channel, validated/translated, and fanned out to
// one unbounded channel per subscriber, so a slow consumer never loses
// events. Order is preserved per transport; nothing is promised across
// transports.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use rehau_bridge_api::session::{
    CredentialSource, InboundMessage, Link, MqttSession, SessionConfig, SessionStatus, TransportKind,
};
use rehau_bridge_api::vendor::VendorMessage;

use crate::model::CommandKind;
use crate::topics::{self, CommandTarget};

// ── Events ───────────────────────────────────────────────────────────

/// A write requested through a Home Assistant command topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEvent {
    pub topic: String,
    pub target: CommandTarget,
    pub kind: CommandKind,
    /// Payload as sent by Home Assistant, trimmed.
    pub payload: String,
}

/// Validated inbound traffic, tagged by transport.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Vendor {
        topic: String,
        message: VendorMessage,
    },
    /// Home Assistant traffic that is not a command (e.g. its status topic).
    HomeAutomation {
        topic: String,
        payload: Bytes,
    },
    Command(CommandEvent),
}

impl InboundEvent {
    pub fn transport(&self) -> TransportKind {
        match self {
            Self::Vendor { .. } => TransportKind::Vendor,
            Self::HomeAutomation { .. } | Self::Command(_) => TransportKind::HomeAutomation,
        }
    }
}

/// Turn a raw publish into an event, or `None` if it must be discarded.
pub fn translate(message: InboundMessage) -> Option<InboundEvent> {
    match message.transport {
        TransportKind::Vendor => match VendorMessage::parse(&message.payload) {
            Ok(parsed) => Some(InboundEvent::Vendor {
                topic: message.topic,
                message: parsed,
            }),
            Err(e) => {
                debug!(topic = %message.topic, error = %e, "discarding vendor payload");
                None
            }
        },
        TransportKind::HomeAutomation => match topics::parse_command_topic(&message.topic) {
            Some((target, kind)) => {
                let Ok(payload) = std::str::from_utf8(&message.payload) else {
                    debug!(topic = %message.topic, "discarding non UTF-8 command payload");
                    return None;
                };
                Some(InboundEvent::Command(CommandEvent {
                    payload: payload.trim().to_owned(),
                    topic: message.topic,
                    target,
                    kind,
                }))
            }
            None => Some(InboundEvent::HomeAutomation {
                topic: message.topic,
                payload: message.payload,
            }),
        },
    }
}

// ── Connector ────────────────────────────────────────────────────────

pub struct Connector {
    vendor: Arc<dyn Link>,
    home_automation: Arc<dyn Link>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<InboundEvent>>>,
    statuses: Vec<(TransportKind, watch::Receiver<SessionStatus>)>,
}

impl Connector {
    /// Wrap two existing links. Inbound traffic must be fed through
    /// [`ingest`](Self::ingest) or a pump started with
    /// [`spawn_pump`](Self::spawn_pump).
    pub fn new(vendor: Arc<dyn Link>, home_automation: Arc<dyn Link>) -> Self {
        Self {
            vendor,
            home_automation,
            subscribers: Mutex::new(Vec::new()),
            statuses: Vec::new(),
        }
    }

    /// Open both broker sessions and start the inbound pump.
    pub fn start(
        vendor: SessionConfig,
        home_automation: SessionConfig,
        vendor_credentials: Arc<dyn CredentialSource>,
        home_credentials: Arc<dyn CredentialSource>,
        cancel: &CancellationToken,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let vendor_session = Self::connect_vendor(vendor, vendor_credentials, inbound_tx.clone(), cancel);
        let home_session =
            Self::connect_home_automation(home_automation, home_credentials, inbound_tx, cancel);

        let statuses = vec![
            (TransportKind::Vendor, vendor_session.status()),
            (TransportKind::HomeAutomation, home_session.status()),
        ];

        let connector = Arc::new(Self {
            vendor: vendor_session,
            home_automation: home_session,
            subscribers: Mutex::new(Vec::new()),
            statuses,
        });
        let pump = connector.spawn_pump(inbound_rx, cancel.clone());
        (connector, pump)
    }

    /// Open the vendor cloud session.
    pub fn connect_vendor(
        mut config: SessionConfig,
        credentials: Arc<dyn CredentialSource>,
        inbound: mpsc::UnboundedSender<InboundMessage>,
        cancel: &CancellationToken,
    ) -> Arc<MqttSession> {
        config.kind = TransportKind::Vendor;
        MqttSession::connect(config, credentials, inbound, cancel.child_token())
    }

    /// Open the home-automation broker session.
    pub fn connect_home_automation(
        mut config: SessionConfig,
        credentials: Arc<dyn CredentialSource>,
        inbound: mpsc::UnboundedSender<InboundMessage>,
        cancel: &CancellationToken,
    ) -> Arc<MqttSession> {
        config.kind = TransportKind::HomeAutomation;
        if !config.baseline_topics.iter().any(|t| t == topics::STATUS_TOPIC) {
            config.baseline_topics.push(topics::STATUS_TOPIC.to_owned());
        }
        MqttSession::connect(config, credentials, inbound, cancel.child_token())
    }

    /// Forward everything from `inbound` until cancelled or the senders close.
    pub fn spawn_pump(
        self: &Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let connector = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    message = inbound.recv() => {
                        let Some(message) = message else { break };
                        connector.ingest(message);
                    }
                }
            }
            debug!("inbound pump stopped");
        })
    }

    /// Translate one raw publish and fan it out.
    pub fn ingest(&self, message: InboundMessage) {
        trace!(transport = %message.transport, topic = %message.topic, "inbound");
        let Some(event) = translate(message) else {
            return;
        };
        // No receivers is fine: nobody is listening yet.
        self.lock_subscribers().retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// A new receiver for every validated inbound event from now on.
    /// Dropping the receiver unsubscribes it.
    pub fn subscribe_messages(&self) -> mpsc::UnboundedReceiver<InboundEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock_subscribers().push(tx);
        rx
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<InboundEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn link(&self, transport: TransportKind) -> &Arc<dyn Link> {
        match transport {
            TransportKind::Vendor => &self.vendor,
            TransportKind::HomeAutomation => &self.home_automation,
        }
    }

    /// Record and (if connected) subscribe. Replayed on every reconnect.
    pub fn subscribe(&self, transport: TransportKind, topic: &str) {
        self.link(transport).subscribe(topic);
    }

    /// Drop a recorded topic so it is no longer replayed.
    pub fn unsubscribe(&self, transport: TransportKind, topic: &str) {
        self.link(transport).unsubscribe(topic);
    }

    /// Fire-and-forget publish; failures are logged by the session.
    pub fn publish(&self, transport: TransportKind, topic: &str, payload: impl Into<Bytes>, retain: bool) {
        self.link(transport).publish(topic, payload.into(), retain);
    }

    /// Serialize `body` as JSON and publish it.
    pub fn publish_json<T: Serialize>(&self, transport: TransportKind, topic: &str, body: &T, retain: bool) {
        match serde_json::to_vec(body) {
            Ok(payload) => self.publish(transport, topic, payload, retain),
            Err(e) => warn!(%transport, topic, error = %e, "cannot serialize payload"),
        }
    }

    /// `true` only while both sessions are connected.
    pub fn is_connected(&self) -> bool {
        self.vendor.is_connected() && self.home_automation.is_connected()
    }

    /// Resolves when either session gives up after repeated credential
    /// rejection. Never resolves for links without a status channel.
    pub async fn wait_for_failure(&self) -> TransportKind {
        let status = |kind: TransportKind| {
            self.statuses
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, rx)| rx.clone())
        };

        tokio::select! {
            () = wait_failed(status(TransportKind::Vendor)) => TransportKind::Vendor,
            () = wait_failed(status(TransportKind::HomeAutomation)) => TransportKind::HomeAutomation,
        }
    }
}

async fn wait_failed(status: Option<watch::Receiver<SessionStatus>>) {
    let Some(mut rx) = status else {
        return std::future::pending().await;
    };
    let failed = rx.wait_for(|s| *s == SessionStatus::Failed).await.is_ok();
    if !failed {
        std::future::pending::<()>().await;
    }
}

// ── In-memory link ───────────────────────────────────────────────────

/// A publish captured by [`MemoryLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
}

impl Published {
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.payload).ok()
    }
}

/// Broker stand-in that records subscriptions and publishes.
#[derive(Debug, Default)]
pub struct MemoryLink {
    connected: AtomicBool,
    subscriptions: Mutex<Vec<String>>,
    published: Mutex<Vec<Published>>,
}

impl MemoryLink {
    pub fn connected() -> Arc<Self> {
        let link = Self::default();
        link.set_connected(true);
        Arc::new(link)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn published(&self) -> Vec<Published> {
        self.published
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Drain everything published so far.
    pub fn take_published(&self) -> Vec<Published> {
        std::mem::take(
            &mut *self
                .published
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        )
    }

    pub fn published_to(&self, topic: &str) -> Vec<Published> {
        self.published()
            .into_iter()
            .filter(|p| p.topic == topic)
            .collect()
    }
}

impl Link for MemoryLink {
    fn subscribe(&self, topic: &str) {
        let mut subs = self
            .subscriptions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !subs.iter().any(|t| t == topic) {
            subs.push(topic.to_owned());
        }
    }

    fn unsubscribe(&self, topic: &str) {
        self.subscriptions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .retain(|t| t != topic);
    }

    fn publish(&self, topic: &str, payload: Bytes, retain: bool) {
        self.published
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(Published {
                topic: topic.to_owned(),
                payload,
                retain,
            });
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
