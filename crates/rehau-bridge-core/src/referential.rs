// ── Referential loader ──
//
// Requests the vendor enumeration table (code ↔ label) over the vendor
// transport and keeps the last good copy behind an `ArcSwapOption`.
// Exactly one request is in flight at a time; its response slot is a
// oneshot sender that `handle_response` completes from the inbound pump.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use secrecy::ExposeSecret;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use rehau_bridge_api::referential::{self, ReferentialEntry};
use rehau_bridge_api::session::TransportKind;
use rehau_bridge_api::vendor::{self, ReferentialRequest, VendorRequest};

use crate::connector::Connector;
use crate::error::CoreError;
use crate::provider::TokenProvider;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

// ── Referentials ─────────────────────────────────────────────────────

/// Symmetric lookup over one decoded enumeration table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Referentials {
    entries: Vec<ReferentialEntry>,
    by_code: HashMap<String, String>,
    by_label: HashMap<String, String>,
}

impl Referentials {
    pub fn new(entries: Vec<ReferentialEntry>) -> Self {
        let by_code = entries
            .iter()
            .map(|e| (e.index.clone(), e.value.clone()))
            .collect();
        let by_label = entries
            .iter()
            .map(|e| (e.value.to_lowercase(), e.index.clone()))
            .collect();
        Self {
            entries,
            by_code,
            by_label,
        }
    }

    /// Entries in the order the vendor sent them.
    pub fn entries(&self) -> &[ReferentialEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn label(&self, code: &str) -> Option<&str> {
        self.by_code.get(code).map(String::as_str)
    }

    /// Case-insensitive reverse lookup.
    pub fn code(&self, label: &str) -> Option<&str> {
        self.by_label.get(&label.to_lowercase()).map(String::as_str)
    }
}

// ── Loader ───────────────────────────────────────────────────────────

type Slot = (Uuid, oneshot::Sender<String>);

pub struct ReferentialLoader {
    connector: Arc<Connector>,
    tokens: Arc<dyn TokenProvider>,
    current: ArcSwapOption<Referentials>,
    pending: Mutex<Option<Slot>>,
    timeout: Duration,
}

impl ReferentialLoader {
    pub fn new(connector: Arc<Connector>, tokens: Arc<dyn TokenProvider>, timeout: Duration) -> Self {
        Self {
            connector,
            tokens,
            current: ArcSwapOption::empty(),
            pending: Mutex::new(None),
            timeout,
        }
    }

    /// The last successfully loaded table, if any.
    pub fn current(&self) -> Option<Arc<Referentials>> {
        self.current.load_full()
    }

    /// Request the table and wait for the response.
    ///
    /// On timeout or decode failure the previous table stays in place.
    pub async fn load(&self) -> Result<Arc<Referentials>, CoreError> {
        let token = self.tokens.access_token().await?;
        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.install_slot(request_id, tx);

        let request = VendorRequest::ReferentialRequest(ReferentialRequest {
            request_id,
            email: self.tokens.email().to_owned(),
            client_id: self.tokens.client_id().to_owned(),
            token: token.expose_secret().to_owned(),
        });
        let payload = request.to_payload()?;
        self.connector.publish(
            TransportKind::Vendor,
            &vendor::referential_request_topic(self.tokens.email()),
            payload,
            false,
        );
        debug!(%request_id, "referential request published");

        let data = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(data)) => data,
            Ok(Err(_)) => {
                return Err(CoreError::Protocol {
                    message: "referential request superseded".into(),
                });
            }
            Err(_) => {
                self.clear_slot(request_id);
                return Err(CoreError::Timeout {
                    operation: "Referential request".into(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        let entries = referential::decode(&data).map_err(|e| CoreError::Protocol {
            message: format!("referential payload: {e}"),
        })?;
        let table = Arc::new(Referentials::new(entries));
        self.current.store(Some(Arc::clone(&table)));
        info!(entries = table.len(), "referentials loaded");
        Ok(table)
    }

    /// Scheduled wrapper around [`load`](Self::load); failures are logged.
    pub async fn reload(&self) {
        if let Err(e) = self.load().await {
            warn!(error = %e, kept_previous = self.current.load().is_some(), "referential reload failed");
        }
    }

    /// Complete the in-flight request with a response payload.
    /// Returns `false` when nothing was waiting for one.
    pub fn handle_response(&self, data: String) -> bool {
        let slot = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        match slot {
            Some((request_id, tx)) => {
                debug!(%request_id, "referential response received");
                tx.send(data).is_ok()
            }
            None => {
                debug!("unsolicited referential response ignored");
                false
            }
        }
    }

    /// Label for a code, or the code itself when unknown.
    pub fn resolve_label(&self, code: u32) -> String {
        let code = code.to_string();
        self.current
            .load()
            .as_ref()
            .and_then(|table| table.label(&code).map(str::to_owned))
            .unwrap_or(code)
    }

    /// Code for a label; raw numeric input is accepted as-is.
    pub fn resolve_code(&self, label: &str) -> Option<u32> {
        let label = label.trim();
        self.current
            .load()
            .as_ref()
            .and_then(|table| table.code(label).and_then(|c| c.parse().ok()))
            .or_else(|| label.parse().ok())
    }

    fn install_slot(&self, request_id: Uuid, tx: oneshot::Sender<String>) {
        let previous = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .replace((request_id, tx));
        if let Some((old, _)) = previous {
            debug!(%old, "replacing unanswered referential request");
        }
    }

    fn clear_slot(&self, request_id: Uuid) {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if pending.as_ref().is_some_and(|(id, _)| *id == request_id) {
            *pending = None;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::SecretString;

    use super::*;
    use crate::connector::MemoryLink;
    use crate::provider::StaticTokenProvider;

    fn entries() -> Vec<ReferentialEntry> {
        vec![
            ReferentialEntry { index: "0".into(), value: "comfort".into() },
            ReferentialEntry { index: "1".into(), value: "reduced".into() },
            ReferentialEntry { index: "2".into(), value: "standby".into() },
        ]
    }

    fn loader() -> (Arc<MemoryLink>, Arc<ReferentialLoader>) {
        let vendor = MemoryLink::connected();
        let connector = Arc::new(Connector::new(vendor.clone(), MemoryLink::connected()));
        let tokens = Arc::new(StaticTokenProvider::new(
            "me@example.com",
            "client-1",
            SecretString::from("tok".to_string()),
        ));
        let loader = Arc::new(ReferentialLoader::new(connector, tokens, DEFAULT_TIMEOUT));
        (vendor, loader)
    }

    async fn respond_when_requested(vendor: &MemoryLink, loader: &ReferentialLoader, data: String) {
        while vendor.published().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(loader.handle_response(data));
    }

    #[test]
    fn lookup_is_symmetric() {
        let table = Referentials::new(entries());
        assert_eq!(table.label("1"), Some("reduced"));
        assert_eq!(table.code("Reduced"), Some("1"));
        assert_eq!(table.entries()[2].value, "standby");
    }

    #[tokio::test]
    async fn load_publishes_signed_request_and_swaps_table() {
        let (vendor, loader) = loader();
        let data = referential::encode(&entries()).unwrap();

        let task = tokio::spawn({
            let loader = Arc::clone(&loader);
            async move { loader.load().await }
        });
        respond_when_requested(&vendor, &loader, data).await;
        let table = task.await.unwrap().unwrap();

        assert_eq!(table.len(), 3);
        let request = &vendor.published()[0];
        assert_eq!(request.topic, "client/me@example.com/referential");
        let json = request.json().unwrap();
        assert_eq!(json["type"], "referential_request");
        assert_eq!(json["email"], "me@example.com");
        assert_eq!(json["client_id"], "client-1");
        assert_eq!(json["token"], "tok");

        assert_eq!(loader.resolve_label(1), "reduced");
        assert_eq!(loader.resolve_code("standby"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_keeps_previous_table() {
        let (vendor, loader) = loader();

        let first = tokio::spawn({
            let loader = Arc::clone(&loader);
            async move { loader.load().await }
        });
        respond_when_requested(&vendor, &loader, referential::encode(&entries()).unwrap()).await;
        first.await.unwrap().unwrap();

        let err = loader.load().await.unwrap_err();
        assert!(matches!(err, CoreError::Timeout { .. }));
        assert_eq!(loader.current().unwrap().len(), 3);
        assert!(!loader.handle_response("late".into()));
    }

    #[tokio::test]
    async fn garbage_payload_is_a_protocol_error() {
        let (vendor, loader) = loader();

        let task = tokio::spawn({
            let loader = Arc::clone(&loader);
            async move { loader.load().await }
        });
        respond_when_requested(&vendor, &loader, "%%%not-lz%%%".into()).await;

        assert!(matches!(task.await.unwrap(), Err(CoreError::Protocol { .. })));
        assert!(loader.current().is_none());
    }

    #[test]
    fn fallbacks_without_a_table() {
        let (_, loader) = loader();
        assert_eq!(loader.resolve_label(7), "7");
        assert_eq!(loader.resolve_code("3"), Some(3));
        assert_eq!(loader.resolve_code("comfort"), None);
        assert!(!loader.handle_response("unsolicited".into()));
    }
}
