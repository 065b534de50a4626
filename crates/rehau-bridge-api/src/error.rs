use thiserror::Error;

/// Top-level error type for the `rehau-bridge-api` crate.
///
/// Covers every failure mode across both transports and the installation
/// source: authentication, MQTT connection, HTTP, and payload decoding.
/// `rehau-bridge-core` maps these into bridge-level diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Broker or HTTP endpoint rejected the credentials.
    #[error("Authentication rejected by {endpoint}: {message}")]
    Authentication { endpoint: String, message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// MQTT client request could not be queued (event loop gone or full).
    #[error("MQTT client error: {0}")]
    MqttClient(#[from] rumqttc::ClientError),

    /// MQTT connection dropped or could not be established.
    #[error("MQTT connection error on {endpoint}: {reason}")]
    MqttConnection { endpoint: String, reason: String },

    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Connect attempt did not complete in time.
    #[error("Connection to {endpoint} timed out after {timeout_secs}s")]
    Timeout { endpoint: String, timeout_secs: u64 },

    /// Filesystem error reading a local installation snapshot.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// Compressed payload could not be decoded.
    #[error("Decompression failed: {0}")]
    Decompression(String),

    /// Topic contains characters that are not valid in an MQTT topic level.
    #[error("Invalid topic segment '{segment}': {reason}")]
    InvalidTopic { segment: String, reason: String },
}

impl Error {
    /// Returns `true` if this error indicates rejected credentials
    /// and a token refresh might resolve it.
    pub fn is_auth_rejected(&self) -> bool {
        match self {
            Self::Authentication { .. } => true,
            Self::Http(e) => e.status() == Some(reqwest::StatusCode::UNAUTHORIZED),
            _ => false,
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::MqttConnection { .. } => true,
            _ => false,
        }
    }

    pub(crate) fn deserialization(err: &serde_json::Error, body: &[u8]) -> Self {
        Self::Deserialization {
            message: err.to_string(),
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }
}
