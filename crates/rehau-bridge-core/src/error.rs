// ── Core error types ──
//
// Bridge-level errors. Consumers never see MQTT return codes or raw
// serde failures; the `From<rehau_bridge_api::Error>` impl translates
// transport-layer errors into the variants below.

use std::time::Duration;

use thiserror::Error;

use crate::model::CommandKind;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout { operation: String, timeout_secs: u64 },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Zone not found: {identifier}")]
    ZoneNotFound { identifier: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error(transparent)]
    Command(#[from] CommandError),

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns `true` for errors the bridge recovers from on its own
    /// (reconnect, next poll, next reload).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Timeout { .. } | Self::Protocol { .. }
        )
    }
}

/// Terminal failure of a single command.
///
/// Every dispatched command ends in either a
/// [`CommandReport`](crate::dispatcher::CommandReport) or one of these.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("Rate limited, retry after {}ms", retry_after.as_millis())]
    RateLimited { retry_after: Duration },

    #[error("No confirmation after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    #[error("Rejected by vendor: {reason}")]
    Rejected { reason: String },

    #[error("Unknown zone: {zone}")]
    UnknownZone { zone: String },

    #[error("Invalid value '{value}' for {kind}: {reason}")]
    InvalidValue {
        kind: CommandKind,
        value: String,
        reason: String,
    },
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<rehau_bridge_api::Error> for CoreError {
    fn from(err: rehau_bridge_api::Error) -> Self {
        use rehau_bridge_api::Error as Api;

        if err.is_auth_rejected() {
            return CoreError::AuthenticationFailed {
                message: err.to_string(),
            };
        }

        match err {
            Api::Authentication { endpoint, message } => CoreError::AuthenticationFailed {
                message: format!("{endpoint}: {message}"),
            },
            Api::Timeout {
                endpoint,
                timeout_secs,
            } => CoreError::Timeout {
                operation: format!("Connection to {endpoint}"),
                timeout_secs,
            },
            Api::MqttClient(e) => CoreError::Transport {
                message: e.to_string(),
            },
            Api::MqttConnection { endpoint, reason } => CoreError::Transport {
                message: format!("{endpoint}: {reason}"),
            },
            Api::Http(e) => CoreError::Transport {
                message: e.to_string(),
            },
            Api::Io(e) => CoreError::Transport {
                message: format!("I/O error: {e}"),
            },
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Deserialization { message, body: _ } => CoreError::Protocol {
                message: format!("Deserialization error: {message}"),
            },
            Api::Decompression(message) => CoreError::Protocol {
                message: format!("Decompression error: {message}"),
            },
            Api::InvalidTopic { segment, reason } => CoreError::Internal(format!(
                "Invalid topic segment '{segment}': {reason}"
            )),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn api_auth_error_maps_to_authentication_failed() {
        let err: CoreError = rehau_bridge_api::Error::Authentication {
            endpoint: "mqtt.example:443".into(),
            message: "NotAuthorized".into(),
        }
        .into();
        assert!(matches!(err, CoreError::AuthenticationFailed { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn api_decode_errors_are_protocol_errors() {
        let err: CoreError = rehau_bridge_api::Error::Decompression("bad".into()).into();
        assert!(matches!(err, CoreError::Protocol { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn rate_limited_display_includes_wait() {
        let err = CommandError::RateLimited {
            retry_after: Duration::from_millis(750),
        };
        assert_eq!(err.to_string(), "Rate limited, retry after 750ms");
    }
}
