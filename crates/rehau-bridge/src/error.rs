//! CLI error types with miette diagnostics.
//!
//! Maps config and core failures into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use rehau_bridge_config::ConfigError;
use rehau_bridge_core::{CommandError, CoreError};

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(
        code(rehau_bridge::validation),
        help("Check {path} or the matching REHAU_BRIDGE_<SECTION>__<KEY> variable.")
    )]
    Validation {
        field: String,
        reason: String,
        path: String,
    },

    #[error("No {what}")]
    #[diagnostic(
        code(rehau_bridge::no_credentials),
        help(
            "Set it in the config file, point an *_env setting at an environment variable,\n\
             or store it in the system keyring under service 'rehau-bridge'."
        )
    )]
    NoCredentials { what: String },

    #[error(transparent)]
    #[diagnostic(code(rehau_bridge::config))]
    Config(ConfigError),

    // ── Vendor / transport ───────────────────────────────────────────

    #[error("Could not reach {what}: {message}")]
    #[diagnostic(
        code(rehau_bridge::connection_failed),
        help("Check the broker host, port and transport settings.")
    )]
    ConnectionFailed { what: String, message: String },

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(rehau_bridge::auth_failed),
        help("Refresh the vendor token (token_file / token_env) and try again.")
    )]
    AuthFailed { message: String },

    #[error("{operation} timed out after {seconds}s")]
    #[diagnostic(code(rehau_bridge::timeout))]
    Timeout { operation: String, seconds: u64 },

    #[error("Zone '{identifier}' not found")]
    #[diagnostic(
        code(rehau_bridge::not_found),
        help("Run: rehau-bridge topics to see the known zones")
    )]
    NotFound { identifier: String },

    #[error("Bridge stopped: {reason}")]
    #[diagnostic(code(rehau_bridge::failed))]
    BridgeFailed { reason: String },

    #[error("{0}")]
    #[diagnostic(code(rehau_bridge::internal))]
    Core(String),

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render JSON: {0}")]
    #[diagnostic(code(rehau_bridge::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } | Self::Config(_) => exit_code::USAGE,
            Self::NoCredentials { .. } | Self::AuthFailed { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            _ => exit_code::GENERAL,
        }
    }

    pub fn from_config(err: ConfigError, path: &std::path::Path) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation {
                field,
                reason,
                path: path.display().to_string(),
            },
            ConfigError::NoCredentials { what } => Self::NoCredentials { what },
            other => Self::Config(other),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Transport { message } => Self::ConnectionFailed {
                what: "installation source".into(),
                message,
            },
            CoreError::AuthenticationFailed { message } => Self::AuthFailed { message },
            CoreError::Timeout {
                operation,
                timeout_secs,
            } => Self::Timeout {
                operation,
                seconds: timeout_secs,
            },
            CoreError::ZoneNotFound { identifier } => Self::NotFound { identifier },
            CoreError::Command(CommandError::UnknownZone { zone }) => Self::NotFound { identifier: zone },
            other => Self::Core(other.to_string()),
        }
    }
}
