//! Configuration for the REHAU NEA SMART bridge.
//!
//! Layered loading (defaults → TOML file → `REHAU_BRIDGE_` environment),
//! credential resolution (env var → system keyring → plaintext), and
//! translation into the runtime types of `rehau_bridge_core` and the MQTT
//! session parameters of `rehau_bridge_api`. Validation happens here so
//! a bad value fails before any connection is attempted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rehau_bridge_api::session::{Credentials, MqttTransport, SessionConfig, TransportKind};
use rehau_bridge_api::vendor;
use rehau_bridge_core::{BridgeConfig, DispatcherConfig, StalenessThresholds};

const KEYRING_SERVICE: &str = "rehau-bridge";
const ENV_PREFIX: &str = "REHAU_BRIDGE_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no {what} configured")]
    NoCredentials { what: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub vendor: VendorSection,

    #[serde(default)]
    pub homeassistant: HomeAssistantSection,

    #[serde(default)]
    pub bridge: BridgeSection,
}

/// Network transport as written in config files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportSetting {
    #[default]
    Tcp,
    Tls,
    Wss,
}

impl From<TransportSetting> for MqttTransport {
    fn from(t: TransportSetting) -> Self {
        match t {
            TransportSetting::Tcp => Self::Tcp,
            TransportSetting::Tls => Self::Tls,
            TransportSetting::Wss => Self::WebSocketSecure,
        }
    }
}

/// The vendor cloud account and broker.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VendorSection {
    /// Account email; also the vendor MQTT username and topic scope.
    #[serde(default)]
    pub email: String,

    #[serde(default = "default_vendor_client_id")]
    pub client_id: String,

    #[serde(default)]
    pub host: String,

    #[serde(default = "default_vendor_port")]
    pub port: u16,

    #[serde(default = "default_vendor_transport")]
    pub transport: TransportSetting,

    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// File holding the bearer token, kept fresh by an external login helper.
    pub token_file: Option<PathBuf>,

    /// Environment variable containing the bearer token.
    pub token_env: Option<String>,

    /// Bearer token (plaintext, prefer `token_file` or the keyring).
    pub token: Option<String>,

    /// Endpoint returning the installation tree as JSON.
    pub installations_url: Option<String>,

    /// Local JSON snapshot of the installation tree.
    pub installations_file: Option<PathBuf>,
}

impl Default for VendorSection {
    fn default() -> Self {
        Self {
            email: String::new(),
            client_id: default_vendor_client_id(),
            host: String::new(),
            port: default_vendor_port(),
            transport: default_vendor_transport(),
            ws_path: default_ws_path(),
            token_file: None,
            token_env: None,
            token: None,
            installations_url: None,
            installations_file: None,
        }
    }
}

fn default_vendor_client_id() -> String {
    "rehau-bridge".into()
}
fn default_vendor_port() -> u16 {
    443
}
fn default_vendor_transport() -> TransportSetting {
    TransportSetting::Wss
}
fn default_ws_path() -> String {
    "/mqtt".into()
}

/// The Home Assistant broker.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HomeAssistantSection {
    #[serde(default = "default_ha_host")]
    pub host: String,

    #[serde(default = "default_ha_port")]
    pub port: u16,

    #[serde(default)]
    pub transport: TransportSetting,

    #[serde(default = "default_ha_client_id")]
    pub client_id: String,

    pub username: Option<String>,

    /// Environment variable containing the broker password.
    pub password_env: Option<String>,

    /// Broker password (plaintext, prefer the keyring).
    pub password: Option<String>,
}

impl Default for HomeAssistantSection {
    fn default() -> Self {
        Self {
            host: default_ha_host(),
            port: default_ha_port(),
            transport: TransportSetting::Tcp,
            client_id: default_ha_client_id(),
            username: None,
            password_env: None,
            password: None,
        }
    }
}

fn default_ha_host() -> String {
    "localhost".into()
}
fn default_ha_port() -> u16 {
    1883
}
fn default_ha_client_id() -> String {
    "rehau-bridge-ha".into()
}

/// Bridge timing. Integers are signed so negative input is reported
/// instead of failing to parse.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeSection {
    pub zone_reload_interval_seconds: i64,
    pub token_refresh_interval_seconds: i64,
    pub referentials_reload_interval_seconds: i64,
    pub referential_timeout_seconds: i64,
    pub live_data_interval_seconds: i64,
    pub use_group_in_names: bool,
    pub command_retry_timeout_seconds: i64,
    pub command_max_retries: i64,
    pub command_min_interval_ms: i64,
    pub command_retention_seconds: i64,
    pub suppress_no_op_commands: bool,
    pub staleness_warning_ms: i64,
    pub staleness_stale_ms: i64,
    pub staleness_scan_interval_seconds: i64,
    pub keep_alive_seconds: i64,
    pub connection_timeout_seconds: i64,
    pub reconnect_delay_seconds: i64,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            zone_reload_interval_seconds: 300,
            token_refresh_interval_seconds: 3600,
            referentials_reload_interval_seconds: 86_400,
            referential_timeout_seconds: 10,
            live_data_interval_seconds: 300,
            use_group_in_names: false,
            command_retry_timeout_seconds: 30,
            command_max_retries: 3,
            command_min_interval_ms: 1000,
            command_retention_seconds: 60,
            suppress_no_op_commands: false,
            staleness_warning_ms: 600_000,
            staleness_stale_ms: 1_800_000,
            staleness_scan_interval_seconds: 60,
            keep_alive_seconds: 30,
            connection_timeout_seconds: 10,
            reconnect_delay_seconds: 5,
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "rehau-bridge", "rehau-bridge").map_or_else(
        || {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".config");
            p.push("rehau-bridge");
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Figment for `path` (or the default path): defaults, then the file,
/// then `REHAU_BRIDGE_<SECTION>__<KEY>` environment variables.
pub fn figment(path: Option<&Path>) -> Figment {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    Ok(figment(path).extract()?)
}

/// Render a config as TOML (for `config show`).
pub fn to_toml(cfg: &Config) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(cfg)?)
}

// ── Validation and translation ──────────────────────────────────────

fn seconds(field: &str, value: i64) -> Result<Duration, ConfigError> {
    u64::try_from(value)
        .map(Duration::from_secs)
        .map_err(|_| invalid(field, format!("must not be negative (got {value})")))
}

fn positive_seconds(field: &str, value: i64) -> Result<Duration, ConfigError> {
    let duration = seconds(field, value)?;
    if duration.is_zero() {
        return Err(invalid(field, "must be greater than zero"));
    }
    Ok(duration)
}

fn millis(field: &str, value: i64) -> Result<Duration, ConfigError> {
    u64::try_from(value)
        .map(Duration::from_millis)
        .map_err(|_| invalid(field, format!("must not be negative (got {value}ms)")))
}

impl BridgeSection {
    /// Validate and convert into the core runtime config.
    pub fn to_bridge_config(&self) -> Result<BridgeConfig, ConfigError> {
        let max_retries = u32::try_from(self.command_max_retries).map_err(|_| {
            invalid(
                "command_max_retries",
                format!("must be between 0 and {} (got {})", u32::MAX, self.command_max_retries),
            )
        })?;

        let staleness = StalenessThresholds::try_new(
            millis("staleness_warning_ms", self.staleness_warning_ms)?,
            millis("staleness_stale_ms", self.staleness_stale_ms)?,
        )
        .map_err(|e| invalid("staleness_warning_ms", e.to_string()))?;

        Ok(BridgeConfig {
            zone_reload_interval: seconds("zone_reload_interval_seconds", self.zone_reload_interval_seconds)?,
            token_refresh_interval: seconds(
                "token_refresh_interval_seconds",
                self.token_refresh_interval_seconds,
            )?,
            referentials_reload_interval: positive_seconds(
                "referentials_reload_interval_seconds",
                self.referentials_reload_interval_seconds,
            )?,
            referential_timeout: positive_seconds("referential_timeout_seconds", self.referential_timeout_seconds)?,
            live_data_interval: seconds("live_data_interval_seconds", self.live_data_interval_seconds)?,
            use_group_in_names: self.use_group_in_names,
            dispatcher: DispatcherConfig {
                retry_timeout: positive_seconds(
                    "command_retry_timeout_seconds",
                    self.command_retry_timeout_seconds,
                )?,
                max_retries,
                retention: positive_seconds("command_retention_seconds", self.command_retention_seconds)?,
                min_interval: millis("command_min_interval_ms", self.command_min_interval_ms)?,
                suppress_no_op: self.suppress_no_op_commands,
            },
            staleness,
            staleness_scan_interval: positive_seconds(
                "staleness_scan_interval_seconds",
                self.staleness_scan_interval_seconds,
            )?,
        })
    }

    fn session_timing(&self) -> Result<(Duration, Duration, Duration), ConfigError> {
        Ok((
            positive_seconds("keep_alive_seconds", self.keep_alive_seconds)?,
            positive_seconds("connection_timeout_seconds", self.connection_timeout_seconds)?,
            positive_seconds("reconnect_delay_seconds", self.reconnect_delay_seconds)?,
        ))
    }
}

/// Where the installation tree comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallationSourceSetting {
    File(PathBuf),
    Http(url::Url),
}

impl VendorSection {
    fn require_email(&self) -> Result<(), ConfigError> {
        if self.email.trim().is_empty() {
            return Err(invalid("vendor.email", "is required"));
        }
        Ok(())
    }

    pub fn installation_source(&self) -> Result<InstallationSourceSetting, ConfigError> {
        match (&self.installations_file, &self.installations_url) {
            (Some(path), None) => Ok(InstallationSourceSetting::File(path.clone())),
            (None, Some(raw)) => raw
                .parse()
                .map(InstallationSourceSetting::Http)
                .map_err(|_| invalid("vendor.installations_url", format!("invalid URL: {raw}"))),
            (Some(_), Some(_)) => Err(invalid(
                "vendor.installations_file",
                "set either installations_file or installations_url, not both",
            )),
            (None, None) => Err(invalid(
                "vendor.installations_url",
                "an installation source is required (installations_url or installations_file)",
            )),
        }
    }
}

fn keyring_secret(key: &str) -> Option<String> {
    keyring::Entry::new(KEYRING_SERVICE, key)
        .and_then(|entry| entry.get_password())
        .ok()
}

/// How the vendor bearer token is obtained.
#[derive(Debug, Clone)]
pub enum TokenSetting {
    File(PathBuf),
    Static(SecretString),
}

/// Resolve the vendor token: token file, then env var, then keyring,
/// then plaintext.
pub fn resolve_vendor_token(vendor: &VendorSection) -> Result<TokenSetting, ConfigError> {
    if let Some(ref path) = vendor.token_file {
        return Ok(TokenSetting::File(path.clone()));
    }

    if let Some(val) = vendor.token_env.as_ref().and_then(|name| std::env::var(name).ok()) {
        return Ok(TokenSetting::Static(SecretString::from(val)));
    }

    if let Some(secret) = keyring_secret(&format!("{}/token", vendor.email)) {
        return Ok(TokenSetting::Static(SecretString::from(secret)));
    }

    if let Some(ref token) = vendor.token {
        return Ok(TokenSetting::Static(SecretString::from(token.clone())));
    }

    Err(ConfigError::NoCredentials {
        what: "vendor token (token_file, token_env, keyring or token)".into(),
    })
}

/// Resolve Home Assistant broker credentials; `None` for anonymous brokers.
pub fn resolve_ha_credentials(ha: &HomeAssistantSection) -> Result<Option<Credentials>, ConfigError> {
    let Some(username) = ha.username.clone() else {
        return Ok(None);
    };

    if let Some(pw) = ha.password_env.as_ref().and_then(|name| std::env::var(name).ok()) {
        return Ok(Some(Credentials {
            username,
            password: SecretString::from(pw),
        }));
    }

    if let Some(pw) = keyring_secret(&format!("homeassistant/{username}")) {
        return Ok(Some(Credentials {
            username,
            password: SecretString::from(pw),
        }));
    }

    if let Some(ref pw) = ha.password {
        return Ok(Some(Credentials {
            username,
            password: SecretString::from(pw.clone()),
        }));
    }

    Err(ConfigError::NoCredentials {
        what: format!("password for Home Assistant broker user '{username}'"),
    })
}

/// Everything the `run` command needs, validated.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub bridge: BridgeConfig,
    pub vendor_session: SessionConfig,
    pub ha_session: SessionConfig,
    pub email: String,
    pub client_id: String,
    pub token: TokenSetting,
    pub installations: InstallationSourceSetting,
    pub ha_credentials: Option<Credentials>,
}

impl Config {
    /// Validate every section and resolve credentials.
    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        let vendor = &self.vendor;
        let ha = &self.homeassistant;

        vendor.require_email()?;
        if vendor.host.trim().is_empty() {
            return Err(invalid("vendor.host", "is required"));
        }
        if ha.host.trim().is_empty() {
            return Err(invalid("homeassistant.host", "is required"));
        }

        let bridge = self.bridge.to_bridge_config()?;
        let (keep_alive, connection_timeout, reconnect_delay) = self.bridge.session_timing()?;

        let vendor_session = SessionConfig {
            kind: TransportKind::Vendor,
            host: vendor.host.clone(),
            port: vendor.port,
            transport: vendor.transport.into(),
            ws_path: vendor.ws_path.clone(),
            client_id: vendor.client_id.clone(),
            keep_alive,
            connection_timeout,
            reconnect_delay,
            baseline_topics: vec![vendor::account_topic(&vendor.email)],
        };
        let ha_session = SessionConfig {
            kind: TransportKind::HomeAutomation,
            host: ha.host.clone(),
            port: ha.port,
            transport: ha.transport.into(),
            ws_path: default_ws_path(),
            client_id: ha.client_id.clone(),
            keep_alive,
            connection_timeout,
            reconnect_delay,
            baseline_topics: vec![rehau_bridge_core::topics::STATUS_TOPIC.to_owned()],
        };

        Ok(ResolvedConfig {
            bridge,
            vendor_session,
            ha_session,
            email: vendor.email.clone(),
            client_id: vendor.client_id.clone(),
            token: resolve_vendor_token(vendor)?,
            installations: vendor.installation_source()?,
            ha_credentials: resolve_ha_credentials(ha)?,
        })
    }

    /// Validate the parts needed to build topics offline (no credentials).
    pub fn resolve_offline(&self) -> Result<(BridgeConfig, InstallationSourceSetting), ConfigError> {
        Ok((
            self.bridge.to_bridge_config()?,
            self.vendor.installation_source()?,
        ))
    }
}
