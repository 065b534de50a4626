// Installation tree wire types and fetchers
//
// The installation tree (installations → groups → zones → channels) is
// produced by an external poller. These types mirror its JSON shape; the
// core crate validates them into domain types. Two fetchers are provided:
// an authenticated HTTP GET and a local snapshot file.

use std::path::Path;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;

// ── Wire types ───────────────────────────────────────────────────────

/// Top-level document returned by the installation endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallationTree {
    #[serde(default)]
    pub installations: Vec<RawInstallation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawInstallation {
    pub id: String,
    /// Identifier used to scope vendor topics; falls back to `id`.
    #[serde(default)]
    pub unique: Option<String>,
    #[serde(default)]
    pub name: String,
    /// `"heat"` or `"cool"`.
    #[serde(default)]
    pub mode: Option<String>,
    /// Vendor-encoded outdoor temperature.
    #[serde(default)]
    pub outdoor_temperature: Option<i32>,
    #[serde(default)]
    pub groups: Vec<RawGroup>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawGroup {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub zones: Vec<RawZone>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawZone {
    /// Vendor-issued persistent identifier.
    #[serde(default)]
    pub id: Option<String>,
    /// Zone number, scoped to its controller.
    #[serde(default)]
    pub number: u32,
    #[serde(default)]
    pub controller: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub channels: Vec<RawChannel>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChannel {
    pub id: String,
    #[serde(default)]
    pub temperature: Option<i32>,
    #[serde(default)]
    pub setpoint: Option<i32>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub demand: Option<bool>,
    #[serde(default)]
    pub demand_percent: Option<f64>,
    #[serde(default)]
    pub setpoints: RawSetpoints,
    #[serde(default)]
    pub mode: Option<u32>,
    #[serde(default)]
    pub preset: Option<u32>,
    #[serde(default)]
    pub ring_light: Option<bool>,
    #[serde(default)]
    pub lock: Option<bool>,
}

/// Write-only configuration setpoints, vendor-encoded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSetpoints {
    #[serde(default)]
    pub heat_normal: Option<i32>,
    #[serde(default)]
    pub heat_reduced: Option<i32>,
    #[serde(default)]
    pub cool_normal: Option<i32>,
    #[serde(default)]
    pub cool_reduced: Option<i32>,
}

/// Parse an installation tree document.
pub fn parse_tree(body: &[u8]) -> Result<InstallationTree, Error> {
    serde_json::from_slice(body).map_err(|e| Error::deserialization(&e, body))
}

/// Read an installation tree from a JSON snapshot file.
pub async fn read_snapshot(path: &Path) -> Result<InstallationTree, Error> {
    let body = tokio::fs::read(path).await?;
    trace!(path = %path.display(), bytes = body.len(), "read installation snapshot");
    parse_tree(&body)
}

// ── HTTP client ──────────────────────────────────────────────────────

/// Fetches the installation tree with a bearer token.
pub struct InstallationClient {
    http: reqwest::Client,
    url: Url,
}

impl InstallationClient {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("rehau-bridge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, url })
    }

    /// Build a client around a pre-configured `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, url: Url) -> Self {
        Self { http, url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// GET the tree. A 401/403 maps to [`Error::Authentication`].
    pub async fn fetch(&self, token: &SecretString) -> Result<InstallationTree, Error> {
        debug!(url = %self.url, "fetching installation tree");

        let response = self
            .http
            .get(self.url.clone())
            .bearer_auth(token.expose_secret())
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::Authentication {
                endpoint: self.url.to_string(),
                message: format!("HTTP {}", status.as_u16()),
            });
        }

        let response = response.error_for_status()?;
        let body = response.bytes().await?;
        parse_tree(&body)
    }
}
