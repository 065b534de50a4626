// ── External collaborators ──
//
// The bridge does not log in or poll the vendor REST API itself. A
// `TokenProvider` supplies the bearer token obtained elsewhere and an
// `InstallationSource` supplies the installation tree. Adapters for a
// token file, a fixed token, a JSON snapshot and an authenticated HTTP
// GET are provided so the binary is runnable on its own.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use rehau_bridge_api::installation::{self, InstallationClient, InstallationTree};
use rehau_bridge_api::session::{CredentialSource, Credentials};

use crate::error::CoreError;
use crate::model::Installation;

// ── Token provider ───────────────────────────────────────────────────

/// Source of the vendor account identity and its bearer token.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<SecretString, CoreError>;

    fn email(&self) -> &str;

    fn client_id(&self) -> &str;

    /// Obtain a fresh token, e.g. after the broker rejected the current one.
    async fn refresh(&self) -> Result<(), CoreError>;
}

/// A token that never changes. `refresh` is a no-op.
pub struct StaticTokenProvider {
    email: String,
    client_id: String,
    token: SecretString,
}

impl StaticTokenProvider {
    pub fn new(email: impl Into<String>, client_id: impl Into<String>, token: SecretString) -> Self {
        Self {
            email: email.into(),
            client_id: client_id.into(),
            token,
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<SecretString, CoreError> {
        Ok(self.token.clone())
    }

    fn email(&self) -> &str {
        &self.email
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn refresh(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Token kept in a file maintained by an external login helper.
/// `refresh` re-reads the file.
pub struct TokenFileProvider {
    email: String,
    client_id: String,
    path: PathBuf,
    token: RwLock<Option<SecretString>>,
}

impl TokenFileProvider {
    pub fn new(email: impl Into<String>, client_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            email: email.into(),
            client_id: client_id.into(),
            path: path.into(),
            token: RwLock::new(None),
        }
    }

    async fn read(&self) -> Result<SecretString, CoreError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| CoreError::AuthenticationFailed {
                message: format!("cannot read token file {}: {e}", self.path.display()),
            })?;
        let token = raw.trim();
        if token.is_empty() {
            return Err(CoreError::AuthenticationFailed {
                message: format!("token file {} is empty", self.path.display()),
            });
        }
        Ok(SecretString::from(token.to_owned()))
    }

    fn cached(&self) -> Option<SecretString> {
        self.token
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn store(&self, token: SecretString) {
        *self
            .token
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(token);
    }
}

#[async_trait]
impl TokenProvider for TokenFileProvider {
    async fn access_token(&self) -> Result<SecretString, CoreError> {
        if let Some(token) = self.cached() {
            return Ok(token);
        }
        let token = self.read().await?;
        self.store(token.clone());
        Ok(token)
    }

    fn email(&self) -> &str {
        &self.email
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn refresh(&self) -> Result<(), CoreError> {
        let token = self.read().await?;
        self.store(token);
        debug!(path = %self.path.display(), "token reloaded from file");
        Ok(())
    }
}

/// Presents the account token to the vendor broker: the email as MQTT
/// username, the bearer token as password.
pub struct VendorCredentials {
    tokens: Arc<dyn TokenProvider>,
}

impl VendorCredentials {
    pub fn new(tokens: Arc<dyn TokenProvider>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl CredentialSource for VendorCredentials {
    async fn credentials(&self) -> Result<Option<Credentials>, rehau_bridge_api::Error> {
        let token = self
            .tokens
            .access_token()
            .await
            .map_err(|e| rehau_bridge_api::Error::Authentication {
                endpoint: "token provider".into(),
                message: e.to_string(),
            })?;
        Ok(Some(Credentials {
            username: self.tokens.email().to_owned(),
            password: token,
        }))
    }

    async fn on_auth_rejected(&self) -> Result<(), rehau_bridge_api::Error> {
        info!("vendor broker rejected token, refreshing");
        self.tokens
            .refresh()
            .await
            .map_err(|e| rehau_bridge_api::Error::Authentication {
                endpoint: "token provider".into(),
                message: e.to_string(),
            })
    }
}

// ── Installation source ──────────────────────────────────────────────

/// Supplies the current installation tree.
#[async_trait]
pub trait InstallationSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Installation>, CoreError>;
}

fn into_domain(tree: InstallationTree) -> Vec<Installation> {
    tree.installations.into_iter().map(Installation::from).collect()
}

/// Reads the tree from a JSON snapshot on disk.
pub struct FileInstallationSource {
    path: PathBuf,
}

impl FileInstallationSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl InstallationSource for FileInstallationSource {
    async fn fetch(&self) -> Result<Vec<Installation>, CoreError> {
        let tree = installation::read_snapshot(&self.path).await?;
        Ok(into_domain(tree))
    }
}

/// GETs the tree over HTTP with the account's bearer token.
pub struct HttpInstallationSource {
    client: InstallationClient,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpInstallationSource {
    pub fn new(client: InstallationClient, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { client, tokens }
    }
}

#[async_trait]
impl InstallationSource for HttpInstallationSource {
    async fn fetch(&self) -> Result<Vec<Installation>, CoreError> {
        let token = self.tokens.access_token().await?;
        match self.client.fetch(&token).await {
            Ok(tree) => Ok(into_domain(tree)),
            Err(e) if e.is_auth_rejected() => {
                info!(url = %self.client.url(), "installation endpoint rejected token, refreshing once");
                self.tokens.refresh().await?;
                let token = self.tokens.access_token().await?;
                Ok(into_domain(self.client.fetch(&token).await?))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Never exposes the token in `Debug` output.
impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider")
            .field("email", &self.email)
            .field("client_id", &self.client_id)
            .field("token_len", &self.token.expose_secret().len())
            .finish()
    }
}
