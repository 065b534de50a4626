//! Command handlers, one module per subcommand.

pub mod config_cmd;
pub mod run;
pub mod topics;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rehau_bridge_api::InstallationClient;
use rehau_bridge_config::{Config, InstallationSourceSetting, TokenSetting};
use rehau_bridge_core::{
    FileInstallationSource, HttpInstallationSource, InstallationSource, StaticTokenProvider,
    TokenFileProvider, TokenProvider,
};

use crate::cli::GlobalOpts;
use crate::error::CliError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// The config file in effect for this invocation.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(rehau_bridge_config::config_path)
}

/// Load the layered configuration, reporting errors against the file path.
pub fn load(global: &GlobalOpts) -> Result<(Config, PathBuf), CliError> {
    let path = config_file(global);
    let config =
        rehau_bridge_config::load_config(Some(&path)).map_err(|e| CliError::from_config(e, &path))?;
    tracing::debug!(path = %path.display(), "configuration loaded");
    Ok((config, path))
}

pub fn token_provider(email: &str, client_id: &str, token: TokenSetting) -> Arc<dyn TokenProvider> {
    match token {
        TokenSetting::File(path) => Arc::new(TokenFileProvider::new(email, client_id, path)),
        TokenSetting::Static(secret) => Arc::new(StaticTokenProvider::new(email, client_id, secret)),
    }
}

pub fn installation_source(
    setting: InstallationSourceSetting,
    tokens: Option<Arc<dyn TokenProvider>>,
) -> Result<Arc<dyn InstallationSource>, CliError> {
    match (setting, tokens) {
        (InstallationSourceSetting::File(path), _) => Ok(Arc::new(FileInstallationSource::new(path))),
        (InstallationSourceSetting::Http(url), Some(tokens)) => {
            let client = InstallationClient::new(url, HTTP_TIMEOUT)
                .map_err(|e| CliError::from(rehau_bridge_core::CoreError::from(e)))?;
            Ok(Arc::new(HttpInstallationSource::new(client, tokens)))
        }
        (InstallationSourceSetting::Http(_), None) => Err(CliError::NoCredentials {
            what: "vendor token for the installations endpoint".into(),
        }),
    }
}
