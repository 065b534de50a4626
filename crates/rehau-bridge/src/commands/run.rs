//! `run`: connect both brokers and bridge until interrupted.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rehau_bridge_api::StaticCredentials;
use rehau_bridge_core::{Bridge, BridgeState, Connector, TokioClock, VendorCredentials};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let (config, path) = super::load(global)?;
    let resolved = config.resolve().map_err(|e| CliError::from_config(e, &path))?;

    let tokens = super::token_provider(&resolved.email, &resolved.client_id, resolved.token);
    let source = super::installation_source(resolved.installations, Some(Arc::clone(&tokens)))?;

    let cancel = CancellationToken::new();
    let (connector, pump) = Connector::start(
        resolved.vendor_session,
        resolved.ha_session,
        Arc::new(VendorCredentials::new(Arc::clone(&tokens))),
        Arc::new(StaticCredentials(resolved.ha_credentials)),
        &cancel,
    );

    let bridge = Bridge::new(
        resolved.bridge,
        connector,
        tokens,
        source,
        Arc::new(TokioClock),
        cancel.clone(),
    );

    if let Err(err) = bridge.start().await {
        cancel.cancel();
        let _ = pump.await;
        return Err(err.into());
    }
    info!(zones = bridge.topic_space().len(), "bridge running, press Ctrl-C to stop");

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "could not listen for Ctrl-C");
            }
            info!("interrupt received, shutting down");
            None
        }
        state = bridge.wait() => Some(state),
    };

    bridge.shutdown().await;
    let _ = pump.await;

    match outcome {
        Some(BridgeState::Failed { reason }) => Err(CliError::BridgeFailed { reason }),
        _ => Ok(()),
    }
}
