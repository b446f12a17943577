//! Host-process integration: environment detection, signal wiring, and a
//! one-call bootstrap.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::Config;
use crate::elector::Elector;
use crate::error::ElectError;

/// Whether this process runs under the Kubernetes orchestrator.
///
/// The API server injects `KUBERNETES_SERVICE_HOST` into every pod; its
/// absence means there is no coordination store to elect against, and the
/// participant acts as the sole leader.
pub fn running_in_cluster() -> bool {
    std::env::var_os("KUBERNETES_SERVICE_HOST").is_some()
}

/// Install handlers for the canonical termination signals.
///
/// The spawned task waits for SIGINT or SIGTERM and then runs
/// [`Elector::shutdown`], releasing the lease before the process exits.
pub fn install_signal_handlers(elector: Elector) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_termination().await;
        tracing::info!("termination signal received, shutting down election");
        if let Err(e) = elector.shutdown().await {
            tracing::warn!(error = %e, "election engine did not shut down cleanly");
        }
    })
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::signal;
    use tokio::signal::unix::SignalKind;

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGTERM handler");
            // Fall back to SIGINT alone.
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Validate `config`, build the elector for the current environment, start
/// it, and wire termination signals. The one call a host application needs.
pub async fn bootstrap(config: Config) -> Result<Elector, ElectError> {
    let config = Arc::new(config.validate()?);

    let elector = Elector::try_default(config).await?;
    elector.start().await?;
    install_signal_handlers(elector.clone());

    Ok(elector)
}
