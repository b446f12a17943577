//! The reconnecting lease watch loop.
//!
//! This is the only reliable cross-process signal path: peers' writes reach
//! the engine through here. The loop therefore never gives up; any stream
//! termination, graceful or not, is followed by a delayed reconnect.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::Instrument;
use tracing::Level;

use crate::config::Config;
use crate::core::Notification;
use crate::lease::client::LeaseApi;
use crate::lease::client::LeaseEvent;

/// Delay between a stream ending (for any reason) and the next subscription
/// attempt.
pub(crate) const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Delay between receiving a watch event and acting on it, so a writer's
/// burst of follow-up events settles before the engine re-evaluates.
pub(crate) const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Long-running subscription to lease mutations in the configured
/// namespace, filtered down to the contended lease and forwarded to the
/// engine after [`SETTLE_DELAY`].
pub(crate) struct WatchLoop {
    config: Arc<Config>,
    client: Arc<dyn LeaseApi>,
    tx: mpsc::UnboundedSender<Notification>,
}

impl WatchLoop {
    pub(crate) fn spawn(
        config: Arc<Config>,
        client: Arc<dyn LeaseApi>,
        tx: mpsc::UnboundedSender<Notification>,
    ) -> JoinHandle<()> {
        let watch_loop = WatchLoop { config, client, tx };

        let span = tracing::span!(Level::DEBUG, "lease-watch");
        tokio::spawn(watch_loop.main().instrument(span))
    }

    async fn main(self) {
        loop {
            match self.client.watch(&self.config.namespace).await {
                Ok(mut events) => {
                    tracing::debug!(namespace = %self.config.namespace, "lease watch established");

                    while let Some(item) = events.next().await {
                        match item {
                            Ok(event) => {
                                if event.lease.metadata.name.as_deref() == Some(self.config.lease_name.as_str()) {
                                    self.forward_settled(event);
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "lease watch stream failed");
                                break;
                            }
                        }
                    }

                    tracing::debug!("lease watch stream ended, reconnecting in {:?}", RECONNECT_DELAY);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to establish lease watch, retrying in {:?}", RECONNECT_DELAY);
                }
            }

            sleep(RECONNECT_DELAY).await;
        }
    }

    /// Hand the event to the engine after the settle delay. The engine
    /// re-checks holder and state on receipt, so acting late is safe; acting
    /// immediately would thrash when two replicas race through acquisition.
    fn forward_settled(&self, event: LeaseEvent) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            sleep(SETTLE_DELAY).await;
            let _ = tx.send(Notification::LeaseChanged { event });
        });
    }
}
