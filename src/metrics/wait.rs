use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::metrics::ElectionMetrics;

/// Error variants related to metrics waiting.
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("timeout after {0:?} when {1}")]
    Timeout(Duration, String),

    #[error("election engine is shutting down")]
    ShuttingDown,
}

/// Wait is a wrapper of the metrics channel that waits for the metrics to
/// satisfy some condition.
pub struct Wait {
    pub timeout: Duration,
    pub rx: watch::Receiver<ElectionMetrics>,
}

impl Wait {
    /// Wait for metrics to satisfy some condition or timeout.
    #[tracing::instrument(level = "trace", skip(self, func), fields(msg=%msg.to_string()))]
    pub async fn metrics<T>(&self, func: T, msg: impl ToString) -> Result<ElectionMetrics, WaitError>
    where T: Fn(&ElectionMetrics) -> bool + Send {
        let timeout_at = Instant::now() + self.timeout;

        let mut rx = self.rx.clone();
        loop {
            let latest = rx.borrow().clone();

            tracing::debug!("id={} wait {:}: latest: {:?}", latest.identity, msg.to_string(), latest);

            if func(&latest) {
                return Ok(latest);
            }

            let now = Instant::now();
            if now >= timeout_at {
                return Err(WaitError::Timeout(
                    self.timeout,
                    format!("{} latest: {:?}", msg.to_string(), latest),
                ));
            }

            let delay = tokio::time::sleep_until(timeout_at);

            tokio::select! {
                _ = delay => {
                    return Err(WaitError::Timeout(
                        self.timeout,
                        format!("{} latest: {:?}", msg.to_string(), latest),
                    ));
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(WaitError::ShuttingDown);
                    }
                }
            }
        }
    }

    /// Wait for the participant to become leader or timeout.
    #[tracing::instrument(level = "trace", skip(self), fields(msg=msg.to_string().as_str()))]
    pub async fn leader(&self, msg: impl ToString) -> Result<ElectionMetrics, WaitError> {
        self.metrics(|m| m.is_leader(), &format!("{} .state -> Leader", msg.to_string())).await
    }

    /// Wait for the participant to observe itself as follower or timeout.
    #[tracing::instrument(level = "trace", skip(self), fields(msg=msg.to_string().as_str()))]
    pub async fn follower(&self, msg: impl ToString) -> Result<ElectionMetrics, WaitError> {
        self.metrics(|m| !m.is_leader(), &format!("{} .state -> Follower", msg.to_string())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ElectionState;

    #[tokio::test(start_paused = true)]
    async fn test_wait_resolves_on_change() -> anyhow::Result<()> {
        let (tx, rx) = watch::channel(ElectionMetrics::new_initial("elector-hostA", "L"));
        let wait = Wait {
            timeout: Duration::from_secs(1),
            rx,
        };

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send_modify(|m| m.state = ElectionState::Leader);
            // Keep the sender alive past the waiter's wake-up.
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let got = wait.leader("become leader").await?;
        assert!(got.is_leader());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let (_tx, rx) = watch::channel(ElectionMetrics::new_initial("elector-hostA", "L"));
        let wait = Wait {
            timeout: Duration::from_millis(50),
            rx,
        };

        let res = wait.leader("become leader").await;
        assert!(matches!(res, Err(WaitError::Timeout(_, _))));
    }
}
