//! The election state machine.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::Instrument;
use tracing::Level;

use crate::config::Config;
use crate::config::LogAtLevel;
use crate::core::timer::RenewalTimer;
use crate::core::Notification;
use crate::error::ApiError;
use crate::events::EventSink;
use crate::events::LeaderEvent;
use crate::identity::Identity;
use crate::lease;
use crate::lease::client::LeaseApi;
use crate::lease::client::LeaseEvent;
use crate::lease::client::LeaseEventKind;
use crate::metrics::ElectionMetrics;
use crate::metrics::ElectionState;

/// Total acquisition attempts at bootstrap. After these, the watch loop is
/// the only driver of further acquisition opportunities.
pub(crate) const BOOTSTRAP_ATTEMPTS: u32 = 3;

/// The long-lived task owning all mutable election state.
///
/// Every transition happens while handling a single [`Notification`], so
/// the state machine needs no further synchronization: timers, the watch
/// loop, and the public handle all talk to it through one channel.
pub(crate) struct ElectCore {
    config: Arc<Config>,
    identity: Identity,

    /// Absent in standalone mode; no lease operation is ever attempted
    /// without it.
    client: Option<Arc<dyn LeaseApi>>,

    state: ElectionState,
    renewal_timer: RenewalTimer,

    /// Engine's own sender, handed to timers and retries.
    tx_notify: mpsc::UnboundedSender<Notification>,
    tx_metrics: tokio::sync::watch::Sender<ElectionMetrics>,
    events: EventSink,
}

impl ElectCore {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn spawn(
        config: Arc<Config>,
        identity: Identity,
        client: Option<Arc<dyn LeaseApi>>,
        tx_notify: mpsc::UnboundedSender<Notification>,
        rx_notify: mpsc::UnboundedReceiver<Notification>,
        tx_metrics: tokio::sync::watch::Sender<ElectionMetrics>,
        events: EventSink,
        rx_shutdown: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        let core = ElectCore {
            config,
            identity,
            client,
            state: ElectionState::Follower,
            renewal_timer: RenewalTimer::new(),
            tx_notify,
            tx_metrics,
            events,
        };

        let span = tracing::span!(Level::DEBUG, "elect-core", identity = %core.identity);
        tokio::spawn(core.main(rx_notify, rx_shutdown).instrument(span))
    }

    async fn main(
        mut self,
        mut rx_notify: mpsc::UnboundedReceiver<Notification>,
        mut rx_shutdown: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = &mut rx_shutdown => {
                    self.release().await;
                    break;
                }

                notification = rx_notify.recv() => {
                    match notification {
                        Some(n) => self.handle_notification(n).await,
                        // All senders gone: the handle was dropped without shutdown.
                        None => break,
                    }
                }
            }
        }

        tracing::debug!("election engine exiting");
    }

    async fn handle_notification(&mut self, notification: Notification) {
        tracing::debug!("handling: {}", notification);

        match notification {
            Notification::Standalone { done } => {
                self.note("not running inside an orchestrator, acting as sole leader");
                self.become_leader();
                let _ = done.send(());
            }
            Notification::Acquire { attempts_left, done } => {
                self.handle_acquire(attempts_left, done).await;
            }
            Notification::RenewalDue { token } => {
                self.handle_renewal_due(token).await;
            }
            Notification::LeaseChanged { event } => {
                self.handle_lease_changed(event).await;
            }
        }
    }

    async fn handle_acquire(&mut self, attempts_left: u32, done: Option<oneshot::Sender<bool>>) {
        if self.state.is_leader() {
            if let Some(done) = done {
                let _ = done.send(true);
            }
            return;
        }

        let acquired = match self.try_acquire().await {
            Ok(acquired) => acquired,
            Err(e) => {
                tracing::error!(error = %e, lease = %self.config.lease_name, "lease acquisition attempt failed");
                false
            }
        };

        if acquired {
            self.become_leader();
            if let Some(done) = done {
                let _ = done.send(true);
            }
            return;
        }

        let attempts_left = attempts_left.saturating_sub(1);
        if attempts_left == 0 {
            if let Some(done) = done {
                let _ = done.send(false);
            }
            return;
        }

        let delay = self.config.retry_delay();
        self.note(format!(
            "retrying lease acquisition in {:?} ({} attempts left)",
            delay, attempts_left
        ));

        let tx = self.tx_notify.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(Notification::Acquire { attempts_left, done });
        });
    }

    async fn handle_renewal_due(&mut self, token: u64) {
        if !self.renewal_timer.is_current(token) {
            tracing::debug!(token, "ignoring stale renewal timer");
            return;
        }
        if !self.state.is_leader() {
            return;
        }

        match self.renew().await {
            Ok(true) => {
                self.note(format!("renewed lease {}", self.config.lease_name));
                self.renewal_timer.schedule(self.config.renewal_delay(), self.tx_notify.clone());
            }
            Ok(false) => {
                self.note(format!("lease {} is no longer held by us", self.config.lease_name));
                self.lose_leadership();
            }
            Err(e) => {
                tracing::warn!(error = %e, lease = %self.config.lease_name, "lease renewal failed");
                self.lose_leadership();
            }
        }
    }

    async fn handle_lease_changed(&mut self, event: LeaseEvent) {
        match event.kind {
            LeaseEventKind::Deleted => {
                if self.state.is_leader() {
                    return;
                }

                self.note(format!("lease {} was deleted, attempting acquisition", self.config.lease_name));
                match self.try_acquire().await {
                    Ok(true) => self.become_leader(),
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(error = %e, lease = %self.config.lease_name, "lease acquisition attempt failed");
                    }
                }
            }
            LeaseEventKind::Added | LeaseEventKind::Modified => {
                if lease::held_by(&event.lease, self.identity.as_str()) {
                    if self.state.is_leader() {
                        // Our own write coming back around; push the next
                        // renewal out by a full interval.
                        self.renewal_timer.schedule(self.config.renewal_delay(), self.tx_notify.clone());
                    } else {
                        self.note(format!("lease {} is held by us, assuming leadership", self.config.lease_name));
                        self.become_leader();
                    }
                } else if self.state.is_leader() {
                    let holder = event
                        .lease
                        .spec
                        .as_ref()
                        .and_then(|s| s.holder_identity.clone())
                        .unwrap_or_default();
                    self.note(format!("lease {} was taken over by '{}'", self.config.lease_name, holder));
                    self.lose_leadership();
                }
            }
        }
    }

    /// One acquisition attempt. `Ok(true)` means the lease is ours:
    /// created by us, overwritten by us, or found to be already naming us
    /// (crash-restart within the lease duration).
    async fn try_acquire(&mut self) -> Result<bool, ApiError> {
        let Some(client) = self.client.clone() else {
            return Ok(false);
        };

        let name = &self.config.lease_name;
        let namespace = &self.config.namespace;

        let current = match client.read(name, namespace).await {
            Ok(lease) => lease,
            Err(ApiError::NotFound { .. }) => {
                let fresh = lease::claimed(name, self.identity.as_str(), self.config.lease_duration(), Utc::now());
                return match client.create(namespace, &fresh).await {
                    Ok(created) => Ok(lease::held_by(&created, self.identity.as_str())),
                    Err(ApiError::AlreadyExists { .. }) => {
                        self.note(format!("lease {} was created by a peer first", name));
                        Ok(false)
                    }
                    Err(e) => Err(e),
                };
            }
            Err(e) => return Err(e),
        };

        if lease::held_by(&current, self.identity.as_str()) {
            self.note(format!("lease {} already names us as holder, reclaiming", name));
            return Ok(true);
        }

        if lease::is_expired(&current, Utc::now()) || lease::is_unheld(&current) {
            let claim = lease::claim_over(current, self.identity.as_str(), self.config.lease_duration(), Utc::now());
            return match client.replace(name, namespace, &claim).await {
                Ok(updated) => Ok(lease::held_by(&updated, self.identity.as_str())),
                Err(ApiError::Conflict { .. }) => {
                    self.note(format!("another participant claimed lease {} first", name));
                    Ok(false)
                }
                Err(e) => Err(e),
            };
        }

        let holder = current.spec.as_ref().and_then(|s| s.holder_identity.clone()).unwrap_or_default();
        self.note(format!("lease {} is held by '{}', remaining follower", name, holder));
        Ok(false)
    }

    /// One renewal write. `Ok(false)` means the lease is no longer ours.
    async fn renew(&mut self) -> Result<bool, ApiError> {
        let Some(client) = self.client.clone() else {
            return Ok(true);
        };

        let name = &self.config.lease_name;
        let namespace = &self.config.namespace;

        let current = match client.read(name, namespace).await {
            Ok(lease) => lease,
            Err(ApiError::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };

        if !lease::held_by(&current, self.identity.as_str()) {
            return Ok(false);
        }

        match client.replace(name, namespace, &lease::renewed(current, Utc::now())).await {
            Ok(_) => Ok(true),
            Err(ApiError::Conflict { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Graceful hand-back on shutdown: clear the holder so peers need not
    /// wait out the lease duration. Remote failures are logged and
    /// swallowed; leadership is dropped locally no matter what. No `Lost`
    /// event: the caller initiated this.
    async fn release(&mut self) {
        if !self.state.is_leader() {
            return;
        }

        if let Some(client) = self.client.clone() {
            let name = &self.config.lease_name;
            let namespace = &self.config.namespace;

            match client.read(name, namespace).await {
                Ok(current) if lease::held_by(&current, self.identity.as_str()) => {
                    match client.replace(name, namespace, &lease::released(current)).await {
                        Ok(_) => self.note(format!("released lease {}", name)),
                        Err(e) => {
                            tracing::warn!(error = %e, lease = %name, "failed to clear lease holder during shutdown");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, lease = %name, "failed to read lease during shutdown");
                }
            }
        }

        self.renewal_timer.cancel();
        self.state = ElectionState::Follower;
        self.publish_metrics();
    }

    /// Transition to leader. A no-op when already leading, which is what
    /// keeps concurrent watch and renewal outcomes from double-emitting
    /// `Elected`.
    fn become_leader(&mut self) {
        if self.state.is_leader() {
            return;
        }

        self.state = ElectionState::Leader;
        self.publish_metrics();
        self.note(format!("elected as leader for lease {}", self.config.lease_name));
        self.events.emit(LeaderEvent::Elected {
            lease_name: self.config.lease_name.clone(),
        });

        if self.client.is_some() {
            self.renewal_timer.schedule(self.config.renewal_delay(), self.tx_notify.clone());
        }
    }

    /// Transition to follower. A no-op when already following.
    fn lose_leadership(&mut self) {
        if !self.state.is_leader() {
            return;
        }

        self.state = ElectionState::Follower;
        self.renewal_timer.cancel();
        self.publish_metrics();
        self.note(format!("lost leadership for lease {}", self.config.lease_name));
        self.events.emit(LeaderEvent::Lost {
            lease_name: self.config.lease_name.clone(),
        });
    }

    fn publish_metrics(&self) {
        let _ = self.tx_metrics.send(ElectionMetrics {
            identity: self.identity.to_string(),
            lease_name: self.config.lease_name.clone(),
            state: self.state,
        });
    }

    fn note(&self, msg: impl std::fmt::Display) {
        match self.config.log_at_level {
            LogAtLevel::Log => tracing::info!("{}", msg),
            LogAtLevel::Debug => tracing::debug!("{}", msg),
        }
    }
}
