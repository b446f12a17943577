//! One-shot cancellable timer feeding the election engine.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::core::Notification;

/// At most one renewal is ever pending. Scheduling replaces the previous
/// timer; the token tells the engine to drop a fire that was already queued
/// when its timer was cancelled or replaced.
pub(crate) struct RenewalTimer {
    token: u64,
    handle: Option<JoinHandle<()>>,
}

impl RenewalTimer {
    pub(crate) fn new() -> Self {
        Self { token: 0, handle: None }
    }

    /// Arm the timer `delay` from now, replacing any pending one.
    pub(crate) fn schedule(&mut self, delay: Duration, tx: mpsc::UnboundedSender<Notification>) {
        self.cancel();

        let token = self.token;
        self.handle = Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(Notification::RenewalDue { token });
        }));
    }

    /// Disarm. A fire already in the engine's queue will carry a stale
    /// token.
    pub(crate) fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.token += 1;
    }

    /// Whether `token` belongs to the currently armed timer.
    pub(crate) fn is_current(&self, token: u64) -> bool {
        self.token == token && self.handle.is_some()
    }
}

impl Drop for RenewalTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
