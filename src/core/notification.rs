use std::fmt;

use tokio::sync::oneshot;

use crate::lease::client::LeaseEvent;

/// A message waking up the election engine.
///
/// All engine state transitions happen while handling one of these, so they
/// are serialized by construction.
pub(crate) enum Notification {
    /// Run one acquisition attempt. When it fails with attempts left, a
    /// retry is scheduled half a lease duration later. `done` resolves with
    /// the outcome once the sequence ends (acquired, or attempts
    /// exhausted); blocking startup waits on it.
    Acquire {
        attempts_left: u32,
        done: Option<oneshot::Sender<bool>>,
    },

    /// The renewal timer fired. Stale tokens (the timer was cancelled or
    /// rescheduled after this message was queued) are ignored.
    RenewalDue { token: u64 },

    /// The watch loop observed a mutation of our lease, already settled.
    LeaseChanged { event: LeaseEvent },

    /// No coordination store is reachable by design: act as the sole
    /// participant and lead unconditionally. `done` is acknowledged once
    /// leadership is in effect.
    Standalone { done: oneshot::Sender<()> },
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Acquire { attempts_left, done } => {
                write!(f, "Acquire: attempts_left={}, awaited={}", attempts_left, done.is_some())
            }
            Notification::RenewalDue { token } => {
                write!(f, "RenewalDue: token={}", token)
            }
            Notification::LeaseChanged { event } => {
                write!(
                    f,
                    "LeaseChanged: {} {}",
                    event.kind,
                    event.lease.metadata.name.as_deref().unwrap_or("-")
                )
            }
            Notification::Standalone { .. } => {
                write!(f, "Standalone")
            }
        }
    }
}
