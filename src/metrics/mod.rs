//! Election metrics for observability.
//!
//! A snapshot of the participant's view of the election is published on a
//! watch channel by the engine, synchronously within every state
//! transition. Applications read it via [`Elector::metrics`] or block on a
//! condition via [`Elector::wait`].
//!
//! [`Elector::metrics`]: crate::Elector::metrics
//! [`Elector::wait`]: crate::Elector::wait

mod wait;

pub use wait::Wait;
pub use wait::WaitError;

use serde::Deserialize;
use serde::Serialize;

/// The two states of an election participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionState {
    /// Not holding the lease; watching for opportunities.
    Follower,
    /// Holding a valid lease and renewing it.
    Leader,
}

impl ElectionState {
    pub fn is_leader(&self) -> bool {
        matches!(self, ElectionState::Leader)
    }
}

/// A set of metrics describing the current state of an election
/// participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionMetrics {
    /// This participant's holder identity.
    pub identity: String,
    /// The lease being contended for.
    pub lease_name: String,
    /// Current state of the participant.
    pub state: ElectionState,
}

impl ElectionMetrics {
    pub(crate) fn new_initial(identity: &str, lease_name: &str) -> Self {
        Self {
            identity: identity.to_string(),
            lease_name: lease_name.to_string(),
            state: ElectionState::Follower,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.state.is_leader()
    }
}
