//! Leadership change notifications delivered to the host application.

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::broadcast;

/// Topic name under which [`LeaderEvent::Elected`] is published.
pub const ELECTED_TOPIC: &str = "leader.elected";

/// Topic name under which [`LeaderEvent::Lost`] is published.
pub const LOST_TOPIC: &str = "leader.lost";

/// A leadership transition observed by this participant.
///
/// `Elected` is emitted exactly on the false-to-true edge of leadership,
/// `Lost` exactly on the true-to-false edge. A graceful release at shutdown
/// emits neither.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LeaderEvent {
    Elected {
        #[serde(rename = "leaseName")]
        lease_name: String,
    },
    Lost {
        #[serde(rename = "leaseName")]
        lease_name: String,
    },
}

impl LeaderEvent {
    /// The fixed topic string for this event, for bridging onto host event
    /// buses that bind subscribers by name.
    pub fn topic(&self) -> &'static str {
        match self {
            LeaderEvent::Elected { .. } => ELECTED_TOPIC,
            LeaderEvent::Lost { .. } => LOST_TOPIC,
        }
    }

    pub fn lease_name(&self) -> &str {
        match self {
            LeaderEvent::Elected { lease_name } => lease_name,
            LeaderEvent::Lost { lease_name } => lease_name,
        }
    }
}

/// Fire-and-forget delivery of [`LeaderEvent`]s.
///
/// Subscribers receive events on their own broadcast receivers; a slow,
/// absent, or panicking subscriber can never propagate back into the
/// election engine.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: broadcast::Sender<LeaderEvent>,
}

impl EventSink {
    pub(crate) fn new(tx: broadcast::Sender<LeaderEvent>) -> Self {
        Self { tx }
    }

    pub(crate) fn emit(&self, event: LeaderEvent) {
        tracing::debug!(topic = event.topic(), lease = event.lease_name(), "emitting leadership event");

        // No receivers is fine: the host may not subscribe at all.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_topics() {
        let elected = LeaderEvent::Elected {
            lease_name: "L".to_string(),
        };
        let lost = LeaderEvent::Lost {
            lease_name: "L".to_string(),
        };

        assert_eq!(ELECTED_TOPIC, elected.topic());
        assert_eq!(LOST_TOPIC, lost.topic());
    }

    #[test]
    fn test_event_payload_shape() {
        let elected = LeaderEvent::Elected {
            lease_name: "jobs".to_string(),
        };

        let json = serde_json::to_value(&elected).unwrap();
        assert_eq!(json["leaseName"], "jobs");
        assert_eq!(json["kind"], "elected");
    }
}
