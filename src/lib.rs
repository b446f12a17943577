//! Embeddable Kubernetes-backed leader election.
//!
//! Replicas of a deployment contend for a named
//! [`coordination.k8s.io/v1` Lease]; at most one holds it at a time and
//! observes itself as leader. Leadership changes surface as two typed
//! events, [`LeaderEvent::Elected`] and [`LeaderEvent::Lost`], so
//! application logic can gate singleton work (periodic jobs, queue
//! consumers, schedulers) on leadership.
//!
//! The leader heartbeats the lease every [`Config::renewal_interval`]
//! milliseconds; the lease stays valid for twice that, so one missed
//! renewal is survivable. Followers watch the lease for takeover
//! opportunities (expiry, release, deletion) and react to them; there is no
//! acquisition polling beyond a short bootstrap sequence. On termination
//! the leader clears the lease holder so a successor need not wait out the
//! validity window.
//!
//! ```ignore
//! let elector = elector::lifecycle::bootstrap(elector::Config::default()).await?;
//!
//! let mut events = elector.subscribe();
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         elector::LeaderEvent::Elected { .. } => start_singleton_work(),
//!         elector::LeaderEvent::Lost { .. } => stop_singleton_work(),
//!     }
//! }
//! ```
//!
//! Outside an orchestrator (no `KUBERNETES_SERVICE_HOST` in the
//! environment) the participant runs standalone: it reports leadership
//! immediately and never touches the coordination API.
//!
//! This crate piggybacks on the lease store's optimistic concurrency; it
//! does not itself implement consensus, and it does not fence side
//! effects. Two processes may briefly *believe* themselves leader around
//! clock skew or partitions; at most one ever *holds* a valid lease, and a
//! contradicted belief is revoked at the next renewal or watch event.
//! Subscribers are responsible for idempotency of their singleton work.
//!
//! [`coordination.k8s.io/v1` Lease]: https://kubernetes.io/docs/concepts/architecture/leases/

mod core;
mod elector;

pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod lease;
pub mod lifecycle;
pub mod metrics;
pub mod testing;

pub use crate::config::Config;
pub use crate::config::ConfigError;
pub use crate::config::LogAtLevel;
pub use crate::elector::Elector;
pub use crate::error::ApiError;
pub use crate::error::ElectError;
pub use crate::events::LeaderEvent;
pub use crate::events::ELECTED_TOPIC;
pub use crate::events::LOST_TOPIC;
pub use crate::identity::Identity;
pub use crate::identity::IDENTITY_PREFIX;
pub use crate::lease::client::KubeLeaseApi;
pub use crate::lease::client::LeaseApi;
pub use crate::lease::client::LeaseEvent;
pub use crate::lease::client::LeaseEventKind;
pub use crate::lease::client::LeaseEventStream;
pub use crate::metrics::ElectionMetrics;
pub use crate::metrics::ElectionState;
pub use crate::metrics::Wait;
pub use crate::metrics::WaitError;
