//! Pure predicates and builders over the `coordination.k8s.io/v1` Lease
//! object.
//!
//! Everything here is side-effect free; the election engine combines these
//! with the [`client`] operations to drive the protocol.

pub mod client;

use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use k8s_openapi::api::coordination::v1::Lease;
use k8s_openapi::api::coordination::v1::LeaseSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::ObjectMeta;

/// Whether the lease's validity window has passed at `now`.
///
/// A lease exactly at its expiry instant is *not* expired: ties favor the
/// incumbent to reduce flapping. A lease that was never renewed is always
/// expired.
pub fn is_expired(lease: &Lease, now: DateTime<Utc>) -> bool {
    let spec = match &lease.spec {
        Some(spec) => spec,
        None => return true,
    };

    let renewed_at = match &spec.renew_time {
        Some(t) => t.0,
        None => return true,
    };

    let duration = i64::from(spec.lease_duration_seconds.unwrap_or(0));
    now > renewed_at + Duration::seconds(duration)
}

/// Whether the lease names `identity` as its current holder.
pub fn held_by(lease: &Lease, identity: &str) -> bool {
    lease.spec.as_ref().and_then(|spec| spec.holder_identity.as_deref()) == Some(identity)
}

/// Whether the lease has no holder at all (absent or empty identity).
pub fn is_unheld(lease: &Lease) -> bool {
    match lease.spec.as_ref().and_then(|spec| spec.holder_identity.as_deref()) {
        Some(holder) => holder.is_empty(),
        None => true,
    }
}

/// A fresh lease record claiming leadership for `holder`, used when no lease
/// exists yet.
pub(crate) fn claimed(name: &str, holder: &str, duration_secs: i32, now: DateTime<Utc>) -> Lease {
    Lease {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(LeaseSpec {
            holder_identity: Some(holder.to_string()),
            lease_duration_seconds: Some(duration_secs),
            acquire_time: Some(MicroTime(now)),
            renew_time: Some(MicroTime(now)),
            ..Default::default()
        }),
    }
}

/// Take over an existing lease record, keeping its metadata (and with it the
/// `resourceVersion` that makes the subsequent replace a compare-and-swap).
pub(crate) fn claim_over(existing: Lease, holder: &str, duration_secs: i32, now: DateTime<Utc>) -> Lease {
    Lease {
        metadata: existing.metadata,
        spec: Some(LeaseSpec {
            holder_identity: Some(holder.to_string()),
            lease_duration_seconds: Some(duration_secs),
            acquire_time: Some(MicroTime(now)),
            renew_time: Some(MicroTime(now)),
            ..Default::default()
        }),
    }
}

/// A heartbeat: same holder, fresh `renewTime`.
pub(crate) fn renewed(existing: Lease, now: DateTime<Utc>) -> Lease {
    let spec = existing.spec.unwrap_or_default();
    Lease {
        metadata: existing.metadata,
        spec: Some(LeaseSpec {
            renew_time: Some(MicroTime(now)),
            ..spec
        }),
    }
}

/// A released lease: holder and renew time cleared. The record itself is
/// never deleted.
pub(crate) fn released(existing: Lease) -> Lease {
    let spec = existing.spec.unwrap_or_default();
    Lease {
        metadata: existing.metadata,
        spec: Some(LeaseSpec {
            holder_identity: None,
            renew_time: None,
            ..spec
        }),
    }
}
