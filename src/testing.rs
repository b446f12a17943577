//! Test support: a simulated lease store.
//!
//! [`MemLeaseApi`] implements [`LeaseApi`] over an in-memory map with the
//! same observable semantics as the Kubernetes coordination API: lazy
//! creation, compare-and-swap replacement keyed on `resourceVersion`, and
//! watch streams fed by every mutation. Switches allow tests to simulate
//! connectivity loss and watch-stream termination.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::coordination::v1::Lease;
use k8s_openapi::api::coordination::v1::LeaseSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::ObjectMeta;
use tokio::sync::broadcast;

use crate::error::ApiError;
use crate::lease::client::LeaseApi;
use crate::lease::client::LeaseEvent;
use crate::lease::client::LeaseEventKind;
use crate::lease::client::LeaseEventStream;

/// Build a lease record the way a peer (or a previous run) would have
/// written it.
pub fn lease_record(name: &str, holder: Option<&str>, renewed_at: Option<DateTime<Utc>>, duration_secs: i32) -> Lease {
    Lease {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(LeaseSpec {
            holder_identity: holder.map(|h| h.to_string()),
            lease_duration_seconds: Some(duration_secs),
            acquire_time: renewed_at.map(MicroTime),
            renew_time: renewed_at.map(MicroTime),
            ..Default::default()
        }),
    }
}

struct MemState {
    leases: HashMap<String, Lease>,
    next_version: u64,
    tx_events: broadcast::Sender<LeaseEvent>,
}

impl MemState {
    fn key(namespace: &str, name: &str) -> String {
        format!("{}/{}", namespace, name)
    }

    fn emit(&self, kind: LeaseEventKind, lease: Lease) {
        // No receivers is fine: nobody is watching yet.
        let _ = self.tx_events.send(LeaseEvent { kind, lease });
    }
}

/// In-memory [`LeaseApi`] with optimistic concurrency, for deterministic
/// tests.
pub struct MemLeaseApi {
    state: Mutex<MemState>,

    offline: AtomicBool,
    conflict_on_replace: AtomicBool,

    reads: AtomicUsize,
    creates: AtomicUsize,
    replaces: AtomicUsize,
    watches: AtomicUsize,
}

impl Default for MemLeaseApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MemLeaseApi {
    pub fn new() -> Self {
        let (tx_events, _) = broadcast::channel(256);
        Self {
            state: Mutex::new(MemState {
                leases: HashMap::new(),
                next_version: 1,
                tx_events,
            }),
            offline: AtomicBool::new(false),
            conflict_on_replace: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
            creates: AtomicUsize::new(0),
            replaces: AtomicUsize::new(0),
            watches: AtomicUsize::new(0),
        }
    }

    /// While set, every operation fails with a transient error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// While set, every replace fails with a version conflict.
    pub fn set_conflict_on_replace(&self, conflict: bool) {
        self.conflict_on_replace.store(conflict, Ordering::SeqCst);
    }

    /// Terminate all currently open watch streams, as a dropped connection
    /// to the API server would.
    pub fn close_watches(&self) {
        let mut state = self.state.lock().unwrap();
        let (tx_events, _) = broadcast::channel(256);
        state.tx_events = tx_events;
    }

    /// Write a lease record bypassing concurrency control, as a peer
    /// process would through its own connection. Emits the corresponding
    /// watch event.
    pub fn apply(&self, namespace: &str, mut lease: Lease) {
        let mut state = self.state.lock().unwrap();

        let name = lease.metadata.name.clone().unwrap_or_default();
        let key = MemState::key(namespace, &name);

        let version = state.next_version;
        state.next_version += 1;
        lease.metadata.namespace = Some(namespace.to_string());
        lease.metadata.resource_version = Some(version.to_string());

        let kind = if state.leases.contains_key(&key) {
            LeaseEventKind::Modified
        } else {
            LeaseEventKind::Added
        };
        state.leases.insert(key, lease.clone());
        state.emit(kind, lease);
    }

    /// Delete a lease record, as an administrator would. Emits `DELETED`.
    pub fn remove(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(lease) = state.leases.remove(&MemState::key(namespace, name)) {
            state.emit(LeaseEventKind::Deleted, lease);
        }
    }

    /// The stored record, if any.
    pub fn lease(&self, namespace: &str, name: &str) -> Option<Lease> {
        let state = self.state.lock().unwrap();
        state.leases.get(&MemState::key(namespace, name)).cloned()
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn replace_count(&self) -> usize {
        self.replaces.load(Ordering::SeqCst)
    }

    pub fn watch_count(&self) -> usize {
        self.watches.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), ApiError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ApiError::Transient(anyerror::AnyError::error("lease store offline")));
        }
        Ok(())
    }
}

#[async_trait]
impl LeaseApi for MemLeaseApi {
    async fn read(&self, name: &str, namespace: &str) -> Result<Lease, ApiError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let state = self.state.lock().unwrap();
        state.leases.get(&MemState::key(namespace, name)).cloned().ok_or_else(|| ApiError::NotFound {
            name: name.to_string(),
            namespace: namespace.to_string(),
        })
    }

    async fn create(&self, namespace: &str, lease: &Lease) -> Result<Lease, ApiError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let mut state = self.state.lock().unwrap();

        let name = lease.metadata.name.clone().unwrap_or_default();
        let key = MemState::key(namespace, &name);
        if state.leases.contains_key(&key) {
            return Err(ApiError::AlreadyExists {
                name,
                namespace: namespace.to_string(),
            });
        }

        let version = state.next_version;
        state.next_version += 1;

        let mut stored = lease.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(version.to_string());

        state.leases.insert(key, stored.clone());
        state.emit(LeaseEventKind::Added, stored.clone());
        Ok(stored)
    }

    async fn replace(&self, name: &str, namespace: &str, lease: &Lease) -> Result<Lease, ApiError> {
        self.replaces.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        if self.conflict_on_replace.load(Ordering::SeqCst) {
            return Err(ApiError::Conflict {
                name: name.to_string(),
                namespace: namespace.to_string(),
            });
        }

        let mut state = self.state.lock().unwrap();

        let key = MemState::key(namespace, name);
        let current = state.leases.get(&key).ok_or_else(|| ApiError::NotFound {
            name: name.to_string(),
            namespace: namespace.to_string(),
        })?;

        if lease.metadata.resource_version != current.metadata.resource_version {
            return Err(ApiError::Conflict {
                name: name.to_string(),
                namespace: namespace.to_string(),
            });
        }

        let version = state.next_version;
        state.next_version += 1;

        let mut stored = lease.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(version.to_string());

        state.leases.insert(key, stored.clone());
        state.emit(LeaseEventKind::Modified, stored.clone());
        Ok(stored)
    }

    async fn watch(&self, namespace: &str) -> Result<LeaseEventStream, ApiError> {
        self.watches.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let rx = self.state.lock().unwrap().tx_events.subscribe();
        let namespace = namespace.to_string();

        let stream = futures::stream::unfold((rx, namespace), |(mut rx, namespace)| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if event.lease.metadata.namespace.as_deref() == Some(namespace.as_str()) {
                            return Some((Ok(event), (rx, namespace)));
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(stream.boxed())
    }
}
