//! Access to the lease store.
//!
//! [`LeaseApi`] is the seam between the election engine and Kubernetes:
//! [`KubeLeaseApi`] binds it to the real coordination API, while
//! [`MemLeaseApi`](crate::testing::MemLeaseApi) provides a simulated store
//! for deterministic tests.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::coordination::v1::Lease;
use kube::api::Api;
use kube::api::PostParams;
use kube::runtime::watcher;

use crate::error::ApiError;

/// What happened to a lease, as reported by the watch stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseEventKind {
    Added,
    Modified,
    Deleted,
}

impl std::fmt::Display for LeaseEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeaseEventKind::Added => write!(f, "ADDED"),
            LeaseEventKind::Modified => write!(f, "MODIFIED"),
            LeaseEventKind::Deleted => write!(f, "DELETED"),
        }
    }
}

/// One mutation observed on a lease in the watched namespace.
#[derive(Debug, Clone)]
pub struct LeaseEvent {
    pub kind: LeaseEventKind,
    pub lease: Lease,
}

/// Stream of lease mutations. Terminates when the underlying subscription
/// ends; the caller owns the reconnect policy.
pub type LeaseEventStream = BoxStream<'static, Result<LeaseEvent, ApiError>>;

/// The lease-store operations the election engine needs.
///
/// All operations return typed outcomes (see [`ApiError`]); the store's
/// optimistic concurrency runs through the `resourceVersion` carried in the
/// lease metadata.
#[async_trait]
pub trait LeaseApi: Send + Sync {
    /// Fetch the current lease record.
    async fn read(&self, name: &str, namespace: &str) -> Result<Lease, ApiError>;

    /// Create a new lease record.
    async fn create(&self, namespace: &str, lease: &Lease) -> Result<Lease, ApiError>;

    /// Replace an existing record. The passed record must carry the
    /// `resourceVersion` of the read it is based on.
    async fn replace(&self, name: &str, namespace: &str, lease: &Lease) -> Result<Lease, ApiError>;

    /// Subscribe to mutations of all leases in `namespace`.
    async fn watch(&self, namespace: &str) -> Result<LeaseEventStream, ApiError>;
}

/// [`LeaseApi`] backed by the Kubernetes coordination API.
///
/// Authentication is ambient: in-cluster service-account credentials (or a
/// local kubeconfig) are loaded once at construction.
#[derive(Clone)]
pub struct KubeLeaseApi {
    client: kube::Client,
}

impl KubeLeaseApi {
    pub async fn try_default() -> Result<Self, ApiError> {
        let client = kube::Client::try_default().await.map_err(|e| ApiError::transient(&e))?;
        Ok(Self { client })
    }

    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Lease> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn classify(name: &str, namespace: &str, err: kube::Error) -> ApiError {
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => ApiError::NotFound {
            name: name.to_string(),
            namespace: namespace.to_string(),
        },
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => ApiError::AlreadyExists {
            name: name.to_string(),
            namespace: namespace.to_string(),
        },
        kube::Error::Api(resp) if resp.code == 409 => ApiError::Conflict {
            name: name.to_string(),
            namespace: namespace.to_string(),
        },
        _ => ApiError::transient(&err),
    }
}

#[async_trait]
impl LeaseApi for KubeLeaseApi {
    async fn read(&self, name: &str, namespace: &str) -> Result<Lease, ApiError> {
        self.api(namespace).get(name).await.map_err(|e| classify(name, namespace, e))
    }

    async fn create(&self, namespace: &str, lease: &Lease) -> Result<Lease, ApiError> {
        let name = lease.metadata.name.as_deref().unwrap_or_default();
        self.api(namespace)
            .create(&PostParams::default(), lease)
            .await
            .map_err(|e| classify(name, namespace, e))
    }

    async fn replace(&self, name: &str, namespace: &str, lease: &Lease) -> Result<Lease, ApiError> {
        self.api(namespace)
            .replace(name, &PostParams::default(), lease)
            .await
            .map_err(|e| classify(name, namespace, e))
    }

    async fn watch(&self, namespace: &str) -> Result<LeaseEventStream, ApiError> {
        let api = self.api(namespace);

        // The initial enumeration surfaces the current record as an ADDED
        // event, so a fresh subscription re-evaluates existing state; every
        // later mutation arrives as MODIFIED or DELETED.
        let mapped = watcher(api, watcher::Config::default()).filter_map(|item| async move {
            match item {
                Ok(watcher::Event::InitApply(lease)) => Some(Ok(LeaseEvent {
                    kind: LeaseEventKind::Added,
                    lease,
                })),
                Ok(watcher::Event::Apply(lease)) => Some(Ok(LeaseEvent {
                    kind: LeaseEventKind::Modified,
                    lease,
                })),
                Ok(watcher::Event::Delete(lease)) => Some(Ok(LeaseEvent {
                    kind: LeaseEventKind::Deleted,
                    lease,
                })),
                Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => None,
                Err(e) => Some(Err(ApiError::transient(&e))),
            }
        });

        Ok(mapped.boxed())
    }
}
