//! Error types exposed by this crate.

use anyerror::AnyError;

/// Outcome of a lease-store operation.
///
/// Every branch the election engine takes is driven by one of these
/// variants, so callers can match exhaustively instead of probing status
/// codes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The lease does not exist. Not an error during acquisition: the engine
    /// creates the lease lazily.
    #[error("lease {name} not found in namespace {namespace}")]
    NotFound { name: String, namespace: String },

    /// A peer created the lease between our read and our create.
    #[error("lease {name} already exists in namespace {namespace}")]
    AlreadyExists { name: String, namespace: String },

    /// The `resourceVersion` we carried no longer matches the stored record:
    /// someone else acted first.
    #[error("conflicting write to lease {name} in namespace {namespace}")]
    Conflict { name: String, namespace: String },

    /// Connectivity problems, server-side failures, and everything else the
    /// state machine treats as retryable.
    #[error("lease api request failed: {0}")]
    Transient(AnyError),
}

impl ApiError {
    pub fn transient(err: &(impl std::error::Error + 'static)) -> Self {
        ApiError::Transient(AnyError::new(err))
    }
}

/// Error returned by the public [`Elector`](crate::Elector) surface.
#[derive(Debug, thiserror::Error)]
pub enum ElectError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Api(#[from] ApiError),

    /// The election engine task is no longer running.
    #[error("election engine has stopped")]
    Stopped,
}
