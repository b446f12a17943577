use std::fmt;

/// Prefix of every holder identity written by this crate.
///
/// The full identity is `"<prefix>-<hostname>"`, so peers built from the same
/// crate recognize each other's claims in the lease record.
pub const IDENTITY_PREFIX: &str = "elector";

/// The stable identity of this participant among its replicas.
///
/// Computed once at startup and never changed for the lifetime of the
/// process. Two replicas sharing a hostname would produce the same identity;
/// that is a deployment error this crate does not attempt to detect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity(String);

impl Identity {
    /// Build the identity from the `HOSTNAME` environment variable.
    ///
    /// Kubernetes sets `HOSTNAME` to the pod name, which is unique per
    /// replica.
    pub fn from_env() -> Self {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        Self::from_hostname(&hostname)
    }

    pub fn from_hostname(hostname: &str) -> Self {
        Identity(format!("{}-{}", IDENTITY_PREFIX, hostname))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_format() {
        let id = Identity::from_hostname("hostA");
        assert_eq!("elector-hostA", id.as_str());
        assert_eq!("elector-hostA", id.to_string());
    }
}
