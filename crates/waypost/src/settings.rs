//! Discovery settings
//!
//! Process-scoped settings shared by every registration and query: the
//! top-level key namespace and the default lease TTL. Constructed once by
//! the embedding application at startup; the library owns no environment
//! variables or config files.

use crate::error::{Error, Result};

/// Default top-level namespace under which services register
pub const DEFAULT_NAMESPACE: &str = "services";

/// Default lease TTL in seconds
pub const DEFAULT_LEASE_TTL: i64 = 10;

/// Discovery settings with sensible defaults
#[derive(Debug, Clone)]
pub struct Settings {
    /// Top-level key prefix for all registrations
    pub namespace: String,

    /// Default TTL for registration leases (seconds)
    pub lease_ttl: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            lease_ttl: DEFAULT_LEASE_TTL,
        }
    }
}

impl Settings {
    /// Create settings with the given namespace and the default lease TTL.
    pub fn new(namespace: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        validate_namespace(&namespace)?;
        Ok(Self {
            namespace,
            lease_ttl: DEFAULT_LEASE_TTL,
        })
    }

    pub fn with_lease_ttl(mut self, lease_ttl: i64) -> Self {
        self.lease_ttl = lease_ttl;
        self
    }
}

/// The event parser assumes the namespace is exactly one path segment.
pub(crate) fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty() || namespace.contains('/') {
        return Err(Error::InvalidNamespace(namespace.to_string()));
    }
    Ok(())
}
