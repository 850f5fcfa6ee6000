//! Library error types

/// Error type for discovery operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid namespace {0:?}: must be non-empty and contain no '/'")]
    InvalidNamespace(String),

    #[error("invalid service name {0:?}: must be non-empty and contain no '/'")]
    InvalidService(String),

    #[error("invalid node name {0:?}: must be non-empty and contain no '/'")]
    InvalidName(String),

    #[error("invalid uri: {0}")]
    Uri(#[from] http::uri::InvalidUri),

    #[error("uri {0:?} is not absolute")]
    RelativeUri(String),

    #[error("invalid lease ttl {0}: must be at least 1 second")]
    InvalidTtl(i64),

    #[error("registration put for {0:?} was rejected by the store")]
    RegistrationFailed(String),

    #[error("store rejected revoke of lease {0}")]
    RevokeRejected(i64),
}

pub type Result<T> = std::result::Result<T, Error>;
