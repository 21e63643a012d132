//! Error taxonomy shared by providers, node groups, and backends.

use thiserror::Error;

/// Result type alias for cloud provider operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Coarse classification of a [`CloudError`], for callers that branch on
/// the kind of failure rather than its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotImplemented,
    InvalidArgument,
    NotFound,
    Transient,
    Config,
}

/// Errors returned by the provider contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudError {
    /// The backend does not support this operation. Never retried.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// The call violates size bounds or names something outside the group.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The backend is temporarily unavailable; retry with backoff.
    #[error("backend unavailable: {0}")]
    Transient(String),

    /// Fatal configuration problem, only raised while building a provider.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CloudError {
    /// Shorthand for an unsupported operation.
    pub fn not_implemented(operation: &str) -> Self {
        CloudError::NotImplemented(operation.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CloudError::NotImplemented(_) => ErrorKind::NotImplemented,
            CloudError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            CloudError::NotFound(_) => ErrorKind::NotFound,
            CloudError::Transient(_) => ErrorKind::Transient,
            CloudError::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether the caller should retry the same call later.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<toml::de::Error> for CloudError {
    fn from(e: toml::de::Error) -> Self {
        CloudError::Config(e.to_string())
    }
}
