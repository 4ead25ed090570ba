//! Error types for netprov
//!
//! Four kinds carry the device-facing taxonomy: [`Error::Connectivity`],
//! [`Error::Protocol`], [`Error::Consistency`] and
//! [`Error::UnsupportedTopology`]. The rest cover the ambient layers.

use thiserror::Error;

/// Result type alias for netprov operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// Unreachable host, bad credentials, closed port or closed session
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// The device rejected a command or a field
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A precondition was violated before any device I/O
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// The target interface is the router's uplink
    #[error("Unsupported topology: {0}")]
    UnsupportedTopology(String),

    /// Record store failures
    #[error("Repository error: {0}")]
    Repository(String),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Password encryption/decryption errors
    #[error("Credential error: {0}")]
    Credential(String),

    /// Local I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Activation aborted; the contract was reverted to pending-install.
    ///
    /// `rollback_failures` holds the compensating actions that failed while
    /// unwinding. They never replace the originating error.
    #[error("Activation failed: {source}")]
    Activation {
        source: Box<Error>,
        rollback_failures: Vec<Error>,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a connectivity error
    pub fn connectivity(msg: impl Into<String>) -> Self {
        Self::Connectivity(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a consistency error
    pub fn consistency(msg: impl Into<String>) -> Self {
        Self::Consistency(msg.into())
    }

    /// Create an unsupported topology error
    pub fn unsupported_topology(msg: impl Into<String>) -> Self {
        Self::UnsupportedTopology(msg.into())
    }

    /// Create a repository error
    pub fn repository(msg: impl Into<String>) -> Self {
        Self::Repository(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a credential error
    pub fn credential(msg: impl Into<String>) -> Self {
        Self::Credential(msg.into())
    }

    /// True for errors raised by talking to the device
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::Protocol(_) | Self::Io(_))
    }

    /// The error that started an activation rollback, or `self`
    pub fn root(&self) -> &Error {
        match self {
            Self::Activation { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activation_error_keeps_primary_cause() {
        let err = Error::Activation {
            source: Box::new(Error::protocol("failure: already have such entry")),
            rollback_failures: vec![Error::connectivity("connection reset")],
        };

        assert!(err.to_string().contains("already have such entry"));
        assert!(matches!(err.root(), Error::Protocol(_)));
        assert!(!err.is_transport());
        assert!(err.root().is_transport());
    }
}
