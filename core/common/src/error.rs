//! Common error types for vsync.

use thiserror::Error;

/// Top-level error type for secret store and reconciliation operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Secret absent at a path.
    ///
    /// Expected while diffing (the destination has nothing yet) and while
    /// confirming orphans (the source no longer has the secret).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network, authentication or protocol failure.
    ///
    /// Always fatal to the current operation and never retried.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The source lacks the secret requested by a single-secret sync.
    #[error("Source secret missing: {0}")]
    SourceSecretMissing(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed, or a payload was malformed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether this error means "nothing stored here".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Whether this error came from talking to the backend.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::NotFound("secret/a".into()).is_not_found());
        assert!(!Error::NotFound("secret/a".into()).is_transport());
        assert!(Error::Transport("connection refused".into()).is_transport());
        assert!(!Error::Transport("403".into()).is_not_found());
    }

    #[test]
    fn test_display_carries_path() {
        let err = Error::SourceSecretMissing("secret/app/db".into());
        assert_eq!(err.to_string(), "Source secret missing: secret/app/db");
    }
}
