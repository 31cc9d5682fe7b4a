//! Common error types for draftsync.

use thiserror::Error;

/// Top-level error type for draftsync operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Invalid input or configuration provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A save failed with a non-retryable error.
    #[error("Save failed: {0}")]
    Save(String),

    /// A save kept timing out until the retry budget ran out.
    #[error("Save failed after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    /// The engine was torn down before the operation settled.
    #[error("Autosave engine stopped")]
    Stopped,
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
    fn test_retries_exhausted_message() {
        let err = Error::RetriesExhausted {
            attempts: 3,
            message: "request timed out".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Save failed after 3 attempts: request timed out"
        );
    }

    #[test]
    fn test_from_serde_error() {
        let parse: std::result::Result<u32, _> = serde_json::from_str("not json");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
