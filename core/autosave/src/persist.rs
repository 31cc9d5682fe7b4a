//! Persist collaborator trait definition.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;

use draftsync_common::DocumentId;

/// Structured failure reported by a persist collaborator.
///
/// Conflicts must be reported as [`PersistError::Conflict`] or as an HTTP
/// 409 status; the engine does not inspect error messages.
#[derive(Debug, Clone)]
pub enum PersistError<T> {
    /// The request timed out.
    Timeout(String),
    /// The request was aborted before a response arrived.
    Aborted,
    /// The remote could not be reached.
    Network(String),
    /// The remote resource was modified since the local copy was synced.
    Conflict { remote: Option<T> },
    /// The remote answered with an error status.
    Status { code: u16, message: String },
    /// Anything else.
    Other(String),
}

impl<T> PersistError<T> {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn conflict(remote: Option<T>) -> Self {
        Self::Conflict { remote }
    }

    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl<T> fmt::Display for PersistError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistError::Timeout(msg) => write!(f, "Request timed out: {}", msg),
            PersistError::Aborted => write!(f, "Request aborted"),
            PersistError::Network(msg) => write!(f, "Network error: {}", msg),
            PersistError::Conflict { .. } => {
                write!(f, "Version conflict: the document was modified elsewhere")
            }
            PersistError::Status { code, message } => write!(f, "HTTP {}: {}", code, message),
            PersistError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for PersistError<T> {}

/// Result of a single persist call.
pub type PersistResult<T> = std::result::Result<(), PersistError<T>>;

/// The remote write performed on behalf of the engine.
///
/// Idempotency is not assumed: the engine never issues two concurrent calls,
/// but a retried call may repeat a write the remote already applied.
/// Timeouts are the implementation's job; it reports them as
/// [`PersistError::Timeout`] or [`PersistError::Aborted`].
#[async_trait]
pub trait Persister<T: Send + 'static>: Send + Sync {
    /// Collaborator name for logging (e.g., "http", "memory").
    fn name(&self) -> &str;

    /// Write `data` as the new content of document `id`.
    async fn persist(&self, id: &DocumentId, data: T) -> PersistResult<T>;
}

/// Adapter turning an async closure into a [`Persister`].
pub struct FnPersister<F> {
    name: String,
    f: F,
}

impl<F> FnPersister<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<T, F, Fut> Persister<T> for FnPersister<F>
where
    T: Send + 'static,
    F: Fn(DocumentId, T) -> Fut + Send + Sync,
    Fut: Future<Output = PersistResult<T>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn persist(&self, id: &DocumentId, data: T) -> PersistResult<T> {
        (self.f)(id.clone(), data).await
    }
}
