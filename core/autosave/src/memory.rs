//! In-memory persist collaborator for testing and simulation.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use draftsync_common::DocumentId;

use crate::persist::{PersistError, PersistResult, Persister};

#[derive(Debug)]
struct MemoryState<T> {
    stored: Option<T>,
    version: u64,
    etag: Option<String>,
    /// Failures to report, one per call, before anything else.
    failures: VecDeque<PersistError<T>>,
    /// Set by a concurrent editor; the next write is rejected once.
    stale: bool,
    calls: Vec<T>,
}

/// In-memory remote store.
///
/// Writes replace the stored document and mint a new version token. A
/// concurrent editor can be simulated with [`MemoryPersister::remote_edit`]:
/// the next write is rejected with a conflict carrying the remote data, and
/// the write after that wins.
pub struct MemoryPersister<T> {
    state: Arc<Mutex<MemoryState<T>>>,
    latency: Duration,
}

impl<T: Clone> MemoryPersister<T> {
    /// Create an empty store that answers immediately.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                stored: None,
                version: 0,
                etag: None,
                failures: VecDeque::new(),
                stale: false,
                calls: Vec::new(),
            })),
            latency: Duration::ZERO,
        }
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Report `err` from the next call that is not already claimed by an
    /// earlier injected failure.
    pub fn fail_next(&self, err: PersistError<T>) {
        self.lock().failures.push_back(err);
    }

    /// Simulate another editor writing `data`.
    pub fn remote_edit(&self, data: T) {
        let mut state = self.lock();
        state.stored = Some(data);
        state.version += 1;
        state.etag = Some(Uuid::new_v4().to_string());
        state.stale = true;
    }

    pub fn stored(&self) -> Option<T> {
        self.lock().stored.clone()
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Version token of the stored document.
    pub fn etag(&self) -> Option<String> {
        self.lock().etag.clone()
    }

    /// Every payload received, in call order, failed calls included.
    pub fn calls(&self) -> Vec<T> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }
}

impl<T: Clone> Default for MemoryPersister<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> Persister<T> for MemoryPersister<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "memory"
    }

    async fn persist(&self, id: &DocumentId, data: T) -> PersistResult<T> {
        self.lock().calls.push(data.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.lock();
        if let Some(err) = state.failures.pop_front() {
            debug!("Memory store failing write to {}: {}", id, err);
            return Err(err);
        }
        if state.stale {
            state.stale = false;
            debug!("Memory store rejecting stale write to {}", id);
            return Err(PersistError::conflict(state.stored.clone()));
        }

        state.stored = Some(data);
        state.version += 1;
        state.etag = Some(Uuid::new_v4().to_string());
        debug!("Memory store wrote {} at version {}", id, state.version);
        Ok(())
    }
}
