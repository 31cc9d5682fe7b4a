//! Save attempts: preflight checks, the persist call, outcome classification.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use draftsync_common::DocumentId;

use crate::comparator::ChangeComparator;
use crate::config::Transform;
use crate::persist::{PersistError, PersistResult, Persister};

/// What triggered an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptKind {
    /// The debounce window elapsed.
    Debounced,
    /// Explicit caller intent; bypasses the debouncer and the conflict block.
    Forced,
    /// A timed-out attempt being tried again.
    Retry,
    /// Connectivity came back with changes pending.
    Reconnect,
}

/// Classified result of one persist attempt.
#[derive(Debug, Clone)]
pub enum SaveOutcome<T> {
    Success,
    /// Timeout-class failure; eligible for retry.
    TransientFailure(String),
    /// The remote was unreachable.
    NetworkFailure(String),
    /// Version mismatch, with the remote data if the collaborator sent it.
    Conflict(Option<T>),
    FatalFailure(String),
}

impl<T> SaveOutcome<T> {
    /// Map a collaborator result onto the failure taxonomy.
    pub fn classify(result: PersistResult<T>) -> Self {
        let err = match result {
            Ok(()) => return SaveOutcome::Success,
            Err(err) => err,
        };
        let message = err.to_string();
        match err {
            PersistError::Timeout(_) | PersistError::Aborted => {
                SaveOutcome::TransientFailure(message)
            }
            PersistError::Status { code: 408 | 504, .. } => SaveOutcome::TransientFailure(message),
            PersistError::Network(_) => SaveOutcome::NetworkFailure(message),
            PersistError::Conflict { remote } => SaveOutcome::Conflict(remote),
            PersistError::Status { code: 409, .. } => SaveOutcome::Conflict(None),
            PersistError::Status { .. } | PersistError::Other(_) => {
                SaveOutcome::FatalFailure(message)
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SaveOutcome::Success)
    }
}

/// Why an attempt was not issued, or that it may be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preflight {
    /// Another attempt is in flight.
    Busy,
    /// A conflict is awaiting resolution.
    Blocked,
    /// Nothing differs from the last persisted snapshot.
    Unchanged,
    /// Connectivity is down.
    Offline,
    Ready,
}

/// The attempt currently awaiting its outcome.
#[derive(Debug)]
pub struct InFlight<T> {
    pub attempt_id: u64,
    pub kind: AttemptKind,
    /// Snapshot as it was before any transform; becomes `last_persisted` on
    /// success.
    pub snapshot: T,
    pub started_at: Instant,
}

/// Outcome report sent back by the persist task.
#[derive(Debug)]
pub struct Completion<T> {
    pub attempt_id: u64,
    pub result: PersistResult<T>,
}

/// Issues persist calls, one at a time.
pub struct SaveExecutor<T: Send + 'static> {
    id: DocumentId,
    persister: Arc<dyn Persister<T>>,
    transform: Option<Transform<T>>,
    in_flight: Option<InFlight<T>>,
    next_attempt_id: u64,
    alive: Arc<AtomicBool>,
    completions: mpsc::UnboundedSender<Completion<T>>,
}

impl<T: Clone + Send + Sync + 'static> SaveExecutor<T> {
    pub fn new(
        id: DocumentId,
        persister: Arc<dyn Persister<T>>,
        transform: Option<Transform<T>>,
        completions: mpsc::UnboundedSender<Completion<T>>,
    ) -> Self {
        Self {
            id,
            persister,
            transform,
            in_flight: None,
            next_attempt_id: 0,
            alive: Arc::new(AtomicBool::new(true)),
            completions,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Checks run, in order, before any network attempt.
    pub fn preflight(
        &self,
        kind: AttemptKind,
        current: &T,
        last_persisted: &T,
        comparator: &dyn ChangeComparator<T>,
        online: bool,
        conflicted: bool,
    ) -> Preflight {
        if self.is_in_flight() {
            return Preflight::Busy;
        }
        if conflicted && kind != AttemptKind::Forced {
            return Preflight::Blocked;
        }
        if !comparator.has_changed(current, last_persisted) {
            return Preflight::Unchanged;
        }
        if !online {
            return Preflight::Offline;
        }
        Preflight::Ready
    }

    /// Spawn the persist call for `snapshot`. The outcome comes back through
    /// the completion channel unless the executor was shut down meanwhile.
    pub fn start(&mut self, kind: AttemptKind, snapshot: T) -> u64 {
        self.next_attempt_id += 1;
        let attempt_id = self.next_attempt_id;

        let data = match &self.transform {
            Some(transform) => transform(snapshot.clone()),
            None => snapshot.clone(),
        };

        info!(
            "Starting save attempt {} ({:?}) for {} via {}",
            attempt_id,
            kind,
            self.id,
            self.persister.name()
        );

        self.in_flight = Some(InFlight {
            attempt_id,
            kind,
            snapshot,
            started_at: Instant::now(),
        });

        let persister = self.persister.clone();
        let id = self.id.clone();
        let alive = self.alive.clone();
        let completions = self.completions.clone();

        tokio::spawn(async move {
            let call = tokio::spawn(async move { persister.persist(&id, data).await });
            let result = match call.await {
                Ok(result) => result,
                Err(e) => Err(PersistError::other(format!("Persist task failed: {}", e))),
            };

            if !alive.load(Ordering::Acquire) {
                debug!("Discarding outcome of attempt {} after teardown", attempt_id);
                return;
            }
            let _ = completions.send(Completion { attempt_id, result });
        });

        attempt_id
    }

    /// Match a completion to the in-flight attempt and classify it.
    /// Completions for any other attempt are stale and dropped.
    pub fn complete(&mut self, completion: Completion<T>) -> Option<(InFlight<T>, SaveOutcome<T>)> {
        match &self.in_flight {
            Some(flight) if flight.attempt_id == completion.attempt_id => {}
            _ => {
                warn!("Ignoring stale outcome for attempt {}", completion.attempt_id);
                return None;
            }
        }
        let flight = self.in_flight.take()?;
        let outcome = SaveOutcome::classify(completion.result);
        debug!(
            "Attempt {} finished in {:?}: {:?}",
            flight.attempt_id,
            flight.started_at.elapsed(),
            OutcomeKind::of(&outcome)
        );
        Some((flight, outcome))
    }

    /// Lower the liveness flag; outcomes of calls still running are dropped.
    pub fn shutdown(&mut self) {
        self.alive.store(false, Ordering::Release);
        self.in_flight = None;
    }
}

/// Payload-free outcome tag for logging.
#[derive(Debug)]
enum OutcomeKind {
    Success,
    Transient,
    Network,
    Conflict,
    Fatal,
}

impl OutcomeKind {
    fn of<T>(outcome: &SaveOutcome<T>) -> Self {
        match outcome {
            SaveOutcome::Success => OutcomeKind::Success,
            SaveOutcome::TransientFailure(_) => OutcomeKind::Transient,
            SaveOutcome::NetworkFailure(_) => OutcomeKind::Network,
            SaveOutcome::Conflict(_) => OutcomeKind::Conflict,
            SaveOutcome::FatalFailure(_) => OutcomeKind::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::EqComparator;
    use crate::memory::MemoryPersister;

    fn classify(err: PersistError<u32>) -> SaveOutcome<u32> {
        SaveOutcome::classify(Err(err))
    }

    #[test]
    fn test_classification() {
        assert!(SaveOutcome::<u32>::classify(Ok(())).is_success());
        assert!(matches!(
            classify(PersistError::timeout("slow")),
            SaveOutcome::TransientFailure(_)
        ));
        assert!(matches!(
            classify(PersistError::Aborted),
            SaveOutcome::TransientFailure(_)
        ));
        assert!(matches!(
            classify(PersistError::status(504, "gateway")),
            SaveOutcome::TransientFailure(_)
        ));
        assert!(matches!(
            classify(PersistError::network("down")),
            SaveOutcome::NetworkFailure(_)
        ));
        assert!(matches!(
            classify(PersistError::conflict(Some(7))),
            SaveOutcome::Conflict(Some(7))
        ));
        assert!(matches!(
            classify(PersistError::status(409, "stale")),
            SaveOutcome::Conflict(None)
        ));
        assert!(matches!(
            classify(PersistError::status(500, "boom")),
            SaveOutcome::FatalFailure(_)
        ));
    }

    #[test]
    fn test_message_mentioning_conflict_is_fatal() {
        // Only structured markers count as conflicts.
        assert!(matches!(
            classify(PersistError::other("version conflict")),
            SaveOutcome::FatalFailure(_)
        ));
    }

    #[tokio::test]
    async fn test_preflight_order() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let persister: Arc<dyn Persister<u32>> = Arc::new(MemoryPersister::new());
        let mut executor = SaveExecutor::new(DocumentId::new("d").unwrap(), persister, None, tx);
        let cmp = EqComparator;

        let check = |e: &SaveExecutor<u32>, kind, cur, online, conflicted| {
            e.preflight(kind, &cur, &1, &cmp, online, conflicted)
        };

        assert_eq!(check(&executor, AttemptKind::Debounced, 1, true, false), Preflight::Unchanged);
        assert_eq!(check(&executor, AttemptKind::Debounced, 2, false, false), Preflight::Offline);
        assert_eq!(check(&executor, AttemptKind::Debounced, 2, true, true), Preflight::Blocked);
        assert_eq!(check(&executor, AttemptKind::Forced, 2, true, true), Preflight::Ready);

        executor.start(AttemptKind::Forced, 2);
        assert_eq!(check(&executor, AttemptKind::Forced, 3, true, false), Preflight::Busy);
    }

    #[tokio::test]
    async fn test_completion_round_trip_and_transform() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let memory: Arc<MemoryPersister<u32>> = Arc::new(MemoryPersister::new());
        let transform: Transform<u32> = Arc::new(|n| n * 10);
        let mut executor = SaveExecutor::new(
            DocumentId::new("d").unwrap(),
            memory.clone() as Arc<dyn Persister<u32>>,
            Some(transform),
            tx,
        );

        let attempt = executor.start(AttemptKind::Debounced, 4);
        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.attempt_id, attempt);

        let (flight, outcome) = executor.complete(completion).unwrap();
        assert_eq!(flight.snapshot, 4);
        assert!(outcome.is_success());
        assert_eq!(memory.stored(), Some(40));
        assert!(!executor.is_in_flight());
    }

    #[tokio::test]
    async fn test_stale_completion_is_ignored() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let persister: Arc<dyn Persister<u32>> = Arc::new(MemoryPersister::new());
        let mut executor = SaveExecutor::new(DocumentId::new("d").unwrap(), persister, None, tx);

        executor.start(AttemptKind::Debounced, 1);
        let stale = Completion {
            attempt_id: 99,
            result: Ok(()),
        };
        assert!(executor.complete(stale).is_none());
        assert!(executor.is_in_flight());
    }
}
