//! Draftsync autosave engine
//!
//! This module keeps one continuously edited document in sync with a remote
//! store, including:
//! - Debounced saves that coalesce bursts of edits
//! - A reentrancy guard so only one save is ever in flight
//! - Fixed-delay retries for timed-out saves
//! - Offline queuing driven by a connectivity signal
//! - Conflict detection that suspends autosave until resolved
//! - An observable status for the UI layer

pub mod comparator;
pub mod config;
pub mod conflict;
pub mod connectivity;
pub mod debounce;
pub mod engine;
pub mod executor;
pub mod memory;
pub mod notify;
pub mod persist;
pub mod retry;
pub mod state;

// Re-export main types
pub use comparator::{ChangeComparator, EqComparator, FnComparator, StructuralComparator};
pub use config::{AutosaveConfig, AutosaveHooks, ConflictCallback, Transform};
pub use conflict::{ConflictChoice, ConflictHandler, ConflictRecord, ResolutionPlan};
pub use connectivity::{ConnectivityMonitor, ConnectivitySubscription};
pub use debounce::{Debouncer, ScheduledTask, TaskSlot};
pub use engine::{AutosaveDriver, AutosaveEngine, ForceSaveResult, UNLOAD_WARNING};
pub use executor::{AttemptKind, Preflight, SaveExecutor, SaveOutcome};
pub use memory::MemoryPersister;
pub use notify::{Notifier, TracingNotifier};
pub use persist::{FnPersister, PersistError, PersistResult, Persister};
pub use retry::{RetryConfig, RetryPolicy, RetryState};
pub use state::{SaveState, SaveStatus, StatusMachine};
