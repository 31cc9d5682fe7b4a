//! Dirty-state detection between document snapshots.

use serde::Serialize;
use std::marker::PhantomData;
use tracing::warn;

/// Decides whether two snapshots are semantically different.
///
/// Implementations must be deterministic and side-effect free; the engine
/// calls them on every edit and on every publish of the observable state.
pub trait ChangeComparator<T>: Send + Sync {
    /// Returns true if `current` differs from `previous`.
    fn has_changed(&self, current: &T, previous: &T) -> bool;
}

/// Structural comparison through the serde data model.
///
/// Both snapshots are lowered to `serde_json::Value` and compared. If either
/// side fails to serialize the snapshots are reported as unchanged, so a
/// malformed document cannot trigger a save storm.
pub struct StructuralComparator<T> {
    _marker: PhantomData<fn(&T)>,
}

impl<T> StructuralComparator<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for StructuralComparator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize> ChangeComparator<T> for StructuralComparator<T> {
    fn has_changed(&self, current: &T, previous: &T) -> bool {
        let current = serde_json::to_value(current);
        let previous = serde_json::to_value(previous);
        match (current, previous) {
            (Ok(current), Ok(previous)) => current != previous,
            (Err(e), _) | (_, Err(e)) => {
                warn!("Snapshot comparison failed, treating as unchanged: {}", e);
                false
            }
        }
    }
}

/// Comparison through `PartialEq`, for documents that are cheap to compare
/// directly.
pub struct EqComparator;

impl<T: PartialEq> ChangeComparator<T> for EqComparator {
    fn has_changed(&self, current: &T, previous: &T) -> bool {
        current != previous
    }
}

/// Caller-supplied comparison, e.g. to ignore live timestamps.
pub struct FnComparator<F>(pub F);

impl<T, F> ChangeComparator<T> for FnComparator<F>
where
    F: Fn(&T, &T) -> bool + Send + Sync,
{
    fn has_changed(&self, current: &T, previous: &T) -> bool {
        (self.0)(current, previous)
    }
}
