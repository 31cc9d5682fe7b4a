//! Conflict tracking and resolution choices.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Which side wins a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictChoice {
    /// Re-save the local snapshot over the remote version.
    Local,
    /// Adopt the remote version locally, without a network call.
    Remote,
}

/// A detected version conflict, kept until it is resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord<T> {
    /// The local snapshot whose save was rejected.
    pub local: T,
    /// Remote data returned with the rejection, if any.
    pub remote: Option<T>,
    /// When the conflict was detected.
    pub detected_at: DateTime<Utc>,
}

impl<T> ConflictRecord<T> {
    pub fn new(local: T, remote: Option<T>) -> Self {
        Self {
            local,
            remote,
            detected_at: Utc::now(),
        }
    }
}

/// What the engine has to do to carry out a resolution.
#[derive(Debug)]
pub enum ResolutionPlan<T> {
    /// Force-save the current local snapshot.
    SaveLocal,
    /// Make this the persisted and current snapshot.
    AdoptRemote(T),
}

/// Holder of the single unresolved conflict.
#[derive(Debug)]
pub struct ConflictHandler<T> {
    record: Option<ConflictRecord<T>>,
}

impl<T: Clone> ConflictHandler<T> {
    pub fn new() -> Self {
        Self { record: None }
    }

    pub fn is_conflicted(&self) -> bool {
        self.record.is_some()
    }

    pub fn record(&self) -> Option<&ConflictRecord<T>> {
        self.record.as_ref()
    }

    /// Store a newly detected conflict, replacing any previous record.
    pub fn detect(&mut self, local: T, remote: Option<T>) -> &ConflictRecord<T> {
        info!(
            "Conflict detected (remote data {})",
            if remote.is_some() { "present" } else { "absent" }
        );
        self.record.insert(ConflictRecord::new(local, remote))
    }

    /// Drop the record without resolving, e.g. when a force save supersedes it.
    pub fn clear(&mut self) -> Option<ConflictRecord<T>> {
        self.record.take()
    }

    /// Turn a resolution request into a plan and clear the conflict.
    ///
    /// Returns `None`, leaving the conflict in place, when there is no
    /// conflict or when `Remote` is chosen with no remote data available.
    /// Caller-supplied remote data takes precedence over the recorded one.
    pub fn resolve(&mut self, choice: ConflictChoice, remote: Option<T>) -> Option<ResolutionPlan<T>> {
        let record = self.record.as_ref()?;

        let plan = match choice {
            ConflictChoice::Local => ResolutionPlan::SaveLocal,
            ConflictChoice::Remote => match remote.or_else(|| record.remote.clone()) {
                Some(data) => ResolutionPlan::AdoptRemote(data),
                None => {
                    warn!("Cannot accept remote version: no remote data available");
                    return None;
                }
            },
        };

        info!("Resolving conflict with {:?} version", choice);
        self.record = None;
        Some(plan)
    }
}

impl<T: Clone> Default for ConflictHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_without_conflict_is_noop() {
        let mut handler: ConflictHandler<u32> = ConflictHandler::new();
        assert!(handler.resolve(ConflictChoice::Local, None).is_none());
        assert!(handler.resolve(ConflictChoice::Remote, Some(1)).is_none());
    }

    #[test]
    fn test_resolve_remote_prefers_supplied_data() {
        let mut handler = ConflictHandler::new();
        handler.detect(1, Some(2));

        match handler.resolve(ConflictChoice::Remote, Some(3)) {
            Some(ResolutionPlan::AdoptRemote(data)) => assert_eq!(data, 3),
            other => panic!("unexpected plan: {:?}", other),
        }
        assert!(!handler.is_conflicted());
    }

    #[test]
    fn test_resolve_remote_falls_back_to_record() {
        let mut handler = ConflictHandler::new();
        handler.detect(1, Some(2));

        assert!(matches!(
            handler.resolve(ConflictChoice::Remote, None),
            Some(ResolutionPlan::AdoptRemote(2))
        ));
    }

    #[test]
    fn test_resolve_remote_without_data_keeps_conflict() {
        let mut handler = ConflictHandler::new();
        handler.detect(1, None);

        assert!(handler.resolve(ConflictChoice::Remote, None).is_none());
        assert!(handler.is_conflicted());

        assert!(matches!(
            handler.resolve(ConflictChoice::Local, None),
            Some(ResolutionPlan::SaveLocal)
        ));
        assert!(!handler.is_conflicted());
    }

    #[test]
    fn test_choice_serialization() {
        let json = serde_json::to_string(&ConflictChoice::Remote).unwrap();
        assert_eq!(json, "\"remote\"");
    }
}
