//! Observable save status and its transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::conflict::ConflictRecord;

/// Externally observable status of the document's save lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    /// Nothing to report.
    #[default]
    Idle,
    /// A save is in progress or waiting for a retry.
    Saving,
    /// The last save succeeded; shown briefly, then back to idle.
    Saved,
    /// The last save failed terminally.
    Error,
    /// The remote was modified elsewhere; autosave is suspended.
    Conflict,
    /// Changes will be synced once connectivity returns.
    Offline,
}

impl SaveStatus {
    /// Whether the transition `self -> to` is part of the state machine.
    ///
    /// Entering `Saving` is always allowed: a force save may start from any
    /// state. Self-transitions are allowed and are no-ops.
    pub fn can_transition(self, to: SaveStatus) -> bool {
        use SaveStatus::*;
        if self == to {
            return true;
        }
        match to {
            Saving => true,
            Saved => matches!(self, Saving | Conflict),
            Idle => matches!(self, Saving | Saved | Error | Conflict | Offline),
            Error | Conflict => self == Saving,
            Offline => matches!(self, Saving | Idle | Saved | Error | Conflict),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SaveStatus::Idle => "idle",
            SaveStatus::Saving => "saving",
            SaveStatus::Saved => "saved",
            SaveStatus::Error => "error",
            SaveStatus::Conflict => "conflict",
            SaveStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for SaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Holder of the current status that only accepts legal transitions.
#[derive(Debug, Default)]
pub struct StatusMachine {
    status: SaveStatus,
}

impl StatusMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> SaveStatus {
        self.status
    }

    pub fn is(&self, status: SaveStatus) -> bool {
        self.status == status
    }

    /// Move to `to`. Illegal transitions are refused and logged.
    pub fn transition(&mut self, to: SaveStatus) -> bool {
        if !self.status.can_transition(to) {
            warn!("Refusing status transition {} -> {}", self.status, to);
            return false;
        }
        if self.status != to {
            debug!("Status {} -> {}", self.status, to);
            self.status = to;
        }
        true
    }
}

/// Snapshot of everything a caller can observe about the save lifecycle.
#[derive(Debug, Clone)]
pub struct SaveState<T> {
    pub status: SaveStatus,
    /// Time of the last confirmed save.
    pub last_saved_at: Option<DateTime<Utc>>,
    /// Reason of the last failure, kept until the next successful save.
    pub error: Option<String>,
    pub conflict: Option<ConflictRecord<T>>,
    pub is_online: bool,
    /// A change arrived while offline and has not been retried yet.
    pub has_pending_changes: bool,
    /// The current snapshot differs from the last persisted one.
    pub has_unsaved_changes: bool,
    /// The current snapshot, including one adopted from a conflict resolution.
    pub document: T,
}

impl<T> SaveState<T> {
    pub fn new(document: T, is_online: bool) -> Self {
        Self {
            status: SaveStatus::Idle,
            last_saved_at: None,
            error: None,
            conflict: None,
            is_online,
            has_pending_changes: false,
            has_unsaved_changes: false,
            document,
        }
    }
}
