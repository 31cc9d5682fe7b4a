//! Autosave engine: the handle callers hold and the driver that owns the
//! save lifecycle of one document.
//!
//! All state lives in the driver task. Callers talk to it through
//! [`AutosaveEngine`], which sends `change`, `force` and `resolve` commands
//! and reads the published [`SaveState`]. The driver additionally consumes
//! persist outcomes, connectivity flips and the ticks of its timers, one
//! event at a time, so no handler ever runs concurrently with another.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use draftsync_common::{DocumentId, Error, Result};

use crate::config::{AutosaveConfig, AutosaveHooks};
use crate::conflict::{ConflictChoice, ConflictHandler, ConflictRecord, ResolutionPlan};
use crate::connectivity::{ConnectivityMonitor, ConnectivitySubscription};
use crate::debounce::{Debouncer, TaskSlot};
use crate::executor::{AttemptKind, Completion, Preflight, SaveExecutor, SaveOutcome};
use crate::persist::Persister;
use crate::retry::{RetryPolicy, RetryState};
use crate::state::{SaveState, SaveStatus, StatusMachine};

/// Message shown by hosts that warn before the session is discarded.
pub const UNLOAD_WARNING: &str = "You have unsaved changes. Are you sure you want to leave?";

/// How a force save settled, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceSaveResult {
    /// The remote confirmed the write.
    Saved,
    /// Nothing differed from the last persisted snapshot.
    Unchanged,
    /// Offline; the save will be issued on reconnect.
    Deferred,
    /// The remote reported a conflict; see [`AutosaveEngine::conflict`].
    Conflict,
}

type ForceReply = oneshot::Sender<Result<ForceSaveResult>>;

enum Command<T> {
    Change(T),
    ForceSave(ForceReply),
    Resolve {
        choice: ConflictChoice,
        remote: Option<T>,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

/// Handle to a running autosave engine.
///
/// Cloning the handle is cheap; all clones address the same engine.
pub struct AutosaveEngine<T> {
    commands: mpsc::UnboundedSender<Command<T>>,
    state: watch::Receiver<SaveState<T>>,
    warn_before_unload: bool,
}

impl<T> Clone for AutosaveEngine<T> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            state: self.state.clone(),
            warn_before_unload: self.warn_before_unload,
        }
    }
}

impl<T> AutosaveEngine<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an engine for document `id`, whose loaded content is `initial`.
    ///
    /// The returned driver must be run (usually spawned) for the engine to
    /// make progress. When `connectivity` is `None`, or the config disables
    /// connectivity detection, the engine assumes it is always online.
    pub fn new(
        id: DocumentId,
        initial: T,
        persister: Arc<dyn Persister<T>>,
        config: AutosaveConfig,
        hooks: AutosaveHooks<T>,
        connectivity: Option<&ConnectivityMonitor>,
    ) -> Result<(Self, AutosaveDriver<T>)> {
        config.validate()?;

        let mut connectivity = if config.detect_connectivity {
            connectivity.map(ConnectivityMonitor::subscribe)
        } else {
            None
        };
        let online = connectivity.as_mut().map_or(true, |sub| sub.current());

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SaveState::new(initial.clone(), online));

        let executor = SaveExecutor::new(id.clone(), persister, hooks.transform.clone(), completion_tx);

        let core = EngineCore {
            id,
            debouncer: Debouncer::new(config.delay()),
            retry_policy: RetryPolicy::new(config.retry.clone()),
            config: config.clone(),
            hooks,
            current: initial.clone(),
            last_persisted: initial,
            status: StatusMachine::new(),
            last_saved_at: None,
            error: None,
            retry: RetryState::new(),
            conflict: ConflictHandler::new(),
            pending: false,
            online,
            executor,
            retry_timer: TaskSlot::new(),
            saved_timer: TaskSlot::new(),
            force_queued: false,
            waiters: Vec::new(),
            publisher: state_tx,
        };

        let engine = Self {
            commands: command_tx,
            state: state_rx,
            warn_before_unload: config.warn_before_unload,
        };
        let driver = AutosaveDriver {
            core,
            commands: command_rx,
            completions: completion_rx,
            connectivity,
        };

        Ok((engine, driver))
    }

    /// Create an engine and spawn its driver on the current runtime.
    pub fn spawn(
        id: DocumentId,
        initial: T,
        persister: Arc<dyn Persister<T>>,
        config: AutosaveConfig,
        hooks: AutosaveHooks<T>,
        connectivity: Option<&ConnectivityMonitor>,
    ) -> Result<Self> {
        let (engine, driver) = Self::new(id, initial, persister, config, hooks, connectivity)?;
        tokio::spawn(driver.run());
        Ok(engine)
    }

    /// Report the latest snapshot of the document.
    pub fn update(&self, snapshot: T) {
        if self.commands.send(Command::Change(snapshot)).is_err() {
            warn!("Change dropped: autosave engine stopped");
        }
    }

    /// Save now, bypassing the debounce window.
    ///
    /// A save already in flight is not interrupted; this one runs right
    /// after it. Timeouts are retried before this returns. Terminal
    /// failures are returned as errors, everything else as a
    /// [`ForceSaveResult`].
    pub async fn force_save(&self) -> Result<ForceSaveResult> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::ForceSave(reply))
            .map_err(|_| Error::Stopped)?;
        rx.await.map_err(|_| Error::Stopped)?
    }

    /// Resolve the current conflict. Returns false if there is none, or if
    /// `Remote` is chosen and no remote data is known.
    pub async fn resolve_conflict(&self, choice: ConflictChoice, remote: Option<T>) -> bool {
        let (reply, rx) = oneshot::channel();
        let command = Command::Resolve {
            choice,
            remote,
            reply,
        };
        if self.commands.send(command).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Latest published state.
    pub fn state(&self) -> SaveState<T> {
        self.state.borrow().clone()
    }

    /// Watch the published state.
    pub fn subscribe(&self) -> watch::Receiver<SaveState<T>> {
        self.state.clone()
    }

    /// Current save status.
    pub fn status(&self) -> SaveStatus {
        self.state.borrow().status
    }

    /// Time of the last confirmed save.
    pub fn last_saved_at(&self) -> Option<chrono::DateTime<Utc>> {
        self.state.borrow().last_saved_at
    }

    /// Reason of the last failure, until the next successful save.
    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    /// The unresolved conflict, if any.
    pub fn conflict(&self) -> Option<ConflictRecord<T>> {
        self.state.borrow().conflict.clone()
    }

    /// Whether the document differs from the last persisted snapshot.
    pub fn has_unsaved_changes(&self) -> bool {
        self.state.borrow().has_unsaved_changes
    }

    /// Whether changes made offline are waiting for reconnect.
    pub fn has_pending_changes(&self) -> bool {
        self.state.borrow().has_pending_changes
    }

    /// Last known reachability.
    pub fn is_online(&self) -> bool {
        self.state.borrow().is_online
    }

    /// The engine's current snapshot.
    pub fn document(&self) -> T {
        self.state.borrow().document.clone()
    }

    /// Warning for the host's unload hook, if leaving now would lose work.
    pub fn unload_warning(&self) -> Option<&'static str> {
        if !self.warn_before_unload {
            return None;
        }
        let state = self.state.borrow();
        (state.has_unsaved_changes || state.has_pending_changes).then_some(UNLOAD_WARNING)
    }

    /// Whether the driver is still accepting commands.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Stop the engine and wait for the driver to finish. Pending timers
    /// are cancelled; a save in flight completes but its outcome is dropped.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        self.commands.closed().await;
    }
}

/// Event loop owning the engine state.
pub struct AutosaveDriver<T: Send + 'static> {
    core: EngineCore<T>,
    commands: mpsc::UnboundedReceiver<Command<T>>,
    completions: mpsc::UnboundedReceiver<Completion<T>>,
    connectivity: Option<ConnectivitySubscription>,
}

impl<T> AutosaveDriver<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Run until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        info!("Autosave engine started for {}", self.core.id);

        loop {
            let deadline = self.core.next_deadline();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.core.on_command(command),
                },
                Some(completion) = self.completions.recv() => {
                    self.core.on_completion(completion);
                }
                online = Self::next_connectivity(&mut self.connectivity) => match online {
                    Some(online) => self.core.on_connectivity(online),
                    None => {
                        debug!("Connectivity signal gone, keeping last known state");
                        self.connectivity = None;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(far_future)), if deadline.is_some() => {
                    self.core.on_tick(Instant::now());
                }
            }

            self.core.publish();
        }

        self.core.teardown();
        self.core.publish();
        info!("Autosave engine stopped for {}", self.core.id);
    }

    async fn next_connectivity(sub: &mut Option<ConnectivitySubscription>) -> Option<bool> {
        match sub {
            Some(sub) => sub.changed().await,
            None => std::future::pending().await,
        }
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365)
}

struct EngineCore<T: Send + 'static> {
    id: DocumentId,
    config: AutosaveConfig,
    hooks: AutosaveHooks<T>,

    /// Latest snapshot seen.
    current: T,
    /// Snapshot confirmed by the remote.
    last_persisted: T,

    status: StatusMachine,
    last_saved_at: Option<chrono::DateTime<Utc>>,
    error: Option<String>,

    retry_policy: RetryPolicy,
    retry: RetryState,
    conflict: ConflictHandler<T>,
    /// A change arrived while offline and no attempt was issued since.
    pending: bool,
    online: bool,

    executor: SaveExecutor<T>,
    debouncer: Debouncer,
    retry_timer: TaskSlot,
    saved_timer: TaskSlot,

    /// A force save arrived while an attempt was in flight.
    force_queued: bool,
    /// Force-save callers waiting for the current chain to settle.
    waiters: Vec<ForceReply>,
    publisher: watch::Sender<SaveState<T>>,
}

impl<T> EngineCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn on_command(&mut self, command: Command<T>) {
        match command {
            Command::Change(snapshot) => self.on_change(snapshot),
            Command::ForceSave(reply) => self.on_force_save(reply),
            Command::Resolve {
                choice,
                remote,
                reply,
            } => {
                let resolved = self.on_resolve(choice, remote);
                let _ = reply.send(resolved);
            }
            Command::Shutdown => {}
        }
    }

    fn is_dirty(&self) -> bool {
        self.hooks
            .comparator
            .has_changed(&self.current, &self.last_persisted)
    }

    fn on_change(&mut self, snapshot: T) {
        self.current = snapshot;

        if self.conflict.is_conflicted() {
            debug!("Change held back: conflict awaiting resolution");
            return;
        }
        if !self.is_dirty() {
            if self.debouncer.cancel() {
                debug!("Document back at persisted content, debounced save cancelled");
            }
            return;
        }
        if !self.config.enabled {
            return;
        }

        if self.retry_timer.cancel() {
            debug!("Fresh change supersedes the pending retry");
        }
        self.retry.reset();
        self.debouncer.schedule(Instant::now());
    }

    fn on_force_save(&mut self, reply: ForceReply) {
        self.waiters.push(reply);
        self.debouncer.cancel();

        if self.executor.is_in_flight() {
            debug!("Force save queued behind the in-flight attempt");
            self.force_queued = true;
            return;
        }
        self.force_attempt();
    }

    fn force_attempt(&mut self) {
        self.force_queued = false;
        self.retry_timer.cancel();
        self.retry.reset();
        self.error = None;
        if self.conflict.clear().is_some() {
            info!("Force save supersedes the unresolved conflict");
        }
        self.attempt(AttemptKind::Forced);
    }

    fn on_resolve(&mut self, choice: ConflictChoice, remote: Option<T>) -> bool {
        let Some(plan) = self.conflict.resolve(choice, remote) else {
            return false;
        };

        match plan {
            ResolutionPlan::SaveLocal => {
                if self.executor.is_in_flight() {
                    self.force_queued = true;
                } else {
                    self.force_attempt();
                }
            }
            ResolutionPlan::AdoptRemote(data) => {
                self.debouncer.cancel();
                self.retry_timer.cancel();
                self.retry.reset();
                self.last_persisted = data.clone();
                self.current = data;
                self.last_saved_at = Some(Utc::now());
                self.error = None;
                self.pending = false;
                self.status.transition(SaveStatus::Saved);
                self.saved_timer
                    .schedule(Instant::now(), self.config.saved_display());
                self.hooks.notifier.saved("Remote version accepted");
            }
        }
        true
    }

    fn attempt(&mut self, kind: AttemptKind) {
        let preflight = self.executor.preflight(
            kind,
            &self.current,
            &self.last_persisted,
            self.hooks.comparator.as_ref(),
            self.online,
            self.conflict.is_conflicted(),
        );

        match preflight {
            Preflight::Busy => {
                debug!("{:?} attempt skipped: another save is in flight", kind);
                if kind == AttemptKind::Forced {
                    self.force_queued = true;
                }
            }
            Preflight::Blocked => {
                debug!("{:?} attempt skipped: conflict awaiting resolution", kind);
            }
            Preflight::Unchanged => {
                debug!("{:?} attempt skipped: nothing changed", kind);
                self.pending = false;
                self.retry.reset();
                let result = if self.status.is(SaveStatus::Saved) {
                    ForceSaveResult::Saved
                } else {
                    ForceSaveResult::Unchanged
                };
                if !self.online {
                    self.status.transition(SaveStatus::Offline);
                } else if !self.status.is(SaveStatus::Saved) {
                    self.status.transition(SaveStatus::Idle);
                }
                self.settle(Ok(result));
            }
            Preflight::Offline => {
                info!("Offline, deferring save of {} until reconnect", self.id);
                self.pending = true;
                self.retry.reset();
                self.status.transition(SaveStatus::Offline);
                self.settle(Ok(ForceSaveResult::Deferred));
            }
            Preflight::Ready => {
                self.pending = false;
                self.saved_timer.cancel();
                if kind != AttemptKind::Retry {
                    self.retry.reset();
                }
                self.retry.record_attempt();
                self.status.transition(SaveStatus::Saving);
                self.executor.start(kind, self.current.clone());
            }
        }
    }

    fn on_completion(&mut self, completion: Completion<T>) {
        let Some((flight, outcome)) = self.executor.complete(completion) else {
            return;
        };

        match outcome {
            SaveOutcome::Success => self.on_success(flight.snapshot),
            SaveOutcome::TransientFailure(message) => self.on_transient(message),
            SaveOutcome::NetworkFailure(message) => self.on_network_failure(message),
            SaveOutcome::Conflict(remote) => self.on_conflict(flight.snapshot, remote),
            SaveOutcome::FatalFailure(message) => {
                self.retry.reset();
                self.fail(message.clone(), Error::Save(message));
            }
        }
    }

    fn on_success(&mut self, snapshot: T) {
        let now = Instant::now();
        self.last_persisted = snapshot;
        self.last_saved_at = Some(Utc::now());
        self.error = None;
        self.retry.reset();
        self.conflict.clear();
        self.status.transition(SaveStatus::Saved);
        self.saved_timer.schedule(now, self.config.saved_display());
        info!("Saved {}", self.id);

        if self.force_queued {
            self.force_attempt();
            return;
        }
        self.settle(Ok(ForceSaveResult::Saved));

        // Edits made while the save was in flight.
        if self.config.enabled && self.is_dirty() && !self.debouncer.is_pending() {
            self.debouncer.schedule(now);
        }
    }

    fn on_transient(&mut self, message: String) {
        if self.force_queued {
            self.force_attempt();
            return;
        }

        match self.retry_policy.next_delay(&self.retry) {
            Some(delay) => {
                warn!("Save of {} timed out: {}", self.id, message);
                self.retry_timer.schedule(Instant::now(), delay);
            }
            None => {
                let attempts = self.retry.attempts();
                self.retry.reset();
                self.fail(
                    format!("Save failed after {} attempts: {}", attempts, message),
                    Error::RetriesExhausted { attempts, message },
                );
            }
        }
    }

    fn on_network_failure(&mut self, message: String) {
        warn!("Save of {} failed, remote unreachable: {}", self.id, message);
        self.retry.reset();
        self.pending = true;
        self.force_queued = false;
        self.status.transition(SaveStatus::Offline);
        self.settle(Ok(ForceSaveResult::Deferred));
    }

    fn on_conflict(&mut self, local: T, remote: Option<T>) {
        self.retry.reset();
        self.debouncer.cancel();
        self.retry_timer.cancel();
        self.force_queued = false;
        self.status.transition(SaveStatus::Conflict);

        let record = self.conflict.detect(local, remote);
        self.hooks.notifier.conflict(
            "This document was modified elsewhere. Choose which version to keep.",
        );
        if let Some(callback) = &self.hooks.on_conflict {
            callback(record);
        }
        self.settle(Ok(ForceSaveResult::Conflict));
    }

    fn fail(&mut self, message: String, err: Error) {
        error!("Save of {} failed: {}", self.id, message);
        self.status.transition(SaveStatus::Error);
        if self.config.show_toast_on_error {
            self.hooks.notifier.error(&message);
        }
        self.error = Some(message);

        if self.force_queued {
            self.force_attempt();
            return;
        }
        self.settle(Err(err));
    }

    fn on_connectivity(&mut self, online: bool) {
        if online == self.online {
            return;
        }
        self.online = online;

        if online {
            info!("Back online");
            if self.pending && self.config.enabled {
                self.debouncer.cancel();
                self.attempt(AttemptKind::Reconnect);
            } else if self.status.is(SaveStatus::Offline) {
                if self.pending {
                    debug!("Autosave disabled, pending changes wait for a force save");
                }
                self.status.transition(SaveStatus::Idle);
            }
            return;
        }

        info!("Connection lost");
        if self.executor.is_in_flight() {
            debug!("Letting the in-flight save fail on its own");
        } else if self.conflict.is_conflicted() {
            debug!("Keeping conflict status while offline");
        } else if self.status.is(SaveStatus::Error) {
            // A rejected save is only retried on a new edit or a force save.
            debug!("Keeping error status while offline");
        } else {
            if self.is_dirty() {
                self.pending = true;
            }
            self.status.transition(SaveStatus::Offline);
        }
    }

    fn on_tick(&mut self, now: Instant) {
        if self.saved_timer.take_due(now).is_some() && self.status.is(SaveStatus::Saved) {
            self.status.transition(SaveStatus::Idle);
        }
        if self.retry_timer.take_due(now).is_some() {
            self.attempt(AttemptKind::Retry);
        }
        if self.debouncer.fire_if_due(now) {
            self.attempt(AttemptKind::Debounced);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.debouncer.deadline(),
            self.retry_timer.deadline(),
            self.saved_timer.deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Answer every waiting force-save caller.
    fn settle(&mut self, result: Result<ForceSaveResult>) {
        if self.waiters.is_empty() {
            return;
        }
        if result == Ok(ForceSaveResult::Saved) {
            self.hooks.notifier.saved("Changes saved");
        }
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    fn publish(&self) {
        let state = SaveState {
            status: self.status.status(),
            last_saved_at: self.last_saved_at,
            error: self.error.clone(),
            conflict: self.conflict.record().cloned(),
            is_online: self.online,
            has_pending_changes: self.pending,
            has_unsaved_changes: self.is_dirty(),
            document: self.current.clone(),
        };
        self.publisher.send_replace(state);
    }

    fn teardown(&mut self) {
        self.debouncer.cancel();
        self.retry_timer.cancel();
        self.saved_timer.cancel();
        self.executor.shutdown();
        self.force_queued = false;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(Error::Stopped));
        }
    }
}
