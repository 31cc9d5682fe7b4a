//! Cancellable scheduled tasks and the debouncer built on them.
//!
//! A [`TaskSlot`] holds at most one pending task, identified by a token that
//! is never reused. Rescheduling replaces the pending task, cancelling clears
//! it, and a task only fires if its token is still the one in the slot. The
//! engine's driver owns the slots and sleeps until the earliest deadline.

use std::time::Duration;
use tokio::time::Instant;

/// A task waiting for its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTask {
    pub token: u64,
    pub deadline: Instant,
}

/// Holder for a single cancellable task.
#[derive(Debug, Default)]
pub struct TaskSlot {
    pending: Option<ScheduledTask>,
    next_token: u64,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a task `delay` after `now`, replacing any pending one.
    pub fn schedule(&mut self, now: Instant, delay: Duration) -> u64 {
        self.next_token += 1;
        let token = self.next_token;
        self.pending = Some(ScheduledTask {
            token,
            deadline: now + delay,
        });
        token
    }

    /// Cancel the pending task. Returns true if one was pending.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|t| t.deadline)
    }

    /// Take the pending task if its deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> Option<u64> {
        match self.pending {
            Some(task) if task.deadline <= now => {
                self.pending = None;
                Some(task.token)
            }
            _ => None,
        }
    }
}

/// Pure debounce: every call to [`Debouncer::schedule`] restarts the quiet
/// period, and the deferred save fires once the period elapses untouched.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    slot: TaskSlot,
}

impl Debouncer {
    /// Default quiet period.
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(1000);

    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            slot: TaskSlot::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Restart the countdown.
    pub fn schedule(&mut self, now: Instant) -> u64 {
        self.slot.schedule(now, self.delay)
    }

    /// Abort the countdown without firing.
    pub fn cancel(&mut self) -> bool {
        self.slot.cancel()
    }

    pub fn is_pending(&self) -> bool {
        self.slot.is_pending()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.slot.deadline()
    }

    /// Returns true exactly once per uninterrupted countdown.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        self.slot.take_due(now).is_some()
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DELAY)
    }
}
