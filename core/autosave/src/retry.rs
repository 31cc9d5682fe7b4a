//! Retry policy for transient (timeout-class) save failures.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
///
/// The defaults give a fixed policy: three persist calls per chain, two
/// seconds apart. Backoff and jitter are available for hosts that want them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of persist calls in one chain, the first included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub delay: Duration,
    /// Maximum delay (cap for exponential growth).
    pub max_delay: Duration,
    /// Multiplier applied per retry. 1.0 keeps the delay fixed.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl RetryConfig {
    /// Default number of persist calls per chain.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Default delay between calls.
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(2000);

    /// Create a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Self::DEFAULT_DELAY,
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Set the delay between attempts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate delay before retry number `retry` (0-based).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let base_delay =
            self.delay.as_millis() as f64 * self.backoff_multiplier.powi(retry as i32);

        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            // Stretch only, the base delay is a lower bound.
            let jitter_factor = 1.0 + (rand::random::<f64>() * 0.25);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS)
    }
}

/// Attempt counter for the current save chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    attempts: u32,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persist calls issued in the current chain.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record that a persist call was issued.
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// Decides whether a timed-out save is tried again, and when.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before the next attempt, or `None` once the budget is spent.
    pub fn next_delay(&self, state: &RetryState) -> Option<Duration> {
        if state.attempts() >= self.config.max_attempts {
            warn!(
                "Save failed after {} attempts, giving up",
                state.attempts()
            );
            return None;
        }

        let delay = self
            .config
            .delay_for_retry(state.attempts().saturating_sub(1));
        debug!(
            "Attempt {} timed out. Retrying in {:?}...",
            state.attempts(),
            delay
        );
        Some(delay)
    }
}
