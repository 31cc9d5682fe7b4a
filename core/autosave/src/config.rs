//! Engine configuration and caller-supplied hooks.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use draftsync_common::{Error, Result};

use crate::comparator::{ChangeComparator, StructuralComparator};
use crate::conflict::ConflictRecord;
use crate::notify::{Notifier, TracingNotifier};
use crate::retry::RetryConfig;

/// Pre-send mapping applied to every snapshot before it is persisted.
pub type Transform<T> = Arc<dyn Fn(T) -> T + Send + Sync>;

/// Callback invoked when a conflict is detected.
pub type ConflictCallback<T> = Arc<dyn Fn(&ConflictRecord<T>) + Send + Sync>;

/// Configuration for the autosave engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosaveConfig {
    /// Debounce window in milliseconds.
    pub delay_ms: u64,
    /// Master switch for debounced autosave. Force saves work regardless.
    pub enabled: bool,
    /// Whether terminal errors are sent to the notifier.
    pub show_toast_on_error: bool,
    /// Whether the host should warn before discarding unsaved changes.
    pub warn_before_unload: bool,
    /// Whether to follow the connectivity signal, if one is supplied.
    pub detect_connectivity: bool,
    /// How long `saved` is shown before falling back to `idle`.
    pub saved_display_ms: u64,
    /// Retry policy for timed-out saves.
    pub retry: RetryConfig,
}

impl AutosaveConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the debounce window.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn saved_display(&self) -> Duration {
        Duration::from_millis(self.saved_display_ms)
    }

    /// Check the configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.delay_ms == 0 {
            return Err(Error::InvalidInput(
                "Debounce delay must be greater than zero".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::InvalidInput(
                "Retry budget must allow at least one attempt".to_string(),
            ));
        }
        if !(self.retry.backoff_multiplier >= 1.0) {
            return Err(Error::InvalidInput(format!(
                "Backoff multiplier must be at least 1.0, got {}",
                self.retry.backoff_multiplier
            )));
        }
        Ok(())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from JSON and validate.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            delay_ms: 1000,
            enabled: true,
            show_toast_on_error: true,
            warn_before_unload: true,
            detect_connectivity: true,
            saved_display_ms: 3000,
            retry: RetryConfig::default(),
        }
    }
}

/// Behavior the caller plugs into the engine.
pub struct AutosaveHooks<T> {
    /// Dirty-state detection.
    pub comparator: Arc<dyn ChangeComparator<T>>,
    pub transform: Option<Transform<T>>,
    pub on_conflict: Option<ConflictCallback<T>>,
    pub notifier: Arc<dyn Notifier>,
}

impl<T: Serialize + 'static> AutosaveHooks<T> {
    /// Structural comparison, no transform, notifications to the log.
    pub fn new() -> Self {
        Self {
            comparator: Arc::new(StructuralComparator::new()),
            transform: None,
            on_conflict: None,
            notifier: Arc::new(TracingNotifier),
        }
    }
}

impl<T: Serialize + 'static> Default for AutosaveHooks<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AutosaveHooks<T> {
    pub fn with_comparator(mut self, comparator: impl ChangeComparator<T> + 'static) -> Self {
        self.comparator = Arc::new(comparator);
        self
    }

    pub fn with_transform(mut self, transform: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn on_conflict(
        mut self,
        callback: impl Fn(&ConflictRecord<T>) + Send + Sync + 'static,
    ) -> Self {
        self.on_conflict = Some(Arc::new(callback));
        self
    }

    pub fn with_notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }
}
