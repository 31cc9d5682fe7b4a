//! Notification side channel (toasts in a UI host).

use tracing::{info, warn};

/// Receives user-facing notifications about the save lifecycle.
pub trait Notifier: Send + Sync {
    /// A save failed terminally. Only sent when error toasts are enabled.
    fn error(&self, message: &str);

    /// A conflict needs the user's decision.
    fn conflict(&self, message: &str);

    /// A conflict was resolved or a forced save went through.
    fn saved(&self, _message: &str) {}
}

/// Notifier that writes to the tracing log. Used when the host has no
/// notification surface.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn error(&self, message: &str) {
        warn!("Autosave error: {}", message);
    }

    fn conflict(&self, message: &str) {
        warn!("Autosave conflict: {}", message);
    }

    fn saved(&self, message: &str) {
        info!("Autosave: {}", message);
    }
}
