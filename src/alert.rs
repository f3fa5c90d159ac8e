//! Rate-limited alert dispatch
//!
//! Each alert key has its own cooldown. Delivery is attempted only when the
//! key's cooldown has elapsed and notifications are enabled. Recording the
//! event as a signal is the caller's business and happens regardless.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::notifier::Notifier;

/// Cooldown for repeating events (stop, grid)
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(120);
/// Cooldown for the one-off startup announcement
pub const STARTUP_COOLDOWN: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    Sent,
    Disabled,
    CoolingDown,
    /// Delivery attempted and failed; already logged
    Failed,
}

pub struct AlertDispatcher {
    notifier: Arc<dyn Notifier>,
    enabled: bool,
    last_sent: HashMap<String, Instant>,
}

impl AlertDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, enabled: bool) -> Self {
        AlertDispatcher {
            notifier,
            enabled,
            last_sent: HashMap::new(),
        }
    }

    /// Deliver `message` unless `key` is still cooling down.
    ///
    /// The key's timestamp moves only on a successful send, so a failed
    /// delivery does not start a new cooldown window.
    pub async fn maybe_alert(&mut self, key: &str, message: &str, cooldown: Duration) -> AlertOutcome {
        if !self.enabled {
            return AlertOutcome::Disabled;
        }

        let now = Instant::now();
        if let Some(last) = self.last_sent.get(key) {
            if now.duration_since(*last) < cooldown {
                return AlertOutcome::CoolingDown;
            }
        }

        match self.notifier.send(message).await {
            Ok(()) => {
                self.last_sent.insert(key.to_string(), now);
                AlertOutcome::Sent
            }
            Err(e) => {
                warn!(key, "Alert delivery failed: {}", e);
                AlertOutcome::Failed
            }
        }
    }
}
