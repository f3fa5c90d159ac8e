//! Monitor error taxonomy

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// Every mirror endpoint failed for one request
    #[error("network unavailable: {what} failed on all {attempts} endpoints (last error: {last_error})")]
    NetworkUnavailable {
        what: &'static str,
        attempts: usize,
        last_error: String,
    },

    #[error("insufficient data: need {needed} candles, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("persistence failure ({backend}): {reason}")]
    PersistenceFailure {
        backend: &'static str,
        reason: String,
    },

    #[error("notification failure: {0}")]
    NotificationFailure(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to launch monitor worker: {0}")]
    Launch(String),

    #[error("a monitor worker is already running")]
    AlreadyRunning,

    /// Worker did not finish within the stop timeout; its task was detached
    #[error("monitor worker still alive after {0:?}; task leaked")]
    LeakedWorker(std::time::Duration),
}

impl MonitorError {
    pub fn persistence(backend: &'static str, err: impl std::fmt::Display) -> Self {
        MonitorError::PersistenceFailure {
            backend,
            reason: err.to_string(),
        }
    }
}

pub type MonitorResult<T> = Result<T, MonitorError>;
