//! Single-owner worker slot
//!
//! `Registry` holds at most one live `MonitorLoop` task. Everything a worker
//! needs is assembled fresh on each `start` by a `WorkerSource`, so a config
//! edited between runs takes effect on the next start and never mid-run.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{MonitorError, MonitorResult};
use crate::feed::{BinanceFeed, MarketData};
use crate::monitor::{MonitorLoop, WorkerStatus};
use crate::notifier::{notifier_from_config, Notifier};
use crate::state_manager::StateStore;

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Collaborators for one worker run
pub struct WorkerParts {
    pub config: Config,
    pub feed: Arc<dyn MarketData>,
    pub notifier: Arc<dyn Notifier>,
    pub store: StateStore,
}

pub trait WorkerSource: Send + Sync {
    fn prepare(&self) -> Result<WorkerParts>;
}

/// Builds a worker from a JSON config file plus environment credentials
pub struct ConfigFileSource {
    path: PathBuf,
}

impl ConfigFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ConfigFileSource { path: path.into() }
    }
}

impl WorkerSource for ConfigFileSource {
    fn prepare(&self) -> Result<WorkerParts> {
        let config = Config::load_or_default(&self.path)?;
        config.validate()?;

        let feed = BinanceFeed::from_config(&config.market).context("Failed to build market feed")?;
        let notifier = notifier_from_config(&config.notify);
        let store = StateStore::from_config(&config.storage)?;

        Ok(WorkerParts {
            config,
            feed: Arc::new(feed),
            notifier,
            store,
        })
    }
}

struct WorkerHandle {
    cancel: CancellationToken,
    join: JoinHandle<MonitorResult<()>>,
    status: watch::Receiver<WorkerStatus>,
}

impl WorkerHandle {
    fn is_alive(&self) -> bool {
        !self.join.is_finished() && *self.status.borrow() != WorkerStatus::Stopped
    }
}

pub struct Registry {
    source: Arc<dyn WorkerSource>,
    active: Mutex<Option<WorkerHandle>>,
    /// Worker that outlived a stop timeout; blocks new starts until it exits
    leaked: Mutex<Option<JoinHandle<MonitorResult<()>>>>,
    stop_timeout: Duration,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Registry {
    pub fn new(source: Arc<dyn WorkerSource>) -> Self {
        Registry {
            source,
            active: Mutex::new(None),
            leaked: Mutex::new(None),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Launch a worker. Must be called from within a tokio runtime.
    pub fn start(&self) -> MonitorResult<()> {
        let mut active = lock(&self.active);
        if active.as_ref().is_some_and(WorkerHandle::is_alive) {
            return Err(MonitorError::AlreadyRunning);
        }

        {
            let mut leaked = lock(&self.leaked);
            match leaked.as_ref() {
                Some(join) if !join.is_finished() => {
                    warn!("Refusing to start while a leaked worker is still alive");
                    return Err(MonitorError::AlreadyRunning);
                }
                Some(_) => *leaked = None,
                None => {}
            }
        }

        let parts = self
            .source
            .prepare()
            .map_err(|e| MonitorError::Launch(format!("{:#}", e)))?;
        let symbol = parts.config.market.symbol.clone();

        let cancel = CancellationToken::new();
        let worker = MonitorLoop::new(parts.config, parts.feed, parts.notifier, parts.store, cancel.clone());
        let status = worker.status();
        let join = tokio::spawn(worker.run());

        info!("Monitor worker launched for {}", symbol);
        *active = Some(WorkerHandle { cancel, join, status });
        Ok(())
    }

    /// Cancel the worker and wait for it to finish.
    ///
    /// Returns `Ok(false)` when nothing was running. A worker that is still
    /// alive after the stop timeout is reported as `LeakedWorker`.
    pub async fn stop(&self) -> MonitorResult<bool> {
        let handle = lock(&self.active).take();
        let Some(WorkerHandle { cancel, mut join, .. }) = handle else {
            return Ok(false);
        };

        cancel.cancel();
        match tokio::time::timeout(self.stop_timeout, &mut join).await {
            Ok(Ok(Ok(()))) => info!("Monitor worker stopped"),
            Ok(Ok(Err(e))) => warn!("Monitor worker had already failed: {}", e),
            Ok(Err(e)) => error!("Monitor worker task ended abnormally: {}", e),
            Err(_) => {
                error!("Monitor worker still alive after {:?}", self.stop_timeout);
                *lock(&self.leaked) = Some(join);
                return Err(MonitorError::LeakedWorker(self.stop_timeout));
            }
        }
        Ok(true)
    }

    pub fn running(&self) -> bool {
        lock(&self.active).as_ref().is_some_and(WorkerHandle::is_alive)
    }

    /// Status of the current worker, `None` if none was started
    pub fn status(&self) -> Option<WorkerStatus> {
        lock(&self.active).as_ref().map(|h| *h.status.borrow())
    }

    /// Watch the current worker's status transitions
    pub fn subscribe(&self) -> Option<watch::Receiver<WorkerStatus>> {
        lock(&self.active).as_ref().map(|h| h.status.clone())
    }
}
