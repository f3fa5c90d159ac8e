//! Monitor worker
//!
//! One `MonitorLoop` watches one instrument until it is cancelled:
//!
//! ```text
//! Starting ──initial price──▶ Running ──cancel──▶ Stopping ──▶ Stopped
//!     └────────initial price failed────────────────────────────▲
//! ```
//!
//! Every cycle fetches a price, updates the trailing high and the adaptive
//! grid step, evaluates the stop line and the grid band, records and
//! announces boundary events, persists the state, then sleeps. Only a failed
//! initial price fetch ends a worker on its own; everything else is logged
//! and the next cycle runs on schedule.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alert::{AlertDispatcher, DEFAULT_COOLDOWN, STARTUP_COOLDOWN};
use crate::config::Config;
use crate::error::MonitorResult;
use crate::feed::MarketData;
use crate::grid::Grid;
use crate::notifier::Notifier;
use crate::risk::{StopEngine, StopLines};
use crate::state_manager::StateStore;
use crate::volatility::{Refresh, VolatilityTracker};
use crate::{pct_change, Direction, RuntimeState, Signal, SignalKind};

/// Lifecycle of one worker; there is no way back to `Running`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Per-run tracking established during startup
#[derive(Debug, Clone)]
struct Tracking {
    grid: Grid,
    trailing_high: f64,
    last_idx: usize,
}

pub struct MonitorLoop {
    config: Config,
    feed: Arc<dyn MarketData>,
    alerts: AlertDispatcher,
    store: StateStore,
    volatility: VolatilityTracker,
    stops: StopEngine,
    cancel: CancellationToken,
    status: watch::Sender<WorkerStatus>,
    state: RuntimeState,
    cycle: u64,
}

fn fmt_price(v: f64) -> String {
    format!("{:.6}", v)
}

impl MonitorLoop {
    pub fn new(
        config: Config,
        feed: Arc<dyn MarketData>,
        notifier: Arc<dyn Notifier>,
        store: StateStore,
        cancel: CancellationToken,
    ) -> Self {
        let volatility = VolatilityTracker::new(
            config.atr.clone(),
            config.market.symbol.clone(),
            config.grid.step_pct,
        );
        let stops = StopEngine::new(
            config.position.avg_cost,
            config.grid.stop_from_avg_pct,
            config.atr.n_stop,
        );
        let alerts = AlertDispatcher::new(notifier, config.notify.enabled);
        let (status, _) = watch::channel(WorkerStatus::Starting);

        MonitorLoop {
            config,
            feed,
            alerts,
            store,
            volatility,
            stops,
            cancel,
            status,
            state: RuntimeState::default(),
            cycle: 0,
        }
    }

    pub fn status(&self) -> watch::Receiver<WorkerStatus> {
        self.status.subscribe()
    }

    fn set_status(&self, status: WorkerStatus) {
        debug!("Worker status -> {:?}", status);
        self.status.send_replace(status);
    }

    /// Run until cancelled. Returns the startup error if the worker never
    /// reached `Running`.
    pub async fn run(mut self) -> MonitorResult<()> {
        info!(
            "Monitor starting: {} avg={} qty={} step={}% levels={}/{} atr={}",
            self.config.market.symbol,
            self.config.position.avg_cost,
            self.config.position.qty,
            self.config.grid.step_pct,
            self.config.grid.levels_up,
            self.config.grid.levels_down,
            self.config.atr.enabled
        );

        let result = match self.start().await {
            Ok(mut tracking) => {
                self.set_status(WorkerStatus::Running);
                self.run_loop(&mut tracking).await;
                self.set_status(WorkerStatus::Stopping);
                Ok(())
            }
            Err(e) => {
                error!("Initial price fetch failed, worker stopping: {}", e);
                Err(e)
            }
        };

        if let Err(e) = self.store.mark_stopped() {
            error!("Failed to clear running flag: {}", e);
        }
        self.set_status(WorkerStatus::Stopped);
        info!("Monitor stopped after {} cycles", self.cycle);
        result
    }

    async fn start(&mut self) -> MonitorResult<Tracking> {
        let price = self.feed.get_price(self.config.market.symbol.as_str()).await?;

        let snapshot = self.store.load_initial();
        if let Some(s) = &snapshot {
            info!(
                "Recovered snapshot: ref={} trailing_high={} idx={}",
                s.ref_price, s.trailing_high, s.last_level_idx
            );
        }
        let ref_price = snapshot.map(|s| s.ref_price).unwrap_or(price);
        let trailing_high = snapshot.map(|s| s.trailing_high).unwrap_or(ref_price);

        self.volatility.refresh(self.feed.as_ref(), price).await;
        let step_pct = self.volatility.step_pct();

        let grid = Grid::new(
            ref_price,
            step_pct,
            self.config.grid.levels_up,
            self.config.grid.levels_down,
        );
        let last_idx = match snapshot {
            // a config change may have shrunk the grid since the snapshot
            Some(s) => s.last_level_idx.min(grid.max_index()),
            None => grid.locate(price),
        };

        let lines = self.stops.evaluate(trailing_high, self.volatility.atr());
        let tracking = Tracking {
            grid,
            trailing_high,
            last_idx,
        };
        self.update_state(&tracking, &lines);
        self.persist();

        let text = self.startup_text(ref_price, &lines);
        self.raise(
            SignalKind::Startup,
            &format!("🚀 GRID+STOP ON ({})\n{}", self.config.market.symbol, text),
            STARTUP_COOLDOWN,
            text.clone(),
            None,
            None,
        )
        .await;
        self.persist();

        Ok(tracking)
    }

    async fn run_loop(&mut self, tracking: &mut Tracking) {
        let interval = self.config.poll_interval();

        while !self.cancel.is_cancelled() {
            self.run_cycle(tracking).await;

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.cancel.cancelled() => {
                    debug!("Cancellation observed during sleep");
                }
            }
        }
    }

    async fn run_cycle(&mut self, tracking: &mut Tracking) {
        self.cycle += 1;
        let symbol = self.config.market.symbol.clone();

        let price = match self.feed.get_price(symbol.as_str()).await {
            Ok(price) => price,
            Err(e) => {
                warn!(cycle = self.cycle, "Price fetch failed, skipping cycle: {}", e);
                return;
            }
        };

        if price > tracking.trailing_high {
            tracking.trailing_high = price;
        }

        if let Refresh::Fallback { reason } = self.volatility.refresh(self.feed.as_ref(), price).await {
            debug!("Using fixed grid step this cycle: {}", reason);
        }

        let lines = self.stops.evaluate(tracking.trailing_high, self.volatility.atr());
        let avg = self.config.position.avg_cost;
        let pnl_pct = pct_change(price, avg);
        let pnl_value = self.stops.pnl_value(price, self.config.position.qty);

        if price <= lines.effective {
            let text = format!(
                "🛑 STOP! {} <= {} (avg {} | {:.2}% | ~{:.2}).",
                fmt_price(price),
                fmt_price(lines.effective),
                fmt_price(avg),
                pnl_pct,
                pnl_value
            );
            self.raise(SignalKind::Stop, &text, DEFAULT_COOLDOWN, text.clone(), Some(price), Some(pnl_pct))
                .await;
        }

        let idx = tracking.grid.locate(price);
        if idx != tracking.last_idx {
            let direction = Direction::between(tracking.last_idx, idx);
            if let Some((lower, upper)) = tracking.grid.band(idx) {
                let text = format!(
                    "📊 {} Crossed level @ step {:.2}%\nBand {} - {}\nPrice {} | Avg {} | PnL {:.2}%\nSuggestion: {}.",
                    direction.arrow(),
                    self.volatility.step_pct(),
                    fmt_price(lower),
                    fmt_price(upper),
                    fmt_price(price),
                    fmt_price(avg),
                    pnl_pct,
                    direction.suggestion()
                );
                self.raise(SignalKind::Grid, &text, DEFAULT_COOLDOWN, text.clone(), Some(price), Some(pnl_pct))
                    .await;
            }
            tracking.last_idx = idx;
        }

        self.update_state(tracking, &lines);
        self.persist();

        debug!(
            cycle = self.cycle,
            price,
            trailing_high = tracking.trailing_high,
            stop = lines.effective,
            idx,
            "Cycle complete"
        );
    }

    /// Record an event as a signal and offer it to the alert dispatcher.
    /// The signal is stored whether or not the alert is delivered.
    async fn raise(
        &mut self,
        kind: SignalKind,
        alert_text: &str,
        cooldown: std::time::Duration,
        message: String,
        price: Option<f64>,
        pnl_pct: Option<f64>,
    ) {
        let outcome = self.alerts.maybe_alert(kind.as_str(), alert_text, cooldown).await;
        debug!("Alert [{}] -> {:?}", kind, outcome);

        let signal = Signal::new(kind, message, price, pnl_pct);
        if let Err(e) = self.store.append_signal(&signal) {
            error!("Failed to record {} signal: {}", kind, e);
        }
        self.state.record_signal(&signal);
    }

    fn update_state(&mut self, tracking: &Tracking, lines: &StopLines) {
        self.state.running = true;
        self.state.ref_price = Some(tracking.grid.ref_price());
        self.state.trailing_high = Some(tracking.trailing_high);
        self.state.last_level_idx = Some(tracking.last_idx);
        self.state.atr = self.volatility.atr();
        self.state.eff_grid_step = Some(self.volatility.step_pct());
        self.state.atr_trailing_stop = lines.atr;
        self.state.stop_line = Some(lines.effective);
        self.state.updated_at = Some(Utc::now());
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.state) {
            error!("State persistence failed: {}", e);
        }
    }

    fn startup_text(&self, ref_price: f64, lines: &StopLines) -> String {
        let cfg = &self.config;
        let mode = if cfg.atr.enabled { "ATR" } else { "fixed" };
        let mut text = format!(
            "Avg {} | Qty {}\nRef {} | Effective grid @ {:.2}% ({} mode)\n",
            fmt_price(cfg.position.avg_cost),
            cfg.position.qty,
            fmt_price(ref_price),
            self.volatility.step_pct(),
            mode
        );
        if let (Some(atr), Some(atr_line)) = (self.volatility.atr(), lines.atr) {
            text.push_str(&format!(
                "ATR({},{}) ~ {} | ATR stop ~ {}\n",
                cfg.atr.length,
                cfg.atr.interval,
                fmt_price(atr),
                fmt_price(atr_line)
            ));
        }
        text.push_str(&format!(
            "Fixed stop ({:.1}% below avg): {}",
            cfg.grid.stop_from_avg_pct,
            fmt_price(lines.fixed)
        ));
        text
    }
}
