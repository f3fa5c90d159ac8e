//! Volatility-adaptive grid step
//!
//! With ATR disabled the grid step is the configured fixed step. With ATR
//! enabled the step is re-derived from fresh candles at most once per refresh
//! window:
//!
//! ```text
//! step = clamp(k_grid · atr / price · 100, 0.15, 2.5)   [percent]
//! ```
//!
//! Any failure on the way (network, too few candles) falls back to the fixed
//! step and drops the ATR value until the next refresh succeeds.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::AtrConfig;
use crate::error::MonitorError;
use crate::feed::MarketData;
use crate::indicators;
use crate::Symbol;

pub const MIN_STEP_PCT: f64 = 0.15;
pub const MAX_STEP_PCT: f64 = 2.5;
pub const MIN_REFRESH_SECS: u64 = 10;
/// Extra candles fetched beyond the ATR period
const CANDLE_HEADROOM: usize = 30;
const MIN_CANDLE_FETCH: usize = 100;

/// Grid step in percent derived from an ATR reading, clamped to the allowed band
pub fn adaptive_step(atr: f64, price: f64, k_grid: f64) -> f64 {
    let raw = if price > 0.0 {
        k_grid * (atr / price) * 100.0
    } else {
        MIN_STEP_PCT
    };
    raw.clamp(MIN_STEP_PCT, MAX_STEP_PCT)
}

/// Outcome of one `refresh` call
#[derive(Debug, Clone, PartialEq)]
pub enum Refresh {
    /// ATR disabled; fixed step in force
    Fixed,
    /// Refresh window has not elapsed; previous values kept
    NotDue,
    /// Fresh ATR reading applied
    Updated { atr: f64, step_pct: f64 },
    /// Fell back to the fixed step
    Fallback { reason: String },
}

/// Tracks the current ATR reading and the effective grid step
#[derive(Debug)]
pub struct VolatilityTracker {
    config: AtrConfig,
    symbol: Symbol,
    fixed_step: f64,
    atr: Option<f64>,
    step_pct: f64,
    next_due: Option<Instant>,
}

impl VolatilityTracker {
    pub fn new(config: AtrConfig, symbol: Symbol, fixed_step: f64) -> Self {
        VolatilityTracker {
            config,
            symbol,
            fixed_step,
            atr: None,
            step_pct: fixed_step,
            next_due: None,
        }
    }

    /// Current ATR, only while ATR is enabled and the last refresh succeeded
    pub fn atr(&self) -> Option<f64> {
        self.atr
    }

    /// Effective grid step in percent
    pub fn step_pct(&self) -> f64 {
        self.step_pct
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.config.refresh_secs.max(MIN_REFRESH_SECS))
    }

    fn candle_count(&self) -> usize {
        MIN_CANDLE_FETCH.max(self.config.length + CANDLE_HEADROOM)
    }

    fn fall_back(&mut self, reason: String) -> Refresh {
        self.atr = None;
        self.step_pct = self.fixed_step;
        Refresh::Fallback { reason }
    }

    /// Re-derive the step if the refresh window elapsed. Never fails.
    pub async fn refresh(&mut self, feed: &dyn MarketData, price: f64) -> Refresh {
        if !self.config.enabled {
            self.atr = None;
            self.step_pct = self.fixed_step;
            return Refresh::Fixed;
        }

        let now = Instant::now();
        if matches!(self.next_due, Some(due) if now < due) {
            return Refresh::NotDue;
        }
        self.next_due = Some(now + self.refresh_interval());

        let candles = match feed
            .get_candles(self.symbol.as_str(), &self.config.interval, self.candle_count())
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                warn!("ATR refresh failed, using fixed step: {}", e);
                return self.fall_back(e.to_string());
            }
        };

        match indicators::atr(&candles, self.config.length) {
            Some(atr) => {
                let step_pct = adaptive_step(atr, price, self.config.k_grid);
                self.atr = Some(atr);
                self.step_pct = step_pct;
                debug!(
                    "ATR({},{}) = {:.6}, effective step {:.2}%",
                    self.config.length, self.config.interval, atr, step_pct
                );
                Refresh::Updated { atr, step_pct }
            }
            None => {
                let err = MonitorError::InsufficientData {
                    needed: indicators::atr_min_candles(self.config.length),
                    got: candles.len(),
                };
                debug!("ATR unavailable, using fixed step: {}", err);
                self.fall_back(err.to_string())
            }
        }
    }
}
