//! Core data types shared by the feed, the monitor loop and the state store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Validation errors for candle data
#[derive(Debug, Error, PartialEq)]
pub enum CandleValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("prices must be positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// One OHLC bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    /// Create a new candle with validation
    pub fn new(
        open_time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    ) -> Result<Self, CandleValidationError> {
        let candle = Self {
            open_time,
            open,
            high,
            low,
            close,
        };
        candle.validate()?;
        Ok(candle)
    }

    pub fn validate(&self) -> Result<(), CandleValidationError> {
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(CandleValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(CandleValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        Ok(())
    }
}

/// Trading pair symbol using Arc<str> for cheap cloning
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.trim().to_uppercase().as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref().trim().to_uppercase().as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of boundary event recorded in the signal log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Startup,
    Stop,
    Grid,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Startup => "startup",
            SignalKind::Stop => "stop",
            SignalKind::Grid => "grid",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "startup" => Ok(SignalKind::Startup),
            "stop" => Ok(SignalKind::Stop),
            "grid" => Ok(SignalKind::Grid),
            other => Err(format!("unknown signal kind: {}", other)),
        }
    }
}

/// Append-only record of a boundary event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Row id assigned by the signal log; `None` until stored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub kind: SignalKind,
    pub message: String,
    pub price: Option<f64>,
    pub pnl_pct: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    pub fn new(
        kind: SignalKind,
        message: impl Into<String>,
        price: Option<f64>,
        pnl_pct: Option<f64>,
    ) -> Self {
        Self {
            id: None,
            kind,
            message: message.into(),
            price,
            pnl_pct,
            created_at: Utc::now(),
        }
    }
}

/// Direction of a grid crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn between(from: usize, to: usize) -> Self {
        if to > from {
            Direction::Up
        } else {
            Direction::Down
        }
    }

    pub fn arrow(&self) -> &'static str {
        match self {
            Direction::Up => "⬆️",
            Direction::Down => "⬇️",
        }
    }

    /// Advisory action shown alongside a crossing
    pub fn suggestion(&self) -> &'static str {
        match self {
            Direction::Up => "partial sell",
            Direction::Down => "partial buy",
        }
    }
}

/// Worker state shared with external readers.
///
/// The worker owns the only mutable copy and writes it as one unit per cycle,
/// so a reader never sees fields from two different cycles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeState {
    pub running: bool,
    pub ref_price: Option<f64>,
    pub trailing_high: Option<f64>,
    pub last_level_idx: Option<usize>,
    pub atr: Option<f64>,
    pub eff_grid_step: Option<f64>,
    /// ATR-derived trailing stop, when ATR is active and available
    pub atr_trailing_stop: Option<f64>,
    /// Effective stop line in force for the last cycle
    pub stop_line: Option<f64>,
    pub last_kind: Option<SignalKind>,
    pub last_message: Option<String>,
    pub last_price: Option<f64>,
    pub last_pnl_pct: Option<f64>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RuntimeState {
    /// Stamp the last-alert fields from a freshly recorded signal
    pub fn record_signal(&mut self, signal: &Signal) {
        self.last_kind = Some(signal.kind);
        self.last_message = Some(signal.message.clone());
        self.last_price = signal.price;
        self.last_pnl_pct = signal.pnl_pct;
    }

    /// The restart-recovery subset, if the worker has ever initialised
    pub fn snapshot(&self) -> Option<Snapshot> {
        Some(Snapshot {
            ref_price: self.ref_price?,
            last_level_idx: self.last_level_idx?,
            trailing_high: self.trailing_high?,
        })
    }
}

/// Lightweight local snapshot used only for restart recovery
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub ref_price: f64,
    pub last_level_idx: usize,
    pub trailing_high: f64,
}

/// Percentage change of `price` relative to `base`; zero when `base` is zero
pub fn pct_change(price: f64, base: f64) -> f64 {
    if base == 0.0 {
        return 0.0;
    }
    (price - base) / base * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candle_validation() {
        let now = Utc::now();
        assert!(Candle::new(now, 1.0, 1.1, 0.9, 1.0).is_ok());
        assert_eq!(
            Candle::new(now, 1.0, 0.9, 1.1, 1.0),
            Err(CandleValidationError::HighLessThanLow {
                high: 0.9,
                low: 1.1
            })
        );
        assert!(Candle::new(now, 0.0, 1.1, 0.9, 1.0).is_err());
    }

    #[test]
    fn test_symbol_normalised() {
        assert_eq!(Symbol::new(" polusdt ").as_str(), "POLUSDT");
    }

    #[test]
    fn test_signal_kind_round_trip() {
        for kind in [SignalKind::Startup, SignalKind::Stop, SignalKind::Grid] {
            assert_eq!(kind.as_str().parse::<SignalKind>(), Ok(kind));
        }
        assert!("dd5".parse::<SignalKind>().is_err());
    }

    #[test]
    fn test_snapshot_requires_all_fields() {
        let mut state = RuntimeState {
            ref_price: Some(1.0),
            trailing_high: Some(1.2),
            ..Default::default()
        };
        assert!(state.snapshot().is_none());

        state.last_level_idx = Some(3);
        assert_eq!(
            state.snapshot(),
            Some(Snapshot {
                ref_price: 1.0,
                last_level_idx: 3,
                trailing_high: 1.2
            })
        );
    }

    #[test]
    fn test_pct_change() {
        assert_eq!(pct_change(1.1, 0.0), 0.0);
        assert!((pct_change(0.9, 1.0) + 10.0).abs() < 1e-9);
    }
}
