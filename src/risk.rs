//! Protective stop lines
//!
//! The fixed stop sits a configured percentage below the average cost. When
//! ATR is active, a trailing stop hangs `n_stop` ATRs below the trailing high.
//! The ATR stop can only tighten protection: the effective line never drops
//! below the fixed floor.

use serde::{Deserialize, Serialize};

/// Fixed stop line below the average acquisition cost
pub fn fixed_stop(avg_cost: f64, stop_pct: f64) -> f64 {
    avg_cost * (1.0 - stop_pct / 100.0)
}

/// Volatility trailing stop below the trailing high
pub fn atr_stop(trailing_high: f64, atr: f64, n_stop: f64) -> f64 {
    trailing_high - n_stop * atr
}

/// Combine the fixed floor with an optional ATR stop
pub fn effective_stop(fixed: f64, atr_stop: Option<f64>) -> f64 {
    match atr_stop {
        Some(atr_line) => fixed.max(atr_line),
        None => fixed,
    }
}

/// Stop-line parameters for one run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopEngine {
    pub avg_cost: f64,
    pub stop_pct: f64,
    pub n_stop: f64,
}

/// Result of one stop evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopLines {
    pub fixed: f64,
    pub atr: Option<f64>,
    pub effective: f64,
}

impl StopEngine {
    pub fn new(avg_cost: f64, stop_pct: f64, n_stop: f64) -> Self {
        StopEngine {
            avg_cost,
            stop_pct,
            n_stop,
        }
    }

    pub fn fixed(&self) -> f64 {
        fixed_stop(self.avg_cost, self.stop_pct)
    }

    /// Evaluate all stop lines. `atr` is `None` when ATR is disabled or no
    /// current value exists, in which case only the fixed line applies.
    pub fn evaluate(&self, trailing_high: f64, atr: Option<f64>) -> StopLines {
        let fixed = self.fixed();
        let atr_line = atr.map(|a| atr_stop(trailing_high, a, self.n_stop));
        StopLines {
            fixed,
            atr: atr_line,
            effective: effective_stop(fixed, atr_line),
        }
    }

    /// Profit or loss of the held quantity at `price`
    pub fn pnl_value(&self, price: f64, qty: f64) -> f64 {
        (price - self.avg_cost) * qty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fixed_stop_scenario() {
        let engine = StopEngine::new(1.00, 8.0, 3.0);
        let lines = engine.evaluate(1.10, None);
        assert_relative_eq!(lines.fixed, 0.92, epsilon = 1e-12);
        assert_eq!(lines.atr, None);
        assert_eq!(lines.effective, lines.fixed);
        assert!(0.90 <= lines.effective);
    }

    #[test]
    fn test_atr_stop_only_tightens() {
        let engine = StopEngine::new(1.00, 8.0, 3.0);

        // 1.20 - 3·0.02 = 1.14, above the 0.92 floor
        let tight = engine.evaluate(1.20, Some(0.02));
        assert_relative_eq!(tight.atr.unwrap(), 1.14, epsilon = 1e-12);
        assert_relative_eq!(tight.effective, 1.14, epsilon = 1e-12);

        // 1.00 - 3·0.05 = 0.85, below the floor
        let loose = engine.evaluate(1.00, Some(0.05));
        assert_relative_eq!(loose.effective, 0.92, epsilon = 1e-12);
    }

    #[test]
    fn test_effective_stop_is_pure() {
        let engine = StopEngine::new(0.31, 6.5, 2.5);
        let a = engine.evaluate(0.37, Some(0.004));
        let b = engine.evaluate(0.37, Some(0.004));
        assert_eq!(a, b);
        assert_eq!(a.effective.to_bits(), b.effective.to_bits());
    }

    #[test]
    fn test_pnl_value() {
        let engine = StopEngine::new(0.25, 8.0, 3.0);
        assert_relative_eq!(engine.pnl_value(0.30, 1000.0), 50.0, epsilon = 1e-9);
        assert_relative_eq!(engine.pnl_value(0.20, 1000.0), -50.0, epsilon = 1e-9);
    }
}
