//! Technical indicators
//!
//! Volatility estimation from OHLC candles. Everything here is a pure
//! function of its inputs.

use itertools::Itertools;

use crate::Candle;

/// Calculate Exponential Moving Average
///
/// Seeded with the simple average of the first `period` values, then each
/// later value is folded in as `v·k + ema·(1−k)` with `k = 2/(period+1)`.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(values.len());

    if values.is_empty() || period == 0 {
        return result;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut ema_value: Option<f64> = None;

    for (i, &value) in values.iter().enumerate() {
        if i + 1 < period {
            result.push(None);
        } else if i + 1 == period {
            let sum: f64 = values[..period].iter().sum();
            ema_value = Some(sum / period as f64);
            result.push(ema_value);
        } else if let Some(prev) = ema_value {
            let next = value * k + prev * (1.0 - k);
            ema_value = Some(next);
            result.push(ema_value);
        }
    }

    result
}

/// True range of every candle after the first, measured against the
/// previous close
pub fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .tuple_windows()
        .map(|(prev, cur)| {
            let hl = cur.high - cur.low;
            let hc = (cur.high - prev.close).abs();
            let lc = (cur.low - prev.close).abs();
            hl.max(hc).max(lc)
        })
        .collect()
}

/// Minimum number of candles `atr` needs for a given period
pub fn atr_min_candles(period: usize) -> usize {
    period + 2
}

/// Latest Average True Range over `candles`.
///
/// Returns `None` when fewer than `period + 2` candles are supplied; that is
/// an expected warm-up condition, not an error.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < atr_min_candles(period) {
        return None;
    }
    let tr = true_ranges(candles);
    ema(&tr, period).last().copied().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, Utc};

    fn candle(i: i64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: Utc::now() + Duration::minutes(i),
            open: close,
            high,
            low,
            close,
        }
    }

    #[test]
    fn test_ema() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = ema(&values, 3);

        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        assert_eq!(result[2], Some(2.0));
        // 4·0.5 + 2·0.5
        assert_eq!(result[3], Some(3.0));
        assert_eq!(result[4], Some(4.0));
    }

    #[test]
    fn test_ema_empty_and_zero_period() {
        assert!(ema(&[], 3).is_empty());
        assert!(ema(&[1.0, 2.0], 0).is_empty());
    }

    #[test]
    fn test_true_range_uses_previous_close() {
        let candles = vec![
            candle(0, 1.0, 1.0, 1.0),
            // gap up: |high - prev close| dominates
            candle(1, 1.5, 1.4, 1.45),
            // gap down: |low - prev close| dominates
            candle(2, 1.2, 1.1, 1.15),
        ];
        let tr = true_ranges(&candles);
        assert_eq!(tr.len(), 2);
        assert_relative_eq!(tr[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(tr[1], 0.35, epsilon = 1e-12);
    }

    #[test]
    fn test_atr_unavailable_below_warmup() {
        let candles: Vec<Candle> = (0..15).map(|i| candle(i, 1.01, 0.99, 1.0)).collect();
        assert_eq!(atr(&candles, 14), None);
        assert_eq!(atr(&candles, 0), None);
        assert!(atr(&candles[..], 13).is_some());
    }

    #[test]
    fn test_atr_flat_series_is_zero() {
        let candles: Vec<Candle> = (0..60).map(|i| candle(i, 2.0, 2.0, 2.0)).collect();
        assert_eq!(atr(&candles, 14), Some(0.0));
    }

    #[test]
    fn test_atr_constant_range() {
        // 16 bars, every true range is 0.02
        let candles: Vec<Candle> = (0..16).map(|i| candle(i, 1.01, 0.99, 1.0)).collect();
        let value = atr(&candles, 14).unwrap();
        assert_relative_eq!(value, 0.02, epsilon = 1e-12);
    }

    #[test]
    fn test_atr_is_reproducible() {
        let candles: Vec<Candle> = (0..120)
            .map(|i| {
                let base = 1.0 + (i as f64 * 0.37).sin() * 0.05;
                candle(i, base + 0.01, base - 0.012, base)
            })
            .collect();
        let first = atr(&candles, 14).unwrap();
        let second = atr(&candles.clone(), 14).unwrap();
        assert_eq!(first.to_bits(), second.to_bits());
    }
}
