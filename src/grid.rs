//! Price grid construction and band lookup
//!
//! A grid is an ascending ladder of prices around a reference price. The
//! band a price sits in is identified by the index of its lower level.

use serde::{Deserialize, Serialize};

/// Build the level ladder for a reference price.
///
/// Level at offset `i` in `[-levels_down, levels_up]` is
/// `ref_price · (1 + i · step_pct / 100)`. The result is sorted ascending so
/// a non-positive step still yields an ordered ladder.
pub fn build_grid(ref_price: f64, step_pct: f64, levels_up: usize, levels_down: usize) -> Vec<f64> {
    let down = levels_down as i64;
    let up = levels_up as i64;
    let mut levels: Vec<f64> = (-down..=up)
        .map(|i| ref_price * (1.0 + (i as f64 * step_pct / 100.0)))
        .collect();
    levels.sort_by(|a, b| a.total_cmp(b));
    levels
}

/// Index `i` with `levels[i] <= price < levels[i + 1]`.
///
/// Prices below the ladder saturate to `0` and prices at or above the top
/// level saturate to `levels.len() - 2`. Never fails; ladders with fewer than
/// two levels always report band `0`.
pub fn locate_index(levels: &[f64], price: f64) -> usize {
    let last_band = levels.len().saturating_sub(2);
    if levels.len() < 2 || price < levels[0] {
        return 0;
    }
    // first level strictly above price
    let above = levels.partition_point(|&level| level <= price);
    above.saturating_sub(1).min(last_band)
}

/// Ladder built for one reference price and step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    ref_price: f64,
    step_pct: f64,
    levels: Vec<f64>,
}

impl Grid {
    pub fn new(ref_price: f64, step_pct: f64, levels_up: usize, levels_down: usize) -> Self {
        Grid {
            ref_price,
            step_pct,
            levels: build_grid(ref_price, step_pct, levels_up, levels_down),
        }
    }

    pub fn ref_price(&self) -> f64 {
        self.ref_price
    }

    pub fn step_pct(&self) -> f64 {
        self.step_pct
    }

    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    pub fn locate(&self, price: f64) -> usize {
        locate_index(&self.levels, price)
    }

    /// Lower and upper bound of band `idx`
    pub fn band(&self, idx: usize) -> Option<(f64, f64)> {
        Some((*self.levels.get(idx)?, *self.levels.get(idx + 1)?))
    }

    /// Largest valid band index
    pub fn max_index(&self) -> usize {
        self.levels.len().saturating_sub(2)
    }

    /// Rebuild only if the reference price moved; returns whether it did.
    /// Idempotent, so callers may invoke it every cycle.
    pub fn rebuild_if_moved(
        &mut self,
        ref_price: f64,
        step_pct: f64,
        levels_up: usize,
        levels_down: usize,
    ) -> bool {
        if self.ref_price == ref_price {
            return false;
        }
        *self = Grid::new(ref_price, step_pct, levels_up, levels_down);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_scenario_levels() {
        let levels = build_grid(1.00, 1.0, 2, 2);
        let expected = [0.98, 0.99, 1.00, 1.01, 1.02];
        assert_eq!(levels.len(), expected.len());
        for (got, want) in levels.iter().zip(expected) {
            assert_relative_eq!(*got, want, epsilon = 1e-12);
        }
        assert_eq!(locate_index(&levels, 1.015), 3);
    }

    #[test]
    fn test_grid_strictly_increasing() {
        for &(ref_price, step, up, down) in &[
            (0.25, 0.6, 8usize, 8usize),
            (65_000.0, 2.5, 3, 0),
            (1.0, 0.15, 0, 5),
            (3.3, 1.0, 0, 0),
        ] {
            let levels = build_grid(ref_price, step, up, down);
            assert_eq!(levels.len(), up + down + 1);
            assert!(levels.windows(2).all(|w| w[0] < w[1]));
            assert_eq!(levels[down], ref_price);
        }
    }

    #[test]
    fn test_non_positive_step_still_sorted() {
        let levels = build_grid(1.0, -1.0, 2, 2);
        assert!(levels.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_locate_in_range() {
        let levels = build_grid(1.0, 1.0, 2, 2);
        for (i, window) in levels.windows(2).enumerate() {
            assert_eq!(locate_index(&levels, window[0]), i);
            let mid = (window[0] + window[1]) / 2.0;
            assert_eq!(locate_index(&levels, mid), i);
        }
    }

    #[test]
    fn test_locate_saturates() {
        let levels = build_grid(1.0, 1.0, 2, 2);
        assert_eq!(locate_index(&levels, 0.5), 0);
        assert_eq!(locate_index(&levels, -3.0), 0);
        assert_eq!(locate_index(&levels, 1.02), 3);
        assert_eq!(locate_index(&levels, 10.0), 3);
        assert_eq!(locate_index(&levels, f64::INFINITY), 3);
        assert_eq!(locate_index(&levels, f64::NAN), 0);
        assert_eq!(locate_index(&[], 1.0), 0);
        assert_eq!(locate_index(&[1.0], 1.0), 0);
    }

    #[test]
    fn test_band_bounds() {
        let grid = Grid::new(1.0, 1.0, 2, 2);
        let (lower, upper) = grid.band(3).unwrap();
        assert_relative_eq!(lower, 1.01, epsilon = 1e-12);
        assert_relative_eq!(upper, 1.02, epsilon = 1e-12);
        assert!(grid.band(4).is_none());
        assert_eq!(grid.max_index(), 3);
        assert_eq!(grid.ref_price(), 1.0);
    }

    #[test]
    fn test_rebuild_only_on_ref_change() {
        let mut grid = Grid::new(1.0, 1.0, 2, 2);
        let before = grid.clone();
        assert!(!grid.rebuild_if_moved(1.0, 2.0, 2, 2));
        assert_eq!(grid, before);

        assert!(grid.rebuild_if_moved(2.0, 1.0, 2, 2));
        assert_eq!(grid.ref_price(), 2.0);
        assert_relative_eq!(grid.levels()[2], 2.0, epsilon = 1e-12);
        assert!(!grid.rebuild_if_moved(2.0, 1.0, 2, 2));
    }
}
