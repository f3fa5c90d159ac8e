//! Configuration management
//!
//! Handles loading and parsing of the JSON configuration file. Every section
//! has documented defaults, and notification credentials are taken from the
//! environment (a `.env` file is honoured).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::MonitorError;
use crate::feed::is_valid_interval;
use crate::Symbol;

/// Main configuration structure, frozen for the lifetime of one worker
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub position: PositionConfig,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub atr: AtrConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.apply_env();
        Ok(config)
    }

    /// Load the configuration at `path`, falling back to defaults when the
    /// file does not exist yet
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::info!("No config at {}, using defaults", path.display());
            let mut config = Config::default();
            config.apply_env();
            Ok(config)
        }
    }

    /// Write the configuration as pretty JSON (credentials are never written)
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut copy = self.clone();
        copy.notify.bot_token = None;
        copy.notify.chat_id = None;
        fs::write(path, serde_json::to_string_pretty(&copy)?)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            self.notify.bot_token = Some(token);
        }
        if let Ok(chat_id) = std::env::var("TELEGRAM_CHAT_ID") {
            self.notify.chat_id = Some(chat_id);
        }
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        let invalid = |msg: &str| Err(MonitorError::InvalidConfig(msg.to_string()));

        if self.grid.step_pct.is_nan() || self.grid.step_pct <= 0.0 {
            return invalid("grid.step_pct must be > 0");
        }
        if self.grid.levels_up + self.grid.levels_down == 0 {
            return invalid("grid needs at least one level above or below the reference");
        }
        if self.grid.interval_secs == 0 {
            return invalid("grid.interval_secs must be > 0");
        }
        if self.grid.stop_from_avg_pct < 0.0 {
            return invalid("grid.stop_from_avg_pct must be >= 0");
        }
        if self.atr.length == 0 {
            return invalid("atr.length must be > 0");
        }
        if !is_valid_interval(&self.atr.interval) {
            return Err(MonitorError::InvalidConfig(format!(
                "atr.interval '{}' is not a valid candle interval",
                self.atr.interval
            )));
        }
        if self.market.endpoints.is_empty() {
            return invalid("market.endpoints must list at least one endpoint");
        }
        if self.market.symbol.as_str().is_empty() {
            return invalid("market.symbol must not be empty");
        }
        if self.market.request_timeout_secs == 0 {
            return invalid("market.request_timeout_secs must be > 0");
        }
        if self.notify.timeout_secs == 0 {
            return invalid("notify.timeout_secs must be > 0");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.grid.interval_secs)
    }
}

/// Held position the stop lines and PnL are computed against
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionConfig {
    #[serde(default)]
    pub qty: f64,
    #[serde(default)]
    pub avg_cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Fixed grid step in percent of the reference price
    pub step_pct: f64,
    pub levels_up: usize,
    pub levels_down: usize,
    /// Fixed stop distance below the average cost, in percent
    pub stop_from_avg_pct: f64,
    /// Poll interval in seconds
    pub interval_secs: u64,
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            step_pct: 0.6,
            levels_up: 8,
            levels_down: 8,
            stop_from_avg_pct: 8.0,
            interval_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AtrConfig {
    pub enabled: bool,
    pub length: usize,
    /// ATR-to-grid-step coefficient
    pub k_grid: f64,
    /// ATR multiple subtracted from the trailing high for the ATR stop
    pub n_stop: f64,
    pub refresh_secs: u64,
    pub interval: String,
}

impl Default for AtrConfig {
    fn default() -> Self {
        AtrConfig {
            enabled: true,
            length: 14,
            k_grid: 0.60,
            n_stop: 3.0,
            refresh_secs: 30,
            interval: "1m".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub symbol: Symbol,
    /// Mirror endpoints, tried in order
    pub endpoints: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        MarketConfig {
            symbol: Symbol::new("POLUSDT"),
            endpoints: vec![
                "https://api.binance.com".to_string(),
                "https://api1.binance.com".to_string(),
                "https://api2.binance.com".to_string(),
            ],
            request_timeout_secs: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        NotifyConfig {
            enabled: true,
            bot_token: None,
            chat_id: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub state_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            state_dir: PathBuf::from("state"),
        }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        self.state_dir.join("gridwatch.db")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.state_dir.join("grid_state.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.grid.levels_up, 8);
        assert_eq!(config.atr.length, 14);
        assert_eq!(config.market.endpoints.len(), 3);
        assert_eq!(config.poll_interval(), Duration::from_secs(15));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{ "position": { "qty": 1200.0, "avg_cost": 0.25 }, "atr": { "enabled": false } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.position.qty, 1200.0);
        assert!(!config.atr.enabled);
        assert_eq!(config.atr.length, 14);
        assert_eq!(config.grid.step_pct, 0.6);
        assert_eq!(config.market.symbol.as_str(), "POLUSDT");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.grid.step_pct = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.atr.interval = "2d".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.market.endpoints.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let mut config = Config::default();
        config.market.request_timeout_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(MonitorError::InvalidConfig(msg)) if msg.contains("request_timeout_secs")
        ));

        let mut config = Config::default();
        config.notify.timeout_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(MonitorError::InvalidConfig(msg)) if msg.contains("notify.timeout_secs")
        ));
    }

    #[test]
    fn test_save_omits_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.notify.bot_token = Some("secret".to_string());
        config.save(&path).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(!written.contains("secret"));
        let loaded: Config = serde_json::from_str(&written).unwrap();
        assert_eq!(loaded.grid.interval_secs, 15);
    }
}
