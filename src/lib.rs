//! Grid Watch
//!
//! Single-instrument position monitor: tracks a held position against a
//! price grid and a protective stop line, adapts the grid step to volatility
//! (ATR), and announces boundary crossings with per-key cooldowns. State is
//! persisted every cycle for external readers and for restart recovery.

pub mod alert;
pub mod config;
pub mod error;
pub mod feed;
pub mod grid;
pub mod indicators;
pub mod monitor;
pub mod notifier;
pub mod registry;
pub mod risk;
pub mod state_manager;
pub mod types;
pub mod volatility;

pub use config::Config;
pub use error::{MonitorError, MonitorResult};
pub use monitor::{MonitorLoop, WorkerStatus};
pub use registry::Registry;
pub use types::*;
