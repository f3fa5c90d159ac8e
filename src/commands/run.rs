//! Run command implementation

use anyhow::{Context, Result};
use gridwatch::registry::{ConfigFileSource, Registry};
use gridwatch::{Config, WorkerStatus};
use std::sync::Arc;
use tracing::{error, info, warn};

pub fn run(config_path: String) -> Result<()> {
    dotenv::dotenv().ok();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_async(config_path))
}

async fn run_async(config_path: String) -> Result<()> {
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;
    config.validate()?;

    info!("Symbol:   {}", config.market.symbol);
    info!(
        "Position: qty {} @ avg {}",
        config.position.qty, config.position.avg_cost
    );
    info!(
        "Grid:     {}% x {}/{} levels, stop {}% below avg, every {}s",
        config.grid.step_pct,
        config.grid.levels_up,
        config.grid.levels_down,
        config.grid.stop_from_avg_pct,
        config.grid.interval_secs
    );
    if config.atr.enabled {
        info!(
            "ATR:      len {} on {} candles, k_grid {}, n_stop {}, refresh {}s",
            config.atr.length,
            config.atr.interval,
            config.atr.k_grid,
            config.atr.n_stop,
            config.atr.refresh_secs
        );
    }

    let registry = Registry::new(Arc::new(ConfigFileSource::new(&config_path)));
    registry.start()?;
    let mut status = registry
        .subscribe()
        .context("Worker status unavailable after start")?;

    let stopped_on_its_own = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Received Ctrl+C, stopping monitor..."),
                Err(e) => error!("Error setting up signal handler: {}", e),
            }
            false
        }
        _ = status.wait_for(|s| *s == WorkerStatus::Stopped) => true,
    };

    registry.stop().await?;

    if stopped_on_its_own {
        warn!("Monitor worker stopped without a stop request");
        anyhow::bail!("Monitor worker stopped; check the log for the startup error");
    }

    info!("Shutdown complete");
    Ok(())
}
