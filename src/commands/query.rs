//! Read-only views over the state record

use anyhow::{Context, Result};
use gridwatch::state_manager::SqliteStateManager;
use gridwatch::Config;

fn open_record(config_path: &str) -> Result<SqliteStateManager> {
    let config = Config::load_or_default(config_path)?;
    let db_path = config.storage.db_path();
    SqliteStateManager::open(&db_path)
        .with_context(|| format!("Failed to open state record {}", db_path.display()))
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|v| format!("{:.6}", v)).unwrap_or_else(|| "-".to_string())
}

pub fn state(config_path: String, json: bool) -> Result<()> {
    let record = open_record(&config_path)?;
    let state = record.load_state()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    println!("running:        {}", state.running);
    println!("ref price:      {}", fmt_opt(state.ref_price));
    println!("trailing high:  {}", fmt_opt(state.trailing_high));
    println!(
        "grid index:     {}",
        state
            .last_level_idx
            .map(|i| i.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!(
        "grid step:      {}",
        state
            .eff_grid_step
            .map(|s| format!("{:.2}%", s))
            .unwrap_or_else(|| "-".to_string())
    );
    println!("atr:            {}", fmt_opt(state.atr));
    println!("atr stop:       {}", fmt_opt(state.atr_trailing_stop));
    println!("stop line:      {}", fmt_opt(state.stop_line));
    if let Some(kind) = state.last_kind {
        println!(
            "last alert:     [{}] price {} pnl {}",
            kind,
            fmt_opt(state.last_price),
            state
                .last_pnl_pct
                .map(|p| format!("{:.2}%", p))
                .unwrap_or_else(|| "-".to_string())
        );
    }
    if let Some(updated_at) = state.updated_at {
        println!("updated:        {}", updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    Ok(())
}

pub fn signals(config_path: String, limit: usize, json: bool) -> Result<()> {
    let record = open_record(&config_path)?;
    let signals = record.recent_signals(limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&signals)?);
        return Ok(());
    }

    if signals.is_empty() {
        println!("No signals recorded");
        return Ok(());
    }

    for signal in &signals {
        println!(
            "{} [{}] price {} pnl {}",
            signal.created_at.format("%Y-%m-%d %H:%M:%S"),
            signal.kind,
            fmt_opt(signal.price),
            signal
                .pnl_pct
                .map(|p| format!("{:.2}%", p))
                .unwrap_or_else(|| "-".to_string())
        );
        for line in signal.message.lines() {
            println!("    {}", line);
        }
    }
    Ok(())
}
