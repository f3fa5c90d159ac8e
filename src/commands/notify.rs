//! Test-notify command implementation

use anyhow::{Context, Result};
use gridwatch::notifier::{Notifier, TelegramNotifier};
use gridwatch::Config;
use tracing::info;

pub fn run(config_path: String, message: Option<String>) -> Result<()> {
    dotenv::dotenv().ok();

    let config = Config::load_or_default(&config_path)?;
    // no log fallback here: a missing token must fail the command
    let notifier = TelegramNotifier::from_config(&config.notify)
        .context("Cannot send a test notification")?;
    let text = message.unwrap_or_else(|| {
        format!("✅ gridwatch test message ({})", config.market.symbol)
    });

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(notifier.send(&text))?;
    info!("Test notification delivered via {}", notifier.name());
    Ok(())
}
