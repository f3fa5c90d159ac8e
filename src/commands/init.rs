//! Init-config command implementation

use anyhow::Result;
use gridwatch::Config;
use std::path::Path;
use tracing::info;

pub fn run(config_path: String, force: bool) -> Result<()> {
    let path = Path::new(&config_path);
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to overwrite",
            path.display()
        );
    }

    Config::default().save(path)?;
    info!("Wrote default configuration to {}", path.display());
    Ok(())
}
