//! Consolidation daemon.

use anyhow::Result;
use colored::Colorize;
use tracing::info;

use crate::config::Config;
use crate::engine::Engine;

pub async fn execute(config: &Config) -> Result<()> {
    info!("mnemo v{}", env!("CARGO_PKG_VERSION"));

    let engine = Engine::open(config)?;
    let scheduler = engine.scheduler;
    let idle = config.engine.idle.clone();

    scheduler.start().await;
    println!(
        "{} Scheduler running on {} (light after {}s, deep after {}s idle)",
        "✓".green(),
        config.database_path().display(),
        idle.light_sleep_after_ms / 1000,
        idle.deep_sleep_after_ms / 1000
    );
    if !idle.enabled {
        println!("{} Idle detection disabled; only forced cycles will run", "⚠".yellow());
    }

    // Keep running
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    scheduler.stop().await;

    Ok(())
}
