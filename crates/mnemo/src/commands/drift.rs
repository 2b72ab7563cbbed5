//! Concept drift report.

use anyhow::Result;
use colored::Colorize;
use mnemo_core::render_table;

use crate::config::Config;
use crate::engine::Engine;

pub async fn execute(project: Option<&str>, json: bool, config: &Config) -> Result<()> {
    let engine = Engine::open(config)?;
    let report = engine.drift.detect(project).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let marker = if report.clusters.is_empty() { "✓".green() } else { "⚠".yellow() };
    print!("{} {}", marker, render_table(&report));
    Ok(())
}
