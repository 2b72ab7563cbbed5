//! Memory status dashboard.
//!
//! Cycle totals, the last recorded cycle and the memory tier distribution.
//! Supports JSON output for programmatic use.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use mnemo_core::store::CycleTotals;
use mnemo_core::{CycleStatus, MemoryTier, SleepCycleRecord};
use serde::{Deserialize, Serialize};

use super::cycle::format_epoch;
use crate::config::Config;
use crate::engine::Engine;

/// Full status for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStatus {
    pub timestamp: String,
    pub database: String,
    pub full_text_search: bool,
    pub vector_service: Option<String>,
    pub idle_detection: bool,
    pub totals: CycleTotals,
    pub last_cycle: Option<SleepCycleRecord>,
    pub memory_tiers: BTreeMap<MemoryTier, i64>,
}

pub async fn execute(json: bool, config: &Config) -> Result<()> {
    let status = gather_status(config).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_dashboard(&status);
    }

    Ok(())
}

async fn gather_status(config: &Config) -> Result<MemoryStatus> {
    let engine = Engine::open(config)?;
    let store = &engine.store;

    Ok(MemoryStatus {
        timestamp: Utc::now().to_rfc3339(),
        database: config.database_path().display().to_string(),
        full_text_search: store.fts_available(),
        vector_service: config.vector.url.clone(),
        idle_detection: config.engine.idle.enabled,
        totals: store.cycle_totals().await?,
        last_cycle: store.last_cycle().await?,
        memory_tiers: store.memory_tier_stats(None).await?,
    })
}

fn print_dashboard(status: &MemoryStatus) {
    println!();
    println!("{}", "mnemo Memory Status".cyan().bold());
    println!("{}", "─".repeat(48));

    println!("  {} {}", "Database:".cyan().bold(), status.database);
    let fts = if status.full_text_search { "available".green() } else { "unavailable".yellow() };
    println!("  {} {}", "Keyword index:".cyan().bold(), fts);
    match &status.vector_service {
        Some(url) => println!("  {} {}", "Vector service:".cyan().bold(), url),
        None => println!("  {} {}", "Vector service:".cyan().bold(), "not configured".dimmed()),
    }
    let idle = if status.idle_detection { "enabled".green() } else { "disabled".yellow() };
    println!("  {} {}", "Idle detection:".cyan().bold(), idle);
    println!();

    println!("  {}", "Sleep Cycles".cyan().bold());
    println!("    Completed:     {}", status.totals.total_cycles);
    println!("    Supersessions: {}", status.totals.total_supersessions);
    println!("    Deprecated:    {}", status.totals.total_deprecated);
    match &status.last_cycle {
        Some(cycle) => {
            let state = match cycle.status {
                CycleStatus::Completed => cycle.status.as_str().green(),
                CycleStatus::Failed => cycle.status.as_str().red(),
                CycleStatus::Running => cycle.status.as_str().yellow(),
            };
            println!(
                "    Last:          #{} {} {} at {}",
                cycle.id,
                cycle.cycle_type,
                state,
                format_epoch(cycle.started_at_epoch)
            );
        }
        None => println!("    Last:          {}", "none".dimmed()),
    }
    println!();

    println!("  {}", "Memory Tiers".cyan().bold());
    for tier in MemoryTier::ALL {
        let count = status.memory_tiers.get(&tier).copied().unwrap_or(0);
        println!("    {:<10} {}", tier.as_str(), count);
    }
    println!();
}
