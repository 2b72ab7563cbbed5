//! Forced sleep cycles and cycle history.

use anyhow::{bail, Result};
use chrono::{DateTime, Local};
use colored::Colorize;
use mnemo_core::{CycleStatus, CycleSummary, CycleType, RunOptions, SleepCycleRecord};

use crate::cli::CycleCommand;
use crate::config::Config;
use crate::engine::Engine;

pub async fn execute(cmd: CycleCommand, config: &Config) -> Result<()> {
    let engine = Engine::open(config)?;
    let options = RunOptions { dry_run: cmd.dry_run };
    let summary = engine.scheduler.run_cycle(CycleType::from(cmd.kind), options).await?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    if let Some(error) = summary.error {
        bail!("Cycle {} failed: {}", summary.cycle_id, error);
    }
    Ok(())
}

fn print_summary(summary: &CycleSummary) {
    let marker = if summary.succeeded() { "✓".green() } else { "✗".red() };
    let mode = if summary.dry_run { " (dry run)".yellow().to_string() } else { String::new() };
    println!(
        "{} {} cycle #{} finished in {}ms{}",
        marker,
        summary.cycle_type,
        summary.cycle_id,
        summary.duration_ms,
        mode
    );
    println!("  Processed:      {}", summary.counts.observations_processed);
    println!("  Supersessions:  {}", summary.counts.supersessions_detected);
    println!("  Chains:         {}", summary.counts.chains_consolidated);
    println!("  Deprecated:     {}", summary.counts.memories_deprecated);

    let tiers: Vec<String> = summary
        .by_priority_tier
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(tier, count)| format!("{}={}", tier.as_str(), count))
        .collect();
    if !tiers.is_empty() {
        println!("  By priority:    {}", tiers.join(", "));
    }
    if summary.memory_tier_updates > 0 {
        println!("  Tier changes:   {}", summary.memory_tier_updates);
    }
    if !summary.recorded {
        println!("  {} History row was not updated with this outcome", "⚠".yellow());
    }
}

pub async fn history(limit: usize, json: bool, config: &Config) -> Result<()> {
    let engine = Engine::open(config)?;
    let records = engine.scheduler.history(limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("{} No sleep cycles recorded yet", "⚠".yellow());
        return Ok(());
    }

    println!("{}", "Sleep Cycles".cyan().bold());
    println!("{}", "─".repeat(72));
    for record in &records {
        print_record(record);
    }
    Ok(())
}

fn print_record(record: &SleepCycleRecord) {
    let status = match record.status {
        CycleStatus::Completed => record.status.as_str().green(),
        CycleStatus::Failed => record.status.as_str().red(),
        CycleStatus::Running => record.status.as_str().yellow(),
    };
    let duration = record
        .duration_ms
        .map(|ms| format!("{ms}ms"))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  #{:<5} {:<7} {:<10} {}  {:>8}  processed={} superseded={} chains={} deprecated={}",
        record.id,
        record.cycle_type.as_str(),
        status,
        format_epoch(record.started_at_epoch),
        duration,
        record.observations_processed,
        record.supersessions_detected,
        record.chains_consolidated,
        record.memories_deprecated
    );
    if let Some(error) = &record.error_message {
        println!("         {}", error.red());
    }
}

/// Local time of an epoch-millisecond timestamp.
pub fn format_epoch(epoch_ms: i64) -> String {
    DateTime::from_timestamp_millis(epoch_ms)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| epoch_ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_epoch() {
        assert_eq!(format_epoch(i64::MAX), i64::MAX.to_string());
        assert_eq!(format_epoch(0).len(), "1970-01-01 00:00:00".len());
    }
}
