//! Manual memory commands: save, contradict, importance and tiers.
//!
//! Saved memories and corrections live in one synthetic completed session
//! per project and are indexed into the vector service when one is
//! configured.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use mnemo_core::{MemoryTier, Observation, ObservationType, ParsedObservation};
use tracing::info;

use crate::cli::SaveCommand;
use crate::config::Config;
use crate::engine::Engine;

const TITLE_CHARS: usize = 60;

/// Save a memory by hand.
pub async fn save(cmd: SaveCommand, config: &Config) -> Result<()> {
    let project = config.resolve_project(cmd.project.as_deref());
    let engine = Engine::open(config)?;
    let observation = save_memory(&engine, &project, &cmd.text, cmd.title.as_deref()).await?;

    println!("{} Memory saved as observation #{}", "✓".green(), observation.id);
    println!("  Project: {}", observation.project.cyan());
    if let Some(title) = &observation.title {
        println!("  Title:   {}", title);
    }
    Ok(())
}

/// Record a correction and mark the original stale.
pub async fn contradict(stale_id: i64, correction: &str, config: &Config) -> Result<()> {
    let engine = Engine::open(config)?;
    let correction = record_correction(&engine, stale_id, correction).await?;

    println!("{} Memory #{} marked stale", "✓".green(), stale_id);
    println!("  Correction recorded as observation #{}", correction.id);
    Ok(())
}

pub async fn importance(id: i64, value: i64, config: &Config) -> Result<()> {
    let engine = Engine::open(config)?;
    let stored = engine
        .store
        .set_importance(id, value)
        .await
        .with_context(|| format!("Failed to set importance of observation #{id}"))?;

    println!("{} Importance of #{} set to {}", "✓".green(), id, stored);
    Ok(())
}

/// Memory tier distribution.
pub async fn tiers(project: Option<&str>, config: &Config) -> Result<()> {
    let engine = Engine::open(config)?;
    let stats = engine.store.memory_tier_stats(project).await?;
    let total: i64 = stats.values().sum();

    let scope = project.unwrap_or("all projects");
    println!("{} {}", "Memory Tiers".cyan().bold(), format!("({scope})").dimmed());
    for tier in MemoryTier::ALL {
        let count = stats.get(&tier).copied().unwrap_or(0);
        let pct = if total > 0 { count as f64 * 100.0 / total as f64 } else { 0.0 };
        println!("  {:<10} {:>6}  {:>5.1}%", tier.as_str(), count, pct);
    }
    println!("  {:<10} {:>6}", "total", total);
    Ok(())
}

async fn save_memory(engine: &Engine, project: &str, text: &str, title: Option<&str>) -> Result<Observation> {
    if text.trim().is_empty() {
        bail!("Memory text must not be empty");
    }
    let parsed = manual_observation(text, title, "Manual memory");
    let observation = store_manual(engine, project, parsed).await?;
    info!(id = observation.id, project, "Manual observation saved");
    Ok(observation)
}

async fn record_correction(engine: &Engine, stale_id: i64, correction: &str) -> Result<Observation> {
    if correction.trim().is_empty() {
        bail!("Correction must not be empty");
    }
    let Some(stale) = engine.store.get_observation(stale_id).await? else {
        bail!("Observation #{} not found", stale_id);
    };

    let parsed = manual_observation(correction, None, "Correction");
    let observation = store_manual(engine, &stale.project, parsed).await?;
    engine
        .store
        .mark_stale(stale_id, observation.id)
        .await
        .context("Failed to mark observation stale")?;

    info!(stale_id, correction_id = observation.id, project = %stale.project, "Memory contradicted");
    Ok(observation)
}

async fn store_manual(engine: &Engine, project: &str, parsed: ParsedObservation) -> Result<Observation> {
    let session = engine
        .store
        .get_or_create_manual_session(project)
        .await
        .context("Failed to open manual session")?;
    let id = engine
        .store
        .store_observation(&session.memory_session_id, project, parsed, None)
        .await
        .context("Failed to store observation")?;
    let Some(observation) = engine.store.get_observation(id).await? else {
        bail!("Observation #{} vanished after insert", id);
    };

    engine.retrieval.index_observations(std::slice::from_ref(&observation)).await;
    Ok(observation)
}

fn manual_observation(text: &str, title: Option<&str>, subtitle: &str) -> ParsedObservation {
    let title = match title {
        Some(title) => title.to_string(),
        None => default_title(text),
    };
    let mut parsed = ParsedObservation::new(ObservationType::Discovery, title).with_narrative(text);
    parsed.subtitle = Some(subtitle.to_string());
    parsed
}

/// First characters of the text, with an ellipsis when cut.
fn default_title(text: &str) -> String {
    let head: String = text.chars().take(TITLE_CHARS).collect();
    let head = head.trim();
    if text.chars().count() > TITLE_CHARS {
        format!("{head}...")
    } else {
        head.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::RecordStore;

    fn engine() -> Engine {
        let store = RecordStore::open_in_memory().unwrap();
        Engine::with_store(store, &Config::default()).unwrap()
    }

    #[test]
    fn test_default_title() {
        assert_eq!(default_title("  short note "), "short note");
        let long = "x".repeat(61);
        assert_eq!(default_title(&long), format!("{}...", "x".repeat(60)));
        assert_eq!(default_title(&"é".repeat(60)), "é".repeat(60));
    }

    #[tokio::test]
    async fn test_save_uses_manual_session() {
        let engine = engine();
        let saved = save_memory(&engine, "alpha", "Deploys go through the staging gate", None)
            .await
            .unwrap();
        assert_eq!(saved.project, "alpha");
        assert_eq!(saved.obs_type, ObservationType::Discovery);
        assert_eq!(saved.subtitle.as_deref(), Some("Manual memory"));
        assert_eq!(saved.narrative.as_deref(), Some("Deploys go through the staging gate"));

        let session = engine.store.get_session("manual-alpha").await.unwrap().unwrap();
        assert_eq!(session.memory_session_id, saved.memory_session_id);

        let again = save_memory(&engine, "alpha", "second", Some("Custom")).await.unwrap();
        assert_eq!(again.memory_session_id, saved.memory_session_id);
        assert_eq!(again.title.as_deref(), Some("Custom"));

        assert!(save_memory(&engine, "alpha", "   ", None).await.is_err());
    }

    #[tokio::test]
    async fn test_contradict_marks_original_stale() {
        let engine = engine();
        let original = save_memory(&engine, "beta", "Tokens never expire", None).await.unwrap();
        let correction = record_correction(&engine, original.id, "Tokens expire after 1h")
            .await
            .unwrap();
        assert_eq!(correction.project, "beta");
        assert_eq!(correction.subtitle.as_deref(), Some("Correction"));

        let stale = engine.store.get_observation(original.id).await.unwrap().unwrap();
        assert!(stale.is_stale);
        assert_eq!(stale.superseded_by, Some(correction.id));

        assert!(record_correction(&engine, 9999, "nope").await.is_err());
    }
}
