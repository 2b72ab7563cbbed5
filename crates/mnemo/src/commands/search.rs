//! Hybrid memory search.

use anyhow::{bail, Result};
use colored::Colorize;
use mnemo_core::{Observation, ObservationType, SearchQuery, SearchResponse};

use super::cycle::format_epoch;
use crate::cli::SearchCommand;
use crate::config::Config;
use crate::engine::Engine;

pub async fn execute(cmd: SearchCommand, config: &Config) -> Result<()> {
    let query = build_query(&cmd)?;
    let engine = Engine::open(config)?;
    let response = engine.retrieval.search(&query).await?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    print_response(&response);
    Ok(())
}

fn build_query(cmd: &SearchCommand) -> Result<SearchQuery> {
    let types = parse_types(&cmd.types)?;
    Ok(SearchQuery {
        text: cmd.query.clone(),
        project: cmd.project.clone(),
        types,
        concept: cmd.concept.clone(),
        file: cmd.file.clone(),
        limit: cmd.limit,
        ..Default::default()
    })
}

fn parse_types(raw: &[String]) -> Result<Vec<ObservationType>> {
    raw.iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .map(|s| match ObservationType::from_str(&s) {
            Some(t) => Ok(t),
            None => bail!("Invalid observation type: {}", s),
        })
        .collect()
}

fn print_response(response: &SearchResponse) {
    if response.fell_back {
        println!(
            "{} Search backends unavailable, results from {}",
            "⚠".yellow(),
            response.strategy
        );
    }

    if response.is_empty() {
        println!("{} No memories found", "⚠".yellow());
        return;
    }

    println!(
        "{} {} observations, {} summaries, {} prompts via {}",
        "✓".green(),
        response.observations.len(),
        response.sessions.len(),
        response.prompts.len(),
        response.strategy.cyan()
    );
    println!();

    for observation in &response.observations {
        print_observation(observation);
    }

    if !response.sessions.is_empty() {
        println!("{}", "Session Summaries".cyan().bold());
        for summary in &response.sessions {
            let request = summary.request.as_deref().unwrap_or("(no request)");
            println!("  [S{}] {} {}", summary.id, request, format_epoch(summary.created_at_epoch).dimmed());
            if let Some(learned) = &summary.learned {
                println!("        {}", learned.dimmed());
            }
        }
        println!();
    }

    if !response.prompts.is_empty() {
        println!("{}", "Prompts".cyan().bold());
        for prompt in &response.prompts {
            println!("  [P{}] #{} {}", prompt.id, prompt.prompt_number, prompt.prompt_text);
        }
        println!();
    }
}

fn print_observation(observation: &Observation) {
    let title = observation.title.as_deref().unwrap_or("(untitled)");
    let mut line = format!(
        "  [{}] {} {} {}",
        observation.id,
        format!("({})", observation.obs_type.as_str()).cyan(),
        title.bold(),
        observation.project.dimmed()
    );
    if observation.is_stale {
        line.push_str(&format!(" {}", "stale".red()));
    }
    if observation.superseded_by.is_some() {
        line.push_str(&format!(" {}", "superseded".yellow()));
    }
    println!("{line}");

    if let Some(subtitle) = &observation.subtitle {
        println!("        {}", subtitle);
    }
    if !observation.concepts.is_empty() {
        println!("        concepts: {}", observation.concepts.join(", ").dimmed());
    }
    println!(
        "        {} · tier {} · importance {}",
        format_epoch(observation.created_at_epoch).dimmed(),
        observation.memory_tier.as_str(),
        observation.importance
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(types: &[&str]) -> SearchCommand {
        SearchCommand {
            query: Some("token refresh".into()),
            project: Some("alpha".into()),
            types: types.iter().map(|s| s.to_string()).collect(),
            concept: None,
            file: None,
            limit: Some(5),
            json: false,
        }
    }

    #[test]
    fn test_build_query() {
        let query = build_query(&command(&["Bugfix", " decision "])).unwrap();
        assert_eq!(query.query_text(), Some("token refresh"));
        assert_eq!(query.project.as_deref(), Some("alpha"));
        assert_eq!(query.types, vec![ObservationType::Bugfix, ObservationType::Decision]);
        assert_eq!(query.effective_limit(), 5);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(build_query(&command(&["bogus"])).is_err());
    }
}
