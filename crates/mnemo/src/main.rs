//! mnemo - Session Memory CLI
//!
//! Runs the consolidation daemon and queries the memory store of
//! coding-assistant sessions.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cli;
mod commands;
mod config;
mod engine;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let filter = EnvFilter::from_default_env()
        .add_directive("mnemo=info".parse()?)
        .add_directive("mnemo_core=info".parse()?);
    let json_logs = std::env::var("MNEMO_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }

    let cli = Cli::parse();

    // Load configuration
    let config = config::Config::load()?;

    // Execute command
    match cli.command {
        Commands::Serve => commands::serve::execute(&config).await,
        Commands::Cycle(cmd) => commands::cycle::execute(cmd, &config).await,
        Commands::History { limit, json } => commands::cycle::history(limit, json, &config).await,
        Commands::Status { json } => commands::status::execute(json, &config).await,
        Commands::Search(cmd) => commands::search::execute(cmd, &config).await,
        Commands::Drift { project, json } => commands::drift::execute(project.as_deref(), json, &config).await,
        Commands::Tiers { project } => commands::memory::tiers(project.as_deref(), &config).await,
        Commands::Save(cmd) => commands::memory::save(cmd, &config).await,
        Commands::Contradict { id, correction } => commands::memory::contradict(id, &correction, &config).await,
        Commands::Importance { id, value } => commands::memory::importance(id, value, &config).await,
        Commands::Version => {
            println!("mnemo {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
