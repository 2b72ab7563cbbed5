//! CLI argument definitions using clap derive macros.

use clap::{Args, Parser, Subcommand, ValueEnum};
use mnemo_core::CycleType;

/// Session memory engine
///
/// Consolidates observations of assistant sessions while idle and serves
/// them back through hybrid search.
#[derive(Parser, Debug)]
#[command(name = "mnemo")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the consolidation scheduler until Ctrl-C
    Serve,

    /// Force a sleep cycle
    Cycle(CycleCommand),

    /// Recent sleep cycles, newest first
    History {
        /// Number of cycles to show
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Cycle totals and memory tier distribution
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Search observations, summaries and prompts
    Search(SearchCommand),

    /// Report concept clusters that look stale or abandoned
    Drift {
        /// Restrict to one project
        #[arg(short, long)]
        project: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Memory tier distribution
    Tiers {
        /// Restrict to one project
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Save a memory by hand
    Save(SaveCommand),

    /// Record a correction and mark the original observation stale
    Contradict {
        /// Observation that is wrong
        id: i64,
        /// What is actually true
        correction: String,
    },

    /// Set the importance of an observation
    Importance {
        /// Observation ID
        id: i64,
        /// New importance
        #[arg(value_parser = clap::value_parser!(i64).range(1..=10))]
        value: i64,
    },

    /// Show version information
    Version,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    Light,
    Deep,
    Manual,
}

impl From<CycleKind> for CycleType {
    fn from(kind: CycleKind) -> Self {
        match kind {
            CycleKind::Light => CycleType::Light,
            CycleKind::Deep => CycleType::Deep,
            CycleKind::Manual => CycleType::Manual,
        }
    }
}

#[derive(Args, Debug)]
pub struct CycleCommand {
    /// Cycle type
    #[arg(value_enum, default_value = "manual")]
    pub kind: CycleKind,

    /// Report what would change without writing
    #[arg(long)]
    pub dry_run: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct SearchCommand {
    /// Query text; omit to list by filters only
    pub query: Option<String>,

    /// Filter by project
    #[arg(short, long)]
    pub project: Option<String>,

    /// Filter by observation type (comma-separated)
    #[arg(short = 't', long = "type", value_delimiter = ',')]
    pub types: Vec<String>,

    /// Filter by concept
    #[arg(long)]
    pub concept: Option<String>,

    /// Filter by file path substring
    #[arg(long)]
    pub file: Option<String>,

    /// Maximum results
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct SaveCommand {
    /// Memory text
    pub text: String,

    /// Title (defaults to the start of the text)
    #[arg(short, long)]
    pub title: Option<String>,

    /// Project (defaults to the configured project or current directory)
    #[arg(short, long)]
    pub project: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_search_types_are_comma_separated() {
        let cli = Cli::try_parse_from(["mnemo", "search", "auth", "--type", "bugfix,decision", "-l", "5"]).unwrap();
        match cli.command {
            Commands::Search(cmd) => {
                assert_eq!(cmd.query.as_deref(), Some("auth"));
                assert_eq!(cmd.types, vec!["bugfix", "decision"]);
                assert_eq!(cmd.limit, Some(5));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cycle_kind_and_dry_run() {
        let cli = Cli::try_parse_from(["mnemo", "cycle", "deep", "--dry-run"]).unwrap();
        match cli.command {
            Commands::Cycle(cmd) => {
                assert_eq!(CycleType::from(cmd.kind), CycleType::Deep);
                assert!(cmd.dry_run);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_importance_range_is_enforced() {
        assert!(Cli::try_parse_from(["mnemo", "importance", "3", "11"]).is_err());
        assert!(Cli::try_parse_from(["mnemo", "importance", "3", "10"]).is_ok());
    }
}
