//! hnsearch CLI - Incremental semantic search over the Hacker News archive
//!
//! # Usage
//!
//! ```bash
//! # Ingest pending incremental files into the index
//! hnsearch ingest
//!
//! # Force a full main-index rebuild
//! hnsearch ingest --rebuild
//!
//! # Semantic search
//! hnsearch search "advice for first-time founders" --limit 20
//! hnsearch search "rust async runtime" --type story
//!
//! # Show index and corpus state
//! hnsearch status
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;
mod progress;

/// hnsearch - semantic search over the Hacker News archive
#[derive(Parser, Debug)]
#[command(name = "hnsearch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOptions,
}

/// Global options available to all commands
#[derive(Args, Debug, Clone)]
struct GlobalOptions {
    /// Working directory holding the corpus, mirror, and embeddings
    #[arg(long, short = 'd', global = true, env = "HNSEARCH_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Path to configuration file
    #[arg(long, short = 'c', global = true, env = "HNSEARCH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    quiet: bool,
}

impl GlobalOptions {
    /// Load configuration and apply the global overrides.
    fn load_config(&self) -> Result<hnsearch_config::SearchConfig> {
        let config = hnsearch_config::SearchConfig::load(self.config.as_deref())?;
        Ok(config.with_overrides(hnsearch_config::ConfigOverrides {
            data_dir: self.data_dir.clone(),
            ..Default::default()
        }))
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest pending incremental files into the search index
    Ingest(commands::ingest::IngestArgs),

    /// Semantic search over the indexed corpus
    Search(commands::search::SearchArgs),

    /// Show index, corpus, and mirror state
    Status(commands::status::StatusArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = if cli.global.quiet {
        Level::ERROR
    } else if cli.global.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Ingest(args) => commands::ingest::execute(args, cli.global),
        Commands::Search(args) => commands::search::execute(args, cli.global),
        Commands::Status(args) => commands::status::execute(args, cli.global),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_defaults() {
        let cli = Cli::try_parse_from(["hnsearch", "search", "rust async"]).unwrap();
        match cli.command {
            Commands::Search(args) => {
                assert_eq!(args.query, "rust async");
                assert_eq!(args.limit, 10);
                assert!(args.kind.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_search_type_filter_parses() {
        let cli =
            Cli::try_parse_from(["hnsearch", "search", "founders", "--type", "story"]).unwrap();
        match cli.command {
            Commands::Search(args) => {
                assert_eq!(args.kind, Some(hnsearch_core::RecordKind::Story))
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_search_rejects_unknown_type() {
        assert!(Cli::try_parse_from(["hnsearch", "search", "x", "--type", "pollopt"]).is_err());
    }

    #[test]
    fn test_ingest_flags() {
        let cli = Cli::try_parse_from([
            "hnsearch",
            "ingest",
            "--rebuild",
            "--rebuild-threshold",
            "500000",
            "--reset-checkpoint",
        ])
        .unwrap();
        match cli.command {
            Commands::Ingest(args) => {
                assert!(args.rebuild);
                assert_eq!(args.rebuild_threshold, Some(500_000));
                assert!(args.reset_checkpoint);
                assert!(!args.skip_embeddings);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_global_data_dir() {
        let cli =
            Cli::try_parse_from(["hnsearch", "status", "--data-dir", "/srv/hn"]).unwrap();
        assert_eq!(cli.global.data_dir, Some(PathBuf::from("/srv/hn")));
    }
}
