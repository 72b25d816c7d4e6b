//! Taglens CLI - tag images and videos with a neural classifier.
//!
//! Taglens walks directories of media, runs every image and sampled video
//! frame through a multi-label classifier, and keeps the labels that clear a
//! confidence threshold in a local store that can be queried afterwards.
//!
//! # Usage
//!
//! ```bash
//! # Tag everything under two roots
//! taglens tag ~/Pictures ~/Videos --threshold 0.4
//!
//! # Re-tag media that already has results
//! taglens tag ~/Pictures --force
//!
//! # Export stored tags
//! taglens query --label cat --min-score 0.5 --format jsonl
//!
//! # Fetch the configured model and its labels
//! taglens models download
//!
//! # View configuration
//! taglens config show
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod cli;
mod logging;

/// Taglens - batch media tagging with a neural classifier.
#[derive(Parser, Debug)]
#[command(name = "taglens")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true, env = "TAGLENS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Tag images and videos and store the results
    Tag(cli::tag::TagArgs),

    /// Export stored tags
    Query(cli::query::QueryArgs),

    /// Show media and tag counts per model
    Stats(cli::query::StatsArgs),

    /// Download, list and verify classifier models
    Models(cli::models::ModelsArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging isn't initialized yet, so config warnings go through eprintln.
    let config = match cli::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Warning: Failed to load config: {e}\n  \
                 Using default configuration. Check your config file with `taglens config path`."
            );
            taglens_core::Config::default()
        }
    };
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("Taglens v{}", taglens_core::VERSION);

    match cli.command {
        Commands::Tag(args) => cli::tag::execute(args, config).await,
        Commands::Query(args) => cli::query::execute(args, config).await,
        Commands::Stats(args) => cli::query::stats(args, config).await,
        Commands::Models(args) => cli::models::execute(args, config).await,
        Commands::Config(args) => cli::config::execute(args, cli.config).await,
    }
}
