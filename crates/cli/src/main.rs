//! Pubvec CLI
//!
//! Entry point for the article ingest/search pipeline. Provides commands for
//! ingesting article batches into the dual store, similarity search joined
//! back to relational detail, journal recovery, and store statistics.

mod commands;

use clap::{Parser, Subcommand};
use commands::{IngestCommand, RecoverCommand, SearchCommand, StatsCommand};
use pubvec_core::{config::AppConfig, logging, AppResult};
use std::path::PathBuf;

/// Pubvec - article embedding pipeline over a vector and a relational store
#[derive(Parser, Debug)]
#[command(name = "pubvec")]
#[command(about = "Ingest and search article embeddings", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, env = "PUBVEC_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// Embedding provider (trigram, ollama)
    #[arg(short, long, global = true, env = "PUBVEC_PROVIDER")]
    provider: Option<String>,

    /// Embedding model identifier
    #[arg(short, long, global = true, env = "PUBVEC_MODEL")]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest a batch of article records from a JSON file
    Ingest(IngestCommand),

    /// Search stored articles by similarity
    Search(SearchCommand),

    /// Replay or compensate unfinished batches from the ingest journal
    Recover(RecoverCommand),

    /// Show store sizes and journal backlog
    Stats(StatsCommand),
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    // Load base configuration from environment
    let config = AppConfig::load()?;

    // Apply CLI overrides
    let config = config.with_overrides(
        cli.config,
        cli.provider,
        cli.model,
        cli.log_level,
        cli.verbose,
        cli.no_color,
    );

    // Initialize logging with final configuration
    logging::init_logging(config.log_level.as_deref(), config.no_color)?;

    config.validate()?;

    tracing::debug!("Provider: {}", config.embedding.provider);
    tracing::debug!("Vector store: {:?}", config.vector.path);
    tracing::debug!("Relational store: {:?}", config.relational.path);

    let command_name = match &cli.command {
        Commands::Ingest(_) => "ingest",
        Commands::Search(_) => "search",
        Commands::Recover(_) => "recover",
        Commands::Stats(_) => "stats",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    let result = match cli.command {
        Commands::Ingest(cmd) => cmd.execute(&config).await,
        Commands::Search(cmd) => cmd.execute(&config).await,
        Commands::Recover(cmd) => cmd.execute(&config).await,
        Commands::Stats(cmd) => cmd.execute(&config).await,
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result
}
