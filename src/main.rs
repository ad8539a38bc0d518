//! # Vault Index CLI (`vidx`)
//!
//! The `vidx` binary builds and queries the index of a note vault.
//!
//! ## Usage
//!
//! ```bash
//! vidx --config ./config/vidx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vidx init` | Create the SQLite database and run schema migrations |
//! | `vidx index` | Reconcile the index with the vault |
//! | `vidx search "<query>"` | Ranked, budget-limited retrieval |
//! | `vidx watch` | Reindex continuously as files change |
//! | `vidx stats` | Show index statistics |
//!
//! Logging goes to stderr and is controlled by `VIDX_LOG`
//! (e.g. `VIDX_LOG=vault_index=debug`).

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use vault_index::progress::ProgressMode;
use vault_index::{config, migrate, reindex, retrieve, stats, watch};

/// Vault Index: incremental chunk and embedding index over a note vault.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "vidx",
    about = "Vault Index — incremental chunk and embedding index over a note vault",
    version,
    long_about = "Vault Index keeps a chunk and embedding index consistent with a vault of \
    plain text notes, and answers queries with composite-scored, token-budgeted results. \
    Without a reachable embedding provider it falls back to keyword matching."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/vidx.toml`.
    #[arg(long, global = true, default_value = "./config/vidx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Reconcile the index with the vault.
    ///
    /// Only new and changed documents are chunked and embedded; documents
    /// that disappeared from the vault are removed.
    Index {
        /// Re-chunk and re-embed every document, even unchanged ones.
        /// Required after switching embedding models.
        #[arg(long)]
        full: bool,

        /// Never call the embedding provider; store chunks without vectors.
        #[arg(long)]
        lite: bool,

        /// Progress output on stderr. Defaults to `human` on a terminal,
        /// `off` otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Retrieve ranked results for a query.
    Search {
        /// The query text.
        query: String,

        /// Maximum number of results (overrides `retrieval.max_results`).
        #[arg(long)]
        limit: Option<usize>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Watch the vault and reindex changed files until interrupted.
    Watch,

    /// Show index statistics.
    Stats,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Human,
    Json,
    Off,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
            ProgressArg::Off => ProgressMode::Off,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("VIDX_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Index {
            full,
            lite,
            progress,
        } => {
            let mode = progress
                .map(ProgressMode::from)
                .unwrap_or_else(ProgressMode::default_for_tty);
            reindex::run_index(&cfg, full, lite, mode).await?;
        }
        Commands::Search { query, limit, json } => {
            retrieve::run_search(&cfg, &query, limit, json).await?;
        }
        Commands::Watch => {
            watch::run_watch(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
