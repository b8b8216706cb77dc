//! # Cirrus Indexer CLI (`cirrus`)
//!
//! Loads a CirrusSearch dump into Elasticsearch with the Korean nori
//! analyzer and queries it.
//!
//! ## Usage
//!
//! ```bash
//! cirrus --config ./config/cirrus.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cirrus status` | Check the connection and whether the index has data |
//! | `cirrus init` | Create the index (or `--recreate` it) |
//! | `cirrus ingest <dump>` | Stream a `.json.gz` dump into the index |
//! | `cirrus search "<query>"` | Ranked BM25 search |
//! | `cirrus stats` | Document count and store size |
//! | `cirrus sample` | Show a few indexed documents |
//!
//! ## Examples
//!
//! ```bash
//! # First 10,000 articles into a fresh index
//! cirrus ingest kowiki-20250922-cirrussearch-content.json.gz --limit 10000 --recreate
//!
//! # The whole dump, more documents per bulk request
//! cirrus ingest kowiki-20250922-cirrussearch-content.json.gz --all --batch-size 1000
//!
//! cirrus search "조선 왕조" --size 10
//! ```
//!
//! Logs go to stderr and honor `RUST_LOG` (default `cirrus_indexer=info`).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use cirrus_indexer::cancel::CancelFlag;
use cirrus_indexer::progress::ProgressMode;
use cirrus_indexer::{config, ingest, schema, search, stats};

/// Cirrus Indexer: CirrusSearch dump → Elasticsearch (Korean nori analysis).
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cirrus.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cirrus",
    about = "Load a CirrusSearch dump into Elasticsearch with Korean analysis and search it",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cirrus.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the connection and report whether the index exists and has data.
    Status,

    /// Create the index with the nori analyzer and BM25 similarity.
    ///
    /// Keeps an existing index unless `--recreate` is given.
    Init {
        /// Delete the index first. Existing documents are lost.
        #[arg(long)]
        recreate: bool,
    },

    /// Stream a gzip CirrusSearch dump into the index.
    ///
    /// Rejected documents are counted and reported; they do not stop the
    /// run. Ctrl-C stops at the next batch boundary.
    Ingest {
        /// Path to the `.json.gz` dump.
        dump: PathBuf,

        /// Maximum number of records to ingest. Overrides `ingest.limit`.
        #[arg(long, conflicts_with = "all", value_parser = parse_positive)]
        limit: Option<usize>,

        /// Ingest the whole dump, ignoring `ingest.limit`.
        #[arg(long)]
        all: bool,

        /// Documents per bulk request. Overrides `ingest.batch_size`.
        #[arg(long, value_parser = parse_positive)]
        batch_size: Option<usize>,

        /// Delete and recreate the index before ingesting.
        #[arg(long)]
        recreate: bool,
    },

    /// Ranked free-text search over title, opening text, and body.
    Search {
        query: String,

        /// Number of hits. Overrides `search.size`.
        #[arg(long, value_parser = parse_positive)]
        size: Option<usize>,
    },

    /// Document count and store size of the index.
    Stats,

    /// Show a few indexed documents.
    Sample {
        #[arg(long, default_value_t = 3, value_parser = parse_positive)]
        count: usize,
    },
}

/// Counts and sizes on the command line start at 1; use `--all` for no limit.
fn parse_positive(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("invalid number '{}': {}", s, e)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cirrus_indexer=info,cirrus=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Status => {
            stats::run_status(&cfg).await?;
        }
        Commands::Init { recreate } => {
            schema::run_init(&cfg, recreate).await?;
        }
        Commands::Ingest {
            dump,
            limit,
            all,
            batch_size,
            recreate,
        } => {
            let limit = if all { None } else { limit.or(cfg.ingest.limit) };
            let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

            let cancel = CancelFlag::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, stopping after the current batch");
                    on_signal.cancel();
                }
            });

            ingest::run_ingest(&cfg, &dump, limit, batch_size, recreate, progress, cancel)
                .await?;
        }
        Commands::Search { query, size } => {
            search::run_search(&cfg, &query, size).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Sample { count } => {
            search::run_sample(&cfg, count).await?;
        }
    }

    Ok(())
}
