//! # Dataset Search CLI (`dsearch`)
//!
//! The `dsearch` binary syncs the data catalogue into the local cache,
//! runs grouped queries against the vector store, and serves the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! dsearch --config ./config/dsearch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dsearch init` | Create the data and cache directories and the session schema |
//! | `dsearch status` | Show the last snapshot and cache contents |
//! | `dsearch sync` | Fetch the catalogue and reconcile the file cache |
//! | `dsearch search "<query>"` | Run a grouped query |
//! | `dsearch results <id>` | Print a stored results session |
//! | `dsearch explain <id> <index>` | Explain why a result matched |
//! | `dsearch serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Refresh the cache, forcing a reconcile even if the catalogue is unchanged
//! dsearch sync --force
//!
//! # Sparse-only retrieval with at most 5 datasets
//! dsearch search "retail centre boundaries" --mode sparse --top-k 5
//! ```
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (default `dataset_search=info`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dataset_search::config;
use dataset_search::progress::ProgressMode;
use dataset_search::sync::{SyncOptions, SyncOutcome};
use dataset_search::{db, search, server, services, status};
use dataset_search_core::query::{QueryMode, QueryParams};

/// Dataset Search CLI: catalogue sync, grouped retrieval and result
/// explanations.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/dsearch.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "dsearch",
    about = "Dataset Search: catalogue sync and grouped retrieval over open datasets",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dsearch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory, the cache directory and the session
    /// database schema. Idempotent.
    Init,

    /// Show the persisted snapshot, derived resources and cache contents.
    Status,

    /// Fetch the catalogue and reconcile the local file cache.
    ///
    /// Does nothing when the catalogue is unchanged since the last sync,
    /// unless `--force` is given.
    Sync {
        /// Reconcile even when the snapshot is unchanged (retries failed
        /// downloads).
        #[arg(long)]
        force: bool,

        /// Progress output: `off`, `human` or `json`. Defaults to `human`
        /// on a terminal and `off` otherwise.
        #[arg(long)]
        progress: Option<ProgressMode>,
    },

    /// Run a grouped query against the vector store.
    Search {
        /// The query text.
        query: String,

        /// Maximum number of datasets to return.
        #[arg(long)]
        top_k: Option<usize>,

        /// Retrieval mode: `default` (dense), `sparse`, or `hybrid`.
        #[arg(long)]
        mode: Option<QueryMode>,

        /// Hybrid weighting in [0, 1]; only used in hybrid mode.
        #[arg(long)]
        alpha: Option<f64>,

        /// Answer with a generated summary instead of the grouped list.
        #[arg(long)]
        summarize: bool,
    },

    /// Print the grouped results of a stored session.
    Results {
        /// Results id printed by `search`.
        id: String,
    },

    /// Explain why one result of a session matched its query.
    Explain {
        /// Results id printed by `search`.
        id: String,
        /// Zero-based position in the grouped results.
        index: usize,
    },

    /// Start the HTTP server.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dataset_search=info,dataset_search_core=info".into()),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            std::fs::create_dir_all(cfg.data.cache_dir())?;
            let pool = db::connect(&cfg.data.sessions_db()).await?;
            db::run_migrations(&pool).await?;
            pool.close().await;
            println!("Initialized data directory at {}", cfg.data.dir.display());
        }
        Commands::Status => {
            status::run_status(&cfg)?;
        }
        Commands::Sync { force, progress } => {
            let engine = services::build_sync_engine(&cfg)?;
            let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();
            match engine.run(SyncOptions { force }, reporter.as_ref()).await? {
                SyncOutcome::Unchanged { fingerprint } => {
                    println!("Catalogue unchanged ({}).", fingerprint);
                }
                SyncOutcome::Reconciled {
                    items,
                    resources,
                    report,
                    ..
                } => {
                    println!(
                        "Synced {} datasets, {} resources: {} downloaded, {} notes written, {} removed, {} skipped, {} failed.",
                        items,
                        resources,
                        report.downloaded.len(),
                        report.notes_written.len(),
                        report.removed.len(),
                        report.skipped.len(),
                        report.failed.len()
                    );
                    for failed in &report.failed {
                        eprintln!("  failed: {} ({})", failed.key, failed.reason);
                    }
                }
            }
        }
        Commands::Search {
            query,
            top_k,
            mode,
            alpha,
            summarize,
        } => {
            let params = QueryParams { top_k, mode, alpha };
            search::run_search(&cfg, &query, params, summarize).await?;
        }
        Commands::Results { id } => {
            search::run_results(&cfg, &id).await?;
        }
        Commands::Explain { id, index } => {
            search::run_explain(&cfg, &id, index).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
