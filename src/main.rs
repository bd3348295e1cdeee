//! # Forum Harness CLI (`fh`)
//!
//! The `fh` binary drives the sync → analyze pipeline against a local
//! SQLite database.
//!
//! ## Usage
//!
//! ```bash
//! fh --config ./config/fh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fh init` | Create the SQLite database and run schema migrations |
//! | `fh sync` | Fetch new and changed threads from the forum |
//! | `fh analyze` | Analyze pending threads |
//! | `fh pending` | List threads waiting for analysis |
//! | `fh get <item_id>` | Show one thread with its analysis |
//! | `fh stats` | Summarize sync and analysis progress |
//! | `fh failures` | List recorded analysis failures |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use forum_harness::batch::{self, AnalyzeArgs};
use forum_harness::progress::ProgressMode;
use forum_harness::{config, failures, get, logging, migrate, stats, sync, work};

/// Forum Harness CLI: incremental forum sync and structured thread analysis.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/fh.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "fh",
    about = "Forum Harness: incremental forum sync and structured thread analysis",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/fh.toml")]
    config: PathBuf,

    /// Progress on stderr: `human`, `json`, or `off`. Defaults to human on a TTY.
    #[arg(long, global = true)]
    progress: Option<String>,

    /// Debug logging for this crate (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Fetch new and changed threads from the forum.
    ///
    /// Walks the listing from page 0 and refetches only items whose
    /// reply count, last activity, or highest post number moved.
    Sync {
        /// Walk the whole listing (change detection still skips unchanged items).
        #[arg(long)]
        full: bool,

        /// Stop after this many listing pages.
        #[arg(long)]
        pages: Option<u32>,
    },

    /// Analyze pending threads.
    ///
    /// Without `--limit`, drains all pending work.
    Analyze {
        /// Maximum number of items to attempt.
        #[arg(long)]
        limit: Option<usize>,

        /// Number of concurrent workers (overrides `batch.concurrency`).
        #[arg(long)]
        concurrency: Option<usize>,

        /// Process lowest item ids first.
        #[arg(long)]
        oldest_first: bool,

        /// Redo items that already have a current analysis.
        #[arg(long)]
        reanalyze: bool,

        /// Analyze a single item by id.
        #[arg(long, conflicts_with_all = ["limit", "concurrency", "reanalyze"])]
        item: Option<i64>,

        /// List what would be analyzed without calling the service.
        #[arg(long)]
        dry_run: bool,
    },

    /// List threads waiting for analysis.
    Pending {
        #[arg(long, default_value_t = 50)]
        limit: usize,

        #[arg(long)]
        oldest_first: bool,

        /// Include threads that already have a current analysis.
        #[arg(long)]
        all: bool,
    },

    /// Show one thread with its metadata and analysis.
    Get {
        item_id: i64,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Summarize sync and analysis progress.
    Stats,

    /// List the latest analysis failure per item.
    Failures {
        /// Only this stage: load, call, parse, save.
        #[arg(long)]
        stage: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging, cli.verbose)?;

    let progress = match cli.progress.as_deref() {
        Some(s) => ProgressMode::parse(s).ok_or_else(|| {
            anyhow::anyhow!("Unknown progress mode: '{}'. Must be human, json, or off.", s)
        })?,
        None => ProgressMode::default_for_tty(),
    };

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync { full, pages } => {
            sync::run_sync(&cfg, full, pages, progress).await?;
        }
        Commands::Analyze {
            limit,
            concurrency,
            oldest_first,
            reanalyze,
            item,
            dry_run,
        } => {
            let args = AnalyzeArgs {
                limit,
                concurrency,
                oldest_first,
                reanalyze,
                item,
                dry_run,
            };
            batch::run_analyze(&cfg, args, progress).await?;
        }
        Commands::Pending {
            limit,
            oldest_first,
            all,
        } => {
            work::run_pending(&cfg, limit, oldest_first, all).await?;
        }
        Commands::Get { item_id, json } => {
            get::run_get(&cfg, item_id, json).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Failures { stage, limit } => {
            failures::run_failures(&cfg, stage.as_deref(), limit).await?;
        }
    }

    Ok(())
}
