//! # cfr-ledger CLI (`cfr`)
//!
//! The `cfr` binary initializes the ledger database, runs imports from the
//! eCFR API, and prints read-only listings of what has been imported.
//!
//! ## Usage
//!
//! ```bash
//! cfr --config ./config/cfr.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cfr init` | Create the SQLite database and run schema migrations |
//! | `cfr import` | Import titles and agencies as of a date (default today) |
//! | `cfr titles` | List current titles with density scores |
//! | `cfr agencies` | List agencies with aggregates and density scores |
//! | `cfr history title <n>` | Snapshot history of one title |
//! | `cfr history agency <slug>` | Snapshot history of one agency |
//! | `cfr stats` | Latest system metrics |
//!
//! ## Examples
//!
//! ```bash
//! # Import everything as of a past date
//! cfr import --date 2024-01-01
//!
//! # Re-import a single title
//! cfr import --title 40 --date 2020-01-01
//!
//! # Walk every historical version of every title (slow)
//! cfr import --all-history
//!
//! # Densest titles first
//! cfr titles --sort density --desc
//! ```
//!
//! Exit status is 1 when any title or agency failed or the run was
//! interrupted with Ctrl-C; the summary is printed either way.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::{info, warn};

use cfr_ledger::cancel::Cancellation;
use cfr_ledger::client::{Endpoints, FetchClient, RetryPolicy};
use cfr_ledger::config::{self, Config};
use cfr_ledger::import::{Importer, RunStatus};
use cfr_ledger::sqlite_store::SqliteStore;
use cfr_ledger::transport::HttpTransport;
use cfr_ledger::{db, migrate, report};
use cfr_ledger_core::store::Store;
use cfr_ledger_core::views::{AgencySortKey, SortDirection, TitleSortKey};

/// cfr-ledger: ingest eCFR titles and agencies into a snapshot ledger.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cfr.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cfr",
    about = "cfr-ledger: ingest eCFR titles and agencies into a change-keyed snapshot ledger",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cfr.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Import titles and agencies from the eCFR API.
    ///
    /// Fetches every title as of `--date`, records word and section counts,
    /// snapshots anything that changed, then rebuilds the agency hierarchy
    /// and its rolled-up aggregates.
    Import {
        /// Snapshot date (YYYY-MM-DD). Defaults to today.
        #[arg(long, short = 'd')]
        date: Option<NaiveDate>,

        /// Import only this title number. Agencies are not refreshed.
        #[arg(long, short = 't')]
        title: Option<i64>,

        /// Import every historical version of every title.
        #[arg(long, conflicts_with_all = ["title", "date"])]
        all_history: bool,
    },

    /// List current titles.
    Titles {
        /// Sort key: number, name, words, sections, density.
        #[arg(long, default_value = "number")]
        sort: TitleSortKey,

        /// Sort descending.
        #[arg(long)]
        desc: bool,
    },

    /// List agencies with their rolled-up aggregates.
    Agencies {
        /// Sort key: tree, name, words, titles, density.
        #[arg(long, default_value = "tree")]
        sort: AgencySortKey,

        /// Sort descending.
        #[arg(long)]
        desc: bool,
    },

    /// Show the snapshot history of a title or agency.
    History {
        #[command(subcommand)]
        target: HistoryTarget,
    },

    /// Show the latest system metrics.
    Stats,
}

#[derive(Subcommand)]
enum HistoryTarget {
    /// Snapshots of one title, newest first.
    Title { number: i64 },
    /// Snapshots of one agency, newest first.
    Agency { slug: String },
}

fn direction(desc: bool) -> SortDirection {
    if desc {
        SortDirection::Desc
    } else {
        SortDirection::Asc
    }
}

fn init_logging(cfg: &Config) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cfg.logging.level))
        .format_timestamp_secs()
        .init();
}

async fn open_store(cfg: &Config) -> Result<SqliteStore> {
    let pool = db::connect(cfg).await?;
    migrate::apply(&pool).await?;
    Ok(SqliteStore::new(pool))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_logging(&cfg);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import {
            date,
            title,
            all_history,
        } => {
            return run_import(&cfg, date, title, all_history).await;
        }
        Commands::Titles { sort, desc } => {
            let store = open_store(&cfg).await?;
            report::print_titles(&store, sort, direction(desc)).await?;
        }
        Commands::Agencies { sort, desc } => {
            let store = open_store(&cfg).await?;
            report::print_agencies(&store, sort, direction(desc)).await?;
        }
        Commands::History { target } => {
            let store = open_store(&cfg).await?;
            match target {
                HistoryTarget::Title { number } => {
                    report::print_title_history(&store, number).await?
                }
                HistoryTarget::Agency { slug } => {
                    report::print_agency_history(&store, &slug).await?
                }
            }
        }
        Commands::Stats => {
            let store = open_store(&cfg).await?;
            report::print_stats(&store).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn run_import(
    cfg: &Config,
    date: Option<NaiveDate>,
    title: Option<i64>,
    all_history: bool,
) -> Result<ExitCode> {
    let store: Arc<dyn Store> = Arc::new(open_store(cfg).await?);

    let cancel = Cancellation::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt signal, shutting down...");
            on_signal.cancel();
        }
    });

    let transport = HttpTransport::new(cfg.source.timeout(), &cfg.source.user_agent)?;
    let client = FetchClient::new(
        Arc::new(transport),
        RetryPolicy::from_config(&cfg.source),
        Endpoints::from_config(&cfg.source),
        cancel.clone(),
    );
    let importer = Importer::new(store, client, cancel);

    if all_history {
        info!("Starting historical import for all versions; this can take hours");
        let outcome = importer.import_all_history().await?;
        report::print_history_summary(&outcome.stats);
        report::print_status(outcome.status);
        return Ok(exit_code(!outcome.is_cancelled() && outcome.stats.failed == 0));
    }

    let snapshot_date = date.unwrap_or_else(|| chrono::Local::now().date_naive());

    if let Some(number) = title {
        info!("Starting import for title {} on {}", number, snapshot_date);
        let outcome = importer.import_single(number, snapshot_date).await?;
        report::print_title_summary(&outcome.stats);
        report::print_status(outcome.status);
        return Ok(exit_code(!outcome.is_cancelled() && outcome.stats.failed == 0));
    }

    info!("Starting import for {}", snapshot_date);
    let run = importer.run(snapshot_date).await?;
    report::print_title_summary(&run.titles);
    if let Some(agencies) = &run.agencies {
        report::print_agency_summary(agencies);
    }
    if let Some(metrics) = &run.metrics {
        report::print_system_metrics(metrics);
    }
    if let Some(fatal) = &run.fatal {
        eprintln!("Error: {:#}", fatal);
    }
    if run.status == RunStatus::Cancelled {
        report::print_status(run.status);
    }
    Ok(exit_code(run.is_success()))
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
