//! tradeya-backfill
//!
//! Operator CLI for idempotent data maintenance on the TradeYa store.
//!
//! ## Usage
//!
//! ```bash
//! # Run every configured backfill job
//! tradeya-backfill backfill
//!
//! # Preview the trades job, including completed/cancelled trades
//! tradeya-backfill --dry-run backfill --job trades-visibility --all-statuses
//!
//! # Recompute reputation for every user, stopping on the first failure
//! tradeya-backfill --fail-fast reputation
//!
//! # Snapshot before migrating, restore if needed
//! tradeya-backfill backup --collection trades
//! tradeya-backfill rollback 20250301T120000Z
//! ```
//!
//! Report and progress lines are printed to stdout; logs go to stderr.
//!
//! Exit status is 0 when everything succeeded and 1 when the run aborted or
//! any document failed.

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use tradeya_backfill::backup::{create_backup, list_backups, load_backup, rollback};
use tradeya_backfill::fixtures::{import_fixtures, parse_fixtures};
use tradeya_backfill::jobs::select_jobs;
use tradeya_backfill::runner::PROGRESS_TARGET;
use tradeya_backfill::{
    initialize, BackfillError, BackfillRunner, Config, ErrorPolicy, EventLogReputation,
    RunOptions, RunReport,
};

#[derive(Parser, Debug)]
#[command(name = "tradeya-backfill")]
#[command(about = "Idempotent backfills and reputation recompute for the TradeYa document store")]
struct Cli {
    /// Path to config file
    #[arg(short, long, env = "TRADEYA_BACKFILL_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Document store path (overrides config)
    #[arg(long, env = "TRADEYA_STORE_PATH", global = true)]
    store: Option<PathBuf>,

    /// Directory for checkpoint and backups (overrides config)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Documents in flight at once
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Abort on the first failed document instead of recording it and continuing
    #[arg(long, global = true)]
    fail_fast: bool,

    /// Compute and report changes without writing anything
    #[arg(long, global = true)]
    dry_run: bool,

    /// Continue from the last checkpoint instead of the start of each collection
    #[arg(long, global = true)]
    resume: bool,

    /// Write a JSON run report to this path
    #[arg(long, value_name = "PATH", global = true)]
    report_json: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run backfill jobs (all configured jobs by default)
    Backfill {
        /// Job name, repeatable
        #[arg(long = "job", value_name = "NAME")]
        jobs: Vec<String>,

        /// Drop job filters so documents in every status are backfilled
        #[arg(long)]
        all_statuses: bool,
    },

    /// Recompute reputation scores from the event log
    Reputation {
        /// Only these users, repeatable
        #[arg(long = "user", value_name = "ID")]
        users: Vec<String>,
    },

    /// Import a JSON fixture file into the store
    Import {
        file: PathBuf,
    },

    /// Snapshot collections before a migration
    Backup {
        /// Collection to include, repeatable (default: all)
        #[arg(long = "collection", value_name = "NAME")]
        collections: Vec<String>,
    },

    /// Restore documents from a backup
    Rollback {
        backup_id: String,
    },

    /// List available backups
    Backups,

    /// List configured backfill jobs
    Jobs,
}

fn load_config(cli: &Cli) -> Result<Config, BackfillError> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    // Apply CLI overrides
    if let Some(store) = &cli.store {
        config.store_path = store.clone();
    }
    if let Some(dir) = &cli.state_dir {
        config.state_dir = dir.clone();
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    if cli.fail_fast {
        config.error_policy = ErrorPolicy::FailFast;
    }
    config.validate()?;
    Ok(config)
}

async fn execute(cli: &Cli, config: &Config, run: &mut RunReport) -> Result<(), BackfillError> {
    let mut options = RunOptions::from_config(config);
    options.dry_run = cli.dry_run;
    options.resume = cli.resume;

    match &cli.command {
        Command::Backfill { jobs, all_statuses } => {
            let specs = select_jobs(&config.jobs, jobs)?;
            let store = initialize(config)?;
            let mut runner = BackfillRunner::new(&store, options);
            for spec in specs {
                let job = if *all_statuses {
                    spec.build_unfiltered()?
                } else {
                    spec.build()?
                };
                let report = runner.run(&job).await?;
                println!("{}", report);
                run.collections.push(report);
            }
        }

        Command::Reputation { users } => {
            let store = initialize(config)?;
            let mut service = EventLogReputation::new(&store, config.reputation.clone());
            if users.is_empty() {
                service.index_events().await?;
            }
            let mut runner = BackfillRunner::new(&store, options);
            let report = runner
                .recompute_reputation(&service, &config.reputation.users_collection, users)
                .await?;
            println!("{}", report);
            run.reputation = Some(report);
        }

        Command::Import { file } => {
            if cli.dry_run {
                let bytes = tokio::fs::read(file).await?;
                let docs = parse_fixtures(serde_json::from_slice(&bytes)?)?;
                println!("Would import {} documents from {}", docs.len(), file.display());
                return Ok(());
            }
            let store = initialize(config)?;
            for (collection, count) in import_fixtures(&store, file).await? {
                println!("Imported {} documents into {}", count, collection);
            }
        }

        Command::Backup { collections } => {
            let store = initialize(config)?;
            let backup = create_backup(&store, collections, &config.backups_dir()).await?;
            println!(
                "Backup {} written ({} documents in {} collections)",
                backup.id,
                backup.document_count(),
                backup.collections.len()
            );
        }

        Command::Rollback { backup_id } => {
            if cli.dry_run {
                let backup = load_backup(&config.backups_dir(), backup_id).await?;
                for (collection, docs) in &backup.collections {
                    println!("Would restore {} documents into {}", docs.len(), collection);
                }
                return Ok(());
            }
            let store = initialize(config)?;
            let report = rollback(&store, &config.backups_dir(), backup_id).await?;
            for (collection, count) in &report.restored {
                println!("Restored {} documents into {}", count, collection);
            }
        }

        Command::Backups => {
            for id in list_backups(&config.backups_dir()).await? {
                println!("{}", id);
            }
        }

        Command::Jobs => {
            for spec in &config.jobs {
                let filter = spec
                    .filter
                    .as_ref()
                    .map(|f| format!(" where {} in {:?}", f.field, f.any_of))
                    .unwrap_or_default();
                println!(
                    "{}: {}.{} defaults={}{}",
                    spec.name,
                    spec.collection,
                    spec.target_field,
                    serde_json::Value::Object(spec.defaults.clone()),
                    filter
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    // Progress lines go to stdout next to the report lines; everything else
    // is a log on stderr.
    let logs = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("tradeya_backfill={}", level).parse()?),
        )
        .with_filter(filter_fn(|meta| meta.target() != PROGRESS_TARGET));
    let progress = fmt::layer()
        .with_writer(std::io::stdout)
        .without_time()
        .with_level(false)
        .with_target(false)
        .with_filter(filter_fn(|meta| meta.target() == PROGRESS_TARGET));
    tracing_subscriber::registry().with(logs).with(progress).init();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        store = %config.store_path.display(),
        concurrency = config.concurrency,
        error_policy = ?config.error_policy,
        dry_run = cli.dry_run,
        "Starting tradeya-backfill"
    );

    let mut run = RunReport::new();
    let result = execute(&cli, &config, &mut run).await;
    run.complete();

    if let Err(e) = &result {
        run.error = Some(e.to_string());
        if let Some(partial) = e.partial_report() {
            println!("{}", partial);
            run.collections.push(partial.clone());
        }
        if let Some(partial) = e.partial_reputation_report() {
            println!("{}", partial);
            run.reputation = Some(partial.clone());
        }
    }

    if let Some(path) = &cli.report_json {
        run.save_json(path)
            .await
            .with_context(|| format!("writing report to {}", path.display()))?;
        info!(path = %path.display(), "Run report written");
    }

    match result {
        Ok(()) if run.is_success() => Ok(()),
        Ok(()) => {
            let failures = run
                .collections
                .iter()
                .flat_map(|c| c.failures.iter().map(move |f| (c.collection.as_str(), f)))
                .chain(
                    run.reputation
                        .iter()
                        .flat_map(|r| r.failures.iter().map(move |f| (r.collection.as_str(), f))),
                );
            for (collection, failure) in failures {
                eprintln!(
                    "  {}/{} ({}): {}",
                    collection, failure.id, failure.phase, failure.message
                );
            }
            warn!(failed = run.total_failed(), "Run finished with failed documents");
            eprintln!("{} document(s) failed", run.total_failed());
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "Run failed");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
