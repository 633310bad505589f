use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

mod config;
mod db;
mod error;
mod export;
mod ingest;
mod provider;

use config::{Command, Config, ExportArgs, IngestArgs};
use db::Database;
use ingest::dates::yesterday_in;
use ingest::{plan, Fetcher, RangeRequest, RunOptions, Scheduler};
use provider::NbaStats;

/// Exit status for usage errors and anything that stops a run before it starts.
const EXIT_FATAL: u8 = 2;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {:#}", e);
        return ExitCode::from(EXIT_FATAL);
    }

    match run(config).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(config: Config) -> Result<u8> {
    let db = Database::open(&config.database_path)
        .with_context(|| format!("Failed to open database {}", config.database_path))?;
    info!("Database opened: {}", config.database_path);

    match &config.command {
        Command::Ingest(args) => ingest(&config, args, db).await,
        Command::Status { runs } => status(&db, *runs).map(|_| 0),
        Command::Export(args) => export(&db, args).map(|_| 0),
    }
}

async fn ingest(config: &Config, args: &IngestArgs, db: Database) -> Result<u8> {
    let yesterday = yesterday_in(config.timezone()?, Utc::now());
    let cursor = db.get_cursor()?;
    let request = RangeRequest {
        from: args.from,
        to: args.to,
        season: args.season,
    };
    let range = match plan(&cursor, &request, yesterday) {
        Ok(range) => range,
        Err(e) => {
            error!("{}", e);
            return Ok(EXIT_FATAL);
        }
    };

    let provider = NbaStats::new(
        &config.provider_url,
        &config.league_id,
        config.season_type.map(|s| s.as_param().to_string()),
        Duration::from_secs(config.request_timeout_secs),
    )?;
    let fetcher = Fetcher::new(
        provider,
        config.retry_policy(),
        Duration::from_millis(config.request_delay_ms),
    );
    let options = RunOptions {
        skip_ahead: args.skip_ahead,
        max_run: Duration::from_secs(config.max_run_secs),
    };

    let mut scheduler = Scheduler::new(fetcher, db, options);
    let summary = scheduler.run(range).await.context("Ingest run aborted")?;
    println!("{}", summary);
    Ok(scheduler.state().exit_code())
}

fn status(db: &Database, runs: i64) -> Result<()> {
    let cursor = db.get_cursor()?;
    match cursor.last_completed {
        Some(date) => println!("Cursor: {} ({})", date, cursor.status.as_str()),
        None => println!("Cursor: unset"),
    }
    if let Some(at) = cursor.last_run_at {
        println!("Last run: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    let recent = db.list_recent_runs(runs)?;
    if recent.is_empty() {
        return Ok(());
    }
    println!();
    println!("{:<20} {:<10} {:<24} {:>5} {:>5} {:>5} {:>5}", "started", "state", "range", "ok", "part", "fail", "skip");
    for run in recent {
        let range = match (run.range_start, run.range_end) {
            (Some(a), Some(b)) if a == b => a.to_string(),
            (Some(a), Some(b)) => format!("{}..{}", a, b),
            _ => "-".to_string(),
        };
        println!(
            "{:<20} {:<10} {:<24} {:>5} {:>5} {:>5} {:>5}",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.state,
            range,
            run.committed,
            run.partial,
            run.failed,
            run.skipped
        );
    }
    Ok(())
}

fn export(db: &Database, args: &ExportArgs) -> Result<()> {
    let records = db.list_records(args.from, args.to)?;
    export::export_to_file(&args.out, &records)?;
    info!("Exported {} records to {}", records.len(), args.out.display());
    Ok(())
}
