use chrono::NaiveDate;
use chrono_tz::Tz;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::ingest::dates::parse_season;
use crate::ingest::{DateRange, RetryPolicy};
use crate::provider::nba_stats::DEFAULT_BASE_URL;

/// NBA box-score ingestion into SQLite
#[derive(Parser, Debug, Clone)]
#[command(name = "boxscore-ingest", version, about)]
pub struct Config {
    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "boxscores.db", global = true)]
    pub database_path: String,

    /// stats.nba.com API base URL
    #[arg(long, env = "NBA_STATS_URL", default_value = DEFAULT_BASE_URL, global = true)]
    pub provider_url: String,

    /// League ID ("00" = NBA)
    #[arg(long, env = "LEAGUE_ID", default_value = "00", global = true)]
    pub league_id: String,

    /// Restrict ingestion to one season type (default: all games)
    #[arg(long, env = "SEASON_TYPE", value_enum, global = true)]
    pub season_type: Option<SeasonType>,

    /// IANA timezone the provider dates games in; decides what "yesterday" is
    #[arg(long, env = "PROVIDER_TIMEZONE", default_value = "America/New_York", global = true)]
    pub provider_timezone: String,

    /// Per-request HTTP timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30", global = true)]
    pub request_timeout_secs: u64,

    /// Pause between consecutive dates in milliseconds
    #[arg(long, env = "REQUEST_DELAY_MS", default_value = "600", global = true)]
    pub request_delay_ms: u64,

    /// Attempts per date before a transient failure is given up on
    #[arg(long, env = "MAX_ATTEMPTS", default_value = "5", global = true)]
    pub max_attempts: u32,

    /// First retry backoff in milliseconds (doubles each attempt)
    #[arg(long, env = "BACKOFF_BASE_MS", default_value = "500", global = true)]
    pub backoff_base_ms: u64,

    /// Upper bound on a single retry backoff in milliseconds
    #[arg(long, env = "BACKOFF_MAX_MS", default_value = "30000", global = true)]
    pub backoff_max_ms: u64,

    /// Wall-clock budget for one ingest run in seconds
    #[arg(long, env = "MAX_RUN_SECS", default_value = "3600", global = true)]
    pub max_run_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Fetch box scores and store them (default range: cursor to yesterday)
    Ingest(IngestArgs),

    /// Show the cursor and recent runs
    Status {
        /// How many recent runs to list
        #[arg(long, default_value = "10")]
        runs: i64,
    },

    /// Write stored records to CSV
    Export(ExportArgs),
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    /// First date to ingest (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<NaiveDate>,

    /// Last date to ingest (YYYY-MM-DD), no later than yesterday
    #[arg(long)]
    pub to: Option<NaiveDate>,

    /// Whole season(s), e.g. 2023-24 or 2020-2024
    #[arg(long, value_parser = parse_season, conflicts_with_all = ["from", "to"])]
    pub season: Option<DateRange>,

    /// Keep going past a date whose retries ran out (cursor still stops there)
    #[arg(long, env = "SKIP_AHEAD")]
    pub skip_ahead: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Output CSV file
    #[arg(long)]
    pub out: PathBuf,

    #[arg(long)]
    pub from: Option<NaiveDate>,

    #[arg(long)]
    pub to: Option<NaiveDate>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeasonType {
    RegularSeason,
    Playoffs,
    PreSeason,
    AllStar,
    PlayIn,
}

impl SeasonType {
    /// Value stats.nba.com expects in `SeasonTypeNullable`.
    pub fn as_param(&self) -> &'static str {
        match self {
            SeasonType::RegularSeason => "Regular Season",
            SeasonType::Playoffs => "Playoffs",
            SeasonType::PreSeason => "Pre Season",
            SeasonType::AllStar => "All Star",
            SeasonType::PlayIn => "PlayIn",
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.timezone()?;
        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be at least 1");
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            anyhow::bail!("backoff_base_ms must not exceed backoff_max_ms");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be positive");
        }
        if self.max_run_secs == 0 {
            anyhow::bail!("max_run_secs must be positive");
        }
        if let Command::Export(args) = &self.command {
            if let (Some(from), Some(to)) = (args.from, args.to) {
                if from > to {
                    anyhow::bail!("--from {} is after --to {}", from, to);
                }
            }
        }
        Ok(())
    }

    pub fn timezone(&self) -> anyhow::Result<Tz> {
        self.provider_timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("invalid PROVIDER_TIMEZONE {:?}: {}", self.provider_timezone, e))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
            jitter: true,
        }
    }
}
