//! Drives Fetcher → Database for every date between the cursor and
//! yesterday.
//!
//! ```text
//!  IDLE ──run()──▶ RUNNING ──▶ COMPLETED  every date committed
//!                          ├─▶ PARTIAL    retries exhausted / run budget hit
//!                          └─▶ FAILED     permanent provider or store error
//! ```
//!
//! Dates are processed strictly in ascending order. The cursor only ever
//! marks a contiguous prefix of committed dates: once a date fails, later
//! dates may still be written (with `skip_ahead`) but the cursor stays put.

use chrono::{DateTime, NaiveDate, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::dates::{season_label, DateRange};
use super::fetcher::Fetcher;
use crate::db::models::{CursorStatus, FetchCursor, GameRecord, IngestRun, WriteStats};
use crate::db::Database;
use crate::error::{IngestError, PersistenceError};
use crate::provider::BoxScoreProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Partial,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Partial => "partial",
            RunState::Failed => "failed",
        }
    }

    /// Process exit code for a finished run.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunState::Idle | RunState::Running | RunState::Completed => 0,
            RunState::Partial => 1,
            RunState::Failed => 2,
        }
    }

    /// Fold a new date outcome into the run state; FAILED beats PARTIAL.
    fn worsen(self, to: RunState) -> RunState {
        match (self, to) {
            (RunState::Failed, _) | (_, RunState::Failed) => RunState::Failed,
            (RunState::Partial, _) | (_, RunState::Partial) => RunState::Partial,
            (state, _) => state,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Keep fetching and writing dates past a partial one
    pub skip_ahead: bool,
    /// Wall-clock budget for the whole run
    pub max_run: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            skip_ahead: false,
            max_run: Duration::from_secs(3600),
        }
    }
}

/// Which dates the caller asked for.
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeRequest {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub season: Option<DateRange>,
}

#[derive(Error, Debug, PartialEq)]
pub enum PlanError {
    #[error("end date {to} is after {yesterday}, the last day with final results")]
    Future { to: NaiveDate, yesterday: NaiveDate },

    #[error("start date {from} is after end date {to}")]
    Inverted { from: NaiveDate, to: NaiveDate },
}

/// Work out which dates this run should cover. `Ok(None)` means the cursor
/// is already caught up.
pub fn plan(
    cursor: &FetchCursor,
    request: &RangeRequest,
    yesterday: NaiveDate,
) -> Result<Option<DateRange>, PlanError> {
    if let Some(season) = request.season {
        if season.start() > yesterday {
            return Err(PlanError::Future {
                to: season.start(),
                yesterday,
            });
        }
        return Ok(season.clamp_end(yesterday));
    }

    let to = request.to.unwrap_or(yesterday);
    if to > yesterday {
        return Err(PlanError::Future { to, yesterday });
    }

    match request.from {
        Some(from) => DateRange::new(from, to)
            .map(Some)
            .ok_or(PlanError::Inverted { from, to }),
        None => {
            let from = match cursor.last_completed {
                Some(last) => match last.succ_opt() {
                    Some(next) => next,
                    None => return Ok(None),
                },
                // Fresh store: only the end date unless `from` says otherwise
                None => to,
            };
            Ok(DateRange::new(from, to))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DateOutcome {
    Committed {
        records: usize,
        #[serde(flatten)]
        stats: WriteStats,
        cursor_advanced: bool,
    },
    /// Retries exhausted or budget hit; eligible for the next run
    Partial { reason: String },
    Failed { reason: String },
    /// Not attempted because the run halted earlier
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateReport {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub outcome: DateOutcome,
}

impl fmt::Display for DateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            DateOutcome::Committed { records: 0, cursor_advanced, .. } => {
                write!(f, "{}  ok       no games", self.date)?;
                if !cursor_advanced {
                    write!(f, " (cursor held)")?;
                }
                Ok(())
            }
            DateOutcome::Committed {
                records,
                stats,
                cursor_advanced,
            } => {
                write!(
                    f,
                    "{}  ok       {} records ({} new, {} updated, {} unchanged)",
                    self.date, records, stats.inserted, stats.updated, stats.unchanged
                )?;
                if !cursor_advanced {
                    write!(f, " (cursor held)")?;
                }
                Ok(())
            }
            DateOutcome::Partial { reason } => write!(f, "{}  partial  {}", self.date, reason),
            DateOutcome::Failed { reason } => write!(f, "{}  failed   {}", self.date, reason),
            DateOutcome::Skipped { reason } => write!(f, "{}  skipped  {}", self.date, reason),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub state: RunState,
    pub range: Option<DateRange>,
    pub cursor_before: Option<NaiveDate>,
    pub cursor_after: Option<NaiveDate>,
    pub reports: Vec<DateReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    fn count(&self, pred: impl Fn(&DateOutcome) -> bool) -> i64 {
        self.reports.iter().filter(|r| pred(&r.outcome)).count() as i64
    }

    pub fn committed(&self) -> i64 {
        self.count(|o| matches!(o, DateOutcome::Committed { .. }))
    }

    pub fn partial(&self) -> i64 {
        self.count(|o| matches!(o, DateOutcome::Partial { .. }))
    }

    pub fn failed(&self) -> i64 {
        self.count(|o| matches!(o, DateOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> i64 {
        self.count(|o| matches!(o, DateOutcome::Skipped { .. }))
    }

    pub fn to_ingest_run(&self) -> Result<IngestRun, serde_json::Error> {
        Ok(IngestRun {
            id: None,
            started_at: self.started_at,
            finished_at: self.finished_at,
            state: self.state.as_str().to_string(),
            range_start: self.range.map(|r| r.start()),
            range_end: self.range.map(|r| r.end()),
            committed: self.committed(),
            partial: self.partial(),
            failed: self.failed(),
            skipped: self.skipped(),
            report_json: serde_json::to_string(&self.reports)?,
        })
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let range = self.range.map_or("nothing to do".to_string(), |r| r.to_string());
        writeln!(f, "Run {} ({})", self.state.as_str().to_uppercase(), range)?;
        for report in &self.reports {
            writeln!(f, "  {}", report)?;
        }
        let cursor = |c: Option<NaiveDate>| c.map_or("unset".to_string(), |d| d.to_string());
        write!(
            f,
            "{} committed, {} partial, {} failed, {} skipped; cursor {} -> {}",
            self.committed(),
            self.partial(),
            self.failed(),
            self.skipped(),
            cursor(self.cursor_before),
            cursor(self.cursor_after)
        )
    }
}

pub struct Scheduler<P> {
    fetcher: Fetcher<P>,
    db: Database,
    options: RunOptions,
    state: RunState,
}

impl<P: BoxScoreProvider> Scheduler<P> {
    pub fn new(fetcher: Fetcher<P>, db: Database, options: RunOptions) -> Self {
        Scheduler {
            fetcher,
            db,
            options,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Ingest every date in `range` (or nothing, for `None`), then record the
    /// outcome on the cursor and in the run log.
    ///
    /// Per-date failures are reported in the summary. An `Err` means the
    /// store could not be read or the run could not be recorded.
    pub async fn run(&mut self, range: Option<DateRange>) -> Result<RunSummary, PersistenceError> {
        let started_at = Utc::now();
        let cursor_before = self.db.get_cursor()?.last_completed;
        self.state = RunState::Running;

        let mut reports = Vec::new();
        let mut state = RunState::Completed;
        if let Some(range) = range {
            info!(
                "Ingesting {} ({} dates) from {}; cursor at {:?}",
                range,
                range.len(),
                self.fetcher.provider().name(),
                cursor_before
            );
            state = self.process(range, cursor_before, &mut reports).await;
        } else {
            info!("Cursor at {:?}, nothing to ingest", cursor_before);
        }
        self.state = state;

        let status = match state {
            RunState::Partial => CursorStatus::Partial,
            RunState::Failed => CursorStatus::Failed,
            _ => CursorStatus::Success,
        };
        self.db.mark_run(status)?;
        let summary = RunSummary {
            state,
            range,
            cursor_before,
            cursor_after: self.db.get_cursor()?.last_completed,
            reports,
            started_at,
            finished_at: Utc::now(),
        };
        self.db.insert_run(&summary.to_ingest_run()?)?;

        info!(
            "Run {}: {} committed, {} partial, {} failed, {} skipped",
            state.as_str(),
            summary.committed(),
            summary.partial(),
            summary.failed(),
            summary.skipped()
        );
        Ok(summary)
    }

    async fn process(
        &self,
        range: DateRange,
        cursor: Option<NaiveDate>,
        reports: &mut Vec<DateReport>,
    ) -> RunState {
        let deadline = Instant::now() + self.options.max_run;
        let mut state = RunState::Completed;
        // Last date of the contiguous committed prefix, as far as this run knows
        let mut contiguous_end = cursor;
        // Set once any date fails; the cursor must not move past it
        let mut blocked = false;

        let stream = self.fetcher.stream(range);
        futures_util::pin_mut!(stream);
        let mut pending = range.iter();

        while let Some(expected) = pending.next() {
            let (date, fetched) = match tokio::time::timeout_at(deadline, stream.next()).await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(_) => {
                    let err = IngestError::BudgetExceeded { date: expected };
                    warn!("{}; aborting run", err);
                    reports.push(DateReport {
                        date: expected,
                        outcome: DateOutcome::Partial { reason: err.to_string() },
                    });
                    skip_rest(pending, "run budget exceeded", reports);
                    return state.worsen(RunState::Partial);
                }
            };
            debug_assert_eq!(date, expected);

            let err = match fetched {
                Ok(records) => match self.commit(date, &records, &mut contiguous_end, blocked) {
                    Ok(outcome) => {
                        reports.push(DateReport { date, outcome });
                        continue;
                    }
                    Err(source) => IngestError::Persistence { date, source },
                },
                Err(err) => err,
            };

            blocked = true;
            if err.is_retryable_later() {
                warn!("{} (season {}); marked partial", err, season_label(err.date()));
                reports.push(DateReport {
                    date,
                    outcome: DateOutcome::Partial { reason: err.to_string() },
                });
                state = state.worsen(RunState::Partial);
                if self.options.skip_ahead {
                    continue;
                }
            } else {
                error!("{} (season {})", err, season_label(err.date()));
                reports.push(DateReport {
                    date,
                    outcome: DateOutcome::Failed { reason: err.to_string() },
                });
                state = state.worsen(RunState::Failed);
            }

            skip_rest(pending, &format!("halted after {}", date), reports);
            break;
        }
        state
    }

    /// Write one date's records and advance the cursor if the committed
    /// prefix stays contiguous.
    fn commit(
        &self,
        date: NaiveDate,
        records: &[GameRecord],
        contiguous_end: &mut Option<NaiveDate>,
        blocked: bool,
    ) -> Result<DateOutcome, PersistenceError> {
        let stats = self.db.write_batch(date, records)?;

        let contiguous = match *contiguous_end {
            None => true,
            Some(end) => end.succ_opt().map_or(true, |next| date <= next),
        };
        let cursor_advanced = if blocked || !contiguous {
            warn!("{} committed but cursor held at {:?}", date, contiguous_end);
            false
        } else {
            *contiguous_end = Some(contiguous_end.map_or(date, |end| end.max(date)));
            self.db.advance_cursor(date)?
        };

        info!(
            "{} committed: {} records ({} new, {} updated, {} unchanged)",
            date,
            records.len(),
            stats.inserted,
            stats.updated,
            stats.unchanged
        );
        Ok(DateOutcome::Committed {
            records: stats.total(),
            stats,
            cursor_advanced,
        })
    }
}

fn skip_rest(rest: impl Iterator<Item = NaiveDate>, reason: &str, reports: &mut Vec<DateReport>) {
    for date in rest {
        reports.push(DateReport {
            date,
            outcome: DateOutcome::Skipped { reason: reason.to_string() },
        });
    }
}
