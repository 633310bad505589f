use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One team's box-score line for one game. Keyed by `(game_id, team_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    /// Provider-assigned game ID, e.g. "0022300501"
    pub game_id: String,
    pub game_date: NaiveDate,
    pub season_id: String,
    pub team_id: i64,
    pub team_abbreviation: String,
    pub opponent_team_id: i64,
    /// e.g. "BOS vs. NYK" (home) or "BOS @ NYK" (away)
    pub matchup: String,
    /// "W" | "L", absent for games without a decision
    pub win_loss: Option<String>,
    pub minutes: f64,
    pub points: i64,
    pub fgm: i64,
    pub fga: i64,
    pub fg3m: i64,
    pub fg3a: i64,
    pub ftm: i64,
    pub fta: i64,
    pub oreb: i64,
    pub dreb: i64,
    pub reb: i64,
    pub ast: i64,
    pub stl: i64,
    pub blk: i64,
    pub tov: i64,
    pub pf: i64,
    pub plus_minus: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorStatus {
    Success,
    Partial,
    Failed,
}

impl CursorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CursorStatus::Success => "success",
            CursorStatus::Partial => "partial",
            CursorStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(CursorStatus::Success),
            "partial" => Some(CursorStatus::Partial),
            "failed" => Some(CursorStatus::Failed),
            _ => None,
        }
    }
}

/// Persisted ingestion progress. Passed into and returned from each run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchCursor {
    /// Last date whose records are fully committed; `None` before the first run
    pub last_completed: Option<NaiveDate>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub status: CursorStatus,
}

impl Default for FetchCursor {
    fn default() -> Self {
        FetchCursor {
            last_completed: None,
            last_run_at: None,
            status: CursorStatus::Success,
        }
    }
}

/// Counts from a single `write_batch` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteStats {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl WriteStats {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.unchanged
    }
}

/// A finished ingestion run as stored in the run log.
#[derive(Debug, Clone, Serialize)]
pub struct IngestRun {
    pub id: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// "completed" | "partial" | "failed"
    pub state: String,
    pub range_start: Option<NaiveDate>,
    pub range_end: Option<NaiveDate>,
    pub committed: i64,
    pub partial: i64,
    pub failed: i64,
    pub skipped: i64,
    /// JSON array of per-date reports
    pub report_json: String,
}
