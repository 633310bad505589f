pub mod nba_stats;

pub use nba_stats::NbaStats;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::db::models::GameRecord;
use crate::error::ProviderError;

/// What a provider saw for one calendar date.
#[derive(Debug, Clone, PartialEq)]
pub enum DayBoxScores {
    /// The provider answered and there were no completed games.
    NoGames,
    Games(Vec<GameRecord>),
}

impl DayBoxScores {
    pub fn into_records(self) -> Vec<GameRecord> {
        match self {
            DayBoxScores::NoGames => Vec::new(),
            DayBoxScores::Games(records) => records,
        }
    }
}

/// Trait that every box-score provider must implement.
#[async_trait]
pub trait BoxScoreProvider: Send + Sync {
    /// Return every team box-score line for games played on `date`.
    async fn fetch_day(&self, date: NaiveDate) -> Result<DayBoxScores, ProviderError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
