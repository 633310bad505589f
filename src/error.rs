use chrono::NaiveDate;
use thiserror::Error;

/// Failure reported by a box-score provider for a single request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Timeouts, rate limits, upstream 5xx. Safe to retry.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Malformed payload or unknown schema. Retrying will not help.
    #[error("permanent provider error: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// Store unavailable or a constraint was violated.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database lock poisoned")]
    Poisoned,

    #[error("batch for {expected} contains record for game {game_id} dated {found}")]
    DateMismatch {
        expected: NaiveDate,
        found: NaiveDate,
        game_id: String,
    },

    #[error("failed to encode run report: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Per-date failure surfaced by the fetcher or the scheduler.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("{date}: gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        date: NaiveDate,
        attempts: u32,
        source: ProviderError,
    },

    #[error("{date}: {source}")]
    Permanent {
        date: NaiveDate,
        source: ProviderError,
    },

    #[error("{date}: persistence failed: {source}")]
    Persistence {
        date: NaiveDate,
        source: PersistenceError,
    },

    #[error("{date}: run budget exceeded")]
    BudgetExceeded { date: NaiveDate },
}

impl IngestError {
    pub fn date(&self) -> NaiveDate {
        match self {
            IngestError::RetriesExhausted { date, .. }
            | IngestError::Permanent { date, .. }
            | IngestError::Persistence { date, .. }
            | IngestError::BudgetExceeded { date } => *date,
        }
    }

    /// Whether a later run may succeed on the same date without operator action.
    pub fn is_retryable_later(&self) -> bool {
        matches!(
            self,
            IngestError::RetriesExhausted { .. } | IngestError::BudgetExceeded { .. }
        )
    }
}
