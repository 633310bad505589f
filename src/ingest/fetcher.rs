use chrono::NaiveDate;
use futures_util::stream::{self, Stream};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use super::dates::DateRange;
use super::retry::RetryPolicy;
use crate::db::models::GameRecord;
use crate::error::{IngestError, ProviderError};
use crate::provider::{BoxScoreProvider, DayBoxScores};

/// Pulls one day of box scores at a time from a provider, retrying
/// transient failures and normalising what comes back. Has no side effects
/// beyond the network calls.
pub struct Fetcher<P> {
    provider: P,
    retry: RetryPolicy,
    /// Pause between consecutive dates in a stream
    request_delay: Duration,
}

impl<P: BoxScoreProvider> Fetcher<P> {
    pub fn new(provider: P, retry: RetryPolicy, request_delay: Duration) -> Self {
        Fetcher {
            provider,
            retry,
            request_delay,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Fetch and normalise every record for `date`. Off-days yield an empty vec.
    pub async fn fetch_date(&self, date: NaiveDate) -> Result<Vec<GameRecord>, IngestError> {
        let label = format!("{} {}", self.provider.name(), date);
        let provider = &self.provider;
        let day = self
            .retry
            .run(&label, move || provider.fetch_day(date))
            .await
            .map_err(|gave_up| {
                if gave_up.error.is_transient() {
                    IngestError::RetriesExhausted {
                        date,
                        attempts: gave_up.attempts,
                        source: gave_up.error,
                    }
                } else {
                    IngestError::Permanent {
                        date,
                        source: gave_up.error,
                    }
                }
            })?;

        if matches!(day, DayBoxScores::NoGames) {
            info!("{}: no games", date);
        }
        let records = normalize(date, day.into_records())
            .map_err(|source| IngestError::Permanent { date, source })?;
        debug!("{}: {} team lines", date, records.len());
        Ok(records)
    }

    /// Lazily fetch every date in `range`, in ascending order. Nothing is
    /// requested until the stream is polled; calling again with the same
    /// range starts over.
    pub fn stream(
        &self,
        range: DateRange,
    ) -> impl Stream<Item = (NaiveDate, Result<Vec<GameRecord>, IngestError>)> + '_ {
        let delay = self.request_delay;
        stream::iter(range.into_iter().enumerate()).then(move |(i, date)| async move {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            (date, self.fetch_date(date).await)
        })
    }
}

/// Drop duplicate `(game_id, team_id)` rows keeping the last one seen, and
/// reject rows that can't be stored under `date`.
fn normalize(date: NaiveDate, rows: Vec<GameRecord>) -> Result<Vec<GameRecord>, ProviderError> {
    let mut out: Vec<GameRecord> = Vec::with_capacity(rows.len());
    let mut seen: HashMap<(String, i64), usize> = HashMap::new();

    for row in rows {
        if row.game_date != date {
            return Err(ProviderError::Permanent(format!(
                "game {} is dated {}, requested {}",
                row.game_id, row.game_date, date
            )));
        }
        if row.team_id == row.opponent_team_id {
            return Err(ProviderError::Permanent(format!(
                "game {}: team {} listed as its own opponent",
                row.game_id, row.team_id
            )));
        }
        match seen.get(&(row.game_id.clone(), row.team_id)) {
            Some(&i) => out[i] = row,
            None => {
                seen.insert((row.game_id.clone(), row.team_id), out.len());
                out.push(row);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::record;
    use crate::ingest::testing::ScriptedProvider;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn fetcher(provider: ScriptedProvider) -> Fetcher<ScriptedProvider> {
        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: false,
        };
        Fetcher::new(provider, retry, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_off_day_is_empty() {
        let f = fetcher(ScriptedProvider::new());
        assert!(f.fetch_date(d("2024-01-03")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let date = d("2024-01-02");
        let provider = ScriptedProvider::new()
            .once(date, Err(ProviderError::Transient("timeout".into())))
            .games(date, vec![record("g1", date, 1, 2, 100), record("g1", date, 2, 1, 98)]);
        let f = fetcher(provider);
        assert_eq!(f.fetch_date(date).await.unwrap().len(), 2);
        assert_eq!(f.provider().calls(date), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_carry_date() {
        let date = d("2024-01-03");
        let provider =
            ScriptedProvider::new().always(date, Err(ProviderError::Transient("timeout".into())));
        let f = fetcher(provider);
        let err = f.fetch_date(date).await.unwrap_err();
        assert!(matches!(err, IngestError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(err.date(), date);
        assert_eq!(f.provider().calls(date), 3);
    }

    #[tokio::test]
    async fn test_permanent_is_surfaced_without_retry() {
        let date = d("2024-01-03");
        let provider =
            ScriptedProvider::new().always(date, Err(ProviderError::Permanent("schema".into())));
        let f = fetcher(provider);
        let err = f.fetch_date(date).await.unwrap_err();
        assert!(matches!(err, IngestError::Permanent { .. }));
        assert_eq!(f.provider().calls(date), 1);
    }

    #[tokio::test]
    async fn test_duplicate_rows_keep_last() {
        let date = d("2024-01-02");
        let provider = ScriptedProvider::new().games(
            date,
            vec![
                record("g1", date, 1, 2, 100),
                record("g1", date, 2, 1, 98),
                record("g1", date, 1, 2, 101),
            ],
        );
        let records = fetcher(provider).fetch_date(date).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].points, 101);
    }

    #[tokio::test]
    async fn test_self_opponent_is_permanent() {
        let date = d("2024-01-02");
        let provider = ScriptedProvider::new().games(date, vec![record("g1", date, 1, 1, 100)]);
        let err = fetcher(provider).fetch_date(date).await.unwrap_err();
        assert!(matches!(err, IngestError::Permanent { .. }));
    }

    #[tokio::test]
    async fn test_stream_is_ordered_and_restartable() {
        let (a, c) = (d("2024-01-02"), d("2024-01-04"));
        let provider = ScriptedProvider::new()
            .games(a, vec![record("g1", a, 1, 2, 100), record("g1", a, 2, 1, 98)])
            .games(c, vec![record("g2", c, 3, 4, 90), record("g2", c, 4, 3, 91)]);
        let f = fetcher(provider);
        let range = DateRange::new(a, c).unwrap();

        for _ in 0..2 {
            let out: Vec<_> = f.stream(range).collect().await;
            let summary: Vec<(NaiveDate, usize)> = out
                .into_iter()
                .map(|(date, res)| (date, res.unwrap().len()))
                .collect();
            assert_eq!(summary, vec![(a, 2), (d("2024-01-03"), 0), (c, 2)]);
        }
    }

    #[tokio::test]
    async fn test_stream_is_lazy() {
        let date = d("2024-01-02");
        let f = fetcher(ScriptedProvider::new());
        let stream = f.stream(DateRange::new(date, date).unwrap());
        assert_eq!(f.provider().calls(date), 0);
        drop(stream);
    }
}
