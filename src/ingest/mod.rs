pub mod dates;
pub mod fetcher;
pub mod retry;
pub mod scheduler;

pub use dates::DateRange;
pub use fetcher::Fetcher;
pub use retry::RetryPolicy;
pub use scheduler::{plan, RangeRequest, RunOptions, Scheduler};

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::db::models::GameRecord;
    use crate::error::ProviderError;
    use crate::provider::{BoxScoreProvider, DayBoxScores};

    type Reply = Result<DayBoxScores, ProviderError>;

    #[derive(Default)]
    struct Script {
        queued: VecDeque<Reply>,
        fallback: Option<Reply>,
        calls: u32,
    }

    /// Provider that answers from per-date scripts. Dates with no script
    /// have no games.
    #[derive(Default)]
    pub struct ScriptedProvider {
        scripts: Mutex<HashMap<NaiveDate, Script>>,
        stall: Mutex<Option<(NaiveDate, Duration)>>,
    }

    impl ScriptedProvider {
        pub fn new() -> Self {
            Self::default()
        }

        /// Answer `reply` once for `date`, ahead of any fallback.
        pub fn once(self, date: NaiveDate, reply: Reply) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .entry(date)
                .or_default()
                .queued
                .push_back(reply);
            self
        }

        /// Answer `reply` for `date` whenever nothing is queued.
        pub fn always(self, date: NaiveDate, reply: Reply) -> Self {
            self.scripts.lock().unwrap().entry(date).or_default().fallback = Some(reply);
            self
        }

        pub fn games(self, date: NaiveDate, records: Vec<GameRecord>) -> Self {
            self.always(date, Ok(DayBoxScores::Games(records)))
        }

        /// Sleep for `delay` before answering for `date`.
        pub fn stall(self, date: NaiveDate, delay: Duration) -> Self {
            *self.stall.lock().unwrap() = Some((date, delay));
            self
        }

        pub fn calls(&self, date: NaiveDate) -> u32 {
            self.scripts.lock().unwrap().get(&date).map_or(0, |s| s.calls)
        }
    }

    #[async_trait]
    impl BoxScoreProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn fetch_day(&self, date: NaiveDate) -> Result<DayBoxScores, ProviderError> {
            let stall = *self.stall.lock().unwrap();
            if let Some((stall_date, delay)) = stall {
                if stall_date == date {
                    tokio::time::sleep(delay).await;
                }
            }
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts.entry(date).or_default();
            script.calls += 1;
            script
                .queued
                .pop_front()
                .or_else(|| script.fallback.clone())
                .unwrap_or(Ok(DayBoxScores::NoGames))
        }
    }
}
