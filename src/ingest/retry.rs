//! Bounded exponential backoff for provider calls.
//!
//! Only `ProviderError::Transient` failures are retried. The delay before
//! attempt `n + 1` is `min(base * 2^(n-1), max)`, optionally stretched by up
//! to 25 % random jitter.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::ProviderError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one (at least 1)
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

/// The last error seen and how many attempts were spent getting it.
#[derive(Debug, Clone, PartialEq)]
pub struct GaveUp {
    pub error: ProviderError,
    pub attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Backoff before the next attempt, given how many attempts were made.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        let exp = attempts_made.saturating_sub(1).min(20);
        let delay = self.base_delay.saturating_mul(1u32 << exp).min(self.max_delay);
        if self.jitter {
            let extra_ms = (delay.as_millis() / 4) as u64;
            delay + Duration::from_millis(rand::thread_rng().gen_range(0..=extra_ms))
        } else {
            delay
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, GaveUp>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempts < max_attempts => {
                    let delay = self.delay_for(attempts);
                    warn!(
                        "[{}] attempt {}/{} failed: {}; retrying in {:?}",
                        label, attempts, max_attempts, error, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(GaveUp { error, attempts }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: false,
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
            jitter: false,
        };
        assert_eq!(p.delay_for(1), Duration::from_millis(500));
        assert_eq!(p.delay_for(2), Duration::from_millis(1000));
        assert_eq!(p.delay_for(3), Duration::from_millis(2000));
        assert_eq!(p.delay_for(4), Duration::from_secs(3));
        assert_eq!(p.delay_for(60), Duration::from_secs(3));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let p = RetryPolicy {
            jitter: true,
            ..RetryPolicy::default()
        };
        for _ in 0..50 {
            let d = p.delay_for(1);
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(625));
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = policy(5)
            .run("test", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::Transient("timeout".into()))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_is_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = policy(5)
            .run("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Permanent("bad schema".into()))
            })
            .await;
        let gave_up = result.unwrap_err();
        assert_eq!(gave_up.attempts, 1);
        assert!(!gave_up.error.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = policy(3)
            .run("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Transient("429".into()))
            })
            .await;
        let gave_up = result.unwrap_err();
        assert_eq!(gave_up.attempts, 3);
        assert!(gave_up.error.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
