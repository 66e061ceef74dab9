//! # Retry
//!
//! Bounded retries with randomized exponential backoff for outbound calls.
//! Only errors that report themselves transient are retried; the jitter
//! keeps concurrent sub-units from retrying in lockstep.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::config::RetrySettings;

/// Errors that can say whether another attempt might succeed
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

/// Attempt bound and backoff window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Retries without sleeping (tests)
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before the attempt following `attempt` (1-based): uniform in
    /// `[base, min(max, base * 2^(attempt-1))]`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = 2u32.saturating_pow(attempt.saturating_sub(1));
        let ceiling = self.base_delay.saturating_mul(exp).min(self.max_delay);
        let floor = self.base_delay.min(ceiling);
        if ceiling <= floor {
            return ceiling;
        }
        let millis = rand::rng().random_range(floor.as_millis()..=ceiling.as_millis());
        Duration::from_millis(millis as u64)
    }
}

/// Run `op` until it succeeds, fails non-transiently, or attempts run out
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    what,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, retrying: {}",
                    e
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Flaky,
        Broken,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl Retryable for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, TestError::Flaky)
        }
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestError> = with_retry(&RetryPolicy::immediate(4), "op", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TestError::Flaky)
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = with_retry(&RetryPolicy::immediate(4), "op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TestError::Flaky)
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_fatal_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = with_retry(&RetryPolicy::immediate(4), "op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TestError::Broken)
        })
        .await;

        assert!(matches!(result, Err(TestError::Broken)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_window() {
        let policy = RetryPolicy::default();
        for attempt in 1..8 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= Duration::from_secs(1), "attempt {}: {:?}", attempt, delay);
            assert!(delay <= Duration::from_secs(30), "attempt {}: {:?}", attempt, delay);
        }
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
    }
}
