//! Exponential backoff for engine calls
//!
//! The ksqlDB command topic lags behind statement submission, servers restart
//! and REST proxies answer 503 while rebalancing. Calls that fail with a
//! [`Retryable`] error are repeated on a doubling schedule:
//!
//! ```text
//! try 1 ── initial ── try 2 ── initial·m ── try 3 ── initial·m² ── ... (≤ max_backoff)
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

/// Errors that know whether repeating the failed call can help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// How often and how patiently a call is repeated.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Repeats after the first try; zero means a single try
    pub max_retries: usize,
    /// Delay before the first repeat
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(5, Duration::from_millis(500), Duration::from_secs(30), 2.0)
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: usize,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
        }
    }

    /// A single try, no repeats.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before repeat number `retry` (0 is the first repeat).
    ///
    /// ```
    /// use std::time::Duration;
    /// use tumbler_ksql::RetryPolicy;
    ///
    /// let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1), 2.0);
    /// assert_eq!(policy.backoff(0), Duration::from_millis(100));
    /// assert_eq!(policy.backoff(2), Duration::from_millis(400));
    /// assert_eq!(policy.backoff(10), Duration::from_secs(1));
    /// ```
    pub fn backoff(&self, retry: usize) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let scaled = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        // rounding through milliseconds keeps the schedule exact for whole-ms inputs
        Duration::from_millis((scaled * 1000.0).round() as u64)
    }
}

/// Run `call` until it succeeds, fails with a non-retryable error, or the
/// policy's repeats are spent; the last error is returned in the latter two
/// cases.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: &RetryPolicy, mut call: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut retries = 0;
    loop {
        let err = match call().await {
            Ok(value) => {
                if retries > 0 {
                    debug!(tries = retries + 1, "Engine call recovered");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            debug!(error = %err, "Engine call failed permanently");
            return Err(err);
        }
        if retries == policy.max_retries {
            warn!(tries = retries + 1, error = %err, "Engine call still failing, out of retries");
            return Err(err);
        }

        let delay = policy.backoff(retries);
        warn!(
            retry = retries + 1,
            of = policy.max_retries,
            backoff_ms = delay.as_millis() as u64,
            error = %err,
            "Engine call failed, retrying"
        );
        sleep(delay).await;
        retries += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug, PartialEq)]
    enum EngineFailure {
        CommandTopicTimeout,
        SyntaxError,
    }

    impl Display for EngineFailure {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                EngineFailure::CommandTopicTimeout => f.write_str("timeout while waiting for command topic"),
                EngineFailure::SyntaxError => f.write_str("line 1:8: mismatched input"),
            }
        }
    }

    impl Retryable for EngineFailure {
        fn is_retryable(&self) -> bool {
            *self == EngineFailure::CommandTopicTimeout
        }
    }

    fn quick(max_retries: usize) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(50), Duration::from_millis(300), 2.0)
    }

    // ========================================================================
    // Schedule
    // ========================================================================

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        let delays: Vec<u128> = (0..8).map(|r| policy.backoff(r).as_millis()).collect();
        assert_eq!(delays, vec![500, 1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000]);
    }

    #[test]
    fn test_schedule_is_capped_for_huge_retry_counts() {
        let policy = quick(3);
        assert_eq!(policy.backoff(3), Duration::from_millis(300));
        assert_eq!(policy.backoff(usize::MAX), Duration::from_millis(300));
    }

    #[test]
    fn test_none_never_repeats() {
        assert_eq!(RetryPolicy::none().max_retries, 0);
    }

    // ========================================================================
    // retry_with_backoff
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_recovers_once_command_topic_catches_up() {
        let tries = Cell::new(0);
        let result = retry_with_backoff(&quick(4), || {
            tries.set(tries.get() + 1);
            let outcome = if tries.get() < 3 {
                Err(EngineFailure::CommandTopicTimeout)
            } else {
                Ok("Table created")
            };
            async move { outcome }
        })
        .await;
        assert_eq!(result, Ok("Table created"));
        assert_eq!(tries.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_syntax_error_is_not_repeated() {
        let tries = Cell::new(0);
        let result: Result<(), _> = retry_with_backoff(&quick(4), || {
            tries.set(tries.get() + 1);
            async { Err(EngineFailure::SyntaxError) }
        })
        .await;
        assert_eq!(result, Err(EngineFailure::SyntaxError));
        assert_eq!(tries.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let tries = Cell::new(0);
        let start = tokio::time::Instant::now();
        let result: Result<(), _> = retry_with_backoff(&quick(2), || {
            tries.set(tries.get() + 1);
            async { Err(EngineFailure::CommandTopicTimeout) }
        })
        .await;
        assert_eq!(result, Err(EngineFailure::CommandTopicTimeout));
        assert_eq!(tries.get(), 3);
        // 50ms + 100ms of backoff
        assert!(start.elapsed() >= Duration::from_millis(150));
    }
}
