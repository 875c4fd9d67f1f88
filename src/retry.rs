//! Retry with exponential backoff for transient write failures.
//!
//! Only errors that [`SyncError::is_transient`] accepts are retried: a
//! constraint violation fails the same way every time, while a dropped
//! connection or an expired deadline may not.
//!
//! # Example
//!
//! ```
//! use chat_sync::RetryConfig;
//! use std::time::Duration;
//!
//! let config = RetryConfig::event();
//! assert_eq!(config.max_retries, 3);
//! assert_eq!(config.delay_for(0), Duration::from_millis(100));
//! assert_eq!(config.delay_for(10), Duration::from_secs(5));
//! ```

use std::future::Future;
use std::time::Duration;

use sync_core::{SyncError, SyncResult};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Backoff schedule for one unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Retries after the first attempt; `0` disables retrying.
    pub max_retries: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::event()
    }
}

impl RetryConfig {
    /// Per-event and per-page writes: 100ms doubling up to 5s, three retries.
    #[must_use]
    pub fn event() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            factor: 2.0,
            max_retries: 3,
        }
    }

    /// Millisecond delays for tests.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
            max_retries: 3,
        }
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn delay_for(&self, retry: usize) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * self.factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(scaled)
        }
    }
}

/// Result of [`retry_transient`] with the number of attempts made.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: SyncResult<T>,
    pub attempts: usize,
}

/// Run `operation` until it succeeds, fails permanently, or runs out of retries.
///
/// Backoff sleeps end early with [`SyncError::Cancelled`] when `cancel` fires.
pub async fn retry_transient<F, Fut, T>(
    operation_name: &str,
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;
        let err = match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    info!(
                        "Operation '{}' succeeded after {} retries",
                        operation_name,
                        attempts - 1
                    );
                }
                return Attempted {
                    result: Ok(value),
                    attempts,
                };
            }
            Err(err) => err,
        };

        let retries_used = attempts - 1;
        if !err.is_transient() || retries_used >= config.max_retries {
            return Attempted {
                result: Err(err),
                attempts,
            };
        }

        let delay = config.delay_for(retries_used);
        warn!(
            "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
            operation_name,
            attempts,
            config.max_retries + 1,
            err,
            delay
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                return Attempted {
                    result: Err(SyncError::Cancelled),
                    attempts,
                };
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_delay_schedule_doubles_and_caps() {
        let config = RetryConfig::event();
        assert_eq!(config.delay_for(0), Duration::from_millis(100));
        assert_eq!(config.delay_for(1), Duration::from_millis(200));
        assert_eq!(config.delay_for(2), Duration::from_millis(400));
        assert_eq!(config.delay_for(6), Duration::from_secs(5));
        assert_eq!(config.delay_for(usize::MAX), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_transient_error_is_retried_until_success() {
        let calls = &AtomicUsize::new(0);
        let outcome = retry_transient(
            "write",
            &RetryConfig::fast(),
            &CancellationToken::new(),
            || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SyncError::transient_destination("connection reset"))
                } else {
                    Ok("done")
                }
            },
        )
        .await;

        assert_eq!(outcome.result.unwrap(), "done");
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = &AtomicUsize::new(0);
        let outcome: Attempted<()> = retry_transient(
            "write",
            &RetryConfig::fast(),
            &CancellationToken::new(),
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::destination("foreign key violation"))
            },
        )
        .await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let outcome: Attempted<()> = retry_transient(
            "write",
            &RetryConfig::fast().with_max_retries(2),
            &CancellationToken::new(),
            || async { Err(SyncError::Timeout("commit".into())) },
        )
        .await;

        assert!(matches!(outcome.result, Err(SyncError::Timeout(_))));
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let config = RetryConfig {
            initial_delay: Duration::from_secs(60),
            ..RetryConfig::event()
        };

        let outcome: Attempted<()> = retry_transient("write", &config, &cancel, || async {
            Err(SyncError::transient_destination("connection reset"))
        })
        .await;

        assert!(matches!(outcome.result, Err(SyncError::Cancelled)));
    }
}
