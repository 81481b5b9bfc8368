//! Retry logic for transient collaborator failures.
//!
//! Advisory calls (AI flows, geocoding, crop validation) occasionally fail with
//! a transient overload error. Rather than re-specifying a retry loop at every
//! call site, the policy lives here once: a bounded number of attempts with a
//! configurable backoff, plus a predicate variant for callers that must only
//! retry a specific error class.
//!
//! # Example
//!
//! ```rust
//! use farmstead_runtime::retry::{RetryPolicy, retry_with_backoff};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::new()
//!     .with_max_attempts(3)
//!     .with_initial_delay(Duration::from_millis(500));
//!
//! let result = retry_with_backoff(policy, || async {
//!     // Your fallible operation here
//!     Ok::<_, String>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration.
///
/// `max_attempts` counts the initial call: a policy with `max_attempts = 3`
/// makes at most two retries. The delay between attempts grows by
/// `multiplier`; a multiplier of `1.0` gives a fixed backoff.
///
/// # Default Values
///
/// - `max_attempts`: 3
/// - `initial_delay`: 500ms
/// - `max_delay`: 10 seconds
/// - `multiplier`: 1.0 (fixed backoff)
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the initial call
    pub max_attempts: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for growing backoff)
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each retry
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 1.0,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of attempts (including the initial call).
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the delay before the first retry.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier (`1.0` keeps the delay fixed).
    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Calculate the delay before retry number `retry` (0-indexed).
    ///
    /// `delay = min(initial_delay * multiplier^retry, max_delay)`
    #[must_use]
    pub fn delay_for_retry(&self, retry: usize) -> Duration {
        if retry == 0 || (self.multiplier - 1.0).abs() < f64::EPSILON {
            return self.initial_delay.min(self.max_delay);
        }

        // Truncations here only round a backoff delay, which needs no precision.
        #[allow(clippy::cast_possible_truncation)]
        #[allow(clippy::cast_sign_loss)]
        #[allow(clippy::cast_precision_loss)]
        let delay_ms = (self.initial_delay.as_millis() as f64
            * self.multiplier.powi(retry as i32)) as u64;

        Duration::from_millis(delay_ms).min(self.max_delay)
    }
}

/// Retry an async operation, backing off between attempts.
///
/// Every error is treated as retryable; use [`retry_with_predicate`] when only
/// a transient error class should be retried.
///
/// # Errors
///
/// Returns the last error once `policy.max_attempts` attempts are exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_predicate(policy, operation, |_| true).await
}

/// Retry an async operation, but only when `is_retryable` says so.
///
/// Non-retryable errors propagate immediately without consuming further
/// attempts; this is how collaborator calls distinguish a transient overload
/// from a permanent failure.
///
/// # Errors
///
/// Returns the error unchanged when it is not retryable, or the last error
/// once `policy.max_attempts` attempts are exhausted.
///
/// # Example
///
/// ```rust
/// use farmstead_runtime::retry::{RetryPolicy, retry_with_predicate};
///
/// # async fn example() -> Result<(), String> {
/// let result = retry_with_predicate(
///     RetryPolicy::default(),
///     || async { Ok::<_, String>(42) },
///     |err: &String| err.contains("overloaded"),
/// ).await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt: usize = 1;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::warn!(
                        error = %err,
                        "Error is not retryable, failing immediately"
                    );
                    return Err(err);
                }

                if attempt >= policy.max_attempts {
                    tracing::error!(
                        attempt,
                        error = %err,
                        "Operation failed after max attempts"
                    );
                    return Err(err);
                }

                let delay = policy.delay_for_retry(attempt - 1);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Operation failed, retrying..."
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fixed_backoff_keeps_delay_constant() {
        let policy = RetryPolicy::new().with_initial_delay(Duration::from_millis(250));

        assert_eq!(policy.delay_for_retry(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for_retry(5), Duration::from_millis(250));
    }

    #[test]
    fn growing_backoff_is_capped() {
        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_millis(1000))
            .with_multiplier(10.0)
            .with_max_delay(Duration::from_secs(2));

        assert_eq!(policy.delay_for_retry(0), Duration::from_millis(1000));
        // 1000ms * 10^5 = far beyond the cap
        assert_eq!(policy.delay_for_retry(5), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn succeeds_on_first_try_without_retrying() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let result = retry_with_backoff(RetryPolicy::default(), || {
            let c = Arc::clone(&counter_clone);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(42)
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let policy = RetryPolicy::new()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(10));

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let result = retry_with_backoff(policy, || {
            let c = Arc::clone(&counter_clone);
            async move {
                let attempt = c.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(format!("Attempt {attempt} failed"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_returns_last_error() {
        let policy = RetryPolicy::new()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(10));

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let result = retry_with_backoff(policy, || {
            let c = Arc::clone(&counter_clone);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>("Persistent failure")
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn predicate_skips_non_retryable_errors() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let result = retry_with_predicate(
            RetryPolicy::default(),
            || {
                let c = Arc::clone(&counter_clone);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>("permanent error")
                }
            },
            |err: &&str| err.contains("overloaded"),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
