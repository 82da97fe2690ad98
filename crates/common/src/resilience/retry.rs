//! Exponential-backoff retry policy
//!
//! [`RetryPolicy`] wraps a fallible operation and re-invokes it on failures
//! whose [`FailureKind`] is in the configured retryable set. Classification
//! happens before any timing logic: a non-retryable failure is returned on the
//! spot, without a delay or a hook call.
//!
//! Attempts are numbered from 1. The delay after attempt `n` is
//! `min(initial_delay * exponential_base^(n-1), max_delay)`. A rate-limit
//! failure carrying a server-suggested wait raises that delay to at least the
//! suggested value; it never shortens it.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use clipforge_common::error::PipelineError;
//! use clipforge_common::resilience::{RetryConfig, RetryPolicy};
//!
//! let config = RetryConfig::builder()
//!     .max_attempts(3)
//!     .initial_delay(Duration::from_millis(1))
//!     .build()
//!     .unwrap();
//! let policy = RetryPolicy::<PipelineError>::new(config).unwrap();
//!
//! let mut calls = 0;
//! let result = policy.call(|| {
//!     calls += 1;
//!     if calls < 3 {
//!         Err(PipelineError::api("flaky"))
//!     } else {
//!         Ok(calls)
//!     }
//! });
//! assert_eq!(result.unwrap(), 3);
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::error::{ConfigError, ConfigResult, ErrorClassification, FailureKind};

/// Exponential backoff schedule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Upper bound for any computed delay
    pub max_delay: Duration,
    /// Growth factor between consecutive attempts
    pub exponential_base: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
        }
    }
}

impl ExponentialBackoff {
    /// Delay to wait after the given 1-based attempt failed
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total number of attempts, including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    /// Failure kinds that trigger another attempt
    pub retryable_kinds: Vec<FailureKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let backoff = ExponentialBackoff::default();
        Self {
            max_attempts: 3,
            initial_delay: backoff.initial_delay,
            max_delay: backoff.max_delay,
            exponential_base: backoff.exponential_base,
            retryable_kinds: FailureKind::api_family(),
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Backoff schedule described by this configuration
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            exponential_base: self.exponential_base,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }

        if self.initial_delay.is_zero() {
            return Err(ConfigError::invalid("initial_delay", "must be greater than 0"));
        }

        if self.max_delay.is_zero() {
            return Err(ConfigError::invalid("max_delay", "must be greater than 0"));
        }

        if !self.exponential_base.is_finite() || self.exponential_base < 1.0 {
            return Err(ConfigError::invalid(
                "exponential_base",
                format!("must be a finite number >= 1.0, got {}", self.exponential_base),
            ));
        }

        Ok(())
    }
}

/// Builder for RetryConfig
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.config.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn exponential_base(mut self, base: f64) -> Self {
        self.config.exponential_base = base;
        self
    }

    /// Replace the retryable kinds
    pub fn retryable_kinds<I: IntoIterator<Item = FailureKind>>(mut self, kinds: I) -> Self {
        self.config.retryable_kinds = kinds.into_iter().collect();
        self
    }

    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Callback invoked with `(failure, attempt)` before each backoff sleep
pub type RetryHook<E> = Arc<dyn Fn(&E, u32) + Send + Sync>;

/// Retry policy over an error type classified by [`ErrorClassification`]
pub struct RetryPolicy<E> {
    config: RetryConfig,
    on_retry: Option<RetryHook<E>>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self { config: self.config.clone(), on_retry: self.on_retry.clone() }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl<E: ErrorClassification> RetryPolicy<E> {
    /// Create a policy from a validated configuration
    pub fn new(config: RetryConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config, on_retry: None })
    }

    /// Register a hook fired before every backoff sleep
    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(&E, u32) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Policy configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Whether `error` is in the retryable set
    pub fn is_retryable(&self, error: &E) -> bool {
        self.config.retryable_kinds.contains(&error.failure_kind())
    }

    /// Delay to wait after `attempt` failed with `error`
    pub fn delay_for(&self, attempt: u32, error: &E) -> Duration {
        let delay = self.config.backoff().delay(attempt);
        match (error.failure_kind(), error.retry_after()) {
            (FailureKind::RateLimit, Some(retry_after)) => delay.max(retry_after),
            _ => delay,
        }
    }

    /// Execute an async operation, sleeping on the tokio timer between
    /// attempts
    #[instrument(skip(self, operation), fields(max_attempts = self.config.max_attempts))]
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => {
                    self.log_success(attempt);
                    return Ok(value);
                }
                Err(error) => {
                    let delay = self.on_failure(attempt, error)?;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Execute a synchronous operation, blocking the thread between attempts
    #[instrument(skip(self, operation), fields(max_attempts = self.config.max_attempts))]
    pub fn call<F, T>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
    {
        let mut attempt = 1;
        loop {
            match operation() {
                Ok(value) => {
                    self.log_success(attempt);
                    return Ok(value);
                }
                Err(error) => {
                    let delay = self.on_failure(attempt, error)?;
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }

    /// Turn `operation` into a re-callable function that retries each call
    pub fn wrap<A, T, F>(self, operation: F) -> impl Fn(&A) -> Result<T, E>
    where
        F: Fn(&A) -> Result<T, E>,
    {
        move |args: &A| self.call(|| operation(args))
    }

    /// Decide what happens after `attempt` failed: the delay before the next
    /// attempt, or the failure itself when it must propagate.
    fn on_failure(&self, attempt: u32, error: E) -> Result<Duration, E> {
        let kind = error.failure_kind();

        if !self.is_retryable(&error) {
            debug!(attempt, kind = %kind, "failure not retryable");
            return Err(error);
        }

        if attempt >= self.config.max_attempts {
            warn!(attempt, max_attempts = self.config.max_attempts, kind = %kind, "retries exhausted");
            return Err(error);
        }

        let delay = self.delay_for(attempt, &error);
        warn!(
            attempt,
            max_attempts = self.config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            kind = %kind,
            "attempt failed, retrying"
        );

        if let Some(hook) = &self.on_retry {
            hook(&error, attempt);
        }

        Ok(delay)
    }

    fn log_success(&self, attempt: u32) {
        if attempt > 1 {
            debug!(attempt, "operation succeeded after retry");
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the retry policy
    //!
    //! Timing tests run on a paused tokio clock so backoff sleeps complete
    //! instantly while `Instant` still reports the virtual delay.

    use std::sync::atomic::{AtomicU32, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::error::PipelineError;

    fn config(max_attempts: u32) -> RetryConfig {
        RetryConfig::builder()
            .max_attempts(max_attempts)
            .initial_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(60))
            .exponential_base(2.0)
            .build()
            .unwrap()
    }

    /// Validates `ExponentialBackoff::delay` growth and saturation.
    ///
    /// Assertions:
    /// - Confirms delays of 1s, 2s, 4s for attempts 1..=3.
    /// - Confirms the delay saturates at `max_delay`.
    #[test]
    fn test_backoff_schedule() {
        let backoff = ExponentialBackoff {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            exponential_base: 2.0,
        };

        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(3), Duration::from_secs(4));
        assert_eq!(backoff.delay(5), Duration::from_secs(10));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_fractional_base() {
        let backoff = ExponentialBackoff {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            exponential_base: 1.5,
        };
        assert_eq!(backoff.delay(3), Duration::from_millis(225));
    }

    #[test]
    fn test_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(60));
        assert!((config.exponential_base - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.retryable_kinds, FailureKind::api_family());
    }

    /// Validates `RetryConfig::validate` for out-of-range values.
    ///
    /// Assertions:
    /// - Ensures zero attempts, zero delays and a sub-1.0 or NaN base are
    ///   rejected.
    #[test]
    fn test_config_validation() {
        assert!(RetryConfig::builder().max_attempts(0).build().is_err());
        assert!(RetryConfig::builder().initial_delay(Duration::ZERO).build().is_err());
        assert!(RetryConfig::builder().max_delay(Duration::ZERO).build().is_err());
        assert!(RetryConfig::builder().exponential_base(0.5).build().is_err());
        assert!(RetryConfig::builder().exponential_base(f64::NAN).build().is_err());
        assert!(RetryConfig::builder().exponential_base(1.0).build().is_ok());
    }

    #[test]
    fn test_delay_for_rate_limit_override() {
        let policy = RetryPolicy::<PipelineError>::new(config(3)).unwrap();

        let short = PipelineError::rate_limit("slow").with_retry_after(Duration::from_millis(10));
        assert_eq!(policy.delay_for(1, &short), Duration::from_secs(1));

        let long = PipelineError::rate_limit("slow").with_retry_after(Duration::from_secs(30));
        assert_eq!(policy.delay_for(1, &long), Duration::from_secs(30));

        let api = PipelineError::api("5xx").with_retry_after(Duration::from_secs(30));
        assert_eq!(policy.delay_for(1, &api), Duration::from_secs(1));
    }

    /// Validates invocation counts for `n` failures followed by success.
    ///
    /// Assertions:
    /// - Confirms the operation runs `min(n + 1, max_attempts)` times.
    /// - Ensures success is returned iff `n < max_attempts`.
    #[test]
    fn test_invocation_counts() {
        let max_attempts = 4;
        for failures in 0..=max_attempts {
            let policy = RetryPolicy::<PipelineError>::new(
                RetryConfig::builder()
                    .max_attempts(max_attempts)
                    .initial_delay(Duration::from_millis(1))
                    .max_delay(Duration::from_millis(1))
                    .build()
                    .unwrap(),
            )
            .unwrap();

            let calls = AtomicU32::new(0);
            let result = policy.call(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < failures {
                    Err(PipelineError::timeout("slow upstream"))
                } else {
                    Ok(n)
                }
            });

            assert_eq!(calls.load(Ordering::SeqCst), (failures + 1).min(max_attempts));
            assert_eq!(result.is_ok(), failures < max_attempts);
        }
    }

    #[test]
    fn test_non_retryable_short_circuits() {
        let hook_calls = Arc::new(AtomicU32::new(0));
        let hook_counter = Arc::clone(&hook_calls);
        let policy = RetryPolicy::<PipelineError>::new(config(5))
            .unwrap()
            .on_retry(move |_, _| {
                hook_counter.fetch_add(1, Ordering::SeqCst);
            });

        let calls = AtomicU32::new(0);
        let err = policy
            .call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(PipelineError::validation("empty prompt"))
            })
            .unwrap_err();

        assert_eq!(err.kind(), FailureKind::Validation);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_max_attempts_one_never_retries() {
        let policy = RetryPolicy::<PipelineError>::new(config(1)).unwrap();
        let calls = AtomicU32::new(0);
        let result = policy.call(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(PipelineError::api("down"))
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Validates that the final failure propagates unchanged.
    ///
    /// Assertions:
    /// - Confirms the returned error is the last underlying failure.
    #[test]
    fn test_last_failure_propagates_unchanged() {
        let policy = RetryPolicy::<PipelineError>::new(
            RetryConfig::builder().max_attempts(2).initial_delay(Duration::from_millis(1)).build().unwrap(),
        )
        .unwrap();

        let calls = AtomicU32::new(0);
        let err = policy
            .call(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(PipelineError::api(format!("failure {n}")).with_detail("n", n))
            })
            .unwrap_err();

        assert_eq!(err.message(), "failure 1");
        assert_eq!(err.details()["n"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_sleeps_backoff() {
        let policy = RetryPolicy::<PipelineError>::new(config(3)).unwrap();
        let start = tokio::time::Instant::now();

        let calls = AtomicU32::new(0);
        let result = policy
            .execute(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(PipelineError::api("flaky"))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4));
    }

    /// Validates the rate-limit override during execution.
    ///
    /// Assertions:
    /// - Ensures the observed delay before attempt 2 is at least
    ///   `retry_after`.
    #[tokio::test(start_paused = true)]
    async fn test_execute_honours_retry_after() {
        let policy = RetryPolicy::<PipelineError>::new(config(2)).unwrap();
        let stamps = Mutex::new(Vec::new());

        let _ = policy
            .execute(|| async {
                stamps.lock().push(tokio::time::Instant::now());
                Err::<(), _>(
                    PipelineError::rate_limit("429").with_retry_after(Duration::from_secs(7)),
                )
            })
            .await;

        let stamps = stamps.lock();
        assert_eq!(stamps.len(), 2);
        assert!(stamps[1] - stamps[0] >= Duration::from_secs(7));
    }

    #[test]
    fn test_hook_sees_attempt_numbers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let policy = RetryPolicy::<PipelineError>::new(
            RetryConfig::builder().max_attempts(3).initial_delay(Duration::from_millis(1)).build().unwrap(),
        )
        .unwrap()
        .on_retry(move |err: &PipelineError, attempt| sink.lock().push((err.kind(), attempt)));

        let _ = policy.call(|| Err::<(), _>(PipelineError::authentication("expired")));

        assert_eq!(
            *seen.lock(),
            vec![(FailureKind::Authentication, 1), (FailureKind::Authentication, 2)]
        );
    }

    #[test]
    fn test_wrap_reusable() {
        let policy = RetryPolicy::<PipelineError>::new(
            RetryConfig::builder().initial_delay(Duration::from_millis(1)).build().unwrap(),
        )
        .unwrap();

        let calls = AtomicU32::new(0);
        let double = policy.wrap(|x: &u32| {
            if calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                Err(PipelineError::api("every other call fails"))
            } else {
                Ok(x * 2)
            }
        });

        assert_eq!(double(&4).unwrap(), 8);
        assert_eq!(double(&5).unwrap(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
