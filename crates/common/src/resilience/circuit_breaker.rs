//! Three-state circuit breaker for outbound dependencies
//!
//! A breaker counts consecutive breaker-relevant failures. Once the count
//! reaches `failure_threshold` it opens and rejects calls without invoking
//! them. After `recovery_timeout` the next caller becomes the single
//! half-open probe: success closes the breaker, a relevant failure reopens it.
//!
//! The breaker is generic over the caller's error type. It classifies errors
//! through [`ErrorClassification`] and produces its own rejection through
//! `E: From<CircuitOpenError>`, so the underlying failure is always returned
//! to the caller unchanged.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use super::clock::{Clock, SystemClock};
use crate::error::{CircuitOpenError, ConfigError, ConfigResult, ErrorClassification, FailureKind};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, admitting a single probe
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Name of the protected dependency, used in logs and rejections
    pub name: String,
    /// Number of consecutive relevant failures before opening the circuit
    pub failure_threshold: u32,
    /// Time to wait after the last failure before admitting a probe
    pub recovery_timeout: Duration,
    /// Failure kinds counted toward the threshold
    pub relevant_kinds: Vec<FailureKind>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            relevant_kinds: FailureKind::api_family(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold", "must be greater than 0"));
        }

        if self.recovery_timeout.is_zero() {
            return Err(ConfigError::invalid("recovery_timeout", "must be greater than 0"));
        }

        Ok(())
    }

    /// Whether `kind` counts toward the failure threshold
    pub fn is_relevant(&self, kind: FailureKind) -> bool {
        self.relevant_kinds.contains(&kind)
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    /// Replace the set of breaker-relevant kinds
    pub fn relevant_kinds<I: IntoIterator<Item = FailureKind>>(mut self, kinds: I) -> Self {
        self.config.relevant_kinds = kinds.into_iter().collect();
        self
    }

    /// Add one kind to the breaker-relevant set
    pub fn relevant_kind(mut self, kind: FailureKind) -> Self {
        if !self.config.relevant_kinds.contains(&kind) {
            self.config.relevant_kinds.push(kind);
        }
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Circuit breaker metrics for monitoring
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<Instant>,
    /// Calls admitted to the operation
    pub total_calls: u64,
    /// Calls rejected without invoking the operation
    pub rejected_calls: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    probe_in_flight: bool,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            probe_in_flight: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// Generic circuit breaker implementation
///
/// Clones share state, so one breaker can guard a dependency across tasks.
/// All transitions happen under a single lock that is never held while the
/// protected operation runs.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: Arc<CircuitBreakerConfig>,
    inner: Arc<Mutex<BreakerState>>,
    total_calls: Arc<AtomicU64>,
    rejected_calls: Arc<AtomicU64>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.config.name)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            inner: Arc::clone(&self.inner),
            total_calls: Arc::clone(&self.total_calls),
            rejected_calls: Arc::clone(&self.rejected_calls),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker using the system clock
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;

        Ok(Self {
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(BreakerState::new())),
            total_calls: Arc::new(AtomicU64::new(0)),
            rejected_calls: Arc::new(AtomicU64::new(0)),
            clock: Arc::new(clock),
        })
    }

    /// Breaker configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Name of the protected dependency
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Execute an async operation with circuit breaker protection
    ///
    /// Dropping the returned future while a half-open probe is running
    /// releases the probe slot without changing state.
    #[instrument(skip(self, operation), fields(breaker = %self.config.name))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ErrorClassification + From<CircuitOpenError>,
    {
        let permit = self.admit()?;
        let result = operation().await;
        self.settle(permit, result)
    }

    /// Execute a synchronous operation with circuit breaker protection
    #[instrument(skip(self, operation), fields(breaker = %self.config.name))]
    pub fn call<F, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: ErrorClassification + From<CircuitOpenError>,
    {
        let permit = self.admit()?;
        let result = operation();
        self.settle(permit, result)
    }

    /// Get the current state of the circuit breaker
    ///
    /// Reporting only; an expired OPEN window is not promoted to HALF_OPEN
    /// until a call arrives.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Get circuit breaker metrics
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        CircuitBreakerMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_time: inner.last_failure_time,
            total_calls: self.total_calls.load(Ordering::Acquire),
            rejected_calls: self.rejected_calls.load(Ordering::Acquire),
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let from = inner.state;
        *inner = BreakerState::new();
        drop(inner);
        self.total_calls.store(0, Ordering::Release);
        self.rejected_calls.store(0, Ordering::Release);
        info!(breaker = %self.config.name, from = %from, "circuit breaker manually reset");
    }

    fn admit(&self) -> Result<Permit<'_, C>, CircuitOpenError> {
        let mut inner = self.inner.lock();

        let admission = match inner.state {
            CircuitState::Closed => Admission::Normal,
            CircuitState::Open => {
                let now = self.clock.now();
                let elapsed = inner
                    .last_failure_time
                    .map_or(self.config.recovery_timeout, |t| now.saturating_duration_since(t));

                if elapsed < self.config.recovery_timeout {
                    drop(inner);
                    return Err(self.reject(Some(self.config.recovery_timeout - elapsed)));
                }

                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.probe_in_flight = true;
                Admission::Probe
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    drop(inner);
                    return Err(self.reject(None));
                }
                inner.probe_in_flight = true;
                Admission::Probe
            }
        };
        drop(inner);

        self.total_calls.fetch_add(1, Ordering::Relaxed);
        Ok(Permit { breaker: self, admission, settled: false })
    }

    fn reject(&self, retry_in: Option<Duration>) -> CircuitOpenError {
        self.rejected_calls.fetch_add(1, Ordering::Relaxed);
        debug!(
            breaker = %self.config.name,
            retry_in_ms = retry_in.map(|d| d.as_millis() as u64),
            "circuit breaker rejecting call"
        );
        CircuitOpenError { service: self.config.name.clone(), retry_in }
    }

    fn settle<T, E>(&self, mut permit: Permit<'_, C>, result: Result<T, E>) -> Result<T, E>
    where
        E: ErrorClassification,
    {
        permit.settled = true;
        match &result {
            Ok(_) => self.record_success(permit.admission),
            Err(error) => {
                let kind = error.failure_kind();
                self.record_failure(permit.admission, kind, self.config.is_relevant(kind));
            }
        }
        result
    }

    fn record_success(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        match admission {
            Admission::Probe => {
                inner.probe_in_flight = false;
                inner.failure_count = 0;
                self.transition(&mut inner, CircuitState::Closed);
            }
            Admission::Normal => {
                // A concurrent failure may have opened the breaker since this
                // call was admitted; that decision stands.
                if inner.state == CircuitState::Closed {
                    inner.failure_count = 0;
                }
            }
        }
    }

    fn record_failure(&self, admission: Admission, kind: FailureKind, relevant: bool) {
        let mut inner = self.inner.lock();

        if !relevant {
            if admission == Admission::Probe {
                inner.probe_in_flight = false;
            }
            debug!(breaker = %self.config.name, kind = %kind, "failure not breaker-relevant");
            return;
        }

        let now = self.clock.now();
        match admission {
            Admission::Probe => {
                inner.probe_in_flight = false;
                inner.last_failure_time = Some(now);
                self.transition(&mut inner, CircuitState::Open);
            }
            Admission::Normal if inner.state == CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.last_failure_time = Some(now);
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            Admission::Normal => {}
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;

        if to == CircuitState::Open {
            warn!(
                breaker = %self.config.name,
                from = %from,
                to = %to,
                failure_count = inner.failure_count,
                "circuit breaker opened"
            );
        } else {
            info!(
                breaker = %self.config.name,
                from = %from,
                to = %to,
                failure_count = inner.failure_count,
                "circuit breaker state change"
            );
        }
    }
}

/// Admission ticket for one call; releases an unsettled probe slot on drop
struct Permit<'a, C: Clock> {
    breaker: &'a CircuitBreaker<C>,
    admission: Admission,
    settled: bool,
}

impl<C: Clock> Drop for Permit<'_, C> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Probe {
            self.breaker.inner.lock().probe_in_flight = false;
            debug!(breaker = %self.breaker.config.name, "probe abandoned, slot released");
        }
    }
}
