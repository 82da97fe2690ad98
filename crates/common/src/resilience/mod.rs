//! Resilience patterns for outbound pipeline calls
//!
//! This module provides:
//! - **Retry Policy**: exponential backoff around a single fallible operation,
//!   driven by failure classification
//! - **Retry Scope**: the same backoff for blocks that decide themselves
//!   whether to retry
//! - **Circuit Breaker**: fails fast once a dependency keeps failing, and
//!   probes it again after a recovery window
//! - **Guard**: retry composed around an optional circuit breaker
//!
//! Everything is generic over the caller's error type through
//! [`ErrorClassification`](crate::error::ErrorClassification); wrappers return
//! the underlying failure unchanged. The only failures they create are the
//! breaker-open rejection and retry-scope exhaustion, injected through
//! `From<CircuitOpenError>` and `From<AttemptsExhausted>`.
//!
//! ## Composition
//!
//! ```rust
//! use std::time::Duration;
//!
//! use clipforge_common::error::PipelineError;
//! use clipforge_common::resilience::{
//!     CircuitBreaker, CircuitBreakerConfig, Guard, RetryConfig, RetryPolicy,
//! };
//!
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::builder().name("voice").failure_threshold(3).build().unwrap(),
//! )
//! .unwrap();
//! let retry = RetryPolicy::<PipelineError>::new(
//!     RetryConfig::builder().initial_delay(Duration::from_millis(1)).build().unwrap(),
//! )
//! .unwrap();
//!
//! let guard = Guard::new(retry).with_breaker(breaker);
//! let audio = guard.call(|| Ok::<_, PipelineError>(vec![0u8; 4]));
//! assert_eq!(audio.unwrap().len(), 4);
//! ```

pub mod circuit_breaker;
pub mod clock;
pub mod guard;
pub mod retry;
pub mod scope;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitState,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use guard::Guard;
pub use retry::{ExponentialBackoff, RetryConfig, RetryConfigBuilder, RetryHook, RetryPolicy};
pub use scope::{RetryScope, Step};
