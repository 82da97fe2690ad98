//! Resilience and caching layer shared by Clipforge pipeline stages.
//!
//! Stages call paid or rate-limited services (script generation, speech
//! synthesis, media search). This crate gives them one failure vocabulary,
//! retry with exponential backoff, per-service circuit breakers and a
//! persistent result cache.
//!
//! # Feature Tiers
//!
//! - `foundation`: failure taxonomy and serde helpers
//! - `observability`: `tracing` instrumentation
//! - `runtime` (default): cache, resilience, settings, telemetry and test
//!   doubles

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
pub mod utils;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod cache;
#[cfg(feature = "runtime")]
pub mod config;
#[cfg(feature = "runtime")]
pub mod resilience;
#[cfg(feature = "runtime")]
pub mod telemetry;

// Testing utilities
// ---------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod testing;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "runtime")]
pub use cache::{CacheError, CacheKey, CacheStats, CacheStore};
#[cfg(feature = "runtime")]
pub use config::ResilienceSettings;
#[cfg(feature = "foundation")]
pub use error::{
    ErrorClassification, ErrorSeverity, FailureKind, PipelineError, PipelineResult,
    StructuredFailure,
};
#[cfg(feature = "runtime")]
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, Guard, RetryConfig, RetryPolicy,
    RetryScope, Step,
};
