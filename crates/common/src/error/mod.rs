//! Failure taxonomy shared by the cache, retry and circuit breaker layers
//!
//! Every outbound call made by the content pipeline (language model requests,
//! voice synthesis, platform uploads) reports failures as a [`PipelineError`].
//! The resilience layer never inspects error *types*; it classifies failures
//! structurally through [`FailureKind`] and the [`ErrorClassification`] trait.
//!
//! # Error Handling Architecture
//!
//! 1. **`PipelineError`**: the closed set of failure variants. Each carries a
//!    human-readable message and a structured `details` map. API-family
//!    variants also carry an optional HTTP status and a server-suggested wait.
//!
//! 2. **`FailureKind`**: the fieldless discriminant used in configuration
//!    (`retryable_kinds`, breaker `relevant_kinds`) and in logs.
//!
//! 3. **`ErrorClassification`**: the interface the retry policy and circuit
//!    breaker are generic over. Callers with their own error enums implement
//!    it to plug into the same machinery.
//!
//! ## Kinds
//!
//! | Kind | Default retryable | Typical origin |
//! |------|-------------------|----------------|
//! | `Validation` | no | bad prompt, malformed script |
//! | `Api` | yes | 5xx from an upstream service |
//! | `RateLimit` | yes | 429, honours `retry_after` |
//! | `Authentication` | yes | expired token, 401/403 |
//! | `Processing` | no | a pipeline stage failed on an item |
//! | `Configuration` | no | missing key, bad settings |
//! | `Resource` | no | disk full, missing file |
//! | `Timeout` | yes | deadline exceeded |
//! | `CircuitOpen` | no | breaker rejected the call |
//! | `RetriesExhausted` | no | retry scope ran out of attempts |
//!
//! ## Examples
//!
//! ```rust
//! use std::time::Duration;
//!
//! use clipforge_common::error::{ErrorClassification, FailureKind, PipelineError};
//!
//! let err = PipelineError::rate_limit("quota exceeded")
//!     .with_status(429)
//!     .with_retry_after(Duration::from_secs(30));
//!
//! assert_eq!(err.kind(), FailureKind::RateLimit);
//! assert!(err.is_retryable());
//! assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured context attached to a failure
pub type Details = BTreeMap<String, serde_json::Value>;

/// Standard result type using PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Fieldless discriminant of a [`PipelineError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Input rejected before any external call was made
    Validation,
    /// Generic upstream API failure
    Api,
    /// Upstream throttled the caller
    RateLimit,
    /// Upstream rejected the caller's credentials
    Authentication,
    /// A pipeline stage failed while processing an item
    Processing,
    /// Settings are missing or invalid
    Configuration,
    /// A local resource (file, directory, quota) was unavailable
    Resource,
    /// The operation did not complete within its deadline
    Timeout,
    /// A circuit breaker rejected the call without invoking it
    CircuitOpen,
    /// A retry scope was asked to retry after its final attempt
    RetriesExhausted,
}

impl FailureKind {
    /// All kinds, in declaration order
    pub const ALL: [Self; 10] = [
        Self::Validation,
        Self::Api,
        Self::RateLimit,
        Self::Authentication,
        Self::Processing,
        Self::Configuration,
        Self::Resource,
        Self::Timeout,
        Self::CircuitOpen,
        Self::RetriesExhausted,
    ];

    /// Kinds that participate in retry and breaker logic by default
    pub fn api_family() -> Vec<Self> {
        vec![Self::Api, Self::RateLimit, Self::Authentication, Self::Timeout]
    }

    /// Whether this kind belongs to the API family
    pub fn is_api_family(self) -> bool {
        matches!(self, Self::Api | Self::RateLimit | Self::Authentication | Self::Timeout)
    }

    /// Stable snake_case name used in logs and structured output
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Api => "api",
            Self::RateLimit => "rate_limit",
            Self::Authentication => "authentication",
            Self::Processing => "processing",
            Self::Configuration => "configuration",
            Self::Resource => "resource",
            Self::Timeout => "timeout",
            Self::CircuitOpen => "circuit_open",
            Self::RetriesExhausted => "retries_exhausted",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures raised by pipeline operations and the resilience layer
///
/// Variants are built through the constructor functions
/// (`PipelineError::api`, `PipelineError::processing`, ...) and refined with
/// the consuming `with_*` methods. Once handed to a caller a failure is only
/// propagated, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Input validation failed
    Validation { message: String, details: Details },

    /// Upstream API returned an error
    Api {
        message: String,
        status_code: Option<u16>,
        retry_after: Option<Duration>,
        details: Details,
    },

    /// Upstream API throttled the request
    RateLimit {
        message: String,
        status_code: Option<u16>,
        retry_after: Option<Duration>,
        details: Details,
    },

    /// Upstream API rejected the credentials
    Authentication {
        message: String,
        status_code: Option<u16>,
        retry_after: Option<Duration>,
        details: Details,
    },

    /// A pipeline stage failed
    Processing {
        message: String,
        stage: Option<String>,
        item_id: Option<String>,
        details: Details,
    },

    /// Configuration is missing or invalid
    Configuration { message: String, details: Details },

    /// A local resource was unavailable
    Resource { message: String, details: Details },

    /// Operation exceeded its deadline
    Timeout { message: String, details: Details },

    /// A circuit breaker is open and rejected the call
    CircuitOpen { message: String, service: String, retry_in: Option<Duration>, details: Details },

    /// A retry scope was asked to retry after its final attempt
    RetriesExhausted { message: String, attempts: u32, details: Details },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { message, .. } => write!(f, "Validation error: {}", message),
            Self::Api { message, status_code, .. } => match status_code {
                Some(code) => write!(f, "API error (status {}): {}", code, message),
                None => write!(f, "API error: {}", message),
            },
            Self::RateLimit { message, retry_after, .. } => match retry_after {
                Some(wait) => write!(f, "Rate limit exceeded (retry after {:?}): {}", wait, message),
                None => write!(f, "Rate limit exceeded: {}", message),
            },
            Self::Authentication { message, .. } => {
                write!(f, "Authentication failed: {}", message)
            }
            Self::Processing { message, stage, item_id, .. } => match (stage, item_id) {
                (Some(stage), Some(item)) => {
                    write!(f, "Processing error in stage '{}' for item '{}': {}", stage, item, message)
                }
                (Some(stage), None) => {
                    write!(f, "Processing error in stage '{}': {}", stage, message)
                }
                (None, Some(item)) => write!(f, "Processing error for item '{}': {}", item, message),
                (None, None) => write!(f, "Processing error: {}", message),
            },
            Self::Configuration { message, .. } => write!(f, "Configuration error: {}", message),
            Self::Resource { message, .. } => write!(f, "Resource error: {}", message),
            Self::Timeout { message, .. } => write!(f, "Timeout: {}", message),
            Self::CircuitOpen { message, .. } => write!(f, "{}", message),
            Self::RetriesExhausted { message, .. } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for PipelineError {}

impl PipelineError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), details: Details::new() }
    }

    /// Create a generic API error
    pub fn api<S: Into<String>>(message: S) -> Self {
        Self::Api {
            message: message.into(),
            status_code: None,
            retry_after: None,
            details: Details::new(),
        }
    }

    /// Create a rate limit error
    pub fn rate_limit<S: Into<String>>(message: S) -> Self {
        Self::RateLimit {
            message: message.into(),
            status_code: None,
            retry_after: None,
            details: Details::new(),
        }
    }

    /// Create an authentication error
    pub fn authentication<S: Into<String>>(message: S) -> Self {
        Self::Authentication {
            message: message.into(),
            status_code: None,
            retry_after: None,
            details: Details::new(),
        }
    }

    /// Create a processing error
    pub fn processing<S: Into<String>>(message: S) -> Self {
        Self::Processing { message: message.into(), stage: None, item_id: None, details: Details::new() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into(), details: Details::new() }
    }

    /// Create a resource error
    pub fn resource<S: Into<String>>(message: S) -> Self {
        Self::Resource { message: message.into(), details: Details::new() }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout { message: message.into(), details: Details::new() }
    }

    /// Create a breaker-open rejection for the named dependency
    pub fn circuit_open<S: Into<String>>(service: S, retry_in: Option<Duration>) -> Self {
        let service = service.into();
        let message = match retry_in {
            Some(wait) => format!("Circuit breaker '{}' is open (retry in {:?})", service, wait),
            None => format!("Circuit breaker '{}' is open", service),
        };
        Self::CircuitOpen { message, service, retry_in, details: Details::new() }
    }

    /// Create an attempt-exhaustion error
    pub fn retries_exhausted(attempts: u32) -> Self {
        Self::RetriesExhausted {
            message: format!("Retry requested after final attempt ({} attempts)", attempts),
            attempts,
            details: Details::new(),
        }
    }

    /// Attach an HTTP status code (API-family variants only)
    pub fn with_status(mut self, code: u16) -> Self {
        if let Self::Api { status_code, .. }
        | Self::RateLimit { status_code, .. }
        | Self::Authentication { status_code, .. } = &mut self
        {
            *status_code = Some(code);
        }
        self
    }

    /// Attach a server-suggested wait (API-family variants only)
    pub fn with_retry_after(mut self, wait: Duration) -> Self {
        if let Self::Api { retry_after, .. }
        | Self::RateLimit { retry_after, .. }
        | Self::Authentication { retry_after, .. } = &mut self
        {
            *retry_after = Some(wait);
        }
        self
    }

    /// Attach the pipeline stage (processing errors only)
    pub fn at_stage<S: Into<String>>(mut self, name: S) -> Self {
        if let Self::Processing { stage, .. } = &mut self {
            *stage = Some(name.into());
        }
        self
    }

    /// Attach the item identifier (processing errors only)
    pub fn for_item<S: Into<String>>(mut self, id: S) -> Self {
        if let Self::Processing { item_id, .. } = &mut self {
            *item_id = Some(id.into());
        }
        self
    }

    /// Attach a structured detail
    pub fn with_detail<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        self.details_mut().insert(key.into(), value.into());
        self
    }

    /// Discriminant of this failure
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Validation { .. } => FailureKind::Validation,
            Self::Api { .. } => FailureKind::Api,
            Self::RateLimit { .. } => FailureKind::RateLimit,
            Self::Authentication { .. } => FailureKind::Authentication,
            Self::Processing { .. } => FailureKind::Processing,
            Self::Configuration { .. } => FailureKind::Configuration,
            Self::Resource { .. } => FailureKind::Resource,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::CircuitOpen { .. } => FailureKind::CircuitOpen,
            Self::RetriesExhausted { .. } => FailureKind::RetriesExhausted,
        }
    }

    /// Human-readable message
    pub fn message(&self) -> &str {
        match self {
            Self::Validation { message, .. }
            | Self::Api { message, .. }
            | Self::RateLimit { message, .. }
            | Self::Authentication { message, .. }
            | Self::Processing { message, .. }
            | Self::Configuration { message, .. }
            | Self::Resource { message, .. }
            | Self::Timeout { message, .. }
            | Self::CircuitOpen { message, .. }
            | Self::RetriesExhausted { message, .. } => message,
        }
    }

    /// Structured details map (empty unless populated)
    pub fn details(&self) -> &Details {
        match self {
            Self::Validation { details, .. }
            | Self::Api { details, .. }
            | Self::RateLimit { details, .. }
            | Self::Authentication { details, .. }
            | Self::Processing { details, .. }
            | Self::Configuration { details, .. }
            | Self::Resource { details, .. }
            | Self::Timeout { details, .. }
            | Self::CircuitOpen { details, .. }
            | Self::RetriesExhausted { details, .. } => details,
        }
    }

    fn details_mut(&mut self) -> &mut Details {
        match self {
            Self::Validation { details, .. }
            | Self::Api { details, .. }
            | Self::RateLimit { details, .. }
            | Self::Authentication { details, .. }
            | Self::Processing { details, .. }
            | Self::Configuration { details, .. }
            | Self::Resource { details, .. }
            | Self::Timeout { details, .. }
            | Self::CircuitOpen { details, .. }
            | Self::RetriesExhausted { details, .. } => details,
        }
    }

    /// HTTP status code, if the origin supplied one
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status_code, .. }
            | Self::RateLimit { status_code, .. }
            | Self::Authentication { status_code, .. } => *status_code,
            _ => None,
        }
    }

    /// Flat record suitable for logging or serialization
    pub fn to_structured(&self) -> StructuredFailure {
        let mut record = StructuredFailure {
            kind: self.kind(),
            message: self.message().to_string(),
            details: self.details().clone(),
            status_code: self.status_code(),
            retry_after_secs: None,
            stage: None,
            item_id: None,
            service: None,
            attempts: None,
        };

        match self {
            Self::Api { retry_after, .. }
            | Self::RateLimit { retry_after, .. }
            | Self::Authentication { retry_after, .. } => {
                record.retry_after_secs = retry_after.map(|d| d.as_secs_f64());
            }
            Self::Processing { stage, item_id, .. } => {
                record.stage = stage.clone();
                record.item_id = item_id.clone();
            }
            Self::CircuitOpen { service, retry_in, .. } => {
                record.service = Some(service.clone());
                record.retry_after_secs = retry_in.map(|d| d.as_secs_f64());
            }
            Self::RetriesExhausted { attempts, .. } => {
                record.attempts = Some(*attempts);
            }
            _ => {}
        }

        record
    }

    /// Convert error to structured logging fields
    ///
    /// Returns key-value pairs suitable for `tracing` fields.
    pub fn as_tracing_fields(&self) -> Vec<(&'static str, String)> {
        let record = self.to_structured();
        let mut fields = vec![("kind", record.kind.to_string()), ("message", record.message)];

        if let Some(code) = record.status_code {
            fields.push(("status_code", code.to_string()));
        }
        if let Some(secs) = record.retry_after_secs {
            fields.push(("retry_after_ms", format!("{:.0}", secs * 1000.0)));
        }
        if let Some(stage) = record.stage {
            fields.push(("stage", stage));
        }
        if let Some(item_id) = record.item_id {
            fields.push(("item_id", item_id));
        }
        if let Some(service) = record.service {
            fields.push(("service", service));
        }
        if let Some(attempts) = record.attempts {
            fields.push(("attempts", attempts.to_string()));
        }

        fields
    }
}

/// Flat, serializable view of a [`PipelineError`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredFailure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default)]
    pub details: Details,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

/// Error classification trait used by the retry policy and circuit breaker
///
/// Implement this for any error enum that should flow through the resilience
/// layer. Only [`failure_kind`](Self::failure_kind) is required; the rest
/// derive from it.
///
/// # Example
///
/// ```rust
/// use clipforge_common::error::{ErrorClassification, FailureKind};
///
/// #[derive(Debug)]
/// enum UploadError {
///     Throttled,
///     BadVideo,
/// }
///
/// impl ErrorClassification for UploadError {
///     fn failure_kind(&self) -> FailureKind {
///         match self {
///             Self::Throttled => FailureKind::RateLimit,
///             Self::BadVideo => FailureKind::Validation,
///         }
///     }
/// }
///
/// assert!(UploadError::Throttled.is_retryable());
/// assert!(!UploadError::BadVideo.is_retryable());
/// ```
pub trait ErrorClassification {
    /// Structural kind of this failure
    fn failure_kind(&self) -> FailureKind;

    /// Check if this error is retryable under the default policy
    fn is_retryable(&self) -> bool {
        self.failure_kind().is_api_family()
    }

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity {
        match self.failure_kind() {
            FailureKind::RateLimit | FailureKind::Timeout | FailureKind::CircuitOpen => {
                ErrorSeverity::Warning
            }
            FailureKind::Resource => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    /// Get the suggested retry delay if applicable
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl ErrorClassification for PipelineError {
    fn failure_kind(&self) -> FailureKind {
        self.kind()
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Api { retry_after, .. }
            | Self::RateLimit { retry_after, .. }
            | Self::Authentication { retry_after, .. } => *retry_after,
            Self::CircuitOpen { retry_in, .. } => *retry_in,
            _ => None,
        }
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Rejection raised by a circuit breaker while it is open
///
/// Breakers are generic over the caller's error type and produce this value
/// through `E: From<CircuitOpenError>`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circuit breaker '{service}' is open")]
pub struct CircuitOpenError {
    /// Name of the protected dependency
    pub service: String,
    /// Remaining time until a probe is admitted, if known
    pub retry_in: Option<Duration>,
}

/// Raised by a retry scope when a retry is requested after the final attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Retry requested after final attempt ({attempts} attempts)")]
pub struct AttemptsExhausted {
    /// Number of attempts that were made
    pub attempts: u32,
}

/// Invalid resilience or cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration for '{field}': {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    pub(crate) fn invalid<S: Into<String>>(field: &'static str, message: S) -> Self {
        Self::Invalid { field, message: message.into() }
    }
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        let ConfigError::Invalid { field, .. } = &err;
        let field = *field;
        Self::configuration(err.to_string()).with_detail("field", field)
    }
}

impl From<CircuitOpenError> for PipelineError {
    fn from(err: CircuitOpenError) -> Self {
        Self::circuit_open(err.service, err.retry_in)
    }
}

impl From<AttemptsExhausted> for PipelineError {
    fn from(err: AttemptsExhausted) -> Self {
        Self::retries_exhausted(err.attempts)
    }
}

// Standard conversions from common error types
impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::processing(err.to_string()).at_stage("serialization")
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::resource(err.to_string()).with_detail("io_kind", format!("{:?}", err.kind()))
    }
}

impl From<toml::de::Error> for PipelineError {
    fn from(err: toml::de::Error) -> Self {
        Self::configuration(err.to_string()).with_detail("format", "toml")
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the failure taxonomy.

    use super::*;

    /// Validates `FailureKind::api_family` membership.
    ///
    /// Assertions:
    /// - Ensures every API-family kind reports `is_api_family()`.
    /// - Ensures `Validation`, `Configuration` and `CircuitOpen` do not.
    #[test]
    fn test_api_family_membership() {
        for kind in FailureKind::api_family() {
            assert!(kind.is_api_family(), "{kind} should be API family");
        }
        assert!(!FailureKind::Validation.is_api_family());
        assert!(!FailureKind::Configuration.is_api_family());
        assert!(!FailureKind::CircuitOpen.is_api_family());
        assert_eq!(FailureKind::api_family().len(), 4);
    }

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(PipelineError::validation("x").kind(), FailureKind::Validation);
        assert_eq!(PipelineError::api("x").kind(), FailureKind::Api);
        assert_eq!(PipelineError::rate_limit("x").kind(), FailureKind::RateLimit);
        assert_eq!(PipelineError::authentication("x").kind(), FailureKind::Authentication);
        assert_eq!(PipelineError::processing("x").kind(), FailureKind::Processing);
        assert_eq!(PipelineError::configuration("x").kind(), FailureKind::Configuration);
        assert_eq!(PipelineError::resource("x").kind(), FailureKind::Resource);
        assert_eq!(PipelineError::timeout("x").kind(), FailureKind::Timeout);
        assert_eq!(PipelineError::circuit_open("tts", None).kind(), FailureKind::CircuitOpen);
        assert_eq!(PipelineError::retries_exhausted(3).kind(), FailureKind::RetriesExhausted);
    }

    /// Validates that status and retry-after only attach to API-family variants.
    ///
    /// Assertions:
    /// - Confirms `status_code()` is `Some(503)` on an API error.
    /// - Confirms `with_status` leaves a validation error untouched.
    #[test]
    fn test_api_fields_only_on_api_family() {
        let api = PipelineError::api("upstream down").with_status(503);
        assert_eq!(api.status_code(), Some(503));

        let validation = PipelineError::validation("empty prompt")
            .with_status(400)
            .with_retry_after(Duration::from_secs(5));
        assert_eq!(validation.status_code(), None);
        assert_eq!(validation.retry_after(), None);
    }

    #[test]
    fn test_details_default_empty() {
        let err = PipelineError::timeout("llm call");
        assert!(err.details().is_empty());

        let err = err.with_detail("model", "gpt").with_detail("tokens", 512);
        assert_eq!(err.details().len(), 2);
        assert_eq!(err.details()["tokens"], serde_json::json!(512));
    }

    /// Validates the structured form of a processing error.
    ///
    /// Assertions:
    /// - Confirms `kind`, `stage` and `item_id` are populated.
    /// - Ensures API-only fields are omitted from the JSON.
    #[test]
    fn test_structured_form_processing() {
        let err = PipelineError::processing("ffmpeg exited with 1")
            .at_stage("render")
            .for_item("clip-42");

        let record = err.to_structured();
        assert_eq!(record.kind, FailureKind::Processing);
        assert_eq!(record.stage.as_deref(), Some("render"));
        assert_eq!(record.item_id.as_deref(), Some("clip-42"));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "processing");
        assert!(json.get("status_code").is_none());
        assert!(json.get("retry_after_secs").is_none());
    }

    #[test]
    fn test_structured_form_rate_limit() {
        let err = PipelineError::rate_limit("slow down")
            .with_status(429)
            .with_retry_after(Duration::from_millis(1500));

        let record = err.to_structured();
        assert_eq!(record.status_code, Some(429));
        assert_eq!(record.retry_after_secs, Some(1.5));
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            PipelineError::api("bad gateway").with_status(502).to_string(),
            "API error (status 502): bad gateway"
        );
        assert_eq!(
            PipelineError::processing("boom").at_stage("voice").to_string(),
            "Processing error in stage 'voice': boom"
        );
        assert!(PipelineError::circuit_open("uploader", None).to_string().contains("uploader"));
    }

    /// Validates default classification of each kind.
    ///
    /// Assertions:
    /// - Ensures API-family errors are retryable.
    /// - Ensures validation/configuration/breaker-open errors are not.
    /// - Confirms resource errors are critical.
    #[test]
    fn test_classification_defaults() {
        assert!(PipelineError::api("x").is_retryable());
        assert!(PipelineError::timeout("x").is_retryable());
        assert!(!PipelineError::validation("x").is_retryable());
        assert!(!PipelineError::configuration("x").is_retryable());
        assert!(!PipelineError::circuit_open("svc", None).is_retryable());

        assert!(PipelineError::resource("disk full").is_critical());
        assert_eq!(PipelineError::rate_limit("x").severity(), ErrorSeverity::Warning);
    }

    #[test]
    fn test_signal_conversions() {
        let open: PipelineError =
            CircuitOpenError { service: "llm".into(), retry_in: Some(Duration::from_secs(3)) }
                .into();
        assert_eq!(open.kind(), FailureKind::CircuitOpen);
        assert_eq!(open.retry_after(), Some(Duration::from_secs(3)));

        let exhausted: PipelineError = AttemptsExhausted { attempts: 4 }.into();
        assert_eq!(exhausted.to_structured().attempts, Some(4));
    }

    #[test]
    fn test_config_error_conversion() {
        let err: PipelineError = ConfigError::invalid("max_attempts", "must be at least 1").into();
        assert_eq!(err.kind(), FailureKind::Configuration);
        assert_eq!(err.details()["field"], "max_attempts");
        assert!(err.message().contains("must be at least 1"));
    }

    #[test]
    fn test_io_error_conversion() {
        let err: PipelineError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope").into();
        assert_eq!(err.kind(), FailureKind::Resource);
        assert_eq!(err.details()["io_kind"], "PermissionDenied");
    }

    #[test]
    fn test_tracing_fields() {
        let err = PipelineError::authentication("token expired").with_status(401);
        let fields = err.as_tracing_fields();
        assert_eq!(fields[0], ("kind", "authentication".to_string()));
        assert!(fields.contains(&("status_code", "401".to_string())));
    }

    #[test]
    fn test_failure_kind_serde() {
        let json = serde_json::to_string(&FailureKind::RateLimit).unwrap();
        assert_eq!(json, "\"rate_limit\"");
        let parsed: FailureKind = serde_json::from_str("\"circuit_open\"").unwrap();
        assert_eq!(parsed, FailureKind::CircuitOpen);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(ErrorSeverity::Critical > ErrorSeverity::Error);
        assert!(ErrorSeverity::Warning > ErrorSeverity::Info);
        assert_eq!(ErrorSeverity::Warning.to_string(), "WARN");
    }
}
