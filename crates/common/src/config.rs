//! Settings for the resilience and caching layer
//!
//! Settings are plain serde structs with defaults for every field, loaded
//! from TOML and optionally overridden from `CLIPFORGE_*` environment
//! variables. Durations are written as seconds (`initial_delay = 0.5`).
//!
//! ## Environment Variables
//! - `CLIPFORGE_CACHE_BACKEND`: `file`, `redis` or `memory`
//! - `CLIPFORGE_CACHE_DIR`: file backend directory
//! - `CLIPFORGE_REDIS_URL`: redis backend URL
//! - `CLIPFORGE_MAX_ATTEMPTS`: retry attempts, including the first
//! - `CLIPFORGE_LOG_LEVEL`: level or `EnvFilter` directive
//!
//! ```toml
//! [retry]
//! max_attempts = 5
//! initial_delay = 0.5
//! retryable_kinds = ["api", "rate_limit", "timeout"]
//!
//! [circuit_breaker]
//! name = "llm"
//! failure_threshold = 3
//! recovery_timeout = 30.0
//!
//! [cache]
//! default_ttl = 3600.0
//! backend = { type = "redis", url = "redis://cache:6379/", namespace = "clipforge" }
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{CacheBackend, CacheError, CacheStore, FileBackend, MemoryBackend, RedisBackend};
use crate::error::{ConfigError, ConfigResult, ErrorClassification, FailureKind, PipelineError, PipelineResult};
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, RetryConfig, RetryPolicy};
use crate::utils::duration_secs;

/// Environment variable selecting the cache backend (`file`, `redis`, `memory`)
pub const ENV_CACHE_BACKEND: &str = "CLIPFORGE_CACHE_BACKEND";
/// Environment variable overriding the file cache directory
pub const ENV_CACHE_DIR: &str = "CLIPFORGE_CACHE_DIR";
/// Environment variable overriding the Redis URL
pub const ENV_REDIS_URL: &str = "CLIPFORGE_REDIS_URL";
/// Environment variable overriding `retry.max_attempts`
pub const ENV_MAX_ATTEMPTS: &str = "CLIPFORGE_MAX_ATTEMPTS";
/// Environment variable overriding the log level / filter
pub const ENV_LOG_LEVEL: &str = "CLIPFORGE_LOG_LEVEL";

const DEFAULT_CACHE_DIR: &str = ".cache/clipforge";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/";
const DEFAULT_NAMESPACE: &str = "clipforge";

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    pub retry: RetrySettings,
    pub circuit_breaker: BreakerSettings,
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
}

/// Retry policy settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    #[serde(with = "duration_secs")]
    pub initial_delay: Duration,
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub retryable_kinds: Vec<FailureKind>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let config = RetryConfig::default();
        Self {
            max_attempts: config.max_attempts,
            initial_delay: config.initial_delay,
            max_delay: config.max_delay,
            exponential_base: config.exponential_base,
            retryable_kinds: config.retryable_kinds,
        }
    }
}

impl RetrySettings {
    pub fn to_config(&self) -> ConfigResult<RetryConfig> {
        RetryConfig::builder()
            .max_attempts(self.max_attempts)
            .initial_delay(self.initial_delay)
            .max_delay(self.max_delay)
            .exponential_base(self.exponential_base)
            .retryable_kinds(self.retryable_kinds.iter().copied())
            .build()
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub name: String,
    pub failure_threshold: u32,
    #[serde(with = "duration_secs")]
    pub recovery_timeout: Duration,
    pub relevant_kinds: Vec<FailureKind>,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let config = CircuitBreakerConfig::default();
        Self {
            name: config.name,
            failure_threshold: config.failure_threshold,
            recovery_timeout: config.recovery_timeout,
            relevant_kinds: config.relevant_kinds,
        }
    }
}

impl BreakerSettings {
    pub fn to_config(&self) -> ConfigResult<CircuitBreakerConfig> {
        CircuitBreakerConfig::builder()
            .name(self.name.clone())
            .failure_threshold(self.failure_threshold)
            .recovery_timeout(self.recovery_timeout)
            .relevant_kinds(self.relevant_kinds.iter().copied())
            .build()
    }
}

/// Cache backend selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CacheBackendSettings {
    /// Durable files in `directory`
    File { directory: PathBuf },
    /// Shared Redis-compatible service
    Redis {
        url: String,
        #[serde(default = "default_namespace")]
        namespace: String,
    },
    /// In-process only
    Memory,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl Default for CacheBackendSettings {
    fn default() -> Self {
        Self::File { directory: PathBuf::from(DEFAULT_CACHE_DIR) }
    }
}

/// Cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    #[serde(with = "duration_secs")]
    pub default_ttl: Duration,
    pub backend: CacheBackendSettings,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { default_ttl: Duration::from_secs(3600), backend: CacheBackendSettings::default() }
    }
}

impl CacheSettings {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.default_ttl.is_zero() {
            return Err(ConfigError::invalid("cache.default_ttl", "must be greater than 0"));
        }
        match &self.backend {
            CacheBackendSettings::File { directory } if directory.as_os_str().is_empty() => {
                Err(ConfigError::invalid("cache.backend.directory", "must not be empty"))
            }
            CacheBackendSettings::Redis { url, .. } if url.trim().is_empty() => {
                Err(ConfigError::invalid("cache.backend.url", "must not be empty"))
            }
            _ => Ok(()),
        }
    }

    /// Construct the configured store
    pub fn build_store(&self) -> Result<CacheStore, CacheError> {
        let backend: Arc<dyn CacheBackend> = match &self.backend {
            CacheBackendSettings::File { directory } => Arc::new(FileBackend::new(directory)?),
            CacheBackendSettings::Redis { url, namespace } => {
                Arc::new(RedisBackend::new(url, namespace.clone())?)
            }
            CacheBackendSettings::Memory => Arc::new(MemoryBackend::new()),
        };
        Ok(CacheStore::new(backend, self.default_ttl))
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Logging settings consumed by [`telemetry::init_tracing`](crate::telemetry::init_tracing)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Level or `EnvFilter` directive, e.g. `info` or `clipforge_common=debug`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Plain }
    }
}

impl ResilienceSettings {
    /// Parse and validate TOML settings
    pub fn from_toml_str(source: &str) -> PipelineResult<Self> {
        let settings: Self = toml::from_str(source)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read, parse and validate a TOML settings file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|err| {
            PipelineError::configuration(format!("cannot read settings file: {err}"))
                .with_detail("path", path.display().to_string())
        })?;
        Self::from_toml_str(&source)
            .map_err(|err| err.with_detail("path", path.display().to_string()))
    }

    /// Apply `CLIPFORGE_*` overrides from the process environment
    pub fn apply_env_overrides(self) -> PipelineResult<Self> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides<F>(mut self, lookup: F) -> PipelineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(backend) = var(ENV_CACHE_BACKEND) {
            self.cache.backend = match backend.to_ascii_lowercase().as_str() {
                "file" => match self.cache.backend {
                    file @ CacheBackendSettings::File { .. } => file,
                    _ => CacheBackendSettings::default(),
                },
                "redis" => match self.cache.backend {
                    redis @ CacheBackendSettings::Redis { .. } => redis,
                    _ => CacheBackendSettings::Redis {
                        url: DEFAULT_REDIS_URL.to_string(),
                        namespace: default_namespace(),
                    },
                },
                "memory" => CacheBackendSettings::Memory,
                other => {
                    return Err(PipelineError::configuration(format!(
                        "unknown cache backend '{other}' (expected file, redis or memory)"
                    ))
                    .with_detail("variable", ENV_CACHE_BACKEND));
                }
            };
        }

        if let Some(dir) = var(ENV_CACHE_DIR) {
            if let CacheBackendSettings::File { directory } = &mut self.cache.backend {
                *directory = PathBuf::from(dir);
            }
        }

        if let Some(url) = var(ENV_REDIS_URL) {
            if let CacheBackendSettings::Redis { url: current, .. } = &mut self.cache.backend {
                *current = url;
            }
        }

        if let Some(raw) = var(ENV_MAX_ATTEMPTS) {
            self.retry.max_attempts = raw.parse().map_err(|_| {
                PipelineError::configuration(format!("invalid max attempts '{raw}'"))
                    .with_detail("variable", ENV_MAX_ATTEMPTS)
            })?;
        }

        if let Some(level) = var(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }

        self.validate()?;
        Ok(self)
    }

    /// Check every section
    pub fn validate(&self) -> ConfigResult<()> {
        self.retry.to_config()?;
        self.circuit_breaker.to_config()?;
        self.cache.validate()?;
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::invalid("logging.level", "must not be empty"));
        }
        Ok(())
    }

    /// Retry policy for error type `E`
    pub fn retry_policy<E: ErrorClassification>(&self) -> PipelineResult<RetryPolicy<E>> {
        Ok(RetryPolicy::new(self.retry.to_config()?)?)
    }

    /// Circuit breaker on the system clock
    pub fn circuit_breaker(&self) -> PipelineResult<CircuitBreaker> {
        Ok(CircuitBreaker::new(self.circuit_breaker.to_config()?)?)
    }

    /// Cache store for the configured backend
    pub fn cache_store(&self) -> PipelineResult<CacheStore> {
        Ok(self.cache.build_store()?)
    }
}
