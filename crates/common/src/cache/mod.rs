//! Response cache for expensive pipeline calls
//!
//! [`CacheStore`] keeps serialized results with a per-entry time-to-live in
//! one of three backends:
//!
//! - [`FileBackend`]: one JSON file per key plus an expiry sidecar; survives
//!   restarts
//! - [`RedisBackend`]: a shared Redis-compatible service with native expiry
//! - [`MemoryBackend`]: in-process, for tests and short-lived runs
//!
//! Callers never branch on the backend. Caching is best-effort: a failing
//! backend degrades to "no cache" and shows up in [`CacheStats::errors`].
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use clipforge_common::cache::{CacheKey, CacheStore};
//! use clipforge_common::error::PipelineError;
//!
//! let store = CacheStore::memory(Duration::from_secs(3600));
//! let key = CacheKey::builder("generate_script")
//!     .arg("space cats")?
//!     .kwarg("tone", "deadpan")?
//!     .build();
//!
//! let script: Result<String, PipelineError> =
//!     store.cached(&key, Duration::from_secs(600), || Ok("In space, no one hears you purr.".into()));
//! assert!(script.is_ok());
//! assert_eq!(store.stats().misses, 1);
//! # Ok::<(), clipforge_common::cache::CacheError>(())
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::error::PipelineError;

pub mod backend;
pub mod key;
pub mod stats;
pub mod store;

pub use backend::{CacheBackend, CacheEntry, FileBackend, MemoryBackend, RedisBackend};
pub use key::{CacheKey, CacheKeyBuilder, KeyPattern};
pub use stats::CacheStats;
pub use store::CacheStore;

/// Errors raised inside the cache layer
///
/// [`CacheStore`] swallows these; they surface directly only from backend
/// constructors and the [`CacheBackend`] trait.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("remote cache error: {0}")]
    Remote(#[from] redis::RedisError),

    #[error("invalid cache pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid cache TTL: {0:?}")]
    InvalidTtl(Duration),
}

impl CacheError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io { path: path.to_path_buf(), source }
    }
}

impl From<CacheError> for PipelineError {
    fn from(err: CacheError) -> Self {
        match &err {
            CacheError::Pattern { .. } | CacheError::InvalidTtl(_) => {
                Self::configuration(err.to_string()).with_detail("component", "cache")
            }
            _ => Self::resource(err.to_string()).with_detail("component", "cache"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    #[test]
    fn test_cache_error_conversion() {
        let io: PipelineError = CacheError::io(
            Path::new("/tmp/cache"),
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        )
        .into();
        assert_eq!(io.kind(), FailureKind::Resource);
        assert!(io.message().contains("/tmp/cache"));

        let ttl: PipelineError = CacheError::InvalidTtl(Duration::ZERO).into();
        assert_eq!(ttl.kind(), FailureKind::Configuration);
        assert_eq!(ttl.details()["component"], "cache");
    }
}
