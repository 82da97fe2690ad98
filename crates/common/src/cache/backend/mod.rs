//! Storage backends for [`CacheStore`](super::CacheStore)
//!
//! Backends persist [`CacheEntry`] records and know nothing about hit/miss
//! accounting or expiry policy; the store decides validity against its clock
//! and asks the backend to evict.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::key::KeyPattern;
use super::CacheError;

mod file;
mod memory;
mod remote;

pub use self::file::FileBackend;
pub use self::memory::MemoryBackend;
pub use self::remote::RedisBackend;

/// One stored value with its validity window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Build an entry valid for `ttl` from `created_at`
    pub fn new(
        value: serde_json::Value,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Self, CacheError> {
        let span = chrono::Duration::from_std(ttl).map_err(|_| CacheError::InvalidTtl(ttl))?;
        let expires_at = created_at.checked_add_signed(span).ok_or(CacheError::InvalidTtl(ttl))?;
        Ok(Self { value, created_at, expires_at })
    }

    /// Valid iff `now < expires_at`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Persistence interface behind the cache store
///
/// Implementations must tolerate concurrent calls from several threads with
/// last-write-wins semantics on `store`.
pub trait CacheBackend: Send + Sync + fmt::Debug {
    /// Short backend name used in logs
    fn name(&self) -> &'static str;

    /// Read the entry for `key`, expired or not
    fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Write `entry`, replacing any previous entry for `key`
    fn store(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> Result<(), CacheError>;

    /// Delete `key`; returns whether an entry existed
    fn remove(&self, key: &str) -> Result<bool, CacheError>;

    /// Delete `key` only while its stored entry still expires at
    /// `expires_at`; returns whether it was deleted
    ///
    /// An entry written after the caller's read carries a new expiry and is
    /// left alone.
    fn remove_if_expired(&self, key: &str, expires_at: DateTime<Utc>) -> Result<bool, CacheError>;

    /// Delete every entry whose key matches `pattern`; returns the count
    fn remove_matching(&self, pattern: &KeyPattern) -> Result<usize, CacheError>;

    /// Delete entries expired at `now`; returns the count
    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, CacheError>;
}
