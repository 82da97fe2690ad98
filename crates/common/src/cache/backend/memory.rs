//! In-process backend for tests and ephemeral runs

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{CacheBackend, CacheEntry};
use crate::cache::key::KeyPattern;
use crate::cache::CacheError;

/// Hash map behind a read-write lock; contents die with the process
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn store(&self, key: &str, entry: &CacheEntry, _ttl: Duration) -> Result<(), CacheError> {
        self.entries.write().insert(key.to_string(), entry.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn remove_if_expired(&self, key: &str, expires_at: DateTime<Utc>) -> Result<bool, CacheError> {
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(entry) if entry.expires_at == expires_at => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn remove_matching(&self, pattern: &KeyPattern) -> Result<usize, CacheError> {
        let mut entries = self.entries.write();
        let before = entries.len();
        if pattern.is_match_all() {
            entries.clear();
        } else {
            entries.retain(|key, _| !pattern.matches(key));
        }
        Ok(before - entries.len())
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, CacheError> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_valid_at(now));
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(secs: u64) -> CacheEntry {
        let created = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        CacheEntry::new(serde_json::json!(secs), created, Duration::from_secs(secs)).unwrap()
    }

    #[test]
    fn test_store_load_remove() {
        let backend = MemoryBackend::new();
        backend.store("a", &entry(5), Duration::from_secs(5)).unwrap();

        assert_eq!(backend.load("a").unwrap(), Some(entry(5)));
        assert!(backend.remove("a").unwrap());
        assert!(!backend.remove("a").unwrap());
        assert_eq!(backend.load("a").unwrap(), None);
    }

    #[test]
    fn test_remove_if_expired_spares_rewritten_entry() {
        let backend = MemoryBackend::new();
        let stale = entry(5);
        backend.store("a", &stale, Duration::from_secs(5)).unwrap();
        backend.store("a", &entry(50), Duration::from_secs(50)).unwrap();

        assert!(!backend.remove_if_expired("a", stale.expires_at).unwrap());
        assert_eq!(backend.load("a").unwrap(), Some(entry(50)));

        assert!(backend.remove_if_expired("a", entry(50).expires_at).unwrap());
        assert!(backend.is_empty());
        assert!(!backend.remove_if_expired("a", stale.expires_at).unwrap());
    }

    #[test]
    fn test_remove_matching_and_purge() {
        let backend = MemoryBackend::new();
        for (key, ttl) in [("tts:1", 5), ("tts:2", 50), ("llm:1", 5)] {
            backend.store(key, &entry(ttl), Duration::from_secs(ttl)).unwrap();
        }

        let removed = backend.remove_matching(&KeyPattern::new("tts:*").unwrap()).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(backend.len(), 1);

        let later = DateTime::<Utc>::from_timestamp(10, 0).unwrap();
        assert_eq!(backend.purge_expired(later).unwrap(), 1);
        assert!(backend.is_empty());
    }
}
