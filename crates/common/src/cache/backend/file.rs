//! Durable local backend
//!
//! Each key is stored as two files in the cache directory:
//!
//! ```text
//! <digest>.json       the cached value
//! <digest>.meta.json  {"key", "created_at", "expires_at"}
//! ```
//!
//! `<digest>` is the SHA-256 of the key, so any key maps to a safe file name.
//! Both files are written to a temporary name and renamed into place; the
//! value lands before its metadata, so a reader that finds metadata also
//! finds the value. Within one process a striped lock keyed by the digest
//! serializes every read, write and delete of a key's file pair.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{CacheBackend, CacheEntry};
use crate::cache::key::KeyPattern;
use crate::cache::CacheError;

const VALUE_SUFFIX: &str = ".json";
const META_SUFFIX: &str = ".meta.json";
const TEMP_SUFFIX: &str = ".tmp";
const LOCK_STRIPES: usize = 64;

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    key: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// File-per-key backend with expiry sidecars; survives restarts
#[derive(Debug)]
pub struct FileBackend {
    directory: PathBuf,
    temp_counter: AtomicU64,
    stripes: Box<[Mutex<()>]>,
}

impl FileBackend {
    /// Open (creating if needed) a cache directory
    pub fn new<P: AsRef<Path>>(directory: P) -> Result<Self, CacheError> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).map_err(|source| CacheError::io(&directory, source))?;
        let stripes = (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect();
        Ok(Self { directory, temp_counter: AtomicU64::new(0), stripes })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn stem(key: &str) -> String {
        hex::encode(Sha256::digest(key.as_bytes()))
    }

    fn lock_stem(&self, stem: &str) -> MutexGuard<'_, ()> {
        let index = stem
            .get(..4)
            .and_then(|prefix| usize::from_str_radix(prefix, 16).ok())
            .unwrap_or_default();
        self.stripes[index % self.stripes.len()].lock()
    }

    fn value_path(&self, stem: &str) -> PathBuf {
        self.directory.join(format!("{stem}{VALUE_SUFFIX}"))
    }

    fn meta_path(&self, stem: &str) -> PathBuf {
        self.directory.join(format!("{stem}{META_SUFFIX}"))
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
        let seq = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("entry");
        let temp = self
            .directory
            .join(format!(".{file_name}.{}.{seq}{TEMP_SUFFIX}", std::process::id()));

        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&temp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&temp, path)
        };

        write().map_err(|source| {
            let _ = fs::remove_file(&temp);
            CacheError::io(path, source)
        })
    }

    fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, CacheError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CacheError::io(path, source)),
        }
    }

    fn remove_optional(path: &Path) -> Result<bool, CacheError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CacheError::io(path, source)),
        }
    }

    fn remove_stem(&self, stem: &str) -> Result<bool, CacheError> {
        let _guard = self.lock_stem(stem);
        self.unlink_pair(stem)
    }

    /// Caller holds the stem lock
    fn unlink_pair(&self, stem: &str) -> Result<bool, CacheError> {
        let meta = Self::remove_optional(&self.meta_path(stem))?;
        let value = Self::remove_optional(&self.value_path(stem))?;
        Ok(meta || value)
    }

    /// Re-read the sidecar under the stem lock and delete the pair only if
    /// `doomed` still holds for it
    fn remove_stem_if<F>(&self, stem: &str, doomed: F) -> Result<bool, CacheError>
    where
        F: FnOnce(Option<&EntryMeta>) -> bool,
    {
        let _guard = self.lock_stem(stem);
        let Some(bytes) = Self::read_optional(&self.meta_path(stem))? else {
            return Ok(false);
        };
        let meta = serde_json::from_slice::<EntryMeta>(&bytes).ok();
        if doomed(meta.as_ref()) {
            self.unlink_pair(stem)
        } else {
            Ok(false)
        }
    }

    /// Every `(stem, metadata)` pair in the directory; unreadable sidecars
    /// yield `None` metadata
    fn scan(&self) -> Result<Vec<(String, Option<EntryMeta>)>, CacheError> {
        let entries =
            fs::read_dir(&self.directory).map_err(|source| CacheError::io(&self.directory, source))?;

        let mut found = Vec::new();
        for dir_entry in entries {
            let dir_entry = dir_entry.map_err(|source| CacheError::io(&self.directory, source))?;
            let name = dir_entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(META_SUFFIX)) else {
                continue;
            };

            let meta = Self::read_optional(&dir_entry.path())?
                .and_then(|bytes| serde_json::from_slice::<EntryMeta>(&bytes).ok());
            found.push((stem.to_string(), meta));
        }
        Ok(found)
    }

    /// Remove every value, sidecar and leftover temp file
    fn clear(&self) -> Result<usize, CacheError> {
        let entries =
            fs::read_dir(&self.directory).map_err(|source| CacheError::io(&self.directory, source))?;

        let mut removed = 0;
        for dir_entry in entries {
            let dir_entry = dir_entry.map_err(|source| CacheError::io(&self.directory, source))?;
            let name = dir_entry.file_name();
            let Some(name) = name.to_str() else { continue };

            if name.ends_with(META_SUFFIX) {
                removed += 1;
            } else if !(name.ends_with(VALUE_SUFFIX) || name.ends_with(TEMP_SUFFIX)) {
                continue;
            }
            Self::remove_optional(&dir_entry.path())?;
        }
        Ok(removed)
    }
}

impl CacheBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let stem = Self::stem(key);
        let _guard = self.lock_stem(&stem);

        let Some(meta_bytes) = Self::read_optional(&self.meta_path(&stem))? else {
            return Ok(None);
        };
        let meta: EntryMeta = serde_json::from_slice(&meta_bytes)?;

        let Some(value_bytes) = Self::read_optional(&self.value_path(&stem))? else {
            debug!(key, "cache sidecar without value, discarding");
            Self::remove_optional(&self.meta_path(&stem))?;
            return Ok(None);
        };
        let value = serde_json::from_slice(&value_bytes)?;

        Ok(Some(CacheEntry { value, created_at: meta.created_at, expires_at: meta.expires_at }))
    }

    fn store(&self, key: &str, entry: &CacheEntry, _ttl: Duration) -> Result<(), CacheError> {
        let stem = Self::stem(key);
        let meta = EntryMeta {
            key: key.to_string(),
            created_at: entry.created_at,
            expires_at: entry.expires_at,
        };

        let value = serde_json::to_vec(&entry.value)?;
        let meta = serde_json::to_vec(&meta)?;

        let _guard = self.lock_stem(&stem);
        self.write_atomic(&self.value_path(&stem), &value)?;
        self.write_atomic(&self.meta_path(&stem), &meta)
    }

    fn remove(&self, key: &str) -> Result<bool, CacheError> {
        self.remove_stem(&Self::stem(key))
    }

    fn remove_if_expired(&self, key: &str, expires_at: DateTime<Utc>) -> Result<bool, CacheError> {
        self.remove_stem_if(&Self::stem(key), |meta| {
            meta.is_some_and(|meta| meta.key == key && meta.expires_at == expires_at)
        })
    }

    fn remove_matching(&self, pattern: &KeyPattern) -> Result<usize, CacheError> {
        if pattern.is_match_all() {
            return self.clear();
        }

        let mut removed = 0;
        for (stem, meta) in self.scan()? {
            if meta.is_some_and(|meta| pattern.matches(&meta.key)) && self.remove_stem(&stem)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, CacheError> {
        let mut removed = 0;
        for (stem, _) in self.scan()? {
            let expired = self.remove_stem_if(&stem, |meta| match meta {
                Some(meta) => meta.expires_at <= now,
                None => {
                    warn!(stem = %stem, "unreadable cache metadata, removing entry");
                    true
                }
            })?;
            if expired {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn entry(value: serde_json::Value, ttl_secs: u64) -> CacheEntry {
        let created = DateTime::<Utc>::from_timestamp(1_000, 0).unwrap();
        CacheEntry::new(value, created, Duration::from_secs(ttl_secs)).unwrap()
    }

    /// Validates the on-disk layout.
    ///
    /// Assertions:
    /// - Confirms one value file and one sidecar are written per key.
    /// - Confirms the sidecar records the original key and expiry.
    #[test]
    fn test_layout_value_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        let stored = entry(serde_json::json!({"script": "hello"}), 60);

        backend.store("llm:abc", &stored, Duration::from_secs(60)).unwrap();

        let stem = FileBackend::stem("llm:abc");
        let value: serde_json::Value =
            serde_json::from_slice(&fs::read(dir.path().join(format!("{stem}.json"))).unwrap())
                .unwrap();
        let meta: EntryMeta =
            serde_json::from_slice(&fs::read(dir.path().join(format!("{stem}.meta.json"))).unwrap())
                .unwrap();

        assert_eq!(value, serde_json::json!({"script": "hello"}));
        assert_eq!(meta.key, "llm:abc");
        assert_eq!(meta.expires_at, stored.expires_at);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_reopen_keeps_entries() {
        let dir = tempfile::tempdir().unwrap();
        let stored = entry(serde_json::json!([1, 2, 3]), 60);
        FileBackend::new(dir.path()).unwrap().store("k", &stored, Duration::from_secs(60)).unwrap();

        let reopened = FileBackend::new(dir.path()).unwrap();
        assert_eq!(reopened.load("k").unwrap(), Some(stored));
    }

    #[test]
    fn test_missing_value_discards_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        backend.store("k", &entry(serde_json::json!(1), 60), Duration::from_secs(60)).unwrap();

        let stem = FileBackend::stem("k");
        fs::remove_file(dir.path().join(format!("{stem}.json"))).unwrap();

        assert_eq!(backend.load("k").unwrap(), None);
        assert!(!dir.path().join(format!("{stem}.meta.json")).exists());
    }

    #[test]
    fn test_corrupt_value_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        backend.store("k", &entry(serde_json::json!(1), 60), Duration::from_secs(60)).unwrap();

        let stem = FileBackend::stem("k");
        fs::write(dir.path().join(format!("{stem}.json")), b"{not json").unwrap();

        assert!(matches!(backend.load("k"), Err(CacheError::Serialization(_))));
    }

    /// Validates pattern removal and expiry purge.
    ///
    /// Assertions:
    /// - Confirms only keys matching the glob are removed.
    /// - Confirms `purge_expired` removes entries at or past `expires_at`.
    #[test]
    fn test_remove_matching_and_purge() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        backend.store("tts:a", &entry(serde_json::json!(1), 10), Duration::from_secs(10)).unwrap();
        backend.store("tts:b", &entry(serde_json::json!(2), 10), Duration::from_secs(10)).unwrap();
        backend.store("llm:a", &entry(serde_json::json!(3), 10), Duration::from_secs(10)).unwrap();
        backend.store("llm:b", &entry(serde_json::json!(4), 99), Duration::from_secs(99)).unwrap();

        let removed = backend.remove_matching(&KeyPattern::new("tts:*").unwrap()).unwrap();
        assert_eq!(removed, 2);
        assert!(backend.load("tts:a").unwrap().is_none());

        let now = DateTime::<Utc>::from_timestamp(1_010, 0).unwrap();
        assert_eq!(backend.purge_expired(now).unwrap(), 1);
        assert!(backend.load("llm:a").unwrap().is_none());
        assert!(backend.load("llm:b").unwrap().is_some());
    }

    #[test]
    fn test_remove_if_expired_spares_rewritten_entry() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        let stale = entry(serde_json::json!("old"), 10);
        let fresh = entry(serde_json::json!("new"), 99);
        backend.store("k", &stale, Duration::from_secs(10)).unwrap();
        backend.store("k", &fresh, Duration::from_secs(99)).unwrap();

        assert!(!backend.remove_if_expired("k", stale.expires_at).unwrap());
        assert_eq!(backend.load("k").unwrap(), Some(fresh.clone()));

        assert!(backend.remove_if_expired("k", fresh.expires_at).unwrap());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(!backend.remove_if_expired("k", fresh.expires_at).unwrap());
    }

    /// Validates same-key writers from several threads.
    ///
    /// Assertions:
    /// - Confirms every read pairs a value with the expiry it was written
    ///   with.
    /// - Confirms the surviving entry is one writer's complete entry.
    #[test]
    fn test_same_key_writers_keep_value_and_expiry_paired() {
        fn assert_paired(entry: &CacheEntry) {
            let writer = entry.value.as_u64().unwrap();
            let ttl = (entry.expires_at - entry.created_at).num_seconds();
            assert_eq!(ttl, i64::try_from(writer + 1).unwrap());
        }

        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FileBackend::new(dir.path()).unwrap());

        let handles: Vec<_> = (0..8_u64)
            .map(|writer| {
                let backend = Arc::clone(&backend);
                thread::spawn(move || {
                    let ttl = Duration::from_secs(writer + 1);
                    for _ in 0..25 {
                        backend.store("shared", &entry(serde_json::json!(writer), writer + 1), ttl).unwrap();
                        assert_paired(&backend.load("shared").unwrap().unwrap());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_paired(&backend.load("shared").unwrap().unwrap());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        backend.store("a", &entry(serde_json::json!(1), 10), Duration::from_secs(10)).unwrap();
        fs::write(dir.path().join("notes.txt"), b"keep me").unwrap();

        let all = KeyPattern::new(KeyPattern::ALL).unwrap();
        assert_eq!(backend.remove_matching(&all).unwrap(), 1);
        assert_eq!(backend.remove_matching(&all).unwrap(), 0);
        assert!(dir.path().join("notes.txt").exists());
    }
}
