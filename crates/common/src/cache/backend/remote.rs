//! Shared remote backend on a Redis-compatible key-value service
//!
//! Entries are stored as JSON envelopes under `"{namespace}:{key}"` with a
//! native millisecond expiry (`SET ... PX`), so the service evicts them on its
//! own. The store still checks `expires_at` so every backend honours the same
//! clock.
//!
//! Key patterns only treat `*` and `?` as wildcards. Other glob syntax Redis
//! understands (`[`, `]`, `\`) is escaped before `SCAN MATCH`, and scanned
//! keys are matched again locally.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use redis::{Client, Connection};
use tracing::debug;

use super::{CacheBackend, CacheEntry};
use crate::cache::key::KeyPattern;
use crate::cache::CacheError;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const SCAN_BATCH: usize = 500;

/// Delete KEYS[1] only while its envelope's `expires_at` equals ARGV[1]
const REMOVE_IF_EXPIRED: &str = r"
local current = redis.call('GET', KEYS[1])
if current and cjson.decode(current).expires_at == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

/// Escape everything Redis glob matching treats specially except `*` and `?`
fn escape_glob(glob: &str) -> String {
    let mut escaped = String::with_capacity(glob.len());
    for ch in glob.chars() {
        if matches!(ch, '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Redis-backed cache shared between processes
///
/// One connection is opened lazily and reused; a connection that fails with
/// an I/O error is dropped and reopened on the next call.
pub struct RedisBackend {
    client: Client,
    namespace: String,
    connect_timeout: Duration,
    connection: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("namespace", &self.namespace)
            .field("connect_timeout", &self.connect_timeout)
            .field("connected", &self.connection.lock().is_some())
            .finish()
    }
}

impl RedisBackend {
    /// Parse `url` and prepare a backend; no connection is made yet
    pub fn new<S: Into<String>>(url: &str, namespace: S) -> Result<Self, CacheError> {
        let client = Client::open(url)?;
        Ok(Self {
            client,
            namespace: namespace.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            connection: Mutex::new(None),
        })
    }

    /// Override the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    fn with_connection<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        F: FnOnce(&mut Connection) -> redis::RedisResult<T>,
    {
        let mut slot = self.connection.lock();
        let mut connection = match slot.take() {
            Some(connection) => connection,
            None => self.client.get_connection_with_timeout(self.connect_timeout)?,
        };

        let result = op(&mut connection);
        match &result {
            Err(err) if err.is_io_error() || err.is_connection_dropped() => {
                debug!(namespace = %self.namespace, error = %err, "dropping redis connection");
            }
            _ => *slot = Some(connection),
        }
        result.map_err(CacheError::from)
    }

    fn matching_keys(&self, pattern: &KeyPattern) -> Result<Vec<String>, CacheError> {
        let scan_pattern = format!("{}:{}", escape_glob(&self.namespace), escape_glob(pattern.as_glob()));
        let prefix = self.namespaced("");

        let mut keys = self.with_connection(|conn| {
            let mut keys = Vec::new();
            let mut cursor: u64 = 0;
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&scan_pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query(conn)?;
                keys.extend(batch);
                if next == 0 {
                    return Ok(keys);
                }
                cursor = next;
            }
        })?;
        keys.retain(|key| key.strip_prefix(&prefix).is_some_and(|rest| pattern.matches(rest)));
        Ok(keys)
    }
}

impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let key = self.namespaced(key);
        let raw: Option<String> =
            self.with_connection(|conn| redis::cmd("GET").arg(&key).query(conn))?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn store(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> Result<(), CacheError> {
        let key = self.namespaced(key);
        let payload = serde_json::to_string(entry)?;
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        self.with_connection(|conn| {
            redis::cmd("SET").arg(&key).arg(payload).arg("PX").arg(millis).query::<()>(conn)
        })
    }

    fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let key = self.namespaced(key);
        let removed: u64 = self.with_connection(|conn| redis::cmd("DEL").arg(&key).query(conn))?;
        Ok(removed > 0)
    }

    fn remove_if_expired(&self, key: &str, expires_at: DateTime<Utc>) -> Result<bool, CacheError> {
        let key = self.namespaced(key);
        let expected = match serde_json::to_value(expires_at)? {
            serde_json::Value::String(stamp) => stamp,
            other => other.to_string(),
        };

        let removed: u64 = self.with_connection(|conn| {
            redis::Script::new(REMOVE_IF_EXPIRED).key(&key).arg(&expected).invoke(conn)
        })?;
        Ok(removed > 0)
    }

    fn remove_matching(&self, pattern: &KeyPattern) -> Result<usize, CacheError> {
        let keys = self.matching_keys(pattern)?;
        if keys.is_empty() {
            return Ok(0);
        }

        let mut removed = 0;
        for chunk in keys.chunks(SCAN_BATCH) {
            let count: u64 =
                self.with_connection(|conn| redis::cmd("DEL").arg(chunk).query(conn))?;
            removed += usize::try_from(count).unwrap_or(usize::MAX);
        }
        Ok(removed)
    }

    fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize, CacheError> {
        // The server expires keys itself.
        Ok(0)
    }
}
