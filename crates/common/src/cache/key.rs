//! Cache key derivation and key patterns
//!
//! A [`CacheKey`] is `"{operation}:{sha256}"`, where the digest covers a
//! canonical JSON rendering of the call's positional and keyword arguments.
//! Keyword arguments are canonicalised into sorted maps, so argument order at
//! the call site never changes the key. Nothing process-specific enters the
//! digest, so keys are stable across runs.

use std::fmt;
use std::ops::Deref;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::CacheError;

/// Deterministic cache key for one logical call
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Start building a key for `operation`
    pub fn builder<S: Into<String>>(operation: S) -> CacheKeyBuilder {
        CacheKeyBuilder { operation: operation.into(), args: Vec::new(), kwargs: Map::new() }
    }

    /// Derive a key from any serializable argument value
    ///
    /// Sequences (tuples, arrays, vectors) become positional arguments, maps
    /// and structs become keyword arguments, and anything else, `null`
    /// included, is a single positional argument. An empty sequence and an
    /// empty map both describe the call with no arguments.
    pub fn from_call<A: Serialize + ?Sized>(operation: &str, args: &A) -> Result<Self, CacheError> {
        let builder = Self::builder(operation);
        let builder = match serde_json::to_value(args)? {
            Value::Array(items) => CacheKeyBuilder { args: items, ..builder },
            Value::Object(map) => CacheKeyBuilder { kwargs: map, ..builder },
            other => CacheKeyBuilder { args: vec![other], ..builder },
        };
        Ok(builder.build())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Operation prefix of a derived key
    pub fn operation(&self) -> &str {
        self.0.rsplit_once(':').map_or(self.0.as_str(), |(operation, _)| operation)
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Deref for CacheKey {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incremental builder for [`CacheKey`]
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    operation: String,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
}

impl CacheKeyBuilder {
    /// Append a positional argument
    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, CacheError> {
        self.args.push(serde_json::to_value(value)?);
        Ok(self)
    }

    /// Set a keyword argument; insertion order is irrelevant
    pub fn kwarg<T: Serialize + ?Sized>(mut self, name: &str, value: &T) -> Result<Self, CacheError> {
        self.kwargs.insert(name.to_string(), serde_json::to_value(value)?);
        Ok(self)
    }

    pub fn build(self) -> CacheKey {
        let canonical = canonicalize(Value::Array(vec![
            Value::Array(self.args),
            Value::Object(self.kwargs),
        ]));
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        CacheKey(format!("{}:{}", self.operation, hex::encode(digest)))
    }
}

/// Rebuild every object with keys inserted in sorted order
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, canonicalize(v))).collect())
        }
        other => other,
    }
}

/// Glob-style key pattern (`*` and `?`), matching whole keys
#[derive(Debug, Clone)]
pub struct KeyPattern {
    glob: String,
    regex: Regex,
}

impl KeyPattern {
    /// Pattern matching every key
    pub const ALL: &'static str = "*";

    pub fn new(glob: &str) -> Result<Self, CacheError> {
        let mut source = String::with_capacity(glob.len() + 8);
        source.push('^');
        let mut literal = String::new();
        for ch in glob.chars() {
            match ch {
                '*' | '?' => {
                    source.push_str(&regex::escape(&literal));
                    literal.clear();
                    source.push_str(if ch == '*' { ".*" } else { "." });
                }
                _ => literal.push(ch),
            }
        }
        source.push_str(&regex::escape(&literal));
        source.push('$');

        let regex = Regex::new(&source)
            .map_err(|source| CacheError::Pattern { pattern: glob.to_string(), source })?;
        Ok(Self { glob: glob.to_string(), regex })
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    pub fn as_glob(&self) -> &str {
        &self.glob
    }

    /// Whether this pattern matches every key
    pub fn is_match_all(&self) -> bool {
        !self.glob.is_empty() && self.glob.chars().all(|c| c == '*')
    }
}
