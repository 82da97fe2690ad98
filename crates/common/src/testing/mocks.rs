//! Scripted operations and failing collaborators

// Test doubles; failure modes are their return values.
#![allow(clippy::missing_errors_doc)]

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::cache::{CacheBackend, CacheEntry, CacheError, KeyPattern};
use crate::error::{ErrorClassification, FailureKind, PipelineError};

/// Operation that fails from a script, then settles on a fixed outcome
///
/// # Examples
///
/// ```
/// use clipforge_common::error::PipelineError;
/// use clipforge_common::testing::FlakyOperation;
///
/// let op = FlakyOperation::succeeding_after([PipelineError::api("502")], "done");
/// assert!(op.call().is_err());
/// assert_eq!(op.call().unwrap(), "done");
/// assert_eq!(op.calls(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct FlakyOperation<T> {
    script: Arc<Mutex<VecDeque<PipelineError>>>,
    outcome: Result<T, PipelineError>,
    calls: Arc<AtomicU32>,
}

impl<T: Clone> FlakyOperation<T> {
    /// Fail with each of `failures` in turn, then return `value` forever
    pub fn succeeding_after<I>(failures: I, value: T) -> Self
    where
        I: IntoIterator<Item = PipelineError>,
    {
        Self {
            script: Arc::new(Mutex::new(failures.into_iter().collect())),
            outcome: Ok(value),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Fail with `error` on every call
    pub fn always_failing(error: PipelineError) -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            outcome: Err(error),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn call(&self) -> Result<T, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().pop_front() {
            Some(error) => Err(error),
            None => self.outcome.clone(),
        }
    }

    /// Same as [`call`](Self::call) after yielding to the runtime once
    pub async fn call_async(&self) -> Result<T, PipelineError> {
        tokio::task::yield_now().await;
        self.call()
    }

    /// Number of invocations so far, across clones
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Records every `on_retry` notification
#[derive(Debug, Clone, Default)]
pub struct RetryRecorder {
    events: Arc<Mutex<Vec<(FailureKind, u32)>>>,
}

impl RetryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hook suitable for [`RetryPolicy::on_retry`](crate::resilience::RetryPolicy::on_retry)
    pub fn hook<E: ErrorClassification + 'static>(&self) -> impl Fn(&E, u32) + Send + Sync + 'static {
        let events = Arc::clone(&self.events);
        move |error: &E, attempt: u32| events.lock().push((error.failure_kind(), attempt))
    }

    /// Attempt numbers passed to the hook, in order
    pub fn attempts(&self) -> Vec<u32> {
        self.events.lock().iter().map(|(_, attempt)| *attempt).collect()
    }

    pub fn events(&self) -> Vec<(FailureKind, u32)> {
        self.events.lock().clone()
    }
}

/// Cache backend whose every operation fails as if the service were down
#[derive(Debug, Default)]
pub struct UnavailableBackend {
    attempts: AtomicU32,
}

impl UnavailableBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of backend operations attempted
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn refuse<T>(&self) -> Result<T, CacheError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Io {
            path: PathBuf::from("unavailable"),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "backend unavailable"),
        })
    }
}

impl CacheBackend for UnavailableBackend {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn load(&self, _key: &str) -> Result<Option<CacheEntry>, CacheError> {
        self.refuse()
    }

    fn store(&self, _key: &str, _entry: &CacheEntry, _ttl: Duration) -> Result<(), CacheError> {
        self.refuse()
    }

    fn remove(&self, _key: &str) -> Result<bool, CacheError> {
        self.refuse()
    }

    fn remove_if_expired(&self, _key: &str, _expires_at: DateTime<Utc>) -> Result<bool, CacheError> {
        self.refuse()
    }

    fn remove_matching(&self, _pattern: &KeyPattern) -> Result<usize, CacheError> {
        self.refuse()
    }

    fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize, CacheError> {
        self.refuse()
    }
}
