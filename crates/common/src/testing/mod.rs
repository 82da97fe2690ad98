//! Test doubles for resilience and cache code
//!
//! - [`FlakyOperation`]: fails from a script, then settles on an outcome
//! - [`RetryRecorder`]: captures `on_retry` notifications
//! - [`UnavailableBackend`]: a cache backend that refuses every operation
//!
//! Deterministic time comes from [`MockClock`](crate::resilience::MockClock).
//!
//! ```rust
//! use std::time::Duration;
//!
//! use clipforge_common::error::PipelineError;
//! use clipforge_common::resilience::{RetryConfig, RetryPolicy};
//! use clipforge_common::testing::{FlakyOperation, RetryRecorder};
//!
//! let recorder = RetryRecorder::new();
//! let config = RetryConfig::builder()
//!     .initial_delay(Duration::from_millis(1))
//!     .build()
//!     .unwrap();
//! let policy = RetryPolicy::<PipelineError>::new(config)
//!     .unwrap()
//!     .on_retry(recorder.hook::<PipelineError>());
//!
//! let op = FlakyOperation::succeeding_after([PipelineError::api("503")], 1);
//! assert_eq!(policy.call(|| op.call()).unwrap(), 1);
//! assert_eq!(recorder.attempts(), vec![1]);
//! ```

pub mod mocks;

pub use mocks::{FlakyOperation, RetryRecorder, UnavailableBackend};
