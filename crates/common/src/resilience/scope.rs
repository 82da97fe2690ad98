//! Block-level retry driver
//!
//! Some call sites cannot express their retryable unit as a single operation:
//! the block has an early exit that must not be retried next to a path that
//! should be. [`RetryScope`] runs such a block in a loop. The block reports
//! what happened through [`Step`], and the scope owns the backoff and the
//! attempt counter.
//!
//! Unlike [`RetryPolicy`](super::RetryPolicy) the scope does not classify
//! failures: any raised error before the final attempt is retried, and
//! [`Step::Fatal`] is the block's way to stop early.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use super::retry::{ExponentialBackoff, RetryConfig};
use crate::error::{AttemptsExhausted, ConfigResult};

/// Outcome of one pass through a retry scope
#[derive(Debug, Clone, PartialEq)]
pub enum Step<T, E> {
    /// Finished; leave the scope with this value
    Done(T),
    /// Run the block again after the backoff delay
    Retry,
    /// Leave the scope with this error, without retrying
    Fatal(E),
}

/// Explicit retry loop with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryScope {
    max_attempts: u32,
    backoff: ExponentialBackoff,
}

enum Exit<T, E> {
    Leave(Result<T, E>),
    Again(Duration),
}

impl RetryScope {
    /// Create a scope from a validated retry configuration
    pub fn new(config: &RetryConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { max_attempts: config.max_attempts, backoff: config.backoff() })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `block` until it finishes, blocking the thread between attempts
    ///
    /// The block receives the 1-based attempt number. A raised error on the
    /// final attempt is returned unchanged; a [`Step::Retry`] on the final
    /// attempt yields [`AttemptsExhausted`] converted into `E`.
    pub fn run<T, E, F>(&self, mut block: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<Step<T, E>, E>,
        E: From<AttemptsExhausted>,
    {
        let mut attempt = 1;
        loop {
            match self.decide(attempt, block(attempt)) {
                Exit::Leave(result) => return result,
                Exit::Again(delay) => std::thread::sleep(delay),
            }
            attempt += 1;
        }
    }

    /// Async counterpart of [`run`](Self::run) using the tokio timer
    pub async fn run_async<T, E, F, Fut>(&self, mut block: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Step<T, E>, E>>,
        E: From<AttemptsExhausted>,
    {
        let mut attempt = 1;
        loop {
            match self.decide(attempt, block(attempt).await) {
                Exit::Leave(result) => return result,
                Exit::Again(delay) => tokio::time::sleep(delay).await,
            }
            attempt += 1;
        }
    }

    fn decide<T, E>(&self, attempt: u32, outcome: Result<Step<T, E>, E>) -> Exit<T, E>
    where
        E: From<AttemptsExhausted>,
    {
        let raised = match outcome {
            Ok(Step::Done(value)) => return Exit::Leave(Ok(value)),
            Ok(Step::Fatal(error)) => return Exit::Leave(Err(error)),
            Ok(Step::Retry) => None,
            Err(error) => Some(error),
        };

        if attempt >= self.max_attempts {
            warn!(attempt, max_attempts = self.max_attempts, "retry scope out of attempts");
            let error = raised.unwrap_or_else(|| AttemptsExhausted { attempts: attempt }.into());
            return Exit::Leave(Err(error));
        }

        let delay = self.backoff.delay(attempt);
        debug!(
            attempt,
            max_attempts = self.max_attempts,
            delay_ms = delay.as_millis() as u64,
            requested = raised.is_none(),
            "retry scope backing off"
        );
        Exit::Again(delay)
    }
}
