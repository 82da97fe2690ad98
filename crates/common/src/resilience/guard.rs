//! Retry around an optional circuit breaker
//!
//! Each retry attempt passes through the breaker. While the breaker is open
//! the attempt is rejected with a `CircuitOpen` failure, which the default
//! retryable set excludes, so the guard fails fast instead of sleeping
//! through backoff against a dependency known to be down.

use std::future::Future;

use super::circuit_breaker::CircuitBreaker;
use super::clock::{Clock, SystemClock};
use super::retry::RetryPolicy;
use crate::error::{CircuitOpenError, ErrorClassification};

/// Composed retry + circuit breaker protection for one dependency
pub struct Guard<E, C: Clock = SystemClock> {
    retry: RetryPolicy<E>,
    breaker: Option<CircuitBreaker<C>>,
}

impl<E, C: Clock> Clone for Guard<E, C> {
    fn clone(&self) -> Self {
        Self { retry: self.retry.clone(), breaker: self.breaker.clone() }
    }
}

impl<E, C: Clock> std::fmt::Debug for Guard<E, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guard").field("retry", &self.retry).field("breaker", &self.breaker).finish()
    }
}

impl<E, C> Guard<E, C>
where
    E: ErrorClassification + From<CircuitOpenError>,
    C: Clock,
{
    /// Guard with retry only
    pub fn new(retry: RetryPolicy<E>) -> Self {
        Self { retry, breaker: None }
    }

    /// Route every attempt through `breaker`; clones of a breaker share state
    pub fn with_breaker(mut self, breaker: CircuitBreaker<C>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy<E> {
        &self.retry
    }

    pub fn breaker(&self) -> Option<&CircuitBreaker<C>> {
        self.breaker.as_ref()
    }

    /// Run a synchronous operation under retry and breaker protection
    pub fn call<F, T>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
    {
        self.retry.call(|| match &self.breaker {
            Some(breaker) => breaker.call(&mut operation),
            None => operation(),
        })
    }

    /// Run an async operation under retry and breaker protection
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let operation = &operation;
        let breaker = self.breaker.as_ref();
        self.retry
            .execute(move || async move {
                match breaker {
                    Some(breaker) => breaker.execute(operation).await,
                    None => operation().await,
                }
            })
            .await
    }
}
