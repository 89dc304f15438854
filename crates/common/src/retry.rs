//! Bounded retry with fixed or exponential backoff.
//!
//! Sleeps between attempts are cancellable: a fired token ends the loop with
//! [`RetryError::Cancelled`] instead of waiting out the delay.

use std::{future::Future, time::Duration};

use {tokio_util::sync::CancellationToken, tracing::warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// Doubles after every failed attempt, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero behaves like one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    pub const fn exponential(max_attempts: u32, initial: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { initial, max },
        }
    }

    /// Delay to wait after the `attempt`-th failure (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => {
                let shift = attempt.saturating_sub(1).min(16);
                initial.saturating_mul(1 << shift).min(max)
            },
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(5, Duration::from_millis(500))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("cancelled while retrying")]
    Cancelled,

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    /// The last underlying error, if the policy ran out.
    pub fn into_last(self) -> Option<E> {
        match self {
            Self::Cancelled => None,
            Self::Exhausted { last, .. } => Some(last),
        }
    }
}

/// Run `request` until it succeeds, the policy is exhausted, or `cancel`
/// fires.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &'static str,
    mut request: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        attempt += 1;

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RetryError::Cancelled),
            outcome = request(attempt) => outcome,
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_attempts => {
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    error = %err,
                    "retries exhausted"
                );
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            },
            Err(err) => {
                let wait = policy.delay_after(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    retry_in_ms = wait.as_millis() as u64,
                    error = %err,
                    "attempt failed, waiting before retry"
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(RetryError::Cancelled),
                    () = tokio::time::sleep(wait) => {},
                }
            },
        }
    }
}
