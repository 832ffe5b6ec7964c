//! Bounded retry policy shared by every network-facing call site.
//!
//! A [`RetryPolicy`] is a plain value (attempt budget plus delay strategy).
//! Call sites pass the operation and a classifier deciding which failures are
//! worth another attempt; everything else aborts immediately.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

/// Delay between two attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delay {
    /// Always wait the same amount.
    Fixed(Duration),
    /// Wait a uniformly random duration in `[0, max]`.
    Jittered { max: Duration },
}

/// Attempt budget plus delay strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Delay,
}

/// Failure returned once a policy stops retrying.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: E },

    /// An attempt failed with an error the classifier refused to retry.
    #[error("failed on attempt {attempt}: {error}")]
    Aborted { attempt: u32, error: E },
}

impl<E> RetryError<E> {
    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Aborted { attempt, .. } => *attempt,
        }
    }

    /// The error from the final attempt.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted { error, .. } => error,
        }
    }
}

impl RetryPolicy {
    /// Mirror fetch: 10 attempts, 1 second apart.
    pub const MIRROR_FETCH: RetryPolicy = RetryPolicy::fixed(10, Duration::from_secs(1));

    /// Hosted upstream API: 30 attempts, 10 seconds apart.
    pub const REMOTE_API: RetryPolicy = RetryPolicy::fixed(30, Duration::from_secs(10));

    /// Pull-request creation: 10 attempts, 0-5 seconds apart.
    pub const PULL_REQUEST: RetryPolicy = RetryPolicy::jittered(10, Duration::from_secs(5));

    /// Single attempt, no retry.
    pub const ONCE: RetryPolicy = RetryPolicy::fixed(1, Duration::ZERO);

    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay: Delay::Fixed(delay),
        }
    }

    pub const fn jittered(max_attempts: u32, max: Duration) -> Self {
        Self {
            max_attempts,
            delay: Delay::Jittered { max },
        }
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&self) -> Duration {
        match self.delay {
            Delay::Fixed(d) => d,
            Delay::Jittered { max } => {
                let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
                Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
            }
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    ///
    /// `op` receives the 1-based attempt number. A budget of zero is treated
    /// as one attempt.
    pub async fn run<T, E, F, Fut, R>(
        &self,
        label: &str,
        mut op: F,
        retryable: R,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(op = label, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if !retryable(&error) => {
                    return Err(RetryError::Aborted { attempt, error });
                }
                Err(last) if attempt >= max_attempts => {
                    warn!(op = label, attempts = attempt, error = %last, "retry budget exhausted");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last,
                    });
                }
                Err(error) => {
                    let delay = self.next_delay();
                    warn!(
                        op = label,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
