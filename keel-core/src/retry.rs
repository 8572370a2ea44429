//! Retry with exponential backoff
//!
//! Operations classify their own failures by returning a [`RetryableError`].
//! Errors are fatal unless explicitly marked retryable, so an unclassified
//! failure is never repeated. Between attempts the delay grows by
//! `backoff_factor` up to `max_delay`, with symmetric random jitter, and the
//! wait is abandoned as soon as the cancellation token fires.
//!
//! Callers must make `operation` safe to invoke more than once.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Backoff parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Jitter as a fraction of the delay, applied in both directions
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter_factor: 0.2,
        }
    }
}

/// A failure together with its retry classification
#[derive(Debug)]
pub struct RetryableError<E> {
    pub error: E,
    pub retry: bool,
    pub retry_immediately: bool,
}

impl<E> RetryableError<E> {
    /// Transient failure, retried after backoff
    pub fn retryable(error: E) -> Self {
        Self {
            error,
            retry: true,
            retry_immediately: false,
        }
    }

    /// Transient failure, retried without waiting
    pub fn immediate(error: E) -> Self {
        Self {
            error,
            retry: true,
            retry_immediately: true,
        }
    }

    /// Permanent failure, returned to the caller as is
    pub fn fatal(error: E) -> Self {
        Self {
            error,
            retry: false,
            retry_immediately: false,
        }
    }
}

/// Classification helpers for `Result`
pub trait RetryExt<T, E> {
    fn or_retry(self) -> Result<T, RetryableError<E>>;
    fn or_fatal(self) -> Result<T, RetryableError<E>>;
}

impl<T, E> RetryExt<T, E> for Result<T, E> {
    fn or_retry(self) -> Result<T, RetryableError<E>> {
        self.map_err(RetryableError::retryable)
    }

    fn or_fatal(self) -> Result<T, RetryableError<E>> {
        self.map_err(RetryableError::fatal)
    }
}

/// Outcome of a retry loop that did not succeed
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The operation failed with an error not eligible for retry
    #[error("{0}")]
    Fatal(E),

    #[error("max retries exceeded after {attempts} attempts: {last}")]
    MaxRetriesExceeded { attempts: u32, last: E },

    #[error("retry canceled")]
    Canceled { last: Option<E> },
}

impl<E> RetryError<E> {
    /// The last error returned by the operation, if any
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Fatal(e) => Some(e),
            RetryError::MaxRetriesExceeded { last, .. } => Some(last),
            RetryError::Canceled { last } => last,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, RetryError::Canceled { .. })
    }
}

/// Run `operation` until it succeeds, fails fatally or runs out of attempts
///
/// # Arguments
/// * `cancel` - Aborts the wait between attempts
/// * `config` - Backoff parameters
/// * `operation` - Produces a fresh future for every attempt
///
/// # Returns
/// The first successful value, or why no attempt succeeded
pub async fn retry<T, E, F, Fut>(
    cancel: &CancellationToken,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RetryableError<E>>>,
{
    let mut delay = config.initial_delay;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.retry {
            return Err(RetryError::Fatal(err.error));
        }

        if attempt > config.max_retries {
            return Err(RetryError::MaxRetriesExceeded {
                attempts: attempt,
                last: err.error,
            });
        }

        let wait = if err.retry_immediately {
            Duration::ZERO
        } else {
            delay = next_delay(delay, config);
            with_jitter(delay, config.jitter_factor)
        };

        debug!(
            "Attempt {} failed, retrying in {:?}: {}",
            attempt, wait, err.error
        );

        if cancel.is_cancelled() {
            return Err(RetryError::Canceled {
                last: Some(err.error),
            });
        }
        if wait.is_zero() {
            continue;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(RetryError::Canceled { last: Some(err.error) });
            }
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

/// Grow `delay` by the backoff factor, capped at the maximum
fn next_delay(delay: Duration, config: &RetryConfig) -> Duration {
    delay
        .mul_f64(config.backoff_factor.max(1.0))
        .min(config.max_delay)
}

/// Add uniform jitter in `[-factor * delay, +factor * delay]`
fn with_jitter(delay: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || delay.is_zero() {
        return delay;
    }
    let spread = delay.as_secs_f64() * factor.min(1.0);
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
}
