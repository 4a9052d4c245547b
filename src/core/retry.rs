//! Retry policies
//!
//! Every retry loop in the ledger (message redelivery, CAS conflicts,
//! compensation, journal finalization) is driven by a `RetryPolicy` so tests
//! can run with zero delay and deployments can tune limits independently.

use std::future::Future;
use std::time::Duration;

use crate::types::LedgerError;

/// Delay schedule between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Retry immediately
    None,
    /// Same pause after every failed attempt
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`, capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Pause after the given failed attempt (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let shift = attempt.saturating_sub(1).min(31);
                base.checked_mul(1u32 << shift)
                    .map_or(max, |delay| delay.min(max))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; always at least 1
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Backoff::None)
    }

    pub fn exponential(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self::new(max_attempts, Backoff::Exponential { base, max })
    }

    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Sleep for the backoff following a failed attempt
    pub async fn pause(&self, attempt: u32) {
        let delay = self.backoff.delay(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Run `f` until it succeeds, fails with an error `should_retry` rejects,
    /// or the attempts run out
    ///
    /// `f` receives the 1-based attempt number. The last error is returned.
    pub async fn run<T, F, Fut, P>(
        &self,
        operation: &str,
        mut f: F,
        should_retry: P,
    ) -> Result<T, LedgerError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
        P: Fn(&LedgerError) -> bool,
    {
        let mut attempt = 1;
        loop {
            match f(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(operation, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if should_retry(&e) && self.has_attempts_left(attempt) => {
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    self.pause(attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
