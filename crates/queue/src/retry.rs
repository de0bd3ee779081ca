//! Retry policy and retry decisions.
//!
//! Attempts are counted from zero: a job's `attempt` is the number of tries
//! that already failed. `max_attempts` bounds the total number of tries, so a
//! policy with `max_attempts = 4` makes one initial try and at most three
//! retries.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use medrelay_core::DeliveryError;

use crate::job::FailureReason;

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    #[default]
    Fixed,
    /// Exponential backoff: base * 2^(retry - 1)
    Exponential,
    /// Linear backoff: base * retry
    Linear,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of tries, including the first one. Values below 1 are treated as 1.
    pub max_attempts: u32,
    /// Base delay before a retry becomes eligible
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    /// One try plus three retries, no backoff.
    fn default() -> Self {
        Self::fixed(4, Duration::ZERO)
    }
}

/// What to do with a job after a failed try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again as attempt `next_attempt`, no earlier than `delay` from now.
    Retry { next_attempt: u32, delay: Duration },
    /// Stop; the failure is final.
    GiveUp(FailureReason),
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Create a policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Create a policy with linear backoff.
    pub fn linear(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Linear,
        }
    }

    /// Total tries allowed by this policy.
    pub fn total_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before retry number `retry` (1-indexed; 0 means the first try).
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 1u32.checked_shl(retry - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
            BackoffStrategy::Linear => self.base_delay.saturating_mul(retry),
        };

        delay.min(self.max_delay)
    }

    /// Whether a job that just failed at zero-indexed `attempt` has tries left.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt.saturating_add(1) < self.total_attempts()
    }

    /// Decide the fate of a job that failed at `attempt` with `error`.
    ///
    /// Permanent errors give up immediately no matter how many tries remain.
    pub fn decide<E: Retryable + ?Sized>(&self, attempt: u32, error: &E) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::GiveUp(FailureReason::Rejected);
        }
        if !self.should_retry(attempt) {
            return RetryDecision::GiveUp(FailureReason::Exhausted);
        }
        let next_attempt = attempt + 1;
        RetryDecision::Retry {
            next_attempt,
            delay: self.delay_for_attempt(next_attempt),
        }
    }
}

/// Errors that know whether another try could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for DeliveryError {
    fn is_retryable(&self) -> bool {
        DeliveryError::is_retryable(self)
    }
}

/// Run `op` in place until it succeeds, fails permanently, or the policy is
/// exhausted, sleeping the backoff delay between tries.
///
/// This is the inline counterpart of a [`JobQueue`](crate::JobQueue) for
/// callers that must answer synchronously (a request handler writing to a
/// store, for instance). The closure receives the zero-indexed attempt.
pub async fn execute_with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => match policy.decide(attempt, &err) {
                RetryDecision::Retry {
                    next_attempt,
                    delay,
                } => {
                    warn!(attempt, error = %err, delay_ms = delay.as_millis() as u64, "operation failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt = next_attempt;
                }
                RetryDecision::GiveUp(_) => return Err(err),
            },
        }
    }
}
