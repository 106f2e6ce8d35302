//! Bounded retry with exponential backoff.
//!
//! The retry loop is deliberately dumb: it re-runs the operation only when
//! the caller's classifier says the failure was transient, sleeps
//! `min(max_delay, base * 2^attempt)` (with a little jitter so synchronised
//! callers fan out), and stops on the first non-retryable failure, on
//! exhaustion, or on cancellation. Cancellation of the overall call is
//! final: it interrupts both the operation and the backoff sleep and is
//! never treated as a transient failure.
//!
//! Admission (rate limits, circuits, budgets) is someone else's job; see
//! the executor. Attempts here share whatever admission the caller already
//! obtained.

use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    5_000
}
fn default_jitter() -> f64 {
    0.1
}

/// Retry policy: attempt budget and backoff shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RetryPolicy {
    /// Additional attempts after the first (3 means up to 4 executions).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff base delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplicative jitter fraction in `[0, 1]`: each delay is scaled by
    /// a uniform factor from `1 - jitter` to `1 + jitter`.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff delay before retry number `attempt` (zero-based), without
    /// jitter: `min(max_delay, base * 2^attempt)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let millis = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(millis.min(self.max_delay_ms))
    }

    pub(crate) fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        delay.mul_f64(factor.max(0.0))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

/// Result of a retry loop.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded on some attempt.
    Success {
        /// The success value.
        value: T,
        /// Number of executions, including the successful one.
        attempts: u32,
    },
    /// Every attempt failed with a retryable error; the budget ran out.
    Exhausted {
        /// The failure observed on the final attempt.
        last_error: E,
        /// Number of executions.
        attempts: u32,
    },
    /// A failure the classifier refused to retry.
    GaveUp {
        /// The non-retryable failure.
        error: E,
        /// Number of executions.
        attempts: u32,
    },
    /// The overall call was cancelled during an attempt or a backoff.
    Cancelled {
        /// Executions started before cancellation.
        attempts: u32,
    },
}

impl<T, E> RetryOutcome<T, E> {
    /// Whether the loop ended in success.
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success { .. })
    }

    /// Number of executions the loop performed or started.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts, .. }
            | RetryOutcome::Exhausted { attempts, .. }
            | RetryOutcome::GaveUp { attempts, .. }
            | RetryOutcome::Cancelled { attempts } => *attempts,
        }
    }
}

/// Run `operation` under `policy`, retrying failures `is_retryable`
/// accepts.
///
/// Equivalent to [`run_with_retry_cancellable`] with a cancellation future
/// that never fires.
pub async fn run_with_retry<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    is_retryable: R,
    operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(&E) -> bool,
{
    run_with_retry_cancellable(policy, is_retryable, operation, std::future::pending()).await
}

/// Run `operation` under `policy` with an external cancellation signal.
///
/// `cancel` resolving interrupts whatever is in progress, the attempt or
/// the backoff sleep, and ends the loop with [`RetryOutcome::Cancelled`].
/// No further attempt is made after cancellation.
pub async fn run_with_retry_cancellable<T, E, F, Fut, R, C>(
    policy: &RetryPolicy,
    mut is_retryable: R,
    mut operation: F,
    cancel: C,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(&E) -> bool,
    C: Future<Output = ()>,
{
    tokio::pin!(cancel);
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let result = tokio::select! {
            biased;
            _ = &mut cancel => {
                debug!(attempts, "retry loop cancelled during attempt");
                return RetryOutcome::Cancelled { attempts };
            }
            result = operation() => result,
        };

        match result {
            Ok(value) => {
                if attempts > 1 {
                    debug!(attempts, "operation succeeded after retries");
                }
                return RetryOutcome::Success { value, attempts };
            }
            Err(error) => {
                if !is_retryable(&error) {
                    return RetryOutcome::GaveUp { error, attempts };
                }
                // attempts - 1 retries already used
                if attempts > policy.max_retries {
                    return RetryOutcome::Exhausted {
                        last_error: error,
                        attempts,
                    };
                }
                let delay = policy.jittered(policy.delay_for(attempts - 1));
                warn!(
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "retryable failure, backing off"
                );
                tokio::select! {
                    biased;
                    _ = &mut cancel => {
                        debug!(attempts, "retry loop cancelled during backoff");
                        return RetryOutcome::Cancelled { attempts };
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
