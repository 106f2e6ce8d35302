//! Guarded execution: admission control plus bounded retry for one call.
//!
//! ## Responsibility
//!
//! Run a caller-supplied async operation against a resource key with every
//! guard applied in a fixed order. Admission is checked once per logical
//! call: budget first, then circuit, then rate. A refusal by an earlier
//! guard costs nothing at the later ones, so a call refused over budget
//! never burns a rate token and never touches the circuit.
//!
//! ## Guarantees
//!
//! - Admission order is budget, circuit, rate; the first refusal wins.
//! - Retry attempts share the admission of the call that started them; no
//!   attempt re-acquires tokens or re-consults the circuit.
//! - The circuit breaker sees one observation per guarded call: its final
//!   outcome. A call that recovers through retry reports a success, so
//!   transient mid-call failures never trip the circuit for other callers.
//! - Only successful calls are priced into the cost tracker.
//! - No internal lock is held across the awaited operation.
//!
//! ## NOT Responsible For
//!
//! - Classifying which errors are transient; the caller passes a predicate.
//! - Queueing or waiting for capacity. A refused call is refused now;
//!   callers who want to wait schedule their own retry of the whole call.

use crate::reliability::budget::{BudgetSnapshot, CostTracker};
use crate::reliability::circuit_breaker::{CircuitBreaker, CircuitSnapshot};
use crate::reliability::rate_limit::{RateLimiter, RateUsage};
use crate::reliability::retry::RetryPolicy;
use crate::ResourceKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Why a guarded call did not produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Refused at admission: a budget ceiling is reached.
    BudgetExceeded,
    /// Refused at admission: the circuit is open.
    CircuitOpen,
    /// Refused at admission: no rate token available.
    RateLimited,
    /// Every permitted attempt failed with a retryable error.
    RetriesExhausted,
    /// The first non-retryable error ended the call.
    NonRetryable,
    /// The caller's cancellation signal fired before completion.
    Cancelled,
}

impl FailureKind {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::BudgetExceeded => "budget_exceeded",
            FailureKind::CircuitOpen => "circuit_open",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::RetriesExhausted => "retries_exhausted",
            FailureKind::NonRetryable => "non_retryable",
            FailureKind::Cancelled => "cancelled",
        }
    }

    /// Whether the call was refused before any attempt ran.
    pub fn is_admission_refusal(&self) -> bool {
        matches!(
            self,
            FailureKind::BudgetExceeded | FailureKind::CircuitOpen | FailureKind::RateLimited
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final result of one guarded call.
#[derive(Debug)]
pub enum OperationOutcome<T> {
    /// The operation produced a value.
    Success {
        /// The value.
        value: T,
        /// Executions performed, including the successful one.
        attempts: u32,
    },
    /// The call was refused, gave up, was exhausted, or was cancelled.
    Failure {
        /// What ended the call.
        kind: FailureKind,
        /// Executions performed; zero for admission refusals.
        attempts: u32,
        /// Human-readable detail, the last error's message for attempt
        /// failures.
        message: String,
    },
}

impl<T> OperationOutcome<T> {
    /// Whether the call produced a value.
    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Success { .. })
    }

    /// Executions performed.
    pub fn attempts(&self) -> u32 {
        match self {
            OperationOutcome::Success { attempts, .. }
            | OperationOutcome::Failure { attempts, .. } => *attempts,
        }
    }

    /// The success value, if any.
    pub fn ok(self) -> Option<T> {
        match self {
            OperationOutcome::Success { value, .. } => Some(value),
            OperationOutcome::Failure { .. } => None,
        }
    }

    /// The failure kind, if the call failed.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            OperationOutcome::Success { .. } => None,
            OperationOutcome::Failure { kind, .. } => Some(*kind),
        }
    }
}

/// One moment in a guarded call's lifecycle, for event subscribers.
///
/// Refused calls emit only the final [`ExecutionEvent::Completed`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// The call passed all three admission guards.
    Admitted {
        /// Resource being called.
        resource: ResourceKey,
    },
    /// An execution is starting.
    AttemptStarted {
        /// Resource being called.
        resource: ResourceKey,
        /// One-based attempt number.
        attempt: u32,
    },
    /// An execution failed.
    AttemptFailed {
        /// Resource being called.
        resource: ResourceKey,
        /// One-based attempt number.
        attempt: u32,
        /// The error's message.
        error: String,
        /// Backoff before the next attempt, absent when this failure ends
        /// the call.
        retry_in_ms: Option<u64>,
    },
    /// The call is over.
    Completed {
        /// Resource being called.
        resource: ResourceKey,
        /// Whether a value was produced.
        success: bool,
        /// Executions performed.
        attempts: u32,
    },
}

/// Combined guard state for one resource, for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceStatus {
    /// The resource.
    pub resource: ResourceKey,
    /// Circuit position.
    pub circuit: CircuitSnapshot,
    /// Budget position.
    pub budget: BudgetSnapshot,
    /// Rate bucket view; absent on backends that do not expose one.
    pub rate: Option<RateUsage>,
}

/// Runs operations behind the full guard stack.
///
/// # Example
///
/// ```
/// use tokio_intent_router::reliability::{
///     BreakerConfig, BudgetConfig, CircuitBreaker, CostTracker, RateConfig,
///     RateLimiter, ReliabilityExecutor, RetryPolicy,
/// };
/// use tokio_intent_router::ResourceKey;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let executor = ReliabilityExecutor::new(
///     RateLimiter::new(RateConfig::default()),
///     CircuitBreaker::new(BreakerConfig::default()),
///     CostTracker::new(BudgetConfig::default()),
///     RetryPolicy::default(),
/// );
///
/// let key = ResourceKey::new("search-index");
/// let outcome = executor
///     .run(&key, |_: &String| true, || async { Ok::<_, String>(42) })
///     .await;
/// assert!(outcome.is_success());
/// # }
/// ```
pub struct ReliabilityExecutor {
    rate: RateLimiter,
    breaker: CircuitBreaker,
    costs: CostTracker,
    retry: RetryPolicy,
    call_costs: HashMap<ResourceKey, u64>,
    default_call_cost_micro: u64,
}

impl ReliabilityExecutor {
    /// Executor over the given guards, with a zero per-call price.
    pub fn new(
        rate: RateLimiter,
        breaker: CircuitBreaker,
        costs: CostTracker,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            rate,
            breaker,
            costs,
            retry,
            call_costs: HashMap::new(),
            default_call_cost_micro: 0,
        }
    }

    /// Set the price recorded per successful call, in micro-dollars, with
    /// optional per-key overrides.
    pub fn with_call_costs(
        mut self,
        default_cost_micro: u64,
        per_key: HashMap<ResourceKey, u64>,
    ) -> Self {
        self.default_call_cost_micro = default_cost_micro;
        self.call_costs = per_key;
        self
    }

    /// The rate limiter behind this executor.
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate
    }

    /// The circuit breaker behind this executor.
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The cost tracker behind this executor.
    pub fn cost_tracker(&self) -> &CostTracker {
        &self.costs
    }

    /// The retry policy applied to every call.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn call_cost_for(&self, key: &ResourceKey) -> u64 {
        self.call_costs
            .get(key)
            .copied()
            .unwrap_or(self.default_call_cost_micro)
    }

    /// Run `operation` against `key` with the configured per-call price.
    ///
    /// `is_retryable` decides, per error, whether the failure is transient;
    /// non-retryable errors end the call on the spot.
    pub async fn run<T, E, F, Fut, R>(
        &self,
        key: &ResourceKey,
        is_retryable: R,
        operation: F,
    ) -> OperationOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(&E) -> bool,
        E: fmt::Display,
    {
        self.execute(
            key,
            is_retryable,
            operation,
            std::future::pending(),
            None,
            self.call_cost_for(key),
        )
        .await
    }

    /// [`run`](Self::run) with an explicit price for this call, overriding
    /// the configured per-call cost. Charged only on success.
    pub async fn run_with_usage<T, E, F, Fut, R>(
        &self,
        key: &ResourceKey,
        cost_micro: u64,
        is_retryable: R,
        operation: F,
    ) -> OperationOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(&E) -> bool,
        E: fmt::Display,
    {
        self.execute(
            key,
            is_retryable,
            operation,
            std::future::pending(),
            None,
            cost_micro,
        )
        .await
    }

    /// [`run`](Self::run) with an external cancellation signal.
    ///
    /// `cancel` resolving interrupts the in-flight attempt or backoff and
    /// ends the call with [`FailureKind::Cancelled`].
    pub async fn run_cancellable<T, E, F, Fut, R, C>(
        &self,
        key: &ResourceKey,
        is_retryable: R,
        operation: F,
        cancel: C,
    ) -> OperationOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(&E) -> bool,
        C: Future<Output = ()>,
        E: fmt::Display,
    {
        self.execute(key, is_retryable, operation, cancel, None, self.call_cost_for(key))
            .await
    }

    /// [`run`](Self::run), reporting lifecycle events on `events`.
    ///
    /// Events are delivered best-effort with `try_send`; a full channel
    /// drops the event rather than slowing the call down.
    pub async fn run_with_events<T, E, F, Fut, R>(
        &self,
        key: &ResourceKey,
        is_retryable: R,
        operation: F,
        events: mpsc::Sender<ExecutionEvent>,
    ) -> OperationOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(&E) -> bool,
        E: fmt::Display,
    {
        self.execute(
            key,
            is_retryable,
            operation,
            std::future::pending(),
            Some(&events),
            self.call_cost_for(key),
        )
        .await
    }

    /// Combined guard state for `key`. Keys never called report fresh
    /// guards.
    pub fn status(&self, key: &ResourceKey) -> ResourceStatus {
        ResourceStatus {
            resource: key.clone(),
            circuit: self.breaker.snapshot(key),
            budget: self.costs.snapshot(key),
            rate: self.rate.usage(key),
        }
    }

    /// Check all three admission guards in order; first refusal wins.
    fn admit(&self, key: &ResourceKey) -> Result<(), FailureKind> {
        match self.costs.check_budget(key) {
            crate::reliability::budget::BudgetVerdict::Exceeded => {
                warn!(resource = %key, "call refused: budget ceiling reached");
                crate::metrics::record_rejection(key.as_str(), "budget");
                return Err(FailureKind::BudgetExceeded);
            }
            crate::reliability::budget::BudgetVerdict::Warn => {
                debug!(resource = %key, "budget in warn band, still admitting");
            }
            crate::reliability::budget::BudgetVerdict::Ok => {}
        }

        if !self.breaker.allow(key) {
            debug!(resource = %key, "call refused: circuit open");
            crate::metrics::record_rejection(key.as_str(), "circuit");
            return Err(FailureKind::CircuitOpen);
        }

        if !self.rate.try_acquire(key) {
            // The circuit may have just granted us its half-open probe;
            // hand it back so the refusal does not strand the slot.
            self.breaker.release_probe(key);
            debug!(resource = %key, "call refused: rate limited");
            crate::metrics::record_rejection(key.as_str(), "rate");
            return Err(FailureKind::RateLimited);
        }

        Ok(())
    }

    async fn execute<T, E, F, Fut, R, C>(
        &self,
        key: &ResourceKey,
        mut is_retryable: R,
        mut operation: F,
        cancel: C,
        events: Option<&mpsc::Sender<ExecutionEvent>>,
        cost_micro: u64,
    ) -> OperationOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(&E) -> bool,
        C: Future<Output = ()>,
        E: fmt::Display,
    {
        if let Err(kind) = self.admit(key) {
            emit(
                events,
                ExecutionEvent::Completed {
                    resource: key.clone(),
                    success: false,
                    attempts: 0,
                },
            );
            return OperationOutcome::Failure {
                kind,
                attempts: 0,
                message: format!("refused at admission: {kind}"),
            };
        }
        emit(
            events,
            ExecutionEvent::Admitted {
                resource: key.clone(),
            },
        );

        tokio::pin!(cancel);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            emit(
                events,
                ExecutionEvent::AttemptStarted {
                    resource: key.clone(),
                    attempt: attempts,
                },
            );

            let result = tokio::select! {
                biased;
                _ = &mut cancel => {
                    debug!(resource = %key, attempts, "call cancelled during attempt");
                    return self.finish_failure(
                        key,
                        events,
                        FailureKind::Cancelled,
                        attempts,
                        "cancelled by caller".to_string(),
                    );
                }
                result = operation() => result,
            };

            match result {
                Ok(value) => {
                    self.breaker.record_success(key);
                    if cost_micro > 0 {
                        self.costs.record_usage(key, cost_micro);
                    }
                    crate::metrics::record_execution(key.as_str(), "success");
                    crate::metrics::observe_attempts(attempts);
                    emit(
                        events,
                        ExecutionEvent::Completed {
                            resource: key.clone(),
                            success: true,
                            attempts,
                        },
                    );
                    return OperationOutcome::Success { value, attempts };
                }
                Err(error) => {
                    let message = error.to_string();

                    if !is_retryable(&error) {
                        self.breaker.record_failure(key);
                        emit(
                            events,
                            ExecutionEvent::AttemptFailed {
                                resource: key.clone(),
                                attempt: attempts,
                                error: message.clone(),
                                retry_in_ms: None,
                            },
                        );
                        return self.finish_failure(
                            key,
                            events,
                            FailureKind::NonRetryable,
                            attempts,
                            message,
                        );
                    }
                    // attempts - 1 retries already used
                    if attempts > self.retry.max_retries {
                        self.breaker.record_failure(key);
                        emit(
                            events,
                            ExecutionEvent::AttemptFailed {
                                resource: key.clone(),
                                attempt: attempts,
                                error: message.clone(),
                                retry_in_ms: None,
                            },
                        );
                        return self.finish_failure(
                            key,
                            events,
                            FailureKind::RetriesExhausted,
                            attempts,
                            message,
                        );
                    }

                    let delay = self.retry.jittered(self.retry.delay_for(attempts - 1));
                    warn!(
                        resource = %key,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "attempt failed, backing off"
                    );
                    emit(
                        events,
                        ExecutionEvent::AttemptFailed {
                            resource: key.clone(),
                            attempt: attempts,
                            error: message,
                            retry_in_ms: Some(delay.as_millis() as u64),
                        },
                    );

                    tokio::select! {
                        biased;
                        _ = &mut cancel => {
                            debug!(resource = %key, attempts, "call cancelled during backoff");
                            return self.finish_failure(
                                key,
                                events,
                                FailureKind::Cancelled,
                                attempts,
                                "cancelled by caller".to_string(),
                            );
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn finish_failure<T>(
        &self,
        key: &ResourceKey,
        events: Option<&mpsc::Sender<ExecutionEvent>>,
        kind: FailureKind,
        attempts: u32,
        message: String,
    ) -> OperationOutcome<T> {
        crate::metrics::record_execution(key.as_str(), kind.as_str());
        if attempts > 0 {
            crate::metrics::observe_attempts(attempts);
        }
        emit(
            events,
            ExecutionEvent::Completed {
                resource: key.clone(),
                success: false,
                attempts,
            },
        );
        OperationOutcome::Failure {
            kind,
            attempts,
            message,
        }
    }
}

/// Best-effort event delivery; never blocks the call.
fn emit(events: Option<&mpsc::Sender<ExecutionEvent>>, event: ExecutionEvent) {
    if let Some(tx) = events {
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("execution event dropped, subscriber channel full");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliability::budget::{BudgetConfig, BudgetVerdict};
    use crate::reliability::circuit_breaker::{BreakerConfig, CircuitStatus};
    use crate::reliability::rate_limit::RateConfig;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn key(name: &str) -> ResourceKey {
        ResourceKey::new(name)
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 5,
            max_delay_ms: 20,
            jitter: 0.0,
        }
    }

    fn executor(retry: RetryPolicy) -> ReliabilityExecutor {
        // Negligible refill keeps token-count assertions deterministic;
        // the burst is large enough for every call these tests make.
        ReliabilityExecutor::new(
            RateLimiter::new(RateConfig {
                tokens_per_second: 0.001,
                burst_capacity: 1000.0,
            }),
            CircuitBreaker::new(BreakerConfig {
                failure_threshold: 100,
                open_timeout_ms: 60_000,
            }),
            CostTracker::new(BudgetConfig::default()),
            retry,
        )
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let ex = executor(fast_retry(3));
        let outcome = ex
            .run(&key("api"), |_: &String| true, || async {
                Ok::<_, String>(7)
            })
            .await;
        match outcome {
            OperationOutcome::Success { value, attempts } => {
                assert_eq!(value, 7);
                assert_eq!(attempts, 1);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transient_failures_absorbed_by_retry() {
        let ex = executor(fast_retry(5));
        let k = key("api");
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let outcome = ex
            .run(&k, |_: &String| true, move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(format!("transient {n}"))
                    } else {
                        Ok("recovered")
                    }
                }
            })
            .await;
        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // The call completed successfully, so the breaker saw one success.
        let snap = ex.circuit_breaker().snapshot(&k);
        assert_eq!(snap.status, CircuitStatus::Closed);
        assert_eq!(snap.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_mid_call_failures_leave_circuit_closed() {
        // Threshold below the number of transient failures inside the call:
        // if attempts were reported individually the circuit would open
        // mid-call and swallow the recovery.
        let ex = ReliabilityExecutor::new(
            RateLimiter::new(RateConfig {
                tokens_per_second: 1000.0,
                burst_capacity: 1000.0,
            }),
            CircuitBreaker::new(BreakerConfig {
                failure_threshold: 2,
                open_timeout_ms: 60_000,
            }),
            CostTracker::new(BudgetConfig::default()),
            fast_retry(2),
        );
        let k = key("flaky");
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let outcome = ex
            .run(&k, |_: &String| true, move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(format!("transient {n}"))
                    } else {
                        Ok("recovered")
                    }
                }
            })
            .await;
        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 3);

        let snap = ex.circuit_breaker().snapshot(&k);
        assert_eq!(
            snap.status,
            CircuitStatus::Closed,
            "a call that completed successfully must not leave its circuit open"
        );
        assert_eq!(snap.consecutive_failures, 0);

        let next: OperationOutcome<u32> =
            ex.run(&k, |_: &String| true, || async { Ok(9) }).await;
        assert!(next.is_success(), "later callers are still admitted");
    }

    #[tokio::test]
    async fn test_non_retryable_error_ends_call() {
        let ex = executor(fast_retry(5));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let outcome: OperationOutcome<()> = ex
            .run(
                &key("api"),
                |e: &String| !e.contains("schema"),
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err("schema mismatch".to_string()) }
                },
            )
            .await;
        match outcome {
            OperationOutcome::Failure {
                kind,
                attempts,
                message,
            } => {
                assert_eq!(kind, FailureKind::NonRetryable);
                assert_eq!(attempts, 1);
                assert_eq!(message, "schema mismatch");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_error() {
        let ex = executor(fast_retry(2));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let outcome: OperationOutcome<()> = ex
            .run(&key("api"), |_: &String| true, move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move { Err(format!("boom {n}")) }
            })
            .await;
        match outcome {
            OperationOutcome::Failure {
                kind,
                attempts,
                message,
            } => {
                assert_eq!(kind, FailureKind::RetriesExhausted);
                assert_eq!(attempts, 3, "one initial try plus two retries");
                assert_eq!(message, "boom 2");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_circuit_refuses_without_calling() {
        let ex = executor(fast_retry(3));
        let k = key("down");
        ex.circuit_breaker().trip(&k);

        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let outcome: OperationOutcome<()> = ex
            .run(&k, |_: &String| true, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::CircuitOpen));
        assert_eq!(outcome.attempts(), 0);
        assert_eq!(
            calls.load(Ordering::SeqCst),
            0,
            "refused call must not run the operation"
        );
    }

    #[tokio::test]
    async fn test_budget_refusal_consumes_no_rate_token() {
        let ex = ReliabilityExecutor::new(
            RateLimiter::new(RateConfig {
                tokens_per_second: 0.001,
                burst_capacity: 1.0,
            }),
            CircuitBreaker::new(BreakerConfig::default()),
            CostTracker::new(BudgetConfig {
                daily_ceiling_micro: 100,
                monthly_ceiling_micro: 1_000,
                warn_ratio: 0.8,
            }),
            fast_retry(0),
        );
        let k = key("pricey");
        ex.cost_tracker().record_usage(&k, 100);
        assert_eq!(ex.cost_tracker().check_budget(&k), BudgetVerdict::Exceeded);

        let outcome: OperationOutcome<()> = ex
            .run(&k, |_: &String| true, || async { Ok(()) })
            .await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::BudgetExceeded));

        let usage = ex.rate_limiter().usage(&k).unwrap();
        assert!(
            usage.available > 0.99,
            "token untouched by budget refusal, {} available",
            usage.available
        );
    }

    #[tokio::test]
    async fn test_rate_refusal_when_bucket_empty() {
        let ex = ReliabilityExecutor::new(
            RateLimiter::new(RateConfig {
                tokens_per_second: 0.001,
                burst_capacity: 1.0,
            }),
            CircuitBreaker::new(BreakerConfig::default()),
            CostTracker::new(BudgetConfig::default()),
            fast_retry(0),
        );
        let k = key("api");
        let first: OperationOutcome<u32> =
            ex.run(&k, |_: &String| true, || async { Ok(1) }).await;
        assert!(first.is_success());

        let second: OperationOutcome<u32> =
            ex.run(&k, |_: &String| true, || async { Ok(2) }).await;
        assert_eq!(second.failure_kind(), Some(FailureKind::RateLimited));
        assert_eq!(second.attempts(), 0);
    }

    #[tokio::test]
    async fn test_failed_calls_trip_circuit_for_later_calls() {
        let ex = ReliabilityExecutor::new(
            RateLimiter::new(RateConfig {
                tokens_per_second: 1000.0,
                burst_capacity: 1000.0,
            }),
            CircuitBreaker::new(BreakerConfig {
                failure_threshold: 3,
                open_timeout_ms: 60_000,
            }),
            CostTracker::new(BudgetConfig::default()),
            fast_retry(2),
        );
        let k = key("flaky");
        // Each exhausted call counts as one breaker failure, whatever its
        // internal attempt count; three such calls reach the threshold.
        for round in 0..3 {
            let outcome: OperationOutcome<()> = ex
                .run(&k, |_: &String| true, || async {
                    Err("down".to_string())
                })
                .await;
            assert_eq!(outcome.failure_kind(), Some(FailureKind::RetriesExhausted));
            assert_eq!(outcome.attempts(), 3);
            if round < 2 {
                assert_eq!(
                    ex.circuit_breaker().snapshot(&k).status,
                    CircuitStatus::Closed,
                    "below threshold after {} exhausted calls",
                    round + 1
                );
            }
        }
        assert_eq!(ex.circuit_breaker().snapshot(&k).status, CircuitStatus::Open);

        let refused: OperationOutcome<()> =
            ex.run(&k, |_: &String| true, || async { Ok(()) }).await;
        assert_eq!(refused.failure_kind(), Some(FailureKind::CircuitOpen));
    }

    #[tokio::test]
    async fn test_probe_recovery_through_executor() {
        let ex = ReliabilityExecutor::new(
            RateLimiter::new(RateConfig {
                tokens_per_second: 1000.0,
                burst_capacity: 1000.0,
            }),
            CircuitBreaker::new(BreakerConfig {
                failure_threshold: 1,
                open_timeout_ms: 50,
            }),
            CostTracker::new(BudgetConfig::default()),
            fast_retry(0),
        );
        let k = key("api");
        let down: OperationOutcome<()> = ex
            .run(
                &k,
                |_: &String| false,
                || async { Err("down".to_string()) },
            )
            .await;
        assert_eq!(down.failure_kind(), Some(FailureKind::NonRetryable));

        tokio::time::sleep(Duration::from_millis(80)).await;
        let probe: OperationOutcome<&str> = ex
            .run(&k, |_: &String| true, || async { Ok("back") })
            .await;
        assert!(probe.is_success(), "probe call admitted after timeout");
        assert_eq!(
            ex.circuit_breaker().snapshot(&k).status,
            CircuitStatus::Closed
        );
    }

    #[tokio::test]
    async fn test_rate_refusal_returns_half_open_probe() {
        let ex = ReliabilityExecutor::new(
            RateLimiter::new(RateConfig {
                tokens_per_second: 0.001,
                burst_capacity: 1.0,
            }),
            CircuitBreaker::new(BreakerConfig {
                failure_threshold: 1,
                open_timeout_ms: 50,
            }),
            CostTracker::new(BudgetConfig::default()),
            fast_retry(0),
        );
        let k = key("api");
        // Spends the only token and opens the circuit.
        let down: OperationOutcome<()> = ex
            .run(
                &k,
                |_: &String| false,
                || async { Err("down".to_string()) },
            )
            .await;
        assert_eq!(down.failure_kind(), Some(FailureKind::NonRetryable));

        tokio::time::sleep(Duration::from_millis(80)).await;
        // Circuit grants the probe but the bucket is empty; the probe must
        // come back so a later caller can use it.
        let refused: OperationOutcome<()> =
            ex.run(&k, |_: &String| true, || async { Ok(()) }).await;
        assert_eq!(refused.failure_kind(), Some(FailureKind::RateLimited));
        let snap = ex.circuit_breaker().snapshot(&k);
        assert_eq!(snap.status, CircuitStatus::HalfOpen);
        assert!(!snap.probe_in_flight, "probe released by the rate refusal");

        ex.rate_limiter().reset(&k);
        let probe: OperationOutcome<&str> = ex
            .run(&k, |_: &String| true, || async { Ok("back") })
            .await;
        assert!(probe.is_success());
        assert_eq!(
            ex.circuit_breaker().snapshot(&k).status,
            CircuitStatus::Closed
        );
    }

    #[tokio::test]
    async fn test_cancellation_mid_operation() {
        let ex = executor(fast_retry(3));
        let outcome: OperationOutcome<()> = ex
            .run_cancellable(
                &key("api"),
                |_: &String| true,
                || async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok(())
                },
                tokio::time::sleep(Duration::from_millis(30)),
            )
            .await;
        match outcome {
            OperationOutcome::Failure { kind, attempts, .. } => {
                assert_eq!(kind, FailureKind::Cancelled);
                assert_eq!(attempts, 1);
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_success_is_priced_into_budget() {
        let ex = executor(fast_retry(0));
        let k = key("api");
        let outcome = ex
            .run_with_usage(&k, 250, |_: &String| true, || async {
                Ok::<_, String>(())
            })
            .await;
        assert!(outcome.is_success());
        assert_eq!(ex.cost_tracker().snapshot(&k).day_spent_micro, 250);

        // A failed call is not priced.
        let failed: OperationOutcome<()> = ex
            .run_with_usage(&k, 250, |_: &String| false, || async {
                Err("down".to_string())
            })
            .await;
        assert!(!failed.is_success());
        assert_eq!(ex.cost_tracker().snapshot(&k).day_spent_micro, 250);
    }

    #[tokio::test]
    async fn test_configured_call_cost_applies() {
        let mut per_key = HashMap::new();
        per_key.insert(key("pricey"), 1_000u64);
        let ex = executor(fast_retry(0)).with_call_costs(10, per_key);

        let _ = ex
            .run(&key("pricey"), |_: &String| true, || async {
                Ok::<_, String>(())
            })
            .await;
        let _ = ex
            .run(&key("cheap"), |_: &String| true, || async {
                Ok::<_, String>(())
            })
            .await;
        assert_eq!(
            ex.cost_tracker().snapshot(&key("pricey")).day_spent_micro,
            1_000
        );
        assert_eq!(
            ex.cost_tracker().snapshot(&key("cheap")).day_spent_micro,
            10
        );
    }

    #[tokio::test]
    async fn test_event_stream_for_retried_call() {
        let ex = executor(fast_retry(3));
        let k = key("api");
        let (tx, mut rx) = mpsc::channel(16);

        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let outcome = ex
            .run_with_events(
                &k,
                |_: &String| true,
                move || {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err("transient".to_string())
                        } else {
                            Ok("done")
                        }
                    }
                },
                tx,
            )
            .await;
        assert!(outcome.is_success());

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 5, "got {events:?}");
        assert!(matches!(events[0], ExecutionEvent::Admitted { .. }));
        assert!(matches!(
            events[1],
            ExecutionEvent::AttemptStarted { attempt: 1, .. }
        ));
        assert!(matches!(
            events[2],
            ExecutionEvent::AttemptFailed {
                attempt: 1,
                retry_in_ms: Some(_),
                ..
            }
        ));
        assert!(matches!(
            events[3],
            ExecutionEvent::AttemptStarted { attempt: 2, .. }
        ));
        assert!(matches!(
            events[4],
            ExecutionEvent::Completed {
                success: true,
                attempts: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_refused_call_emits_only_completed() {
        let ex = executor(fast_retry(3));
        let k = key("down");
        ex.circuit_breaker().trip(&k);
        let (tx, mut rx) = mpsc::channel(16);

        let outcome: OperationOutcome<()> = ex
            .run_with_events(&k, |_: &String| true, || async { Ok(()) }, tx)
            .await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::CircuitOpen));

        let first = rx.try_recv();
        assert!(matches!(
            first,
            Ok(ExecutionEvent::Completed {
                success: false,
                attempts: 0,
                ..
            })
        ));
        assert!(rx.try_recv().is_err(), "no further events for a refusal");
    }

    #[tokio::test]
    async fn test_status_combines_all_guards() {
        let ex = executor(fast_retry(0));
        let k = key("api");
        let _ = ex
            .run_with_usage(&k, 40, |_: &String| true, || async {
                Ok::<_, String>(())
            })
            .await;

        let status = ex.status(&k);
        assert_eq!(status.resource, k);
        assert_eq!(status.circuit.status, CircuitStatus::Closed);
        assert_eq!(status.budget.day_spent_micro, 40);
        let rate = status.rate.unwrap();
        assert!(
            rate.available < rate.capacity,
            "one token spent, {} of {}",
            rate.available,
            rate.capacity
        );
    }

    #[test]
    fn test_failure_kind_labels() {
        assert_eq!(FailureKind::BudgetExceeded.as_str(), "budget_exceeded");
        assert_eq!(FailureKind::Cancelled.as_str(), "cancelled");
        assert!(FailureKind::RateLimited.is_admission_refusal());
        assert!(!FailureKind::RetriesExhausted.is_admission_refusal());
    }
}
