//! Guarded execution against rate-limited, fallible, metered resources.
//!
//! ## Responsibility
//!
//! Everything that stands between "we decided to call this resource" and
//! the call itself: token-bucket rate limiting, per-key circuit breaking,
//! bounded retry with exponential backoff, and day/month cost budgets.
//! [`ReliabilityExecutor`] composes all four; the individual guards are
//! public for callers that need only one.
//!
//! ## Guarantees
//!
//! - Every guard is keyed by [`ResourceKey`](crate::ResourceKey); keys
//!   never interfere with each other.
//! - Admission checks are synchronous and non-blocking. Nothing here
//!   holds a lock across an awaited operation.
//! - Refusals are ordered: budget, then circuit, then rate. A refusal by
//!   an earlier guard spends nothing at the later ones.
//!
//! ## NOT Responsible For
//!
//! - Deciding which resource a request needs; see [`crate::classify`].
//! - Performing the guarded call or interpreting its result beyond
//!   success and failure.

pub mod budget;
pub mod circuit_breaker;
pub mod executor;
pub mod rate_limit;
pub mod retry;

pub use budget::{
    dollars_to_micro, micro_to_dollars, BudgetConfig, BudgetSnapshot, BudgetVerdict, CostTracker,
};
pub use circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitSnapshot, CircuitStatus};
pub use executor::{
    ExecutionEvent, FailureKind, OperationOutcome, ReliabilityExecutor, ResourceStatus,
};
pub use rate_limit::{RateConfig, RateLimiter, RateUsage};
pub use retry::{run_with_retry, run_with_retry_cancellable, RetryOutcome, RetryPolicy};
