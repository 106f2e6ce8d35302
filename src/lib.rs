//! # tokio-intent-router
//!
//! Request classification and resilience execution for LLM routing layers.
//!
//! ## Architecture
//!
//! Two halves behind one crate boundary:
//! ```text
//! text ──► SignalEvaluator ──► ModeResolver ──► ClassificationResult
//!
//! key  ──► budget ──► circuit ──► rate limit ──► retry { op } ──► OperationOutcome
//! ```
//!
//! Classification is a pure, total function over the input text and an
//! optional conversation context. Execution wraps an opaque async operation
//! in budget, circuit-breaker, rate-limit, and retry guards, keyed by
//! [`ResourceKey`].

// ── Lint policy (aerospace-grade) ─────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod classify;
pub mod config;
pub mod metrics;
pub mod reliability;

// Re-exports for convenience
pub use classify::{
    ClassificationContext, ClassificationResult, DetectionMethod, Mode, ModeResolver,
    SignalEvaluator,
};
pub use config::RouterConfig;
pub use reliability::{
    BudgetVerdict, CircuitBreaker, CostTracker, FailureKind, OperationOutcome, RateLimiter,
    ReliabilityExecutor, RetryPolicy,
};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"` — structured JSON output for production log aggregators
///   (Datadog, Grafana Loki, etc.)
/// - anything else (including unset) — human-readable pretty output
///   for local development
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`RouterError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
///
/// # Example
///
/// ```no_run
/// # use tokio_intent_router::{init_tracing, RouterError};
/// # fn example() -> Result<(), RouterError> {
/// init_tracing()?;
/// # Ok(()) }
/// ```
pub fn init_tracing() -> Result<(), RouterError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    init_tracing_json(format == "json")
}

/// Initialise the global tracing subscriber with an explicit format.
///
/// The environment-driven [`init_tracing`] and the config-driven
/// [`config::ObservabilityConfig::init`] both end up here. Filter level is
/// controlled by `RUST_LOG` either way.
///
/// # Errors
///
/// Returns [`RouterError::Other`] if the global subscriber has already
/// been set.
///
/// # Panics
///
/// This function never panics.
pub fn init_tracing_json(json: bool) -> Result<(), RouterError> {
    let result = if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init()
    };

    result.map_err(|e| RouterError::Other(format!("tracing init failed: {e}")))
}

/// Top-level router errors.
///
/// These surface only from construction and configuration paths. Failures
/// that occur while guarding an operation are not errors in this sense —
/// they are reported as values through
/// [`OperationOutcome`](reliability::OperationOutcome), so callers match on
/// a closed set instead of parsing strings.
#[derive(Error, Debug)]
pub enum RouterError {
    /// A configuration value is missing or invalid.
    ///
    /// Returned at construction time so that misconfiguration surfaces
    /// immediately rather than at the first guarded call.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

/// Identifier for a guarded downstream resource.
///
/// Every rate limit, circuit breaker, and budget is keyed by a
/// `ResourceKey` — typically a provider or endpoint name such as
/// `"anthropic"` or `"search-index"`. Keys are opaque to the router;
/// two keys are the same resource exactly when they compare equal.
///
/// # Example
///
/// ```rust
/// use tokio_intent_router::ResourceKey;
/// let key = ResourceKey::new("anthropic");
/// assert_eq!(key.as_str(), "anthropic");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct ResourceKey(
    /// The raw key string.
    pub String,
);

impl ResourceKey {
    /// Create a new [`ResourceKey`] from any string-like value.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Return the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}
