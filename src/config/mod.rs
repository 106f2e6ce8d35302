//! Declarative router configuration.
//!
//! ## Responsibility
//! Parse and validate TOML router configuration files, and turn a validated
//! [`RouterConfig`] into the runtime pieces: a
//! [`ModeResolver`](crate::classify::ModeResolver), a
//! [`ReliabilityExecutor`](crate::reliability::ReliabilityExecutor), and a
//! [`ClassificationContext`](crate::classify::ClassificationContext).
//!
//! ## Guarantees
//! - Deterministic: the same TOML input always produces the same config
//! - Validated: all semantic constraints are checked before a config is
//!   accepted
//! - Type-safe: invalid field combinations are caught at parse time via
//!   serde
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Classification itself (that belongs to `classify`)
//! - Guarded execution (that belongs to `reliability`)
//! - Metrics collection (that belongs to `metrics`)

pub mod loader;
pub mod validation;

use crate::classify::{
    builtin_error_indicators, builtin_overrides, ClassificationContext, DetectionSignal,
    MatchPredicate, Mode, ModeCatalog, ModeResolver, ResolverParams, SignalEvaluator,
    DEFAULT_HISTORY_LIMIT,
};
use crate::reliability::{
    BreakerConfig, BudgetConfig, CircuitBreaker, CostTracker, RateConfig, RateLimiter,
    ReliabilityExecutor, RetryPolicy,
};
use crate::{ResourceKey, RouterError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Default value functions ──────────────────────────────────────────────

/// Default conversation history retained for context continuity.
fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

/// Default log format: human-readable.
fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for a router instance.
///
/// Deserialized from a TOML file and validated before use. Only the
/// `[router]` identity section is required; every other section has a
/// documented default.
///
/// # Example
///
/// ```toml
/// [router]
/// name = "production"
/// version = "1.0"
///
/// [[resources]]
/// key = "filesystem"
/// cost_per_call_micro = 50
///
/// [resources.rate]
/// tokens_per_second = 20.0
/// burst_capacity = 10.0
/// ```
///
/// # Panics
///
/// This type never panics during construction or access.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RouterConfig {
    /// Router identity and version metadata.
    pub router: RouterSection,
    /// Classification tuning: channel weights, extra signals, triggers.
    #[serde(default)]
    pub classify: ClassifySection,
    /// Per-resource guard configuration.
    #[serde(default)]
    pub resources: Vec<ResourceEntry>,
    /// Retry policy and guard defaults for unlisted resources.
    #[serde(default)]
    pub reliability: ReliabilitySection,
    /// Observability: logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ── Router identity ──────────────────────────────────────────────────────

/// Router identity and version metadata.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RouterSection {
    /// Human-readable instance name (e.g., "production", "staging").
    pub name: String,
    /// Semantic version of this configuration (e.g., "1.0").
    pub version: String,
    /// Optional description for documentation purposes.
    pub description: Option<String>,
}

// ── Classification ───────────────────────────────────────────────────────

/// Classification tuning section.
///
/// Everything defaults to the built-in behaviour; deployments add signals
/// or reshape the channel mix without recompiling.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ClassifySection {
    /// Channel weights, boost constants, and the confidence floor.
    #[serde(default)]
    pub params: ResolverParams,
    /// Conversation turns retained for context continuity.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Extra detection signals appended to the built-in catalog.
    #[serde(default)]
    pub signals: Vec<SignalEntry>,
    /// Per-mode trigger phrase replacements.
    #[serde(default)]
    pub triggers: Vec<TriggerEntry>,
    /// Error indicator substrings for the debugging override rule.
    /// `None` keeps the built-in list.
    #[serde(default)]
    pub error_indicators: Option<Vec<String>>,
}

impl Default for ClassifySection {
    fn default() -> Self {
        Self {
            params: ResolverParams::default(),
            history_limit: default_history_limit(),
            signals: Vec::new(),
            triggers: Vec::new(),
            error_indicators: None,
        }
    }
}

/// One configured detection signal: terms, supported modes, and weight.
///
/// Configured signals always match on any-of-terms; the structural
/// predicates (file references, term conjunctions) are built-in only.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SignalEntry {
    /// Name reported in classification results when this signal fires.
    pub name: String,
    /// Substrings matched case-insensitively; any hit fires the signal.
    pub terms: Vec<String>,
    /// Modes whose score this signal feeds.
    pub modes: Vec<Mode>,
    /// Evidence weight in `(0, 1]`.
    pub weight: f64,
}

/// Replacement trigger phrases for one mode.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct TriggerEntry {
    /// The mode whose trigger phrases are replaced.
    pub mode: Mode,
    /// The new phrase list.
    pub phrases: Vec<String>,
}

// ── Resources ────────────────────────────────────────────────────────────

/// Guard configuration for one resource key.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ResourceEntry {
    /// The resource key these guards apply to.
    pub key: String,
    /// Token bucket shape.
    #[serde(default)]
    pub rate: RateConfig,
    /// Circuit breaker thresholds.
    #[serde(default)]
    pub breaker: BreakerConfig,
    /// Budget ceilings.
    #[serde(default)]
    pub budget: BudgetConfig,
    /// Price recorded per successful call, in micro-dollars.
    #[serde(default)]
    pub cost_per_call_micro: u64,
}

// ── Reliability ──────────────────────────────────────────────────────────

/// Retry policy plus guard defaults for resources without an entry.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ReliabilitySection {
    /// Retry policy applied to every guarded call.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Guard defaults for keys not listed under `[[resources]]`.
    #[serde(default)]
    pub defaults: ResourceDefaults,
}

/// Default guard configuration for unlisted resource keys.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ResourceDefaults {
    /// Default token bucket shape.
    #[serde(default)]
    pub rate: RateConfig,
    /// Default circuit breaker thresholds.
    #[serde(default)]
    pub breaker: BreakerConfig,
    /// Default budget ceilings.
    #[serde(default)]
    pub budget: BudgetConfig,
    /// Default price per successful call, in micro-dollars.
    #[serde(default)]
    pub cost_per_call_micro: u64,
}

// ── Observability ────────────────────────────────────────────────────────

/// Observability configuration: logging and the metrics endpoint.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ObservabilityConfig {
    /// Log output format.
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    /// Port for the Prometheus metrics HTTP endpoint. `None` disables
    /// metric collection entirely.
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: default_log_format(),
            metrics_port: None,
        }
    }
}

impl ObservabilityConfig {
    /// Apply this section: install the tracing subscriber and, when a
    /// metrics port is configured, initialise the metrics registry.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Other`] if a global subscriber is already
    /// installed or metric registration fails.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn init(&self) -> Result<(), RouterError> {
        crate::init_tracing_json(self.log_format == LogFormat::Json)?;
        if self.metrics_port.is_some() {
            crate::metrics::init_metrics()?;
        }
        Ok(())
    }
}

/// Log output format.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, colorized log output.
    Pretty,
    /// Structured JSON log output for machine consumption.
    Json,
}

// ── Runtime assembly ─────────────────────────────────────────────────────

impl RouterConfig {
    /// Build the classification side from this config.
    ///
    /// Starts from the built-in signal catalog and mode definitions,
    /// appends any configured signals, and applies trigger replacements.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn build_resolver(&self) -> ModeResolver {
        let mut evaluator = SignalEvaluator::builtin();
        evaluator.extend(self.classify.signals.iter().map(|s| DetectionSignal {
            name: s.name.clone(),
            predicate: MatchPredicate::AnyOf(s.terms.clone()),
            modes: s.modes.clone(),
            weight: s.weight,
        }));

        let mut catalog = ModeCatalog::builtin();
        for trigger in &self.classify.triggers {
            let mut def = catalog.definition(trigger.mode).clone();
            def.trigger_phrases = trigger.phrases.clone();
            catalog.replace(def);
        }

        let indicators = self
            .classify
            .error_indicators
            .clone()
            .unwrap_or_else(builtin_error_indicators);

        ModeResolver::from_parts(
            evaluator,
            catalog,
            self.classify.params.clone(),
            builtin_overrides(),
            indicators,
        )
    }

    /// Build the execution side from this config.
    ///
    /// Every `[[resources]]` entry gets its own guard configuration; keys
    /// not listed fall back to `[reliability.defaults]`.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn build_executor(&self) -> ReliabilityExecutor {
        let mut rates = HashMap::new();
        let mut breakers = HashMap::new();
        let mut budgets = HashMap::new();
        let mut call_costs = HashMap::new();

        for entry in &self.resources {
            let key = ResourceKey::new(entry.key.as_str());
            rates.insert(key.clone(), entry.rate);
            breakers.insert(key.clone(), entry.breaker);
            budgets.insert(key.clone(), entry.budget);
            if entry.cost_per_call_micro > 0 {
                call_costs.insert(key, entry.cost_per_call_micro);
            }
        }

        let defaults = &self.reliability.defaults;
        ReliabilityExecutor::new(
            RateLimiter::with_rates(defaults.rate, rates),
            CircuitBreaker::with_configs(defaults.breaker, breakers),
            CostTracker::with_configs(defaults.budget, budgets),
            self.reliability.retry,
        )
        .with_call_costs(defaults.cost_per_call_micro, call_costs)
    }

    /// Build a fresh conversation context with the configured history
    /// limit.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn build_context(&self) -> ClassificationContext {
        ClassificationContext::with_limit(self.classify.history_limit)
    }
}

/// Export the JSON Schema for `RouterConfig`.
///
/// This enables IDE autocomplete when editing TOML config files.
///
/// # Errors
///
/// Returns `serde_json::Error` if schema serialization fails (should not
/// happen with well-formed derive macros).
///
/// # Panics
///
/// This function never panics.
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(RouterConfig);
    serde_json::to_string_pretty(&schema)
}
