//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`RouterConfig`] that cannot
//! be expressed through the type system alone (range checks, cross-field
//! invariants, uniqueness).
//!
//! ## Guarantees
//! - Every validation rule has at least one test that triggers it
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use super::RouterConfig;
use crate::reliability::{BreakerConfig, BudgetConfig, RateConfig};
use std::collections::HashSet;

/// Errors arising from configuration parsing, validation, or I/O.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "reliability.retry.jitter").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Shared range checks for one set of guard configs, used for both
/// `[[resources]]` entries and `[reliability.defaults]`.
fn check_guards(
    prefix: &str,
    rate: &RateConfig,
    breaker: &BreakerConfig,
    budget: &BudgetConfig,
    errors: &mut Vec<ConfigError>,
) {
    if !(rate.tokens_per_second > 0.0 && rate.tokens_per_second.is_finite()) {
        errors.push(invalid(
            &format!("{prefix}.rate.tokens_per_second"),
            rate.tokens_per_second,
            "must be a positive finite number",
        ));
    }
    if !(rate.burst_capacity >= 1.0 && rate.burst_capacity.is_finite()) {
        errors.push(invalid(
            &format!("{prefix}.rate.burst_capacity"),
            rate.burst_capacity,
            "must be at least 1.0 so a fresh bucket can admit one call",
        ));
    }
    if breaker.failure_threshold == 0 {
        errors.push(invalid(
            &format!("{prefix}.breaker.failure_threshold"),
            0,
            "must be at least 1",
        ));
    }
    if breaker.open_timeout_ms == 0 {
        errors.push(invalid(
            &format!("{prefix}.breaker.open_timeout_ms"),
            0,
            "must be at least 1ms",
        ));
    }
    if budget.daily_ceiling_micro == 0 {
        errors.push(invalid(
            &format!("{prefix}.budget.daily_ceiling_micro"),
            0,
            "a zero ceiling refuses every call; omit the resource instead",
        ));
    }
    if budget.monthly_ceiling_micro == 0 {
        errors.push(invalid(
            &format!("{prefix}.budget.monthly_ceiling_micro"),
            0,
            "a zero ceiling refuses every call; omit the resource instead",
        ));
    }
    if !(budget.warn_ratio > 0.0 && budget.warn_ratio <= 1.0) {
        errors.push(invalid(
            &format!("{prefix}.budget.warn_ratio"),
            budget.warn_ratio,
            "must be in (0.0, 1.0]",
        ));
    }
}

/// Validate all semantic constraints on a [`RouterConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Arguments
///
/// * `config` — The parsed config to validate.
///
/// # Returns
///
/// - `Ok(())` if all constraints pass.
/// - `Err(Vec<ConfigError>)` with every violation found.
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &RouterConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Router identity ──────────────────────────────────────────────
    if config.router.name.trim().is_empty() {
        errors.push(invalid("router.name", "", "router name must not be empty"));
    }
    if config.router.version.trim().is_empty() {
        errors.push(invalid(
            "router.version",
            "",
            "router version must not be empty",
        ));
    }

    // ── Channel weights ──────────────────────────────────────────────
    let params = &config.classify.params;
    for (field, value) in [
        ("classify.params.signal_weight", params.signal_weight),
        ("classify.params.trigger_weight", params.trigger_weight),
        ("classify.params.context_weight", params.context_weight),
        ("classify.params.trigger_boost", params.trigger_boost),
        ("classify.params.context_bonus", params.context_bonus),
        ("classify.params.confidence_floor", params.confidence_floor),
    ] {
        if !(0.0..=1.0).contains(&value) {
            errors.push(invalid(field, value, "must be between 0.0 and 1.0"));
        }
    }

    let weight_sum = params.signal_weight + params.trigger_weight + params.context_weight;
    // Written as a negated tolerance check so a NaN sum fails it too.
    if !((weight_sum - 1.0).abs() <= 1e-6) {
        errors.push(invalid(
            "classify.params",
            weight_sum,
            "signal_weight + trigger_weight + context_weight must sum to 1.0",
        ));
    }

    if config.classify.history_limit == 0 {
        errors.push(invalid(
            "classify.history_limit",
            0,
            "must retain at least 1 turn",
        ));
    }

    // ── Configured signals ───────────────────────────────────────────
    let mut signal_names = HashSet::new();
    for (i, signal) in config.classify.signals.iter().enumerate() {
        let prefix = format!("classify.signals[{i}]");
        if signal.name.trim().is_empty() {
            errors.push(invalid(
                &format!("{prefix}.name"),
                "",
                "signal name must not be empty",
            ));
        } else if !signal_names.insert(signal.name.as_str()) {
            errors.push(invalid(
                &format!("{prefix}.name"),
                &signal.name,
                "duplicate signal name",
            ));
        }
        if signal.terms.is_empty() || signal.terms.iter().any(|t| t.trim().is_empty()) {
            errors.push(invalid(
                &format!("{prefix}.terms"),
                format!("{:?}", signal.terms),
                "must list at least one non-empty term",
            ));
        }
        if signal.modes.is_empty() {
            errors.push(invalid(
                &format!("{prefix}.modes"),
                "[]",
                "must feed at least one mode",
            ));
        }
        if !(signal.weight > 0.0 && signal.weight <= 1.0) {
            errors.push(invalid(
                &format!("{prefix}.weight"),
                signal.weight,
                "must be in (0.0, 1.0]",
            ));
        }
    }

    // ── Trigger replacements ─────────────────────────────────────────
    let mut trigger_modes = HashSet::new();
    for (i, trigger) in config.classify.triggers.iter().enumerate() {
        let prefix = format!("classify.triggers[{i}]");
        if !trigger_modes.insert(trigger.mode) {
            errors.push(invalid(
                &format!("{prefix}.mode"),
                trigger.mode.as_str(),
                "duplicate trigger entry for mode",
            ));
        }
        if trigger.phrases.is_empty() || trigger.phrases.iter().any(|p| p.trim().is_empty()) {
            errors.push(invalid(
                &format!("{prefix}.phrases"),
                format!("{:?}", trigger.phrases),
                "must list at least one non-empty phrase",
            ));
        }
    }

    // ── Error indicators ─────────────────────────────────────────────
    if let Some(indicators) = &config.classify.error_indicators {
        if indicators.is_empty() || indicators.iter().any(|s| s.trim().is_empty()) {
            errors.push(invalid(
                "classify.error_indicators",
                format!("{indicators:?}"),
                "must list at least one non-empty substring, or be omitted",
            ));
        }
    }

    // ── Resources ────────────────────────────────────────────────────
    let mut keys = HashSet::new();
    for (i, entry) in config.resources.iter().enumerate() {
        let prefix = format!("resources[{i}]");
        if entry.key.trim().is_empty() {
            errors.push(invalid(
                &format!("{prefix}.key"),
                "",
                "resource key must not be empty",
            ));
        } else if !keys.insert(entry.key.as_str()) {
            errors.push(invalid(
                &format!("{prefix}.key"),
                &entry.key,
                "duplicate resource key",
            ));
        }
        check_guards(&prefix, &entry.rate, &entry.breaker, &entry.budget, &mut errors);
    }

    // ── Reliability ──────────────────────────────────────────────────
    let retry = &config.reliability.retry;
    if retry.base_delay_ms > retry.max_delay_ms {
        errors.push(invalid(
            "reliability.retry.base_delay_ms",
            retry.base_delay_ms,
            "must be \u{2264} max_delay_ms",
        ));
    }
    if !(0.0..=1.0).contains(&retry.jitter) {
        errors.push(invalid(
            "reliability.retry.jitter",
            retry.jitter,
            "must be between 0.0 and 1.0",
        ));
    }
    let defaults = &config.reliability.defaults;
    check_guards(
        "reliability.defaults",
        &defaults.rate,
        &defaults.breaker,
        &defaults.budget,
        &mut errors,
    );

    // ── Metrics port range ──────────────────────────────────────────
    if let Some(port) = config.observability.metrics_port {
        if port == 0 {
            errors.push(invalid(
                "observability.metrics_port",
                0,
                "metrics port must be at least 1",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
