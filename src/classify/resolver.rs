//! Mode resolution: evidence combination, floor fallback, override rules.
//!
//! ## Responsibility
//! Turn raw text plus an optional conversation context into exactly one
//! [`ClassificationResult`]. Three evidence channels feed the decision:
//!
//! 1. **Signals** (weight 0.5) — additive sums from the
//!    [`SignalEvaluator`] catalog.
//! 2. **Triggers** (weight 0.3) — a fixed boost when a mode's trigger
//!    phrase appears in the text. Kept separate from signals so short,
//!    strong phrases ("fix", "plan") are not diluted by many weak signals.
//! 3. **Context** (weight 0.2) — a small continuity bonus for the previous
//!    turn's mode, deliberately weak enough for one strong contrary signal
//!    to override.
//!
//! After the weighted argmax, a confidence floor routes weak decisions to
//! [`Mode::Generic`], and deterministic override rules encode domain facts
//! that outrank scores (an explicit error indicator means debugging, a file
//! reference means code work).
//!
//! ## Guarantees
//! - Total: every input, including empty and non-ASCII text, produces a
//!   result; this function has no failure modes.
//! - Deterministic: identical input and context always produce the same
//!   result. Score ties break by catalog order.
//! - Pure: no interior state, no locks, no I/O.
//!
//! ## NOT Responsible For
//! - Executing anything (see `reliability`)
//! - Maintaining the context between turns (caller-owned)

use crate::classify::fallback::FallbackClassifier;
use crate::classify::signal::contains_file_extension;
use crate::classify::{ClassificationContext, Mode, ModeCatalog, SignalEvaluator};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// How a classification decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// The combined score cleared the confidence floor.
    Direct,
    /// The floor was not cleared; the decision fell back to the designated
    /// fallback mode (possibly adjusted afterwards by an override rule or a
    /// fallback classifier).
    Fallback,
}

impl DetectionMethod {
    /// Stable string form, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::Direct => "direct",
            DetectionMethod::Fallback => "fallback",
        }
    }
}

/// Per-channel contributions behind a decision, for audit output.
///
/// Describes the strongest candidate before the floor and the override
/// rules were applied; `override_applied` names the rule that changed the
/// final mode, if any did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelBreakdown {
    /// Raw additive signal sum for the strongest candidate.
    pub signal_score: f64,
    /// Trigger channel value (0.0, or the configured boost on a phrase hit).
    pub trigger_boost: f64,
    /// Context channel value (0.0, or the configured continuity bonus).
    pub context_bonus: f64,
    /// Weighted combination of the three channels, before clamping.
    pub combined: f64,
    /// Name of the override rule that forced the final mode, if any.
    pub override_applied: Option<String>,
}

/// The outcome of one resolution. Immutable once returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// The resolved mode.
    pub mode: Mode,
    /// Winning combined score, clamped to `[0, 1]`.
    pub confidence: f64,
    /// Whether the decision was direct or floor-fallback.
    pub method: DetectionMethod,
    /// Names of the detection signals that fired, in catalog order.
    pub signals_fired: Vec<String>,
    /// Per-channel audit breakdown.
    pub breakdown: ChannelBreakdown,
}

/// Textual condition an override rule tests against the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OverrideCondition {
    /// The input contains a recognisable file reference (`name.ext`).
    FileExtension,
    /// The input contains an explicit error or exception indicator.
    ErrorIndicator,
}

/// A deterministic post-argmax rule: when its condition holds on the text
/// and the current decision is one the rule applies to, the decision is
/// forced to [`force`](Self::force). Rules run in order; later rules see
/// earlier rules' outcome.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OverrideRule {
    /// Rule name, reported in the breakdown when the rule fires.
    pub name: String,
    /// The textual condition.
    pub condition: OverrideCondition,
    /// Mode the decision is forced to.
    pub force: Mode,
}

impl OverrideRule {
    /// Whether this rule applies to the current decision.
    ///
    /// A rule never applies when the decision already is its target. The
    /// file-extension rule additionally skips modes whose definition
    /// already includes file tooling: a file reference only contradicts
    /// the scored decision when that decision cannot touch files.
    fn applies(&self, current: Mode, catalog: &ModeCatalog) -> bool {
        if current == self.force {
            return false;
        }
        match self.condition {
            OverrideCondition::FileExtension => !catalog.definition(current).uses_file_tooling(),
            OverrideCondition::ErrorIndicator => true,
        }
    }

    /// Whether the textual condition holds for the lowercased input.
    fn condition_holds(&self, lower: &str, error_indicators: &[String]) -> bool {
        match self.condition {
            OverrideCondition::FileExtension => contains_file_extension(lower),
            OverrideCondition::ErrorIndicator => {
                error_indicators.iter().any(|t| lower.contains(t.as_str()))
            }
        }
    }
}

/// The built-in override rules, in application order.
///
/// The error-indicator rule runs last so that an input carrying both a file
/// reference and an error indicator always lands on [`Mode::Debugging`].
pub fn builtin_overrides() -> Vec<OverrideRule> {
    vec![
        OverrideRule {
            name: "file-reference-implies-coding".to_string(),
            condition: OverrideCondition::FileExtension,
            force: Mode::Coding,
        },
        OverrideRule {
            name: "error-indicator-implies-debugging".to_string(),
            condition: OverrideCondition::ErrorIndicator,
            force: Mode::Debugging,
        },
    ]
}

/// Error and exception indicators the built-in error override recognises.
pub fn builtin_error_indicators() -> Vec<String> {
    [
        "error",
        "exception",
        "traceback",
        "stack trace",
        "panicked",
        "segfault",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

// ── Tuning parameters ──────────────────────────────────────────────────

fn default_signal_weight() -> f64 {
    0.5
}
fn default_trigger_weight() -> f64 {
    0.3
}
fn default_context_weight() -> f64 {
    0.2
}
fn default_trigger_boost() -> f64 {
    0.5
}
fn default_context_bonus() -> f64 {
    0.2
}
fn default_confidence_floor() -> f64 {
    0.5
}

/// Resolver tuning: channel mix, channel constants, and the floor.
///
/// Defaults reproduce the reference weighting: signals 50%, triggers 30%,
/// context 20%; a 0.5 trigger boost; a 0.2 continuity bonus; a 0.5 floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResolverParams {
    /// Relative weight of the signal channel.
    #[serde(default = "default_signal_weight")]
    pub signal_weight: f64,
    /// Relative weight of the trigger channel.
    #[serde(default = "default_trigger_weight")]
    pub trigger_weight: f64,
    /// Relative weight of the context channel.
    #[serde(default = "default_context_weight")]
    pub context_weight: f64,
    /// Value the trigger channel takes on a phrase hit.
    #[serde(default = "default_trigger_boost")]
    pub trigger_boost: f64,
    /// Value the context channel takes for the previous turn's mode.
    #[serde(default = "default_context_bonus")]
    pub context_bonus: f64,
    /// Combined scores below this resolve to the fallback mode.
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
}

impl Default for ResolverParams {
    fn default() -> Self {
        Self {
            signal_weight: default_signal_weight(),
            trigger_weight: default_trigger_weight(),
            context_weight: default_context_weight(),
            trigger_boost: default_trigger_boost(),
            context_bonus: default_context_bonus(),
            confidence_floor: default_confidence_floor(),
        }
    }
}

// ── Resolver ───────────────────────────────────────────────────────────

/// Combines signal, trigger, and context evidence into one decision.
///
/// Pure and shareable across tasks without synchronisation.
///
/// # Panics
///
/// This type and its methods never panic.
#[derive(Debug, Clone)]
pub struct ModeResolver {
    evaluator: SignalEvaluator,
    catalog: ModeCatalog,
    params: ResolverParams,
    overrides: Vec<OverrideRule>,
    error_indicators: Vec<String>,
}

impl ModeResolver {
    /// Resolver over the built-in catalogs with reference tuning.
    pub fn new() -> Self {
        Self::from_parts(
            SignalEvaluator::builtin(),
            ModeCatalog::builtin(),
            ResolverParams::default(),
            builtin_overrides(),
            builtin_error_indicators(),
        )
    }

    /// Resolver over explicit catalogs and tuning.
    pub fn from_parts(
        evaluator: SignalEvaluator,
        catalog: ModeCatalog,
        params: ResolverParams,
        overrides: Vec<OverrideRule>,
        error_indicators: Vec<String>,
    ) -> Self {
        Self {
            evaluator,
            catalog,
            params,
            overrides,
            error_indicators,
        }
    }

    /// The mode catalog this resolver decides over.
    pub fn catalog(&self) -> &ModeCatalog {
        &self.catalog
    }

    /// The signal evaluator feeding the signal channel.
    pub fn evaluator(&self) -> &SignalEvaluator {
        &self.evaluator
    }

    /// Resolve `text` to a mode.
    ///
    /// Total over all string inputs: empty or unrecognisable text resolves
    /// to [`Mode::Generic`] with low confidence rather than failing.
    ///
    /// # Arguments
    ///
    /// * `text` — The raw input to classify.
    /// * `context` — Caller-owned conversation context; read, never mutated.
    ///
    /// # Panics
    ///
    /// This function never panics.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tokio_intent_router::classify::{ClassificationContext, Mode, ModeResolver};
    ///
    /// let resolver = ModeResolver::new();
    /// let ctx = ClassificationContext::new();
    /// let result = resolver.resolve("Plan the architecture for a REST API", &ctx);
    /// assert_eq!(result.mode, Mode::Planning);
    /// assert!(result.confidence >= 0.7);
    /// ```
    pub fn resolve(&self, text: &str, context: &ClassificationContext) -> ClassificationResult {
        let started = std::time::Instant::now();
        let lower = text.to_lowercase();
        let (raw_scores, signals_fired) = self.evaluator.evaluate_with_fired(text);

        // Weighted argmax over the canonical mode order; strict comparison
        // keeps the earlier mode on ties.
        let mut best_mode = Mode::Generic;
        let mut best = ChannelBreakdown {
            signal_score: 0.0,
            trigger_boost: 0.0,
            context_bonus: 0.0,
            combined: f64::NEG_INFINITY,
            override_applied: None,
        };

        for mode in Mode::ALL {
            let signal_score = raw_scores.get(&mode).copied().unwrap_or(0.0);
            let trigger_boost = if self.trigger_hit(mode, &lower) {
                self.params.trigger_boost
            } else {
                0.0
            };
            let context_bonus = if context.previous_mode() == Some(mode) {
                self.params.context_bonus
            } else {
                0.0
            };
            let combined = self.params.signal_weight * signal_score
                + self.params.trigger_weight * trigger_boost
                + self.params.context_weight * context_bonus;

            if combined > best.combined {
                best_mode = mode;
                best = ChannelBreakdown {
                    signal_score,
                    trigger_boost,
                    context_bonus,
                    combined,
                    override_applied: None,
                };
            }
        }

        let (mut mode, method) = if best.combined < self.params.confidence_floor {
            (Mode::Generic, DetectionMethod::Fallback)
        } else {
            (best_mode, DetectionMethod::Direct)
        };

        for rule in &self.overrides {
            if rule.applies(mode, &self.catalog)
                && rule.condition_holds(&lower, &self.error_indicators)
            {
                debug!(
                    rule = %rule.name,
                    from = %mode,
                    to = %rule.force,
                    "override rule fired"
                );
                mode = rule.force;
                best.override_applied = Some(rule.name.clone());
            }
        }

        let confidence = best.combined.clamp(0.0, 1.0);
        debug!(
            mode = %mode,
            confidence = confidence,
            method = ?method,
            fired = signals_fired.len(),
            "resolved input"
        );
        crate::metrics::record_classification(mode.as_str(), method.as_str());
        crate::metrics::observe_resolve_duration(started.elapsed());

        ClassificationResult {
            mode,
            confidence,
            method,
            signals_fired,
            breakdown: best,
        }
    }

    /// Resolve, consulting a [`FallbackClassifier`] when the deterministic
    /// path lands on the low-confidence floor.
    ///
    /// The classifier is only asked when the floor was hit and no override
    /// rule fired (override rules encode domain facts that outrank any
    /// classifier). Its suggestion is adopted only when it is more
    /// confident than the deterministic result; classifier failures keep
    /// the deterministic result, so this method is as total as
    /// [`resolve`](Self::resolve).
    pub async fn resolve_with_fallback(
        &self,
        text: &str,
        context: &ClassificationContext,
        fallback: &dyn FallbackClassifier,
    ) -> ClassificationResult {
        let deterministic = self.resolve(text, context);
        if deterministic.method == DetectionMethod::Direct
            || deterministic.breakdown.override_applied.is_some()
        {
            return deterministic;
        }

        match fallback.classify(text, &deterministic).await {
            Ok(Some(suggestion)) if suggestion.confidence > deterministic.confidence => {
                debug!(
                    mode = %suggestion.mode,
                    confidence = suggestion.confidence,
                    "adopting fallback classifier suggestion"
                );
                ClassificationResult {
                    mode: suggestion.mode,
                    confidence: suggestion.confidence.clamp(0.0, 1.0),
                    ..deterministic
                }
            }
            Ok(_) => deterministic,
            Err(e) => {
                warn!(error = %e, "fallback classifier failed, keeping deterministic result");
                deterministic
            }
        }
    }

    fn trigger_hit(&self, mode: Mode, lower: &str) -> bool {
        self.catalog
            .definition(mode)
            .trigger_phrases
            .iter()
            .any(|p| lower.contains(p.to_lowercase().as_str()))
    }
}

impl Default for ModeResolver {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
