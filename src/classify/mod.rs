//! # Request Classification
//!
//! ## Responsibility
//! Decide which of the five interaction modes a piece of free text belongs
//! to, combining weighted keyword signals, trigger phrases, and previous-
//! mode continuity into one confidence-ranked decision with deterministic
//! override rules for mixed-evidence inputs.
//!
//! ## Guarantees
//! - Total: `resolve()` returns a result for every input, including empty
//!   and malformed text; it has no error path.
//! - Deterministic: same text and context, same decision. Ties break by
//!   catalog order.
//! - Pure: no interior mutability; a resolver can be shared across tasks
//!   freely and never blocks.
//! - Auditable: every result carries the fired signals and a per-channel
//!   score breakdown.
//!
//! ## NOT Responsible For
//! - Running anything the decision selects (see `reliability`)
//! - Persisting conversation history (the context is caller-owned)
//! - Learning or adjusting weights from data

pub mod context;
pub mod fallback;
pub mod mode;
pub mod resolver;
pub mod signal;

// Re-exports
pub use context::{ClassificationContext, HistoryEntry, DEFAULT_HISTORY_LIMIT};
pub use fallback::{FallbackClassifier, FallbackSuggestion, NoopFallback};
pub use mode::{
    Mode, ModeCatalog, ModeDefinition, FILESYSTEM_KEY, SEARCH_INDEX_KEY, TERMINAL_KEY,
};
pub use resolver::{
    builtin_error_indicators, builtin_overrides, ChannelBreakdown, ClassificationResult,
    DetectionMethod, ModeResolver, OverrideCondition, OverrideRule, ResolverParams,
};
pub use signal::{builtin_signals, DetectionSignal, MatchPredicate, SignalEvaluator};
