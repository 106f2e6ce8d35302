//! Weighted detection signals over raw input text.
//!
//! A [`SignalEvaluator`] holds an immutable catalog of [`DetectionSignal`]s.
//! Each signal pairs a match predicate with a weight and the set of modes it
//! supports; evaluating a text adds the weight of every matching signal to
//! every mode that signal supports.
//!
//! Raw scores are unbounded additive sums, deliberately not normalised here:
//! the resolver mixes them with the other evidence channels and clamps the
//! final confidence. A text that matches nothing yields a zero score for
//! every mode, which the resolver treats as "no strong evidence".
//!
//! All matching is case-insensitive via a single lowercase pass, O(n) scans,
//! no regular expressions.

use crate::classify::Mode;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Match predicate for one detection signal.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchPredicate {
    /// Matches when at least one term is contained in the lowercased text.
    AnyOf(Vec<String>),
    /// Matches when every term is contained in the lowercased text.
    AllOf(Vec<String>),
    /// Matches when the text contains a recognisable `name.ext` file
    /// reference with a known source or config extension.
    FileExtension,
}

impl MatchPredicate {
    /// Evaluate the predicate against already-lowercased text.
    pub fn matches(&self, lower: &str) -> bool {
        match self {
            MatchPredicate::AnyOf(terms) => terms.iter().any(|t| lower.contains(t.as_str())),
            MatchPredicate::AllOf(terms) => {
                !terms.is_empty() && terms.iter().all(|t| lower.contains(t.as_str()))
            }
            MatchPredicate::FileExtension => contains_file_extension(lower),
        }
    }
}

/// Immutable catalog entry: a predicate, the modes it supports, and its
/// evidence weight in `[0, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DetectionSignal {
    /// Name reported in the result's fired-signal list when this matches.
    pub name: String,
    /// The match predicate.
    pub predicate: MatchPredicate,
    /// Modes whose score this signal contributes to when it fires.
    pub modes: Vec<Mode>,
    /// Evidence weight added to each supported mode on a match.
    pub weight: f64,
}

/// Scores raw text against the signal catalog.
///
/// Stateless between calls and cheap to share. Evaluation is a single
/// lowercase pass followed by O(catalog) substring scans.
///
/// # Panics
///
/// This type and its methods never panic.
#[derive(Debug, Clone)]
pub struct SignalEvaluator {
    signals: Vec<DetectionSignal>,
}

impl SignalEvaluator {
    /// Create an evaluator over the given catalog.
    pub fn new(signals: Vec<DetectionSignal>) -> Self {
        Self { signals }
    }

    /// Create an evaluator over the built-in catalog.
    pub fn builtin() -> Self {
        Self::new(builtin_signals())
    }

    /// Score `text` against the catalog.
    ///
    /// # Returns
    ///
    /// A mapping with an entry for every [`Mode`], zero-valued where no
    /// supporting signal matched. Sums are unbounded and not normalised.
    pub fn evaluate(&self, text: &str) -> HashMap<Mode, f64> {
        self.evaluate_with_fired(text).0
    }

    /// Score `text` and also report which signals fired, in catalog order.
    pub fn evaluate_with_fired(&self, text: &str) -> (HashMap<Mode, f64>, Vec<String>) {
        let lower = text.to_lowercase();
        let mut scores: HashMap<Mode, f64> = Mode::ALL.iter().map(|m| (*m, 0.0)).collect();
        let mut fired = Vec::new();

        for signal in &self.signals {
            if !signal.predicate.matches(&lower) {
                continue;
            }
            fired.push(signal.name.clone());
            for mode in &signal.modes {
                if let Some(score) = scores.get_mut(mode) {
                    *score += signal.weight;
                }
            }
        }

        (scores, fired)
    }

    /// The catalog this evaluator scores against.
    pub fn signals(&self) -> &[DetectionSignal] {
        &self.signals
    }

    /// Append extra signals to the catalog.
    pub fn extend(&mut self, extra: impl IntoIterator<Item = DetectionSignal>) {
        self.signals.extend(extra);
    }
}

impl Default for SignalEvaluator {
    fn default() -> Self {
        Self::builtin()
    }
}

// ── Built-in catalog ───────────────────────────────────────────────────

fn any_of(terms: &[&str]) -> MatchPredicate {
    MatchPredicate::AnyOf(terms.iter().map(|t| t.to_string()).collect())
}

fn signal(name: &str, predicate: MatchPredicate, modes: &[Mode], weight: f64) -> DetectionSignal {
    DetectionSignal {
        name: name.to_string(),
        predicate,
        modes: modes.to_vec(),
        weight,
    }
}

/// The built-in detection signal catalog.
///
/// Weights are per-signal evidence strength; several signals supporting the
/// same mode stack additively.
pub fn builtin_signals() -> Vec<DetectionSignal> {
    vec![
        // Planning
        signal(
            "planning-verbs",
            any_of(&["plan", "organize", "outline", "roadmap", "strategy", "prioritize"]),
            &[Mode::Planning],
            0.5,
        ),
        signal(
            "architecture-terms",
            any_of(&["architecture", "system design", "high-level", "data model", "milestones"]),
            &[Mode::Planning],
            0.4,
        ),
        signal(
            "design-targets",
            any_of(&[" api", "schema", "service", "pipeline", "infrastructure"]),
            &[Mode::Planning, Mode::Coding],
            0.3,
        ),
        // Coding
        signal(
            "implementation-verbs",
            any_of(&["implement", "write", "create", "add", "build", "refactor", "rename"]),
            &[Mode::Coding],
            0.5,
        ),
        signal(
            "code-artifacts",
            any_of(&["function", "class", "module", "endpoint", "struct", "method"]),
            &[Mode::Coding],
            0.4,
        ),
        signal(
            "code-fence",
            any_of(&["```"]),
            &[Mode::Coding, Mode::Debugging],
            0.3,
        ),
        signal(
            "file-reference",
            MatchPredicate::FileExtension,
            &[Mode::Coding, Mode::Debugging],
            0.4,
        ),
        // Debugging
        signal(
            "error-terms",
            any_of(&["error", "exception", "traceback", "stack trace", "panicked", "segfault", "crash"]),
            &[Mode::Debugging],
            0.5,
        ),
        signal(
            "failure-verbs",
            any_of(&["fix", "debug", "broken", "fails", "failing", "not working", "doesn't work"]),
            &[Mode::Debugging],
            0.4,
        ),
        signal(
            "diagnostic-context",
            any_of(&["line ", "backtrace", "core dump", "regression", "reproduce"]),
            &[Mode::Debugging],
            0.3,
        ),
        // Information
        signal(
            "question-forms",
            any_of(&["what is", "what are", "how does", "how do", "why does", "explain", "tell me about"]),
            &[Mode::Information],
            0.5,
        ),
        signal(
            "comparison-terms",
            any_of(&["difference between", "compare", "versus", " vs ", "pros and cons"]),
            &[Mode::Information],
            0.4,
        ),
        signal(
            "definition-terms",
            any_of(&["definition", "meaning of", "overview of", "summary of"]),
            &[Mode::Information],
            0.3,
        ),
    ]
}

// ── File-extension scan ────────────────────────────────────────────────

/// Extensions the file-reference scan recognises.
const KNOWN_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "ts", "tsx", "jsx", "java", "c", "h", "cpp", "hpp", "cs", "go", "rb",
    "php", "swift", "kt", "scala", "sh", "sql", "html", "css", "json", "yaml", "yml", "toml",
    "md", "txt", "csv", "xml", "ini", "lock",
];

/// Scan for a `name.ext` token with a known extension.
///
/// Hand-rolled to avoid false positives from abbreviations ("e.g."),
/// version numbers ("2.0.1"), and sentence-ending periods: the character
/// before the dot must be part of an identifier, the extension must be one
/// of [`KNOWN_EXTENSIONS`], and the extension must end at a word boundary.
pub(crate) fn contains_file_extension(lower: &str) -> bool {
    let bytes = lower.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'.' || i == 0 {
            continue;
        }
        let prev = bytes[i - 1];
        if !(prev.is_ascii_alphanumeric() || prev == b'_') {
            continue;
        }
        let mut end = i + 1;
        while end < bytes.len() && bytes[end].is_ascii_alphanumeric() {
            end += 1;
        }
        if end == i + 1 {
            continue;
        }
        // An underscore right after means the token keeps going, so this
        // was not an extension.
        if end < bytes.len() && bytes[end] == b'_' {
            continue;
        }
        let ext = &lower[i + 1..end];
        if KNOWN_EXTENSIONS.contains(&ext) {
            return true;
        }
    }
    false
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // -- predicates ------------------------------------------------------

    #[test]
    fn test_any_of_matches_single_term() {
        let pred = any_of(&["plan", "roadmap"]);
        assert!(pred.matches("we should plan this"));
        assert!(!pred.matches("hello world"));
    }

    #[test]
    fn test_all_of_requires_every_term() {
        let pred = MatchPredicate::AllOf(vec!["fix".to_string(), "error".to_string()]);
        assert!(pred.matches("fix the error now"));
        assert!(!pred.matches("fix it now"));
    }

    #[test]
    fn test_all_of_empty_terms_never_matches() {
        let pred = MatchPredicate::AllOf(vec![]);
        assert!(!pred.matches("anything"));
    }

    // -- file-extension scan ---------------------------------------------

    #[test]
    fn test_file_extension_basic_match() {
        assert!(contains_file_extension("look at main.py please"));
        assert!(contains_file_extension("open src/lib.rs"));
    }

    #[test]
    fn test_file_extension_at_end_of_text() {
        assert!(contains_file_extension("check config.toml"));
    }

    #[test]
    fn test_file_extension_before_sentence_period() {
        assert!(contains_file_extension("the bug is in main.py."));
    }

    #[test]
    fn test_file_extension_ignores_abbreviations() {
        assert!(!contains_file_extension("use a list, e.g. a vec"));
    }

    #[test]
    fn test_file_extension_ignores_version_numbers() {
        assert!(!contains_file_extension("upgrade to version 2.0.1 today"));
    }

    #[test]
    fn test_file_extension_ignores_unknown_extensions() {
        assert!(!contains_file_extension("photo.jpeg2000x"));
        assert!(!contains_file_extension("backup file.rs_old"));
    }

    #[test]
    fn test_file_extension_ignores_leading_dot() {
        assert!(!contains_file_extension(".rs at the start"));
    }

    #[test]
    fn test_file_extension_empty_text() {
        assert!(!contains_file_extension(""));
    }

    // -- evaluation ------------------------------------------------------

    #[test]
    fn test_evaluate_empty_text_all_modes_zero() {
        let eval = SignalEvaluator::builtin();
        let scores = eval.evaluate("");
        assert_eq!(scores.len(), Mode::ALL.len());
        for (mode, score) in &scores {
            assert!(score.abs() < f64::EPSILON, "mode {mode} should be zero");
        }
    }

    #[test]
    fn test_evaluate_is_case_insensitive() {
        let eval = SignalEvaluator::builtin();
        let lower = eval.evaluate("plan the architecture");
        let upper = eval.evaluate("PLAN THE ARCHITECTURE");
        assert_eq!(lower.get(&Mode::Planning), upper.get(&Mode::Planning));
    }

    #[test]
    fn test_evaluate_sums_stacking_signals() {
        let eval = SignalEvaluator::builtin();
        let scores = eval.evaluate("plan the architecture");
        // planning-verbs (0.5) + architecture-terms (0.4)
        let planning = scores.get(&Mode::Planning).copied().unwrap_or_default();
        assert!(
            (planning - 0.9).abs() < f64::EPSILON,
            "planning should sum to 0.9, got {planning}"
        );
    }

    #[test]
    fn test_evaluate_multi_mode_signal_feeds_every_supported_mode() {
        let eval = SignalEvaluator::builtin();
        let scores = eval.evaluate("```");
        let coding = scores.get(&Mode::Coding).copied().unwrap_or_default();
        let debugging = scores.get(&Mode::Debugging).copied().unwrap_or_default();
        assert!((coding - 0.3).abs() < f64::EPSILON);
        assert!((debugging - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_evaluate_raw_sums_can_exceed_one() {
        let eval = SignalEvaluator::builtin();
        let scores =
            eval.evaluate("fix the error with a backtrace, it crashes and fails on line 3");
        let debugging = scores.get(&Mode::Debugging).copied().unwrap_or_default();
        assert!(
            debugging > 1.0,
            "stacked debugging evidence should exceed 1.0, got {debugging}"
        );
    }

    #[test]
    fn test_evaluate_with_fired_reports_catalog_order() {
        let eval = SignalEvaluator::builtin();
        let (_, fired) = eval.evaluate_with_fired("plan the architecture and fix the error");
        let verb_pos = fired.iter().position(|n| n == "planning-verbs");
        let error_pos = fired.iter().position(|n| n == "error-terms");
        assert!(verb_pos.is_some(), "planning-verbs should fire");
        assert!(error_pos.is_some(), "error-terms should fire");
        assert!(verb_pos < error_pos, "fired list should follow catalog order");
    }

    #[test]
    fn test_evaluate_generic_never_scores() {
        let eval = SignalEvaluator::builtin();
        let scores = eval.evaluate("plan fix explain implement everything");
        let generic = scores.get(&Mode::Generic).copied().unwrap_or_default();
        assert!(generic.abs() < f64::EPSILON, "generic gathers no signals");
    }

    #[test]
    fn test_extend_appends_custom_signal() {
        let mut eval = SignalEvaluator::builtin();
        let before = eval.signals().len();
        eval.extend([signal(
            "ticket-refs",
            any_of(&["jira-"]),
            &[Mode::Information],
            0.2,
        )]);
        assert_eq!(eval.signals().len(), before + 1);
        let (_, fired) = eval.evaluate_with_fired("see JIRA-421");
        assert!(fired.contains(&"ticket-refs".to_string()));
    }

    #[test]
    fn test_signal_weight_applied_not_count() {
        let eval = SignalEvaluator::new(vec![signal(
            "repeated",
            any_of(&["abc"]),
            &[Mode::Coding],
            0.25,
        )]);
        // Term appears twice but the signal fires once.
        let scores = eval.evaluate("abc abc");
        let coding = scores.get(&Mode::Coding).copied().unwrap_or_default();
        assert!((coding - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_predicate_serde_round_trip() {
        let pred = any_of(&["plan"]);
        let json = serde_json::to_string(&pred).unwrap();
        assert!(json.contains("any_of"));
        let back: MatchPredicate = serde_json::from_str(&json).unwrap();
        assert!(back.matches("plan it"));
    }
}
