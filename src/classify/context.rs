//! Per-session classification context.

use crate::classify::Mode;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of history entries a context retains.
pub const DEFAULT_HISTORY_LIMIT: usize = 16;

/// One resolved turn kept in the rolling history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The raw input that was classified.
    pub input: String,
    /// The mode it resolved to.
    pub mode: Mode,
}

/// Caller-owned, per-session context passed by reference into the resolver.
///
/// The resolver reads it and never mutates it; callers feed resolved turns
/// back through [`record`](Self::record) between calls. History is bounded:
/// the oldest entries fall off once the limit is reached.
#[derive(Debug, Clone)]
pub struct ClassificationContext {
    previous_mode: Option<Mode>,
    history: VecDeque<HistoryEntry>,
    limit: usize,
}

impl ClassificationContext {
    /// Empty context with the default history limit.
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Empty context retaining at most `limit` history entries.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            previous_mode: None,
            history: VecDeque::new(),
            limit,
        }
    }

    /// The mode the previous turn resolved to, if any.
    pub fn previous_mode(&self) -> Option<Mode> {
        self.previous_mode
    }

    /// Record a resolved turn: updates the previous mode and appends to the
    /// rolling history, dropping the oldest entry past the limit.
    pub fn record(&mut self, input: impl Into<String>, mode: Mode) {
        self.previous_mode = Some(mode);
        self.history.push_back(HistoryEntry {
            input: input.into(),
            mode,
        });
        while self.history.len() > self.limit {
            self.history.pop_front();
        }
    }

    /// Iterate the retained history, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    /// Number of retained history entries.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Whether no turn has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

impl Default for ClassificationContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_has_no_previous_mode() {
        let ctx = ClassificationContext::new();
        assert_eq!(ctx.previous_mode(), None);
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_record_updates_previous_mode() {
        let mut ctx = ClassificationContext::new();
        ctx.record("plan the api", Mode::Planning);
        assert_eq!(ctx.previous_mode(), Some(Mode::Planning));
        ctx.record("now implement it", Mode::Coding);
        assert_eq!(ctx.previous_mode(), Some(Mode::Coding));
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut ctx = ClassificationContext::with_limit(3);
        for i in 0..10 {
            ctx.record(format!("turn {i}"), Mode::Generic);
        }
        assert_eq!(ctx.len(), 3);
        let oldest = ctx.history().next().map(|e| e.input.clone());
        assert_eq!(oldest.as_deref(), Some("turn 7"));
    }

    #[test]
    fn test_zero_limit_keeps_previous_mode_only() {
        let mut ctx = ClassificationContext::with_limit(0);
        ctx.record("hello", Mode::Information);
        assert_eq!(ctx.len(), 0);
        assert_eq!(ctx.previous_mode(), Some(Mode::Information));
    }

    #[test]
    fn test_history_order_is_oldest_first() {
        let mut ctx = ClassificationContext::new();
        ctx.record("a", Mode::Planning);
        ctx.record("b", Mode::Coding);
        let inputs: Vec<&str> = ctx.history().map(|e| e.input.as_str()).collect();
        assert_eq!(inputs, vec!["a", "b"]);
    }
}
