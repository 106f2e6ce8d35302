//! Pluggable second-opinion classification for low-confidence inputs.
//!
//! The deterministic resolver never needs this module. When its combined
//! score lands under the floor, though, callers may want to consult
//! something smarter (typically a small model call) before settling for
//! [`Mode::Generic`]. [`FallbackClassifier`] is that seam: the resolver
//! asks it only on the floor path, adopts its suggestion only when it is
//! more confident than the deterministic result, and swallows its errors.

use crate::classify::{ClassificationResult, Mode};
use crate::RouterError;
use async_trait::async_trait;

/// A mode suggestion from a fallback classifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallbackSuggestion {
    /// Suggested mode.
    pub mode: Mode,
    /// Classifier confidence in `[0, 1]`. Suggestions are adopted only
    /// when this exceeds the deterministic confidence.
    pub confidence: f64,
}

/// Second-opinion classifier consulted on the low-confidence floor path.
///
/// Implementations may be slow (model calls, lookups); the deterministic
/// path never awaits them.
#[async_trait]
pub trait FallbackClassifier: Send + Sync {
    /// Suggest a mode for `text`, given the deterministic result.
    ///
    /// Return `Ok(None)` to decline. Errors are logged by the resolver and
    /// never surface to its caller.
    ///
    /// # Errors
    ///
    /// Implementations may fail for any reason (network, timeout); the
    /// resolver degrades to the deterministic result on `Err`.
    async fn classify(
        &self,
        text: &str,
        deterministic: &ClassificationResult,
    ) -> Result<Option<FallbackSuggestion>, RouterError>;
}

/// A classifier that always declines. Useful as a placeholder where an
/// API requires a classifier but no second opinion is wanted.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFallback;

#[async_trait]
impl FallbackClassifier for NoopFallback {
    async fn classify(
        &self,
        _text: &str,
        _deterministic: &ClassificationResult,
    ) -> Result<Option<FallbackSuggestion>, RouterError> {
        Ok(None)
    }
}
