//! The fixed catalog of interaction modes.
//!
//! Five modes cover the routing surface. [`Generic`](Mode::Generic) is the
//! designated fallback: it is what the resolver returns when no other mode
//! gathers enough evidence, so it carries no triggers and no resource
//! requirements of its own.

use crate::ResourceKey;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One of the five supported interaction modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// High-level design and task breakdown before anything is built.
    Planning,
    /// Writing or modifying code and files.
    Coding,
    /// Diagnosing errors, failures, and unexpected behaviour.
    Debugging,
    /// Answering questions and explaining concepts.
    Information,
    /// Fallback for inputs without strong evidence for any other mode.
    Generic,
}

impl Mode {
    /// All modes in canonical order.
    ///
    /// This order is also the deterministic tie-break order: when two modes
    /// score equally, the one listed first wins.
    pub const ALL: [Mode; 5] = [
        Mode::Planning,
        Mode::Coding,
        Mode::Debugging,
        Mode::Information,
        Mode::Generic,
    ];

    /// Stable string form, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Planning => "planning",
            Mode::Coding => "coding",
            Mode::Debugging => "debugging",
            Mode::Information => "information",
            Mode::Generic => "generic",
        }
    }

    /// Position of this mode in [`Mode::ALL`].
    pub(crate) fn index(&self) -> usize {
        match self {
            Mode::Planning => 0,
            Mode::Coding => 1,
            Mode::Debugging => 2,
            Mode::Information => 3,
            Mode::Generic => 4,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of one mode: what it is for, which downstream
/// resources it may touch, and the trigger phrases that boost it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ModeDefinition {
    /// The mode this definition describes.
    pub mode: Mode,
    /// Human-readable description, surfaced in status and audit output.
    pub description: String,
    /// Resource keys this mode cannot operate without.
    #[serde(default)]
    pub required_resources: Vec<ResourceKey>,
    /// Resource keys this mode may use when available.
    #[serde(default)]
    pub optional_resources: Vec<ResourceKey>,
    /// Resource keys this mode must never touch.
    #[serde(default)]
    pub forbidden_resources: Vec<ResourceKey>,
    /// Phrases that, when contained in the lowercased input, boost this
    /// mode through the trigger evidence channel.
    #[serde(default)]
    pub trigger_phrases: Vec<String>,
}

impl ModeDefinition {
    /// Whether this mode is allowed to use the given resource.
    ///
    /// A resource is permitted unless it appears in
    /// [`forbidden_resources`](Self::forbidden_resources). Required and
    /// optional listings narrow what the mode asks for, not what it may
    /// receive.
    pub fn permits(&self, key: &ResourceKey) -> bool {
        !self.forbidden_resources.contains(key)
    }

    /// Whether this mode works with files at all (required or optional
    /// file tooling). Used by the override rules to decide when a file
    /// reference in the input contradicts the scored decision.
    pub fn uses_file_tooling(&self) -> bool {
        let fs = ResourceKey::new(FILESYSTEM_KEY);
        self.required_resources.contains(&fs) || self.optional_resources.contains(&fs)
    }
}

/// Well-known resource key for file tooling in the built-in catalog.
pub const FILESYSTEM_KEY: &str = "filesystem";

/// Well-known resource key for command execution in the built-in catalog.
pub const TERMINAL_KEY: &str = "terminal";

/// Well-known resource key for retrieval in the built-in catalog.
pub const SEARCH_INDEX_KEY: &str = "search-index";

/// The full set of mode definitions, one per [`Mode`].
///
/// Always complete: construction starts from the built-in catalog and
/// configuration may replace individual definitions, so lookup is total.
#[derive(Debug, Clone)]
pub struct ModeCatalog {
    definitions: [ModeDefinition; 5],
}

impl ModeCatalog {
    /// The built-in catalog.
    pub fn builtin() -> Self {
        Self {
            definitions: [
                ModeDefinition {
                    mode: Mode::Planning,
                    description: "High-level design and task breakdown before anything is built"
                        .to_string(),
                    required_resources: vec![],
                    optional_resources: vec![ResourceKey::new(SEARCH_INDEX_KEY)],
                    forbidden_resources: vec![ResourceKey::new(TERMINAL_KEY)],
                    trigger_phrases: vec![
                        "plan".to_string(),
                        "architecture".to_string(),
                        "roadmap".to_string(),
                        "design doc".to_string(),
                        "break down".to_string(),
                        "milestones".to_string(),
                    ],
                },
                ModeDefinition {
                    mode: Mode::Coding,
                    description: "Writing or modifying code and files".to_string(),
                    required_resources: vec![ResourceKey::new(FILESYSTEM_KEY)],
                    optional_resources: vec![
                        ResourceKey::new(TERMINAL_KEY),
                        ResourceKey::new(SEARCH_INDEX_KEY),
                    ],
                    forbidden_resources: vec![],
                    trigger_phrases: vec![
                        "implement".to_string(),
                        "write a".to_string(),
                        "refactor".to_string(),
                        "add a function".to_string(),
                        "create a".to_string(),
                    ],
                },
                ModeDefinition {
                    mode: Mode::Debugging,
                    description: "Diagnosing errors, failures, and unexpected behaviour"
                        .to_string(),
                    required_resources: vec![ResourceKey::new(FILESYSTEM_KEY)],
                    optional_resources: vec![ResourceKey::new(TERMINAL_KEY)],
                    forbidden_resources: vec![],
                    trigger_phrases: vec![
                        "fix".to_string(),
                        "debug".to_string(),
                        "broken".to_string(),
                        "not working".to_string(),
                        "investigate".to_string(),
                    ],
                },
                ModeDefinition {
                    mode: Mode::Information,
                    description: "Answering questions and explaining concepts".to_string(),
                    required_resources: vec![],
                    optional_resources: vec![ResourceKey::new(SEARCH_INDEX_KEY)],
                    forbidden_resources: vec![ResourceKey::new(TERMINAL_KEY)],
                    trigger_phrases: vec![
                        "what is".to_string(),
                        "how does".to_string(),
                        "explain".to_string(),
                        "difference between".to_string(),
                        "tell me about".to_string(),
                    ],
                },
                ModeDefinition {
                    mode: Mode::Generic,
                    description: "Fallback when no other mode gathers enough evidence"
                        .to_string(),
                    required_resources: vec![],
                    optional_resources: vec![],
                    forbidden_resources: vec![],
                    trigger_phrases: vec![],
                },
            ],
        }
    }

    /// Look up the definition for a mode. Total: every mode has exactly
    /// one definition.
    pub fn definition(&self, mode: Mode) -> &ModeDefinition {
        &self.definitions[mode.index()]
    }

    /// Replace the definition for `def.mode` with `def`.
    pub fn replace(&mut self, def: ModeDefinition) {
        let index = def.mode.index();
        self.definitions[index] = def;
    }

    /// Iterate over all definitions in canonical mode order.
    pub fn iter(&self) -> impl Iterator<Item = &ModeDefinition> {
        self.definitions.iter()
    }
}

impl Default for ModeCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_covers_every_mode() {
        let catalog = ModeCatalog::builtin();
        for mode in Mode::ALL {
            assert_eq!(catalog.definition(mode).mode, mode);
        }
    }

    #[test]
    fn test_mode_as_str_matches_serde_form() {
        for mode in Mode::ALL {
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{}\"", mode.as_str()));
        }
    }

    #[test]
    fn test_generic_has_no_triggers_and_no_resources() {
        let catalog = ModeCatalog::builtin();
        let generic = catalog.definition(Mode::Generic);
        assert!(generic.trigger_phrases.is_empty());
        assert!(generic.required_resources.is_empty());
        assert!(generic.optional_resources.is_empty());
    }

    #[test]
    fn test_file_tooling_modes() {
        let catalog = ModeCatalog::builtin();
        assert!(catalog.definition(Mode::Coding).uses_file_tooling());
        assert!(catalog.definition(Mode::Debugging).uses_file_tooling());
        assert!(!catalog.definition(Mode::Planning).uses_file_tooling());
        assert!(!catalog.definition(Mode::Information).uses_file_tooling());
        assert!(!catalog.definition(Mode::Generic).uses_file_tooling());
    }

    #[test]
    fn test_permits_denies_only_forbidden_keys() {
        let catalog = ModeCatalog::builtin();
        let info = catalog.definition(Mode::Information);
        assert!(!info.permits(&ResourceKey::new(TERMINAL_KEY)));
        assert!(info.permits(&ResourceKey::new(SEARCH_INDEX_KEY)));
        assert!(info.permits(&ResourceKey::new("anything-else")));
    }

    #[test]
    fn test_replace_swaps_single_definition() {
        let mut catalog = ModeCatalog::builtin();
        catalog.replace(ModeDefinition {
            mode: Mode::Planning,
            description: "custom".to_string(),
            required_resources: vec![],
            optional_resources: vec![],
            forbidden_resources: vec![],
            trigger_phrases: vec!["sketch".to_string()],
        });
        assert_eq!(catalog.definition(Mode::Planning).description, "custom");
        // Other modes untouched
        assert!(!catalog.definition(Mode::Coding).trigger_phrases.is_empty());
    }

    #[test]
    fn test_iter_yields_canonical_order() {
        let catalog = ModeCatalog::builtin();
        let modes: Vec<Mode> = catalog.iter().map(|d| d.mode).collect();
        assert_eq!(modes, Mode::ALL.to_vec());
    }
}
