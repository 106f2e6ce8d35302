//! Configuration file loading.
//!
//! ## Responsibility
//! Read a TOML file from disk, parse it into a [`RouterConfig`], and run
//! validation before returning. This is the primary entry point for loading
//! router configuration at startup.
//!
//! ## Guarantees
//! - A successfully loaded config is always validated
//! - I/O errors and parse errors are distinguished in the error type
//! - File path is included in every error message
//!
//! ## NOT Responsible For
//! - Defining the config schema (that belongs to `mod.rs`)
//! - Building runtime components from the config (that belongs to
//!   [`RouterConfig`]'s builder methods)

use std::path::Path;

use super::validation::{self, ConfigError};
use super::RouterConfig;

/// Load a [`RouterConfig`] from a TOML file.
///
/// Reads the file, parses it as TOML, and validates all semantic constraints.
///
/// # Arguments
///
/// * `path` — Path to the TOML configuration file.
///
/// # Returns
///
/// - `Ok(RouterConfig)` if the file is readable, well-formed, and valid.
/// - `Err(ConfigError::Io)` if the file cannot be read.
/// - `Err(ConfigError::Parse)` if the TOML is malformed.
/// - `Err(ConfigError::Validation)` if semantic constraints are violated.
///
/// # Panics
///
/// This function never panics.
///
/// # Example
///
/// ```rust,ignore
/// use tokio_intent_router::config::loader::load_from_file;
/// use std::path::Path;
///
/// let config = load_from_file(Path::new("router.toml"))?;
/// println!("Loaded router: {}", config.router.name);
/// ```
pub fn load_from_file(path: &Path) -> Result<RouterConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load a [`RouterConfig`] from a TOML string.
///
/// Useful for testing or embedding configs without file I/O.
///
/// # Arguments
///
/// * `content` — TOML content as a string.
/// * `source_name` — Identifier for the source (used in error messages).
///
/// # Returns
///
/// - `Ok(RouterConfig)` if the TOML is well-formed and valid.
/// - `Err(ConfigError::Parse)` if the TOML is malformed.
/// - `Err(ConfigError::Validation)` if semantic constraints are violated.
///   All violations are joined into one newline-separated message.
///
/// # Panics
///
/// This function never panics.
pub fn load_from_str(content: &str, source_name: &str) -> Result<RouterConfig, ConfigError> {
    let config: RouterConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    validation::validate(&config).map_err(|errors| {
        ConfigError::Validation(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    })?;

    Ok(config)
}
