//! # Settings Loader
//!
//! Loads the parser settings (`ParserSettings`) used by the IBKR activity statement
//! parser from JSON files. Every field of the settings file is optional; anything
//! left out takes the built-in default.
//!
//! A settings file is checked as soon as it is read, so a bad value is
//! reported against the file it came from rather than surfacing mid-parse.
//!
//! ## Usage Examples
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//!
//! // Load and validate settings from a specific path
//! let settings = settings_loader::load_settings("config/ibkr_settings.json")?;
//!
//! // An explicit path must load; otherwise ibkr_settings.json is used if present
//! let path = Some(PathBuf::from("my_settings.json"));
//! let settings = settings_loader::load_settings_with_fallback(path.as_ref())?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use models::ParserSettings;

pub const DEFAULT_SETTINGS_FILE: &str = "ibkr_settings.json";

/// Reads, parses and validates a settings file.
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<ParserSettings> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Reading settings file: {}", path.display()))?;
    let settings: ParserSettings = serde_json::from_str(&raw)
        .with_context(|| format!("Parsing settings JSON in {}", path.display()))?;
    validate_settings(&settings)
        .with_context(|| format!("Invalid settings in {}", path.display()))?;
    Ok(settings)
}

/// Settings from `path` when one is given; errors there are not masked.
/// Without a path, `ibkr_settings.json` in the current directory is used if
/// it exists. `None` means built-in defaults apply.
pub fn load_settings_with_fallback(path: Option<&PathBuf>) -> Result<Option<ParserSettings>> {
    match path {
        Some(settings_path) => load_settings(settings_path).map(Some),
        None if default_settings_exist() => load_settings(DEFAULT_SETTINGS_FILE).map(Some),
        None => Ok(None),
    }
}

/// Checks the values serde cannot: delimiter shape, multiplier and
/// tolerance ranges, blank option categories.
pub fn validate_settings(settings: &ParserSettings) -> Result<()> {
    let delimiter = settings.delimiter.as_str();
    if delimiter != "\\t" && !(delimiter.len() == 1 && delimiter.is_ascii()) {
        bail!("delimiter {:?} must be a single ASCII character or \\t", delimiter);
    }

    let multiplier = settings.default_option_multiplier;
    ensure!(
        multiplier.is_finite() && multiplier > 0.0,
        "default_option_multiplier must be a positive number, got {}",
        multiplier
    );

    let tolerance = settings.pnl_tolerance;
    ensure!(
        tolerance.is_finite() && tolerance >= 0.0,
        "pnl_tolerance must be zero or positive, got {}",
        tolerance
    );

    if let Some(i) = settings.option_categories.iter().position(|c| c.trim().is_empty()) {
        bail!("option_categories[{}] is blank", i);
    }
    Ok(())
}

/// Checks if a settings file exists at the given path
pub fn settings_file_exists<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().is_file()
}

/// Checks if the default settings file exists
pub fn default_settings_exist() -> bool {
    settings_file_exists(DEFAULT_SETTINGS_FILE)
}
