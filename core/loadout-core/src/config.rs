//! Read-only configuration inputs.
//!
//! Settings and translation tables are maintained by external collaborators
//! (the settings UI and the i18n pipeline); this module only loads them and
//! falls back to defaults when a file is missing or malformed. Nothing here
//! writes to disk.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// User settings consumed by the core. Persisted elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub language: String,
    pub overlay_hotkey: String,
    pub show_overlay_on_launch: bool,
    /// Seed for the current game patch; the build-data provider may
    /// supersede it at runtime.
    pub current_patch: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            language: "en".to_string(),
            overlay_hotkey: "Ctrl+Shift+O".to_string(),
            show_overlay_on_launch: false,
            current_patch: None,
        }
    }
}

/// Returns the path to the Loadout data directory (~/.loadout).
pub fn get_loadout_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".loadout"))
}

/// Returns the path to the settings file.
pub fn get_settings_path() -> Option<PathBuf> {
    get_loadout_dir().map(|d| d.join("settings.json"))
}

/// Loads settings, returning defaults if the file is absent or malformed.
pub fn load_settings() -> Settings {
    get_settings_path()
        .and_then(|p| fs::read_to_string(&p).ok())
        .and_then(|c| serde_json::from_str(&c).ok())
        .unwrap_or_default()
}

/// Loads the translation table for a language (`strings.<lang>.json`).
/// Missing tables yield an empty map; lookups then fall back to the key.
pub fn load_string_table(language: &str) -> HashMap<String, String> {
    get_loadout_dir()
        .map(|d| d.join(format!("strings.{}.json", language)))
        .and_then(|p| fs::read_to_string(&p).ok())
        .and_then(|c| serde_json::from_str(&c).ok())
        .unwrap_or_default()
}
