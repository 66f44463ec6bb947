//! Directive engine settings persistence.
//!
//! Stores limits and warning toggles for directive evaluation in a JSON file
//! at an OS-appropriate location.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted directive engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Deepest allowed nesting of lambda invocations.
    pub max_call_depth: usize,
    /// Work one evaluation may do before it fails. Each evaluated expression
    /// and lambda call costs a step, and copying large values costs more.
    pub max_evaluation_steps: usize,
    /// Directives longer than this many bytes are rejected without parsing.
    pub max_directive_length: usize,
    /// Report lambdas that were created but never invoked.
    pub warn_unused_lambdas: bool,
    /// Report patterns that were created but never used for matching.
    pub warn_unused_patterns: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_call_depth: 64,
            max_evaluation_steps: 200_000,
            max_directive_length: 1000,
            warn_unused_lambdas: true,
            warn_unused_patterns: true,
        }
    }
}

/// Location of the directive engine's limits and warning toggles.
///
/// The engine keeps its own `directives.json` next to the rest of the
/// application's configuration: under `%APPDATA%\Quillnotes` on Windows and
/// `~/.config/quillnotes` elsewhere. Nothing is created here; see
/// [`save_settings`].
pub fn settings_file_path() -> PathBuf {
    config_root().join(SETTINGS_FILE_NAME)
}

const SETTINGS_FILE_NAME: &str = "directives.json";

#[cfg(target_os = "windows")]
fn config_root() -> PathBuf {
    dirs::config_dir().unwrap_or_default().join("Quillnotes")
}

#[cfg(not(target_os = "windows"))]
fn config_root() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(".config").join("quillnotes")
}

/// Loads settings from `path`; returns defaults if the file is missing or corrupt.
pub fn load_settings(path: &Path) -> EngineSettings {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("Ignoring unreadable settings file {}: {e}", path.display());
            EngineSettings::default()
        }),
        Err(_) => EngineSettings::default(),
    }
}

/// Saves settings to `path`, creating parent directories as needed.
pub fn save_settings(path: &Path, settings: &EngineSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = load_settings(&dir.path().join("absent.json"));
        assert_eq!(settings, EngineSettings::default());
        assert_eq!(settings.max_call_depth, 64);
        assert_eq!(settings.max_evaluation_steps, 200_000);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("directives.json");
        let settings = EngineSettings {
            max_call_depth: 8,
            warn_unused_patterns: false,
            ..EngineSettings::default()
        };
        save_settings(&path, &settings).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"maxCallDepth\": 8"));
        assert_eq!(load_settings(&path), settings);
    }

    #[test]
    fn test_partial_and_corrupt_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("directives.json");

        fs::write(&path, r#"{"maxDirectiveLength": 20}"#).unwrap();
        let settings = load_settings(&path);
        assert_eq!(settings.max_directive_length, 20);
        assert!(settings.warn_unused_lambdas);

        fs::write(&path, "{not json").unwrap();
        assert_eq!(load_settings(&path), EngineSettings::default());
    }

    #[test]
    fn test_settings_path_is_json() {
        assert!(settings_file_path().ends_with("directives.json"));
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_settings_live_under_quillnotes_config() {
        let path = settings_file_path();
        assert!(path.parent().unwrap().ends_with(".config/quillnotes"));
    }
}
