// SPDX-License-Identifier: MIT OR Apache-2.0
//! Runner settings.
//!
//! Settings are stored as RON and cover:
//! - Which scenario to build
//! - Scene configuration (bounds, time step, gravity, frame budget)
//! - Headless rendering cadence
//! - Log filter

use dyno_graph::SceneConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::scenarios::Scenario;

/// Current settings format version
pub const SETTINGS_FORMAT_VERSION: u32 = 1;

/// Error loading or saving settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// File could not be read or written
    #[error("Settings I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid settings RON
    #[error("Invalid settings: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// Settings could not be encoded
    #[error("Failed to encode settings: {0}")]
    Encode(#[from] ron::Error),

    /// Written by a newer runner
    #[error("Settings version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version in the file
        found: u32,
        /// Newest version this runner reads
        supported: u32,
    },
}

/// Headless render settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Whether to draw at all
    pub enabled: bool,
    /// Target width in pixels
    pub width: u32,
    /// Target height in pixels
    pub height: u32,
    /// Draw every this many frames
    pub every: u64,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            width: 1280,
            height: 720,
            every: 1,
        }
    }
}

/// Complete runner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Settings format version
    pub version: u32,
    /// Scenario to build
    #[serde(default)]
    pub scenario: Scenario,
    /// Scene configuration
    #[serde(default)]
    pub scene: SceneConfig,
    /// Rendering
    #[serde(default)]
    pub render: RenderSettings,
    /// Drive the scene from a worker thread
    #[serde(default)]
    pub threaded: bool,
    /// Log filter directives, used when `RUST_LOG` is unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_FORMAT_VERSION,
            scenario: Scenario::default(),
            scene: SceneConfig::default(),
            render: RenderSettings::default(),
            threaded: false,
            log_filter: None,
        }
    }
}

impl RunnerSettings {
    /// Parse settings from RON text
    pub fn from_ron(content: &str) -> Result<Self, SettingsError> {
        let settings: RunnerSettings = ron::from_str(content)?;

        if settings.version > SETTINGS_FORMAT_VERSION {
            return Err(SettingsError::UnsupportedVersion {
                found: settings.version,
                supported: SETTINGS_FORMAT_VERSION,
            });
        }

        Ok(settings)
    }

    /// Encode settings as pretty RON
    pub fn to_ron(&self) -> Result<String, SettingsError> {
        let config = ron::ser::PrettyConfig::default()
            .struct_names(true)
            .enumerate_arrays(false);
        Ok(ron::ser::to_string_pretty(self, config)?)
    }

    /// Load settings from a file
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        let settings = Self::from_ron(&content)?;
        tracing::debug!(path = %path.display(), scenario = ?settings.scenario, "Loaded settings");
        Ok(settings)
    }

    /// Load settings, falling back to defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        match Self::load(path) {
            Err(SettingsError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            other => other,
        }
    }

    /// Save settings to a file
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        std::fs::write(path, self.to_ron()?)?;
        tracing::info!(path = %path.display(), "Wrote settings");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = RunnerSettings::default();
        assert_eq!(settings.version, SETTINGS_FORMAT_VERSION);
        assert_eq!(settings.scene.time_step, 0.016);
        assert!(settings.render.enabled);
        assert!(!settings.threaded);
    }

    #[test]
    fn test_settings_survive_ron() {
        let mut settings = RunnerSettings::default();
        settings.scenario = Scenario::Grid;
        settings.scene.gravity = [0.0, -1.62, 0.0];
        settings.render.every = 10;

        let text = settings.to_ron().unwrap();
        assert!(text.contains("RunnerSettings"));
        assert_eq!(RunnerSettings::from_ron(&text).unwrap(), settings);
    }

    #[test]
    fn test_missing_sections_take_defaults() {
        let settings = RunnerSettings::from_ron("(version: 1, scenario: Particles)").unwrap();
        assert_eq!(settings.scenario, Scenario::Particles);
        assert_eq!(settings.scene, SceneConfig::default());
        assert_eq!(settings.render, RenderSettings::default());
    }

    #[test]
    fn test_newer_version_rejected() {
        let err = RunnerSettings::from_ron("(version: 99)").unwrap_err();
        assert!(matches!(
            err,
            SettingsError::UnsupportedVersion { found: 99, .. }
        ));
    }

    #[test]
    fn test_missing_file_means_defaults() {
        let path = std::env::temp_dir().join("dyno_runner_settings_that_do_not_exist.ron");
        assert_eq!(RunnerSettings::load_or_default(&path).unwrap(), RunnerSettings::default());
        assert!(matches!(RunnerSettings::load(&path), Err(SettingsError::Io(_))));
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("dyno_runner_settings_{}.ron", std::process::id()));
        let mut settings = RunnerSettings::default();
        settings.log_filter = Some("dyno_graph=trace".into());
        settings.save(&path).unwrap();

        let loaded = RunnerSettings::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_malformed_settings() {
        assert!(matches!(
            RunnerSettings::from_ron("(version: \"one\")"),
            Err(SettingsError::Parse(_))
        ));
    }
}
