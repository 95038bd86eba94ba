use directories::ProjectDirs;
use paperstamp_core::{EngineConfig, TextStyle};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SETTINGS_SCHEMA_VERSION: u32 = 1;
const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unable to resolve local data directory")]
    NoDataDirectory,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("settings version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
}

/// Everything persisted between sessions. Documents and annotations are not.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub config: EngineConfig,
    pub text_defaults: TextStyle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SettingsEnvelope {
    version: u32,
    #[serde(flatten)]
    settings: Settings,
}

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn from_default_project() -> Result<Self, StorageError> {
        let dirs = ProjectDirs::from("dev", "PaperStamp", "PaperStamp")
            .ok_or(StorageError::NoDataDirectory)?;

        Ok(Self { root: dirs.config_dir().to_path_buf() })
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE)
    }

    /// Stored settings, or defaults when nothing has been saved yet.
    pub fn load_settings(&self) -> Result<Settings, StorageError> {
        let path = self.settings_path();
        if !path.exists() {
            debug!(path = %path.display(), "no stored settings, using defaults");
            return Ok(Settings::default());
        }

        load_settings_file(&path)
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)?;

        let envelope =
            SettingsEnvelope { version: SETTINGS_SCHEMA_VERSION, settings: settings.clone() };

        let bytes = serde_json::to_vec_pretty(&envelope)?;
        fs::write(self.settings_path(), bytes)?;
        info!(path = %self.settings_path().display(), "settings saved");
        Ok(())
    }
}

/// Read a settings file written by [`Storage::save_settings`] or by hand.
/// Missing fields take their defaults.
pub fn load_settings_file(path: &Path) -> Result<Settings, StorageError> {
    let bytes = fs::read(path)?;
    let envelope: SettingsEnvelope = serde_json::from_slice(&bytes)?;

    if envelope.version > SETTINGS_SCHEMA_VERSION {
        return Err(StorageError::UnsupportedVersion {
            found: envelope.version,
            supported: SETTINGS_SCHEMA_VERSION,
        });
    }

    Ok(envelope.settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_round_trip() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let store = Storage::with_root(temp.path().join("nested"));

        let mut settings = Settings::default();
        settings.config.export_scale = 3.0;
        settings.config.max_zoom = 8.0;
        settings.text_defaults.font_size = 18.0;
        settings.text_defaults.bold = true;

        store.save_settings(&settings).expect("save should succeed");
        let loaded = store.load_settings().expect("load should succeed");

        assert_eq!(loaded, settings);
    }

    #[test]
    fn load_defaults_when_file_absent() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let store = Storage::with_root(temp.path());

        let loaded = store.load_settings().expect("load should succeed");
        assert_eq!(loaded, Settings::default());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let path = temp.path().join("custom.json");
        let json = r#"{ "version": 1, "config": { "stamp_size_pt": 30.0 } }"#;
        fs::write(&path, json).expect("write");

        let loaded = load_settings_file(&path).expect("load should succeed");

        assert_eq!(loaded.config.stamp_size_pt, 30.0);
        assert_eq!(loaded.config.export_scale, EngineConfig::default().export_scale);
        assert_eq!(loaded.text_defaults, TextStyle::default());
    }

    #[test]
    fn newer_version_is_rejected() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let store = Storage::with_root(temp.path());
        fs::write(store.settings_path(), r#"{ "version": 99 }"#).expect("write");

        let err = store.load_settings().expect_err("future version");
        assert!(matches!(err, StorageError::UnsupportedVersion { found: 99, supported: 1 }));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let store = Storage::with_root(temp.path());
        fs::write(store.settings_path(), "{ not json").expect("write");

        assert!(matches!(store.load_settings(), Err(StorageError::Serde(_))));
    }
}
