use std::fs;
use std::path::{Path, PathBuf};

use crate::{AppConfig, ControllerError, Preferences, Result};

/// Where a loaded record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOrigin {
    /// Read from the settings file.
    Stored,
    /// The file was absent or unusable; built-in defaults were substituted.
    Defaulted,
}

/// JSON-backed persistence for [`Preferences`].
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    defaults: Preferences,
}

impl SettingsStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            path: config.paths.settings_file.clone(),
            defaults: config.defaults,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the stored record, falling back to defaults. Never fails.
    pub fn load(&self) -> Preferences {
        self.load_with_origin().0
    }

    pub fn load_with_origin(&self) -> (Preferences, LoadOrigin) {
        match self.try_load() {
            Ok(Some(prefs)) => (prefs, LoadOrigin::Stored),
            Ok(None) => {
                tracing::debug!(path = %self.path.display(), "no settings file, using defaults");
                (self.defaults, LoadOrigin::Defaulted)
            }
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "unreadable settings file, using defaults");
                (self.defaults, LoadOrigin::Defaulted)
            }
        }
    }

    /// `Ok(None)` when no settings file exists.
    pub fn try_load(&self) -> Result<Option<Preferences>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let prefs: Preferences = serde_json::from_str(&contents)?;
        if !prefs.is_valid() {
            return Err(ControllerError::InvalidRecord {
                path: self.path.clone(),
                reason: format!(
                    "sample rate {} and buffer size {} must both be positive",
                    prefs.sample_rate, prefs.buffer_size
                ),
            });
        }
        Ok(Some(prefs))
    }

    /// Writes the full record, replacing prior contents.
    pub fn save(&self, prefs: &Preferences) -> bool {
        match self.try_save(prefs) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), ?prefs, "settings saved");
                true
            }
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to save settings");
                false
            }
        }
    }

    pub fn try_save(&self, prefs: &Preferences) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(prefs)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}
