use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ControllerError, Result};

/// Directory name used under the per-user configuration root.
pub const APP_DIR_NAME: &str = "pipewire-controller";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const PID_FILE_NAME: &str = "app.pid";

/// Upper bound applied to every external tool invocation.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Top-level configuration structure for the controller.
///
/// Built once at process start and handed by reference to every component
/// constructor; components copy out the pieces they need.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub paths: PathConfig,
    pub tools: ToolConfig,
    pub command_timeout: Duration,
    pub defaults: Preferences,
}

impl AppConfig {
    /// Resolves the standard per-user locations (`$XDG_CONFIG_HOME` or
    /// `~/.config`).
    pub fn from_user_dirs() -> Result<Self> {
        let base = directories::BaseDirs::new().ok_or(ControllerError::NoConfigDir)?;
        Ok(Self::with_config_dir(base.config_dir().join(APP_DIR_NAME)))
    }

    /// Roots both persisted files under `dir`.
    pub fn with_config_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            paths: PathConfig::in_dir(dir.as_ref()),
            tools: ToolConfig::default(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            defaults: Preferences::default(),
        }
    }
}

/// Locations of the two files this system persists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathConfig {
    pub settings_file: PathBuf,
    pub pid_file: PathBuf,
}

impl PathConfig {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            settings_file: dir.join(SETTINGS_FILE_NAME),
            pid_file: dir.join(PID_FILE_NAME),
        }
    }
}

/// Program names of the external command-line collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    pub dump: String,
    pub metadata: String,
    pub status: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            dump: "pw-dump".to_string(),
            metadata: "pw-metadata".to_string(),
            status: "wpctl".to_string(),
        }
    }
}

/// The user's desired clock configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(rename = "samplerate")]
    pub sample_rate: u32,
    pub buffer_size: u32,
}

impl Preferences {
    pub fn new(sample_rate: u32, buffer_size: u32) -> Self {
        Self {
            sample_rate,
            buffer_size,
        }
    }

    /// Both fields must be strictly positive.
    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && self.buffer_size > 0
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            buffer_size: 512,
        }
    }
}
