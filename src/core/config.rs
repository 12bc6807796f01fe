/*
 * Persists the classifier's user settings: the global ignore patterns, whether the
 * browser lists files, and how often walk progress is reported. Settings are stored
 * as `settings.json` in the application's local configuration directory.
 *
 * `ConfigManagerOperations` is the seam callers depend on; `CoreConfigManager` is the
 * file-backed implementation and can be pointed at an explicit directory for tests.
 */
use crate::core::ignore_rules::IgnoreRules;
use crate::core::path_utils;
use crate::core::visitor::MIN_PROGRESS_INTERVAL;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SETTINGS_FILENAME: &str = "settings.json";

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Json(serde_json::Error),
    NoProjectDirectory,
}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Json(err)
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Configuration I/O error: {e}"),
            ConfigError::Json(e) => write!(f, "Configuration JSON error: {e}"),
            ConfigError::NoProjectDirectory => {
                write!(f, "Could not determine project directory for configuration")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Json(e) => Some(e),
            ConfigError::NoProjectDirectory => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    pub ignore_patterns: Vec<String>,
    pub show_files: bool,
    pub progress_interval_ms: u64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        ClassifierSettings {
            ignore_patterns: vec!["^\\..*".to_string(), "^Thumbs\\.db$".to_string()],
            show_files: true,
            progress_interval_ms: MIN_PROGRESS_INTERVAL.as_millis() as u64,
        }
    }
}

impl ClassifierSettings {
    /* The configured interval, never shorter than `MIN_PROGRESS_INTERVAL`. */
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms).max(MIN_PROGRESS_INTERVAL)
    }

    /* Compiles the ignore patterns; invalid ones are logged and left out. */
    pub fn ignore_rules(&self) -> IgnoreRules {
        IgnoreRules::from_patterns(&self.ignore_patterns)
    }
}

pub trait ConfigManagerOperations: Send + Sync {
    fn load_settings(&self, app_name: &str) -> Result<ClassifierSettings>;
    fn save_settings(&self, app_name: &str, settings: &ClassifierSettings) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct CoreConfigManager {
    config_dir: Option<PathBuf>,
}

impl CoreConfigManager {
    pub fn new() -> Self {
        CoreConfigManager { config_dir: None }
    }

    /* Uses `config_dir` instead of the platform configuration directory. */
    pub fn with_config_dir(config_dir: PathBuf) -> Self {
        CoreConfigManager {
            config_dir: Some(config_dir),
        }
    }

    fn settings_path(&self, app_name: &str) -> Result<PathBuf> {
        let dir = match &self.config_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                dir.clone()
            }
            None => path_utils::get_base_app_config_local_dir(app_name)
                .ok_or(ConfigError::NoProjectDirectory)?,
        };
        Ok(dir.join(SETTINGS_FILENAME))
    }
}

fn read_settings(file_path: &Path) -> Result<ClassifierSettings> {
    let contents = fs::read_to_string(file_path)?;
    if contents.trim().is_empty() {
        log::debug!("CoreConfigManager: Settings file {file_path:?} is empty, using defaults.");
        return Ok(ClassifierSettings::default());
    }
    Ok(serde_json::from_str(&contents)?)
}

impl ConfigManagerOperations for CoreConfigManager {
    /* A missing settings file yields the defaults. */
    fn load_settings(&self, app_name: &str) -> Result<ClassifierSettings> {
        log::trace!("CoreConfigManager: Loading settings for app '{app_name}'");
        let file_path = self.settings_path(app_name)?;
        if !file_path.exists() {
            log::debug!("CoreConfigManager: No settings at {file_path:?}, using defaults.");
            return Ok(ClassifierSettings::default());
        }
        let settings = read_settings(&file_path)?;
        log::debug!("CoreConfigManager: Loaded settings from {file_path:?}.");
        Ok(settings)
    }

    fn save_settings(&self, app_name: &str, settings: &ClassifierSettings) -> Result<()> {
        let file_path = self.settings_path(app_name)?;
        let json = serde_json::to_string_pretty(settings)?;
        fs::write(&file_path, json)?;
        log::debug!("CoreConfigManager: Saved settings to {file_path:?}.");
        Ok(())
    }
}
