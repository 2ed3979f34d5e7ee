//! Settings loading with hierarchy merging.
//!
//! Settings are loaded from multiple sources and merged in order:
//!
//! 1. Built-in defaults
//! 2. System settings: `/etc/hoptun/config.toml`
//! 3. User settings: `~/.config/hoptun/config.toml`
//!
//! Missing files are skipped; invalid TOML is an error (fail fast with a
//! clear message).

use std::fs;
use std::path::PathBuf;

use tracing::debug;

use super::error::SettingsError;
use super::schema::Settings;

/// System-wide settings path.
pub const SYSTEM_SETTINGS_PATH: &str = "/etc/hoptun/config.toml";

/// User settings directory name.
pub const USER_SETTINGS_DIR: &str = "hoptun";

/// User settings filename.
pub const USER_SETTINGS_FILE: &str = "config.toml";

/// Settings loader with support for hierarchy merging.
pub struct SettingsLoader {
    system_path: PathBuf,
    user_path: PathBuf,
}

impl SettingsLoader {
    /// Create a loader with the default paths.
    #[must_use]
    pub fn new() -> Self {
        let user_dir = dirs::config_dir()
            .map(|p| p.join(USER_SETTINGS_DIR))
            .unwrap_or_else(|| PathBuf::from(".config").join(USER_SETTINGS_DIR));

        Self {
            system_path: PathBuf::from(SYSTEM_SETTINGS_PATH),
            user_path: user_dir.join(USER_SETTINGS_FILE),
        }
    }

    /// Create a loader with custom paths (for testing).
    #[must_use]
    pub fn with_paths(system_path: PathBuf, user_path: PathBuf) -> Self {
        Self {
            system_path,
            user_path,
        }
    }

    /// Load and merge settings from all sources.
    pub fn load(&self) -> Result<Settings, SettingsError> {
        let mut settings = Settings::default();

        if let Some(system) = self.load_file(&self.system_path)? {
            settings.merge(system);
            debug!("Loaded system settings from {:?}", self.system_path);
        } else {
            debug!("No system settings at {:?}", self.system_path);
        }

        if let Some(user) = self.load_file(&self.user_path)? {
            settings.merge(user);
            debug!("Loaded user settings from {:?}", self.user_path);
        } else {
            debug!("No user settings at {:?}", self.user_path);
        }

        Ok(settings)
    }

    /// Load a settings file, returning None if it doesn't exist.
    fn load_file(&self, path: &PathBuf) -> Result<Option<Settings>, SettingsError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let settings: Settings =
                    toml::from_str(&contents).map_err(|e| SettingsError::ParseError {
                        path: path.clone(),
                        source: e,
                    })?;
                Ok(Some(settings))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SettingsError::ReadError {
                path: path.clone(),
                source: e,
            }),
        }
    }
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}
