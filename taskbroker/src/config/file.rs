//! Loading and saving `~/.taskbroker/config.ini`.

use ini::Ini;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::settings::ConfigFile;

/// Name of the per-user configuration directory under `$HOME`.
pub const CONFIG_DIR_NAME: &str = ".taskbroker";

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// The file exists but is not valid INI.
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    #[error("Failed to write config file: {0}")]
    WriteError(String),

    /// A key holds a value that doesn't fit its setting.
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

impl ConfigFile {
    /// Loads `~/.taskbroker/config.ini`, or defaults if it doesn't exist.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Loads a specific file, or defaults if it doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    /// Saves to `~/.taskbroker/config.ini`.
    pub fn save(&self) -> Result<(), ConfigFileError> {
        self.save_to(&config_file_path())
    }

    /// Saves to a specific file, creating its directory if needed.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }
        let content = super::writer::to_config_string(self);
        std::fs::write(path, content).map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    /// The commented INI text `save` would write.
    pub fn to_ini_string(&self) -> String {
        super::writer::to_config_string(self)
    }

    /// Writes the default file unless one exists. Returns its path.
    pub fn ensure_exists() -> Result<PathBuf, ConfigFileError> {
        let path = config_file_path();
        ensure_exists_at(&path)?;
        Ok(path)
    }
}

/// Writes a default config to `path` unless a file is already there.
///
/// Returns true if a new file was written.
pub fn ensure_exists_at(path: &Path) -> Result<bool, ConfigFileError> {
    if path.exists() {
        return Ok(false);
    }
    ConfigFile::default().save_to(path)?;
    Ok(true)
}

/// `~/.taskbroker`
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// `~/.taskbroker/config.ini`
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults::DEFAULT_EXPECTED_WORKERS;
    use tempfile::TempDir;

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = ConfigFile::load_from(&temp_dir.path().join("missing.ini")).unwrap();
        assert_eq!(config, ConfigFile::default());
        assert_eq!(config.broker.expected_workers.get(), DEFAULT_EXPECTED_WORKERS);
    }

    #[test]
    fn test_ensure_exists_at_writes_once() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.ini");

        assert!(ensure_exists_at(&path).unwrap());
        std::fs::write(&path, "[broker]\nwait_factor = 9\n").unwrap();
        assert!(!ensure_exists_at(&path).unwrap());

        let config = ConfigFile::load_from(&path).unwrap();
        assert_eq!(config.broker.wait_factor, 9.0);
    }

    #[test]
    fn test_config_path_is_under_home() {
        let path = config_file_path();
        assert!(path.ends_with(".taskbroker/config.ini"));
    }
}
