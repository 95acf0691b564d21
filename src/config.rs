//! Archive layer configuration
//!
//! Defines the knobs of the background task runner and of newly created
//! archives.

use ba2::tes4::Version;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable overriding [`ArchiveConfig::max_concurrent_tasks`]
pub const MAX_TASKS_ENV: &str = "BSARC_MAX_TASKS";

/// Configuration for archive tasks
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Maximum archive jobs running at once (defaults to CPU thread count)
    pub max_concurrent_tasks: usize,

    /// BSA version (103, 104 or 105) used for new archives whose name does
    /// not identify an Oblivion archive
    pub default_version: u32,

    /// Create the output directory before extracting into it
    pub create_output_dirs: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        let thread_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            max_concurrent_tasks: thread_count,
            default_version: 104,
            create_output_dirs: true,
        }
    }
}

impl ArchiveConfig {
    /// Default configuration with environment overrides applied
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(value) = std::env::var(MAX_TASKS_ENV) {
            config.max_concurrent_tasks = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv {
                    name: MAX_TASKS_ENV,
                    value,
                })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Read configuration from a JSON file; missing keys keep their defaults
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_tasks == 0 {
            return Err(ConfigError::NoWorkers);
        }

        self.version()?;
        Ok(())
    }

    /// Engine version for new archives
    pub fn version(&self) -> Result<Version, ConfigError> {
        match self.default_version {
            103 => Ok(Version::v103),
            104 => Ok(Version::v104),
            105 => Ok(Version::v105),
            other => Err(ConfigError::UnsupportedVersion(other)),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("max_concurrent_tasks must be at least 1")]
    NoWorkers,

    #[error("Unsupported BSA version: {0} (expected 103, 104 or 105)")]
    UnsupportedVersion(u32),

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("Failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No tokio runtime available to run archive tasks")]
    NoRuntime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ArchiveConfig::default();
        // Should default to CPU thread count
        assert!(config.max_concurrent_tasks > 0);
        assert_eq!(config.version().unwrap(), Version::v104);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = ArchiveConfig {
            max_concurrent_tasks: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoWorkers)));

        let config = ArchiveConfig {
            default_version: 106,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedVersion(106))
        ));
    }

    #[test]
    fn test_from_json_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bsarc.json");
        std::fs::write(&path, r#"{ "max_concurrent_tasks": 2, "default_version": 105 }"#).unwrap();

        let config = ArchiveConfig::from_json_file(&path).unwrap();
        assert_eq!(config.max_concurrent_tasks, 2);
        assert_eq!(config.version().unwrap(), Version::v105);
        assert!(config.create_output_dirs);

        std::fs::write(&path, r#"{ "default_version": 99 }"#).unwrap();
        assert!(ArchiveConfig::from_json_file(&path).is_err());
    }
}
