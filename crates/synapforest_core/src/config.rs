//! Library configuration.
//!
//! # Responsibility
//! - Describe where a library lives and how derivatives are sized.
//! - Load settings from TOML, falling back to defaults per field.
//!
//! # Invariants
//! - A validated config has a non-empty `base_dir` and non-zero budgets.

use crate::derivative::{DEFAULT_PREVIEW_MAX_PIXELS, DEFAULT_THUMBNAIL_MAX_PIXELS};
use crate::logging::default_log_level;
use crate::storage::LibraryLayout;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_BASE_DIR: &str = "library";
const LOG_DIR_NAME: &str = "logs";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level library settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LibraryConfig {
    /// Root of `files.db`, `raw_files/`, `thumbnails/` and `previews/`.
    pub base_dir: PathBuf,
    /// Pixel budget for thumbnails.
    pub thumbnail_max_pixels: u64,
    /// Pixel budget for previews.
    pub preview_max_pixels: u64,
    pub log: LogConfig,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub level: String,
    /// Defaults to `<base_dir>/logs`.
    pub dir: Option<PathBuf>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            thumbnail_max_pixels: DEFAULT_THUMBNAIL_MAX_PIXELS,
            preview_max_pixels: DEFAULT_PREVIEW_MAX_PIXELS,
            log: LogConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            dir: None,
        }
    }
}

impl LibraryConfig {
    /// Reads and validates a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates TOML text. Missing keys take default values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Config rooted at `base_dir` with default settings otherwise.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("base_dir cannot be empty".to_string()));
        }
        if self.thumbnail_max_pixels == 0 || self.preview_max_pixels == 0 {
            return Err(ConfigError::Invalid(
                "derivative pixel budgets must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn layout(&self) -> LibraryLayout {
        LibraryLayout::new(&self.base_dir)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log
            .dir
            .clone()
            .unwrap_or_else(|| self.base_dir.join(LOG_DIR_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, LibraryConfig};
    use std::path::PathBuf;

    #[test]
    fn missing_keys_use_defaults() {
        let config = LibraryConfig::from_toml_str("base_dir = \"/srv/media\"").unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/srv/media"));
        assert_eq!(config.thumbnail_max_pixels, 256 * 256);
        assert_eq!(config.preview_max_pixels, 768 * 768);
        assert_eq!(config.log_dir(), PathBuf::from("/srv/media/logs"));
    }

    #[test]
    fn nested_log_table_is_parsed() {
        let config = LibraryConfig::from_toml_str(
            "thumbnail_max_pixels = 1024\n[log]\nlevel = \"warn\"\ndir = \"/var/log/sf\"\n",
        )
        .unwrap();
        assert_eq!(config.thumbnail_max_pixels, 1024);
        assert_eq!(config.log.level, "warn");
        assert_eq!(config.log_dir(), PathBuf::from("/var/log/sf"));
    }

    #[test]
    fn zero_budget_is_rejected() {
        let err = LibraryConfig::from_toml_str("preview_max_pixels = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = LibraryConfig::from_toml_str("thumbnail_size = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = LibraryConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
