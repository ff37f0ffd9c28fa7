//! Engine configuration and per-operation settings

use cbr_document::FormatVersion;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Not valid TOML for [`EngineConfig`]
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Semantically invalid value
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Backup settings, frozen once the operation is configured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    /// Include referenced users and user-generated content
    pub include_users: bool,
    /// Replace personal fields of included users
    pub anonymize: bool,
    /// Copy attachments into the archive
    pub include_files: bool,
    /// Back up course blocks
    pub include_blocks: bool,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            include_users: true,
            anonymize: false,
            include_files: true,
            include_blocks: true,
        }
    }
}

impl BackupSettings {
    /// Set `include_users`
    #[inline]
    #[must_use]
    pub fn with_users(mut self, include: bool) -> Self {
        self.include_users = include;
        self
    }

    /// Set `anonymize`
    #[inline]
    #[must_use]
    pub fn with_anonymize(mut self, anonymize: bool) -> Self {
        self.anonymize = anonymize;
        self
    }

    /// Set `include_files`
    #[inline]
    #[must_use]
    pub fn with_files(mut self, include: bool) -> Self {
        self.include_files = include;
        self
    }

    /// Set `include_blocks`
    #[inline]
    #[must_use]
    pub fn with_blocks(mut self, include: bool) -> Self {
        self.include_blocks = include;
        self
    }

    /// Apply setting dependencies: anonymizing needs users
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.anonymize && !self.include_users {
            tracing::debug!("users excluded, anonymize forced off");
            self.anonymize = false;
        }
        self
    }
}

/// Restore settings, frozen once the operation is configured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreSettings {
    /// Restore users and user-generated content present in the archive
    pub include_users: bool,
    /// Restore attachments
    pub include_files: bool,
    /// Restore blocks
    pub include_blocks: bool,
    /// Course format of a new course; `None` keeps the archive's
    pub course_format: Option<String>,
}

impl Default for RestoreSettings {
    fn default() -> Self {
        Self {
            include_users: true,
            include_files: true,
            include_blocks: true,
            course_format: None,
        }
    }
}

impl RestoreSettings {
    /// Set `include_users`
    #[inline]
    #[must_use]
    pub fn with_users(mut self, include: bool) -> Self {
        self.include_users = include;
        self
    }

    /// Set `include_files`
    #[inline]
    #[must_use]
    pub fn with_files(mut self, include: bool) -> Self {
        self.include_files = include;
        self
    }

    /// Set `include_blocks`
    #[inline]
    #[must_use]
    pub fn with_blocks(mut self, include: bool) -> Self {
        self.include_blocks = include;
        self
    }

    /// Restore a new course under `format`
    #[must_use]
    pub fn with_course_format(mut self, format: impl Into<String>) -> Self {
        self.course_format = Some(format.into());
        self
    }
}

/// Engine-wide configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base URL of the running site, used for content links
    pub wwwroot: String,
    /// Defaults for backups
    pub backup: BackupSettings,
    /// Defaults for restores
    pub restore: RestoreSettings,
    /// Document format written into archives
    pub format_version: FormatVersion,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wwwroot: "http://localhost".to_string(),
            backup: BackupSettings::default(),
            restore: RestoreSettings::default(),
            format_version: FormatVersion::CURRENT,
        }
    }
}

impl EngineConfig {
    /// Set the site URL
    #[must_use]
    pub fn with_wwwroot(mut self, wwwroot: impl Into<String>) -> Self {
        self.wwwroot = wwwroot.into();
        self
    }

    /// Set default backup settings
    #[inline]
    #[must_use]
    pub fn with_backup(mut self, settings: BackupSettings) -> Self {
        self.backup = settings;
        self
    }

    /// Set default restore settings
    #[inline]
    #[must_use]
    pub fn with_restore(mut self, settings: RestoreSettings) -> Self {
        self.restore = settings;
        self
    }

    /// Parse TOML
    ///
    /// # Errors
    /// Parse failure or an invalid value
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    ///
    /// # Errors
    /// I/O, parse failure or an invalid value
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Check values that serde cannot
    ///
    /// # Errors
    /// [`ConfigError::Invalid`]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wwwroot.is_empty() || self.wwwroot.ends_with('/') {
            return Err(ConfigError::Invalid(format!(
                "wwwroot `{}` must be non-empty without a trailing slash",
                self.wwwroot
            )));
        }
        if self.format_version > FormatVersion::CURRENT {
            return Err(ConfigError::Invalid(format!(
                "cannot write format {} (newest is {})",
                self.format_version,
                FormatVersion::CURRENT
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_with_partial_sections() {
        let config = EngineConfig::from_toml_str(
            r#"
            wwwroot = "https://school.example"

            [backup]
            include_users = false
            anonymize = true

            [restore]
            course_format = "weeks"
            "#,
        )
        .unwrap();
        assert_eq!(config.wwwroot, "https://school.example");
        assert!(!config.backup.include_users);
        assert!(config.backup.include_files);
        assert_eq!(config.restore.course_format.as_deref(), Some("weeks"));
        assert!(!config.backup.clone().normalized().anonymize);
    }

    #[test]
    fn trailing_slash_rejected() {
        let err = EngineConfig::from_toml_str("wwwroot = \"https://a.example/\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "format_version = \"1.0\"\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.format_version, FormatVersion::CURRENT);
    }
}
