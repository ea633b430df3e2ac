use crate::atomic::write_atomic;
use lockbridge_schema::Platform;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV: &str = "LOCKBRIDGE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("HOME not set and {CONFIG_ENV} not given")]
    NoHome,
}

/// User defaults for the CLI, from `~/.config/lockbridge/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConverterConfig {
    /// Output format when none is given on the command line.
    pub default_format: Option<String>,
    /// Channels recorded for live snapshots whose packages do not name one.
    pub channels: Vec<String>,
    /// Platform to lock live snapshots for, instead of the detected one.
    pub platform: Option<Platform>,
}

impl ConverterConfig {
    /// Load from `$LOCKBRIDGE_CONFIG`, else the default path. A missing file
    /// yields the defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path()?;
        if !path.exists() {
            debug!("no config at {}; using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        write_atomic(path, &content)?;
        Ok(())
    }
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    let home = std::env::var_os("HOME").ok_or(ConfigError::NoHome)?;
    Ok(PathBuf::from(home).join(".config/lockbridge/config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = ConverterConfig {
            default_format: Some("pixi-lock-v6".to_owned()),
            channels: vec!["conda-forge".to_owned()],
            platform: Some(Platform::new("linux-aarch64")),
        };
        config.save(&path).unwrap();

        let loaded = ConverterConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn empty_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();
        assert_eq!(
            ConverterConfig::load(&path).unwrap(),
            ConverterConfig::default()
        );
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_format = \"conda-lock-v1\"\n").unwrap();
        let config = ConverterConfig::load(&path).unwrap();
        assert_eq!(config.default_format.as_deref(), Some("conda-lock-v1"));
        assert!(config.channels.is_empty());
        assert!(config.platform.is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "defualt_format = \"x\"\n").unwrap();
        let err = ConverterConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConverterConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
