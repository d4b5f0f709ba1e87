use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codec::CodecFormat;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("toml deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

/// App configuration, stored as `config.toml` in the data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// How many committed mutations the undo stack keeps.
    #[serde(default = "default_undo_depth")]
    pub undo_depth: usize,
    /// Seconds before an unacknowledged persistence call counts as failed.
    #[serde(default = "default_persist_timeout_secs")]
    pub persist_timeout_secs: u64,
    /// Text encoding of the workspace snapshot. The snapshot does not
    /// self-describe its format, so this must match the stored blob.
    #[serde(default)]
    pub snapshot_format: CodecFormat,
    #[serde(default = "default_compression_backend")]
    pub compression_backend: String,
    #[serde(default = "default_owner")]
    pub owner: String,
}

fn default_undo_depth() -> usize {
    12
}
fn default_persist_timeout_secs() -> u64 {
    10
}
fn default_compression_backend() -> String {
    "deflate".to_string()
}
fn default_owner() -> String {
    std::env::var("USER").unwrap_or_else(|_| "me".to_string())
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            undo_depth: default_undo_depth(),
            persist_timeout_secs: default_persist_timeout_secs(),
            snapshot_format: CodecFormat::default(),
            compression_backend: default_compression_backend(),
            owner: default_owner(),
        }
    }
}

impl AppConfig {
    /// Load `config.toml` from the data directory, or defaults when the
    /// file does not exist yet.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join("config.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn save(&self, dir: &Path) -> Result<(), ConfigError> {
        fs::create_dir_all(dir)?;
        let text = toml::to_string_pretty(self)?;
        fs::write(dir.join("config.toml"), text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_fields() {
        let config: AppConfig = toml::from_str("undo_depth = 5").unwrap();
        assert_eq!(config.undo_depth, 5);
        assert_eq!(config.persist_timeout_secs, 10);
        assert_eq!(config.snapshot_format, CodecFormat::Utf16);
        assert_eq!(config.compression_backend, "deflate");
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.snapshot_format = CodecFormat::Base64;
        config.save(dir.path()).unwrap();

        let loaded = AppConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.snapshot_format, CodecFormat::Base64);
        assert_eq!(loaded.undo_depth, 12);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(dir.path()).unwrap();
        assert_eq!(config.undo_depth, 12);
    }
}
