use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::crypto::KdfParams;

/// Upper bound on a single stream chunk
pub const MAX_STREAM_CHUNK_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Deadline for a single directory or backup call
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// How long a looked-up card is served from cache
    #[serde(default = "default_card_cache_ttl_secs")]
    pub card_cache_ttl_secs: u64,
    /// Backup passwords shorter than this are rejected as weak
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
    /// Plaintext bytes per chunk for stream encryption
    #[serde(default = "default_stream_chunk_size")]
    pub stream_chunk_size: usize,
    /// Cost parameters for new backups. Existing backups keep their own.
    #[serde(default)]
    pub kdf: KdfParams,
    /// Directory for the file-backed key store (optional, defaults to in-memory)
    #[serde(default)]
    pub key_store_path: Option<PathBuf>,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_card_cache_ttl_secs() -> u64 {
    300
}

fn default_min_password_length() -> usize {
    8
}

fn default_stream_chunk_size() -> usize {
    64 * 1024
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            card_cache_ttl_secs: default_card_cache_ttl_secs(),
            min_password_length: default_min_password_length(),
            stream_chunk_size: default_stream_chunk_size(),
            kdf: KdfParams::default(),
            key_store_path: None,
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config_toml = fs::read_to_string(path)?;
        Self::from_toml_str(&config_toml)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.stream_chunk_size == 0 || self.stream_chunk_size > MAX_STREAM_CHUNK_SIZE {
            return Err(ConfigError::Invalid(format!(
                "stream_chunk_size must be between 1 and {}",
                MAX_STREAM_CHUNK_SIZE
            )));
        }
        self.kdf
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn card_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.card_cache_ttl_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = SessionConfig::from_toml_str("").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.kdf.memory_kib, 19456);
    }

    #[test]
    fn test_partial_toml() {
        let config = SessionConfig::from_toml_str(
            r#"
            request_timeout_ms = 500
            key_store_path = "/var/lib/sealkit/keys"

            [kdf]
            iterations = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.request_timeout_ms, 500);
        assert_eq!(config.kdf.iterations, 4);
        assert_eq!(config.kdf.memory_kib, KdfParams::default().memory_kib);
        assert_eq!(
            config.key_store_path,
            Some(PathBuf::from("/var/lib/sealkit/keys"))
        );
        assert_eq!(config.min_password_length, 8);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            SessionConfig::from_toml_str("request_timeout_ms = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_toml_str("stream_chunk_size = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_toml_str("[kdf]\niterations = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_toml_str("request_timeout_ms = \"soon\""),
            Err(ConfigError::TomlDe(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sealkit.toml");
        fs::write(&path, "card_cache_ttl_secs = 5\n").unwrap();

        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config.card_cache_ttl(), Duration::from_secs(5));

        assert!(matches!(
            SessionConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
