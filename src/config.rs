// Bulgur Sync Configuration
// Persistent client configuration stored next to the credential file

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::credential_store::ensure_secure_permissions;

pub const DEFAULT_PERSIST_KEY: &str = "bulgur-cloud-auth";
pub const DEFAULT_CONCURRENT_UPLOADS: u8 = 2;
const MAX_CONCURRENT_UPLOADS: u8 = 8;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No config directory")]
    NoConfigDir,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Where the persisted credential record lives.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    /// OS keyring, falling back to the file when the keyring is unavailable
    Keyring,
    /// JSON file with owner-only permissions
    #[default]
    File,
    /// Process memory only; nothing survives a restart
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Default server base URL (e.g., https://bulgur.example.com)
    pub site: Option<String>,
    /// Uploads allowed in flight at once (1-8, default: 2)
    pub max_concurrent_uploads: u8,
    /// Total per-request timeout
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub credential_backend: CredentialBackend,
    /// Key the credential record is stored under
    pub persist_key: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            site: None,
            max_concurrent_uploads: DEFAULT_CONCURRENT_UPLOADS,
            request_timeout_secs: 300,
            connect_timeout_secs: 30,
            credential_backend: CredentialBackend::default(),
            persist_key: DEFAULT_PERSIST_KEY.to_string(),
        }
    }
}

/// `<config_dir>/bulgur-sync`
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    let base = dirs::config_dir()
        .or_else(dirs::home_dir)
        .ok_or(ConfigError::NoConfigDir)?;
    Ok(base.join("bulgur-sync"))
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json"))
}

impl ClientConfig {
    /// Load from the platform config directory, falling back to defaults.
    pub fn load() -> Self {
        match get_config_path() {
            Ok(path) => Self::load_from(&path),
            Err(e) => {
                tracing::warn!("Failed to locate config: {}", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Self {
        let mut config = if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config {:?}: {}", path, e);
                        Self::default()
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config {:?}: {}", path, e);
                    Self::default()
                }
            }
        } else {
            Self::default()
        };
        validate_config(&mut config);
        config
    }

    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = get_config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
                ensure_secure_permissions(parent).map_err(|e| ConfigError::Serialization(e.to_string()))?;
            }
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialization(e.to_string()))?;
        fs::write(path, content)?;
        ensure_secure_permissions(path).map_err(|e| ConfigError::Serialization(e.to_string()))?;
        tracing::info!("Config saved to {:?}", path);
        Ok(())
    }
}

/// Clamp values to safe ranges
pub fn validate_config(config: &mut ClientConfig) {
    config.max_concurrent_uploads = config.max_concurrent_uploads.clamp(1, MAX_CONCURRENT_UPLOADS);

    if config.request_timeout_secs == 0 {
        config.request_timeout_secs = 300;
    }
    if config.connect_timeout_secs == 0 {
        config.connect_timeout_secs = 30;
    }
    if config.persist_key.trim().is_empty() {
        config.persist_key = DEFAULT_PERSIST_KEY.to_string();
    }
    if config.site.as_deref().is_some_and(|s| s.trim().is_empty()) {
        config.site = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.max_concurrent_uploads, 2);
        assert_eq!(config.persist_key, "bulgur-cloud-auth");
        assert_eq!(config.credential_backend, CredentialBackend::File);
        assert!(config.site.is_none());
    }

    #[test]
    fn test_validate_config_clamp_high() {
        let mut config = ClientConfig {
            max_concurrent_uploads: 10,
            ..Default::default()
        };
        validate_config(&mut config);
        assert_eq!(config.max_concurrent_uploads, 8);
    }

    #[test]
    fn test_validate_config_clamp_low() {
        let mut config = ClientConfig {
            max_concurrent_uploads: 0,
            request_timeout_secs: 0,
            persist_key: " ".to_string(),
            site: Some(String::new()),
            ..Default::default()
        };
        validate_config(&mut config);
        assert_eq!(config.max_concurrent_uploads, 1);
        assert_eq!(config.request_timeout_secs, 300);
        assert_eq!(config.persist_key, DEFAULT_PERSIST_KEY);
        assert!(config.site.is_none());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"site":"https://bulgur.example.com","credential_backend":"memory"}"#).unwrap();
        let config = ClientConfig::load_from(&path);
        assert_eq!(config.site.as_deref(), Some("https://bulgur.example.com"));
        assert_eq!(config.credential_backend, CredentialBackend::Memory);
        assert_eq!(config.max_concurrent_uploads, 2);
    }

    #[test]
    fn test_corrupt_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        let config = ClientConfig::load_from(&path);
        assert_eq!(config.persist_key, DEFAULT_PERSIST_KEY);
    }

    #[test]
    fn test_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = ClientConfig {
            site: Some("https://bulgur.example.com".to_string()),
            max_concurrent_uploads: 4,
            ..Default::default()
        };
        config.save_to(&path).unwrap();
        let loaded = ClientConfig::load_from(&path);
        assert_eq!(loaded.site, config.site);
        assert_eq!(loaded.max_concurrent_uploads, 4);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
