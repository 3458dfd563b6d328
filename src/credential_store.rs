// Bulgur Sync Credential Store
// One persisted session record under a fixed key.
// Backends: OS Keyring (preferred), owner-only JSON file, or process memory.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::types::expose;
use crate::config::{ClientConfig, CredentialBackend};

const SERVICE_NAME: &str = "bulgur-sync";

// ============ Error Types ============

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Keyring error: {0}")]
    Keyring(String),
    #[error("No config directory")]
    NoConfigDir,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

// ============ Key-Value Backends ============

/// A persistent string store addressed by key.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError>;
    fn set(&self, key: &str, value: &str) -> Result<(), CredentialError>;
    /// Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), CredentialError>;
}

pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    /// Try to create a store using OS keyring. Returns None if keyring unavailable.
    pub fn with_keyring() -> Option<Self> {
        let entry = match keyring::Entry::new(SERVICE_NAME, "__probe__") {
            Ok(e) => e,
            Err(_) => return None,
        };
        match entry.get_password() {
            Ok(_) | Err(keyring::Error::NoEntry) => {}
            Err(keyring::Error::NoStorageAccess(_)) => return None,
            Err(keyring::Error::PlatformFailure(_)) => {
                #[cfg(windows)]
                {
                    warn!("Keyring probe returned PlatformFailure, proceeding anyway (Windows transient)");
                }
                #[cfg(not(windows))]
                return None;
            }
            Err(_) => {}
        }
        Some(Self {
            service: SERVICE_NAME.to_string(),
        })
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, CredentialError> {
        keyring::Entry::new(&self.service, key).map_err(|e| CredentialError::Keyring(e.to_string()))
    }
}

impl KeyValueStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(CredentialError::Keyring(e.to_string())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| CredentialError::Keyring(e.to_string()))?;
        info!("Credential stored in OS keyring: {}", key);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CredentialError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(CredentialError::Keyring(e.to_string())),
        }
    }
}

/// One `<key>.json` file per key, readable by the owner only.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<config_dir>/bulgur-sync`
    pub fn in_config_dir() -> Result<Self, CredentialError> {
        let dir = crate::config::config_dir().map_err(|_| CredentialError::NoConfigDir)?;
        Ok(Self::new(dir))
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir)?;
            ensure_secure_permissions(&self.dir)?;
        }
        let path = self.path_for(key);
        std::fs::write(&path, value)?;
        ensure_secure_permissions(&path)?;
        info!("Credential stored in file: {:?}", path);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CredentialError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CredentialError> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// Pick the backend named in the config. The keyring falls back to the file
/// backend when the platform has no usable keyring.
pub fn open_backend(config: &ClientConfig) -> Result<Arc<dyn KeyValueStore>, CredentialError> {
    match config.credential_backend {
        CredentialBackend::Keyring => match KeyringStore::with_keyring() {
            Some(store) => Ok(Arc::new(store)),
            None => {
                warn!("OS keyring unavailable, storing credentials in the config directory");
                Ok(Arc::new(FileStore::in_config_dir()?))
            }
        },
        CredentialBackend::File => Ok(Arc::new(FileStore::in_config_dir()?)),
        CredentialBackend::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}

// ============ Persisted Session Record ============

/// The record written on every successful login or refresh.
#[derive(Clone, Serialize, Deserialize)]
pub struct PersistedAuth {
    pub username: String,
    #[serde(serialize_with = "expose")]
    pub access_token: SecretString,
    #[serde(serialize_with = "expose")]
    pub refresh_token: SecretString,
    pub site: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl PersistedAuth {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl fmt::Debug for PersistedAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedAuth")
            .field("username", &self.username)
            .field("site", &self.site)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Typed access to the session record.
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn KeyValueStore>,
    key: String,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
        }
    }

    /// A missing, unreadable or malformed record all read as "no session".
    pub fn load(&self) -> Option<PersistedAuth> {
        let raw = match self.backend.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read persisted credentials: {}", e);
                return None;
            }
        };
        match serde_json::from_str::<PersistedAuth>(&raw) {
            Ok(record) if !record.username.is_empty() && !record.site.is_empty() => Some(record),
            Ok(_) => {
                warn!("Persisted credentials are incomplete, ignoring them");
                None
            }
            Err(e) => {
                warn!("Persisted credentials are malformed: {}", e);
                None
            }
        }
    }

    pub fn save(&self, record: &PersistedAuth) -> Result<(), CredentialError> {
        let json = serde_json::to_string(record)
            .map_err(|e| CredentialError::Serialization(e.to_string()))?;
        self.backend.set(&self.key, &json)
    }

    pub fn clear(&self) -> Result<(), CredentialError> {
        self.backend.delete(&self.key)
    }
}

// ============ Permission Hardening ============

/// Ensure secure file/directory permissions (0o600 files, 0o700 dirs on Unix)
pub fn ensure_secure_permissions(path: &Path) -> Result<(), CredentialError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = if path.is_dir() { 0o700 } else { 0o600 };
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
