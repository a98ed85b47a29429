/// Secure persistence for the single token record with pluggable backends
use crate::error::{AuthError, Result};
use crate::token::TokenRecord;
use fs2::FileExt;
use keyring::Entry;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

/// Raw credential backend: one string per service/account identity
pub trait CredentialStore: Send + Sync {
    /// Read the secret, `None` when no entry exists
    fn read(&self, service: &str, account: &str) -> Result<Option<String>>;

    /// Insert the secret, replacing nothing (callers delete first)
    fn write(&self, service: &str, account: &str, secret: &str) -> Result<()>;

    /// Delete the secret; deleting a missing entry is not an error
    fn delete(&self, service: &str, account: &str) -> Result<()>;
}

/// Token store persisting exactly one [`TokenRecord`] under a fixed identity
///
/// Records are JSON encoded. A record that no longer decodes is erased and
/// reported as absent.
#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<dyn CredentialStore>,
    service: String,
    account: String,
}

impl TokenStore {
    pub fn new(
        backend: Arc<dyn CredentialStore>,
        service: impl Into<String>,
        account: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            service: service.into(),
            account: account.into(),
        }
    }

    /// Persist `record`, replacing any previous one
    pub fn save(&self, record: &TokenRecord) -> Result<()> {
        let json = serde_json::to_string(record)
            .map_err(|e| AuthError::SecureStore(format!("Failed to serialize token: {}", e)))?;

        // Delete-then-insert keeps a single entry per identity.
        self.backend.delete(&self.service, &self.account)?;
        self.backend.write(&self.service, &self.account, &json)?;
        tracing::debug!(service = %self.service, "token record saved");
        Ok(())
    }

    /// Load the stored record
    pub fn load(&self) -> Result<Option<TokenRecord>> {
        let Some(json) = self.backend.read(&self.service, &self.account)? else {
            return Ok(None);
        };

        match serde_json::from_str::<TokenRecord>(&json) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(
                    service = %self.service,
                    error = %e,
                    "stored token record is corrupt, clearing it"
                );
                self.clear()?;
                Ok(None)
            }
        }
    }

    /// Erase the stored record
    pub fn clear(&self) -> Result<()> {
        self.backend.delete(&self.service, &self.account)?;
        tracing::debug!(service = %self.service, "token record cleared");
        Ok(())
    }
}

/// In-memory credential store
///
/// Thread-safe and process-local. Suitable for testing and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<(String, String), String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl CredentialStore for MemoryStore {
    fn read(&self, service: &str, account: &str) -> Result<Option<String>> {
        let entries = self.entries.read();
        Ok(entries
            .get(&(service.to_string(), account.to_string()))
            .cloned())
    }

    fn write(&self, service: &str, account: &str, secret: &str) -> Result<()> {
        let mut entries = self.entries.write();
        entries.insert(
            (service.to_string(), account.to_string()),
            secret.to_string(),
        );
        Ok(())
    }

    fn delete(&self, service: &str, account: &str) -> Result<()> {
        let mut entries = self.entries.write();
        entries.remove(&(service.to_string(), account.to_string()));
        Ok(())
    }
}

/// File-based credential store using XDG conventions
///
/// Each identity is one JSON file. Writers hold an exclusive file lock so two
/// processes never interleave partial writes.
#[derive(Debug, Clone)]
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    /// Create a file store for `app_name`
    ///
    /// Respects `$XDG_DATA_HOME` first, then the platform data directory.
    /// Credentials live in `<data_dir>/<app_name>/`.
    pub fn new(app_name: &str) -> Result<Self> {
        let base_dir = if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
            PathBuf::from(xdg_data)
        } else {
            dirs::data_dir().ok_or_else(|| {
                AuthError::SecureStore("Could not determine data directory".into())
            })?
        };

        Self::with_path(base_dir.join(app_name))
    }

    /// Create a file store rooted at `path`
    pub fn with_path(path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&path).map_err(|e| {
            AuthError::SecureStore(format!("Failed to create storage directory: {}", e))
        })?;

        Ok(Self { base_path: path })
    }

    fn entry_path(&self, service: &str, account: &str) -> PathBuf {
        let sanitize = |s: &str| s.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.base_path
            .join(format!("{}_{}.json", sanitize(service), sanitize(account)))
    }
}

impl CredentialStore for FileStore {
    fn read(&self, service: &str, account: &str) -> Result<Option<String>> {
        let path = self.entry_path(service, account);
        let mut file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AuthError::SecureStore(format!(
                    "Failed to open credential file: {}",
                    e
                )))
            }
        };

        file.lock_shared()
            .map_err(|e| AuthError::SecureStore(format!("Failed to lock credential file: {}", e)))?;
        let mut content = String::new();
        let read = file.read_to_string(&mut content);
        let _ = file.unlock();
        read.map_err(|e| AuthError::SecureStore(format!("Failed to read credential file: {}", e)))?;

        Ok(Some(content))
    }

    fn write(&self, service: &str, account: &str, secret: &str) -> Result<()> {
        let path = self.entry_path(service, account);
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true).truncate(false);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options
            .open(&path)
            .map_err(|e| AuthError::SecureStore(format!("Failed to open credential file: {}", e)))?;
        file.lock_exclusive()
            .map_err(|e| AuthError::SecureStore(format!("Failed to lock credential file: {}", e)))?;

        let written = file
            .set_len(0)
            .and_then(|_| file.seek(SeekFrom::Start(0)))
            .and_then(|_| file.write_all(secret.as_bytes()))
            .and_then(|_| file.sync_all());
        let _ = file.unlock();

        written.map_err(|e| AuthError::SecureStore(format!("Failed to write credential file: {}", e)))
    }

    fn delete(&self, service: &str, account: &str) -> Result<()> {
        match fs::remove_file(self.entry_path(service, account)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::SecureStore(format!(
                "Failed to delete credential file: {}",
                e
            ))),
        }
    }
}

/// Secure storage using the OS credential manager
///
/// - macOS: Keychain
/// - Windows: Credential Manager
/// - Linux: kernel keyutils
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringStore;

impl KeyringStore {
    pub fn new() -> Self {
        Self
    }

    fn entry(service: &str, account: &str) -> Result<Entry> {
        Entry::new(service, account)
            .map_err(|e| AuthError::SecureStore(format!("Failed to create keyring entry: {}", e)))
    }
}

impl CredentialStore for KeyringStore {
    fn read(&self, service: &str, account: &str) -> Result<Option<String>> {
        match Self::entry(service, account)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AuthError::SecureStore(format!(
                "Failed to retrieve token from keyring: {}",
                e
            ))),
        }
    }

    fn write(&self, service: &str, account: &str, secret: &str) -> Result<()> {
        Self::entry(service, account)?
            .set_password(secret)
            .map_err(|e| AuthError::SecureStore(format!("Failed to save token to keyring: {}", e)))
    }

    fn delete(&self, service: &str, account: &str) -> Result<()> {
        match Self::entry(service, account)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AuthError::SecureStore(format!(
                "Failed to delete token from keyring: {}",
                e
            ))),
        }
    }
}
