//! Record storage backends for persisting the OAuth credential.
//!
//! Provides the [`RecordStorage`] trait and several implementations:
//! - [`FileRecordStorage`] - Single JSON file, replaced atomically on save
//! - [`MemoryRecordStorage`] - In-memory storage for testing
//! - [`KeyringRecordStorage`] - System keyring storage (requires `system-keyring` feature)
//!
//! There is exactly one record per installation, so unlike a token cache the
//! operations take no key. Deleting the record is left to the operator.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, instrument};

use super::OAuthError;
use super::token::TokenRecord;

// =============================================================================
// RecordStorage trait
// =============================================================================

/// Trait for the durable record store.
///
/// All storage implementations must be thread-safe (`Send + Sync`).
pub trait RecordStorage: Send + Sync {
    /// Load the stored record. `Ok(None)` means nothing was ever saved.
    fn load(&self) -> Result<Option<TokenRecord>, OAuthError>;

    /// Replace the stored record as a whole.
    fn save(&self, record: &TokenRecord) -> Result<(), OAuthError>;

    /// Get the name of this storage backend.
    fn name(&self) -> &str;
}

// Blanket implementation for Arc<T>
impl<T: RecordStorage + ?Sized> RecordStorage for Arc<T> {
    fn load(&self) -> Result<Option<TokenRecord>, OAuthError> {
        (**self).load()
    }
    fn save(&self, record: &TokenRecord) -> Result<(), OAuthError> {
        (**self).save(record)
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}

// =============================================================================
// FileRecordStorage
// =============================================================================

/// File permissions for the token file (Unix only): owner read/write.
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Directory permissions (Unix only): owner read/write/execute.
#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// File-based record storage.
///
/// The record lives in one pretty-printed JSON file. Saves go through a
/// sibling temp file that is synced and then renamed over the target, so a
/// crash mid-write leaves either the old record or the new one.
///
/// # Security
/// - File permissions are set to 0600 (owner read/write only) on Unix
/// - A missing parent directory is created with 0700 permissions
///
/// Concurrent writers from separate processes are not coordinated.
#[derive(Debug, Clone)]
pub struct FileRecordStorage {
    path: PathBuf,
}

impl FileRecordStorage {
    /// Create a new FileRecordStorage backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the path of the token file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Ensure the parent directory exists with correct permissions.
    fn ensure_parent_dir(&self) -> Result<(), OAuthError> {
        let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) else {
            return Ok(());
        };
        if dir.exists() {
            return Ok(());
        }

        std::fs::create_dir_all(dir).map_err(|e| {
            OAuthError::Storage(format!(
                "Failed to create token directory '{}': {}",
                dir.display(),
                e
            ))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(DIR_MODE);
            std::fs::set_permissions(dir, perms).map_err(|e| {
                OAuthError::Storage(format!(
                    "Failed to set directory permissions on '{}': {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    fn write_temp(&self, temp_path: &Path, content: &str) -> Result<(), OAuthError> {
        use std::io::Write;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);

        // Restrict permissions at creation time so the secret is never
        // readable by other users, even briefly.
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(FILE_MODE);
        }

        let mut file = options.open(temp_path).map_err(|e| {
            OAuthError::Storage(format!(
                "Failed to create temp file '{}': {}",
                temp_path.display(),
                e
            ))
        })?;
        file.write_all(content.as_bytes()).map_err(|e| {
            OAuthError::Storage(format!(
                "Failed to write temp file '{}': {}",
                temp_path.display(),
                e
            ))
        })?;
        file.sync_all().map_err(|e| {
            OAuthError::Storage(format!(
                "Failed to sync temp file '{}': {}",
                temp_path.display(),
                e
            ))
        })
    }
}

impl RecordStorage for FileRecordStorage {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    fn load(&self) -> Result<Option<TokenRecord>, OAuthError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(OAuthError::Storage(format!(
                    "Failed to read token file '{}': {}",
                    self.path.display(),
                    e
                )));
            }
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        let record: TokenRecord = serde_json::from_str(&content).map_err(|e| {
            OAuthError::Storage(format!(
                "Failed to parse token file '{}': {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(Some(record))
    }

    #[instrument(skip(self, record), fields(path = %self.path.display()))]
    fn save(&self, record: &TokenRecord) -> Result<(), OAuthError> {
        self.ensure_parent_dir()?;

        let content = serde_json::to_string_pretty(record)
            .map_err(|e| OAuthError::Storage(format!("Failed to serialize token record: {}", e)))?;

        let temp_path = self.temp_path();
        if let Err(e) = self.write_temp(&temp_path, &content) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }

        // Atomic rename
        if let Err(e) = std::fs::rename(&temp_path, &self.path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(OAuthError::Storage(format!(
                "Failed to rename '{}' to '{}': {}",
                temp_path.display(),
                self.path.display(),
                e
            )));
        }

        debug!("Token record saved");
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}

// =============================================================================
// KeyringRecordStorage
// =============================================================================

/// Keyring-based record storage.
///
/// Uses the system's native credential store. The record is serialized to
/// JSON and stored as the entry's password.
///
/// Feature-gated behind `system-keyring`.
#[cfg(feature = "system-keyring")]
#[derive(Debug, Clone)]
pub struct KeyringRecordStorage {
    service: String,
    account: String,
}

#[cfg(feature = "system-keyring")]
impl Default for KeyringRecordStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "system-keyring")]
impl KeyringRecordStorage {
    /// Service name for keyring entries.
    const SERVICE_NAME: &str = "hltoken";

    /// Account name for the single stored record.
    const ACCOUNT_NAME: &str = "highlevel";

    /// Create a new KeyringRecordStorage with default service and account.
    pub fn new() -> Self {
        Self {
            service: Self::SERVICE_NAME.to_string(),
            account: Self::ACCOUNT_NAME.to_string(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, OAuthError> {
        keyring::Entry::new(&self.service, &self.account)
            .map_err(|e| OAuthError::Storage(format!("Failed to create keyring entry: {}", e)))
    }
}

#[cfg(feature = "system-keyring")]
impl RecordStorage for KeyringRecordStorage {
    #[instrument(skip(self))]
    fn load(&self) -> Result<Option<TokenRecord>, OAuthError> {
        match self.entry()?.get_password() {
            Ok(password) => {
                let record: TokenRecord = serde_json::from_str(&password).map_err(|e| {
                    OAuthError::Storage(format!("Failed to parse token record from keyring: {}", e))
                })?;
                Ok(Some(record))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(OAuthError::Storage(format!("Keyring error: {}", e))),
        }
    }

    #[instrument(skip(self, record))]
    fn save(&self, record: &TokenRecord) -> Result<(), OAuthError> {
        let json = serde_json::to_string(record)
            .map_err(|e| OAuthError::Storage(format!("Failed to serialize token record: {}", e)))?;
        self.entry()?
            .set_password(&json)
            .map_err(|e| OAuthError::Storage(format!("Keyring error: {}", e)))
    }

    fn name(&self) -> &str {
        "keyring"
    }
}

// =============================================================================
// MemoryRecordStorage
// =============================================================================

/// In-memory record storage.
///
/// Clones share state. Counts saves so tests can assert how often the
/// store was written.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStorage {
    inner: Arc<RwLock<Option<TokenRecord>>>,
    saves: Arc<AtomicUsize>,
}

impl MemoryRecordStorage {
    /// Create a new empty MemoryRecordStorage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a MemoryRecordStorage holding `record`.
    pub fn with_record(record: TokenRecord) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(record))),
            saves: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of successful `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> OAuthError {
    OAuthError::Storage("Memory storage lock poisoned".to_string())
}

impl RecordStorage for MemoryRecordStorage {
    fn load(&self) -> Result<Option<TokenRecord>, OAuthError> {
        Ok(self.inner.read().map_err(poisoned)?.clone())
    }

    fn save(&self, record: &TokenRecord) -> Result<(), OAuthError> {
        *self.inner.write().map_err(poisoned)? = Some(record.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
