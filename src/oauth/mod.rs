//! OAuth token lifecycle for the HighLevel API.
//!
//! # Architecture
//!
//! - [`TokenStore`] - Exchanges codes, refreshes, and hands out valid access tokens
//! - [`RecordStorage`] - Pluggable persistence for the single record (file, keyring, memory)
//! - [`TokenRecord`] - Persisted credential with expiry arithmetic
//! - [`AuthServer`] - The token endpoint; [`HighLevelClient`] is the real one
//! - [`Authorizer`] - The human step that turns an authorization URL into a code
//! - [`Clock`] - Source of "now", injectable for tests
//!
//! # Example
//!
//! ```rust,ignore
//! use hltoken::oauth::TokenStore;
//!
//! let store = TokenStore::from_config(&config)?;
//! let token = store.get_valid_token().await?;
//! ```

pub mod authorize;
pub mod clock;
pub mod highlevel;
pub mod storage;
pub mod token;

// Re-exports
pub use authorize::{Authorizer, ConsoleAuthorizer, parse_authorization_input};
pub use clock::{Clock, ManualClock, SystemClock};
pub use highlevel::{AuthServer, HighLevelClient, HighLevelOAuthConfig};
pub use storage::{FileRecordStorage, MemoryRecordStorage, RecordStorage};
pub use token::{REFRESH_BUFFER_SECS, TokenRecord, TokenResponse};

#[cfg(feature = "system-keyring")]
pub use storage::KeyringRecordStorage;

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{Config, StorageBackend, StorageConfig};
use crate::net::HttpClient;

// =============================================================================
// OAuthError
// =============================================================================

/// Errors that can occur during token operations.
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    /// No usable record or refresh token; run the authorization flow.
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// The authorization-code exchange was rejected.
    #[error("Failed to get tokens: {0}")]
    ExchangeFailed(String),

    /// The refresh grant was rejected.
    #[error("Failed to refresh token: {0}")]
    RefreshFailed(String),

    /// Reading or writing the record failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

// =============================================================================
// TokenStatus
// =============================================================================

/// Snapshot of the stored credential, without secrets.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TokenStatus {
    /// Whether a record exists.
    pub authorized: bool,
    pub has_refresh_token: bool,
    /// Whether the next `get_valid_token` would refresh.
    pub needs_refresh: bool,
    pub expired: bool,
    pub expires_at: Option<i64>,
    /// Seconds until the token expires (None if unknown or not authorized).
    pub expires_in_secs: Option<u64>,
    pub location_id: Option<String>,
}

impl TokenStatus {
    fn unauthorized() -> Self {
        Self {
            authorized: false,
            has_refresh_token: false,
            needs_refresh: false,
            expired: false,
            expires_at: None,
            expires_in_secs: None,
            location_id: None,
        }
    }

    fn of(record: &TokenRecord, now: i64) -> Self {
        Self {
            authorized: true,
            has_refresh_token: record.usable_refresh_token().is_some(),
            needs_refresh: record.needs_refresh_at(now),
            expired: record.is_expired_at(now),
            expires_at: record.expires_at,
            expires_in_secs: record.time_until_expiry_at(now).map(|d| d.as_secs()),
            location_id: record.location_id.clone(),
        }
    }
}

/// Build the record storage selected in config.
pub fn storage_from_config(config: &StorageConfig) -> Arc<dyn RecordStorage> {
    match config.backend {
        StorageBackend::File => Arc::new(FileRecordStorage::new(&config.token_file)),
        #[cfg(feature = "system-keyring")]
        StorageBackend::Keyring => Arc::new(KeyringRecordStorage::new()),
        #[cfg(not(feature = "system-keyring"))]
        StorageBackend::Keyring => {
            tracing::warn!(
                "Keyring storage requested but system-keyring feature not enabled, falling back to file storage"
            );
            Arc::new(FileRecordStorage::new(&config.token_file))
        }
        StorageBackend::Memory => Arc::new(MemoryRecordStorage::new()),
    }
}

// =============================================================================
// TokenStore
// =============================================================================

/// Owns the single persisted credential and keeps it fresh.
///
/// Every successful exchange or refresh is written to storage before it is
/// returned. Calls are not coordinated across processes; two concurrent
/// refreshes race and the last save wins.
pub struct TokenStore {
    server: Arc<dyn AuthServer>,
    storage: Arc<dyn RecordStorage>,
    clock: Arc<dyn Clock>,
}

impl TokenStore {
    /// Create a store using the system clock.
    pub fn new(server: Arc<dyn AuthServer>, storage: Arc<dyn RecordStorage>) -> Self {
        Self {
            server,
            storage,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Wire the HighLevel client and configured storage backend.
    pub fn from_config(config: &Config) -> Result<Self, OAuthError> {
        let http = HttpClient::from_config(&config.http)?;
        let server = HighLevelClient::new(config.highlevel.oauth_config(), &http);
        Ok(Self::new(
            Arc::new(server),
            storage_from_config(&config.storage),
        ))
    }

    /// Get a reference to the record storage.
    pub fn storage(&self) -> Arc<dyn RecordStorage> {
        self.storage.clone()
    }

    pub fn load_record(&self) -> Result<Option<TokenRecord>, OAuthError> {
        self.storage.load()
    }

    pub fn save_record(&self, record: &TokenRecord) -> Result<(), OAuthError> {
        self.storage.save(record)
    }

    /// URL the user visits to grant access.
    pub fn authorization_url(&self) -> String {
        self.server.authorize_url()
    }

    // =========================================================================
    // Exchange
    // =========================================================================

    /// Exchange an authorization code and persist the resulting record.
    ///
    /// `expires_at` is stamped with the local clock after the response
    /// arrives. Nothing is written when the exchange fails.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenRecord, OAuthError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(OAuthError::ExchangeFailed(
                "Authorization code is empty".to_string(),
            ));
        }

        let response = self.server.exchange_code(code).await?;
        let record = response.into_record(self.clock.now());
        self.storage.save(&record)?;

        info!(
            expires_at = record.expires_at,
            has_refresh_token = record.usable_refresh_token().is_some(),
            location_id = record.location_id.as_deref().unwrap_or(""),
            "Authorization code exchanged, token stored"
        );
        Ok(record)
    }

    /// Run the full authorization flow through `authorizer`.
    pub async fn authorize_interactively(
        &self,
        authorizer: &mut dyn Authorizer,
    ) -> Result<TokenRecord, OAuthError> {
        let url = self.authorization_url();
        let code = authorizer.open_for_authorization(&url)?;
        self.exchange_code(&code).await
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Refresh the stored token.
    pub async fn refresh_token(&self) -> Result<TokenRecord, OAuthError> {
        let current = self.storage.load()?.ok_or_else(|| {
            OAuthError::NotAuthorized("No stored token, run the authorization flow".to_string())
        })?;
        self.refresh_from(&current).await
    }

    /// Refresh using `current`'s refresh token.
    ///
    /// A response without a refresh token keeps the old one. Without a
    /// usable refresh token this fails before any network call.
    async fn refresh_from(&self, current: &TokenRecord) -> Result<TokenRecord, OAuthError> {
        let refresh = current.usable_refresh_token().ok_or_else(|| {
            OAuthError::NotAuthorized(
                "Stored token has no refresh token, run the authorization flow".to_string(),
            )
        })?;

        let response = self.server.refresh(refresh).await?;
        let record = response
            .into_record(self.clock.now())
            .with_refresh_fallback(refresh);
        self.storage.save(&record)?;

        info!(expires_at = record.expires_at, "Token refreshed");
        Ok(record)
    }

    // =========================================================================
    // Access
    // =========================================================================

    /// Get a valid access token, refreshing first when it expires within
    /// [`REFRESH_BUFFER_SECS`].
    pub async fn get_valid_token(&self) -> Result<String, OAuthError> {
        let record = self.storage.load()?.ok_or_else(|| {
            OAuthError::NotAuthorized("No stored token, run the authorization flow".to_string())
        })?;

        let now = self.clock.now();
        if !record.needs_refresh_at(now) {
            return Ok(record.access_token);
        }

        debug!(
            now,
            expires_at = record.expires_at,
            "Token inside refresh window, refreshing"
        );
        let refreshed = self.refresh_from(&record).await?;
        Ok(refreshed.access_token)
    }

    /// Describe the stored credential.
    pub fn status(&self) -> Result<TokenStatus, OAuthError> {
        Ok(match self.storage.load()? {
            Some(record) => TokenStatus::of(&record, self.clock.now()),
            None => TokenStatus::unauthorized(),
        })
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("storage", &self.storage.name())
            .finish_non_exhaustive()
    }
}
