//! Token records and their on-disk storage

use super::exchange::TokenRefresher;
use crate::error::{AuthError, AuthResult};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during token storage operations
#[derive(Debug, Error)]
pub enum TokenError {
    /// No token has been stored yet
    #[error("Token not found")]
    NotFound,

    /// The stored token could not be decoded
    #[error("Stored token is corrupt: {0}")]
    Corrupt(#[source] serde_json::Error),

    /// The token file exists but could not be read
    #[error("Could not read token file: {0}")]
    Read(#[source] std::io::Error),

    /// The token could not be written
    #[error("Could not persist token: {0}")]
    Persistence(#[source] std::io::Error),

    /// The token could not be serialized
    #[error("Could not encode token: {0}")]
    Encode(#[source] serde_json::Error),
}

/// OAuth token record as persisted
///
/// `created_at` and `client_id` are stamped locally when the record is
/// received; the rest comes from the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Access token for API calls
    pub access_token: String,

    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Scopes granted to this token
    #[serde(default)]
    pub scope: String,

    /// Lifetime in seconds, counted from `created_at`
    pub expires_in: u64,

    /// Refresh token for obtaining new access tokens
    #[serde(default)]
    pub refresh_token: String,

    /// When this record was received
    pub created_at: DateTime<Utc>,

    /// Client the token was issued to
    pub client_id: String,
}

pub(crate) fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenRecord {
    /// Instant the access token stops being valid
    ///
    /// `None` if the lifetime is too large to represent.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let lifetime = TimeDelta::try_seconds(i64::try_from(self.expires_in).ok()?)?;
        self.created_at.checked_add_signed(lifetime)
    }

    /// Whether the token is expired at `now`; the expiry instant itself
    /// counts as expired
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires_at| now >= expires_at)
    }

    /// Whether the token is expired now
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Get remaining validity duration, if any
    #[must_use]
    pub fn remaining_validity(&self) -> Option<Duration> {
        let remaining = self.expires_at()? - Utc::now();
        remaining.to_std().ok().filter(|d| !d.is_zero())
    }

    /// Get the Authorization header value
    #[must_use]
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// Token storage for persisting OAuth tokens
#[derive(Debug, Clone)]
pub struct TokenStore {
    storage_path: PathBuf,
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore {
    /// Create token storage with default path (platform-specific config directory)
    #[must_use]
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("spotify-pkce");

        Self {
            storage_path: config_dir.join("token.json"),
        }
    }

    /// Create token storage with custom path
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: path.into(),
        }
    }

    /// Get the storage path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.storage_path
    }

    /// Read the stored record as is, without checking expiry
    ///
    /// # Errors
    ///
    /// Returns `TokenError::NotFound` if no token exists,
    /// `TokenError::Corrupt` if it does not decode, or `TokenError::Read`.
    pub fn read(&self) -> Result<TokenRecord, TokenError> {
        let content = match std::fs::read_to_string(&self.storage_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(TokenError::NotFound),
            Err(e) => return Err(TokenError::Read(e)),
        };

        serde_json::from_str(&content).map_err(TokenError::Corrupt)
    }

    /// Load the stored record, refreshing it first if it has expired
    ///
    /// This read has side effects: an expired record is exchanged through
    /// `refresher` and the new record is written back, so later loads do not
    /// refresh again.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`read`](Self::read), or the refresher's error.
    /// If the refreshed record cannot be written back, returns
    /// `AuthError::Persistence` carrying that record.
    pub async fn load(&self, refresher: &dyn TokenRefresher) -> AuthResult<TokenRecord> {
        let record = self.read()?;
        if !record.is_expired() {
            tracing::debug!("Using cached token");
            return Ok(record);
        }

        tracing::info!(
            created_at = %record.created_at,
            expires_in = record.expires_in,
            "Token expired, refreshing"
        );
        let refreshed = refresher.refresh(&record).await?;

        if let Err(e) = self.save(&refreshed) {
            tracing::warn!(error = %e, "Refreshed token could not be persisted");
            return Err(AuthError::persistence(refreshed, e));
        }

        Ok(refreshed)
    }

    /// Save token to storage
    ///
    /// The record is written to a sibling temp file with owner-only
    /// permissions and renamed over the previous one, so readers never see a
    /// partial write.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Persistence` if the file cannot be written.
    pub fn save(&self, token: &TokenRecord) -> Result<(), TokenError> {
        let content = serde_json::to_string_pretty(token).map_err(TokenError::Encode)?;

        // Ensure parent directory exists
        if let Some(parent) = self.storage_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(TokenError::Persistence)?;
        }

        let tmp_path = self.tmp_path();
        let written = write_private(&tmp_path, content.as_bytes())
            .and_then(|()| std::fs::rename(&tmp_path, &self.storage_path));
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(TokenError::Persistence(e));
        }

        tracing::debug!(path = %self.storage_path.display(), "Token saved");
        Ok(())
    }

    /// Delete stored token
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be deleted.
    pub fn delete(&self) -> Result<(), TokenError> {
        match std::fs::remove_file(&self.storage_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TokenError::Persistence(e)),
        }
    }

    /// Check if an unexpired token is stored
    #[must_use]
    pub fn has_valid_token(&self) -> bool {
        self.read().is_ok_and(|token| !token.is_expired())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .storage_path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(format!(".{}.tmp", std::process::id()));
        self.storage_path.with_file_name(name)
    }
}

fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;

    // The mode above only applies to newly created files
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }

    file.write_all(content)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn record(created_at: DateTime<Utc>, expires_in: u64) -> TokenRecord {
        TokenRecord {
            access_token: "A".to_string(),
            token_type: "Bearer".to_string(),
            scope: "s".to_string(),
            expires_in,
            refresh_token: "R".to_string(),
            created_at,
            client_id: "client-1".to_string(),
        }
    }

    /// Refresher that counts calls and hands out a fresh record
    #[derive(Default)]
    struct CountingRefresher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, record: &TokenRecord) -> AuthResult<TokenRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TokenRecord {
                access_token: "A2".to_string(),
                created_at: Utc::now(),
                ..record.clone()
            })
        }
    }

    struct FailingRefresher;

    #[async_trait]
    impl TokenRefresher for FailingRefresher {
        async fn refresh(&self, _record: &TokenRecord) -> AuthResult<TokenRecord> {
            Err(AuthError::token_exchange(
                "refresh_token",
                "http://token.invalid",
                "invalid_grant",
            ))
        }
    }

    fn store(dir: &TempDir) -> TokenStore {
        TokenStore::with_path(dir.path().join("nested").join("token.json"))
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let created_at = Utc::now() - TimeDelta::seconds(100);
        let token = record(created_at, 3600);
        let expires_at = created_at + TimeDelta::seconds(3600);

        assert_eq!(token.expires_at(), Some(expires_at));
        assert!(token.is_expired_at(expires_at));
        assert!(token.is_expired_at(expires_at + TimeDelta::seconds(1)));
        assert!(!token.is_expired_at(expires_at - TimeDelta::seconds(1)));
    }

    #[test]
    fn test_huge_lifetime_never_expires() {
        let token = record(Utc::now(), u64::MAX);
        assert_eq!(token.expires_at(), None);
        assert!(!token.is_expired());
    }

    #[test]
    fn test_authorization_header() {
        let token = record(Utc::now(), 3600);
        assert_eq!(token.authorization_header(), "Bearer A");
    }

    #[test]
    fn test_remaining_validity() {
        let token = record(Utc::now(), 3600);
        let remaining = token.remaining_validity().unwrap();
        assert!(remaining <= Duration::from_secs(3600));
        assert!(remaining > Duration::from_secs(3500));

        let expired = record(Utc::now() - TimeDelta::seconds(7200), 3600);
        assert!(expired.remaining_validity().is_none());
    }

    #[test]
    fn test_token_type_defaults_to_bearer() {
        let json = r#"{"access_token":"A","expires_in":10,"created_at":"2026-01-01T00:00:00Z","client_id":"c"}"#;
        let token: TokenRecord = serde_json::from_str(json).unwrap();
        assert_eq!(token.token_type, "Bearer");
        assert!(token.refresh_token.is_empty());
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let storage = store(&temp_dir);
        let token = record(Utc::now(), 1_000_000);

        storage.save(&token).unwrap();
        let refresher = CountingRefresher::default();
        let loaded = storage.load(&refresher).await.unwrap();

        assert_eq!(loaded, token);
        assert_eq!(loaded.created_at, token.created_at);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let storage = store(&temp_dir);
        storage.save(&record(Utc::now(), 3600)).unwrap();
        storage.save(&record(Utc::now(), 7200)).unwrap();

        let mode = std::fs::metadata(storage.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_save_replaces_and_leaves_no_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let storage = store(&temp_dir);
        storage.save(&record(Utc::now(), 3600)).unwrap();
        storage.save(&record(Utc::now(), 7200)).unwrap();

        assert_eq!(storage.read().unwrap().expires_in, 7200);
        let entries: Vec<_> = std::fs::read_dir(storage.path().parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let storage = TokenStore::with_path(temp_dir.path().join("nonexistent.json"));

        assert!(matches!(storage.read(), Err(TokenError::NotFound)));
        assert!(!storage.has_valid_token());
    }

    #[test]
    fn test_corrupt_record() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("token.json");
        std::fs::write(&path, "{not json").unwrap();

        let storage = TokenStore::with_path(path);
        assert!(matches!(storage.read(), Err(TokenError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_expired_load_refreshes_once_and_persists() {
        let temp_dir = TempDir::new().unwrap();
        let storage = store(&temp_dir);
        let stale = record(Utc::now() - TimeDelta::seconds(3601), 3600);
        storage.save(&stale).unwrap();

        let refresher = CountingRefresher::default();
        let first = storage.load(&refresher).await.unwrap();
        let second = storage.load(&refresher).await.unwrap();

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.access_token, "A2");
        assert!(first.created_at > stale.created_at);
        assert_eq!(first.client_id, stale.client_id);
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn test_failed_refresh_propagates() {
        let temp_dir = TempDir::new().unwrap();
        let storage = store(&temp_dir);
        storage
            .save(&record(Utc::now() - TimeDelta::seconds(7200), 3600))
            .unwrap();

        let err = storage.load(&FailingRefresher).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenExchange { .. }));
    }

    #[tokio::test]
    async fn test_refreshed_record_survives_failed_write() {
        let temp_dir = TempDir::new().unwrap();
        let storage = store(&temp_dir);
        let stale = record(Utc::now() - TimeDelta::seconds(3601), 3600);
        storage.save(&stale).unwrap();

        // A directory in the temp file's place makes the write fail
        std::fs::create_dir(storage.tmp_path()).unwrap();

        let refresher = CountingRefresher::default();
        let err = storage.load(&refresher).await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::Persistence {
                source: TokenError::Persistence(_),
                ..
            }
        ));
        let refreshed = err.into_token().unwrap();
        assert_eq!(refreshed.access_token, "A2");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

        // The previous record is untouched
        assert_eq!(storage.read().unwrap(), stale);
    }

    #[test]
    fn test_delete() {
        let temp_dir = TempDir::new().unwrap();
        let storage = store(&temp_dir);
        storage.save(&record(Utc::now(), 3600)).unwrap();
        assert!(storage.has_valid_token());

        storage.delete().unwrap();
        assert!(matches!(storage.read(), Err(TokenError::NotFound)));
        storage.delete().unwrap();
    }
}
