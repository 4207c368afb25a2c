//! Error types for the PKCE authorization client

use crate::auth::{TokenError, TokenRecord};
use std::time::Duration;
use thiserror::Error;

/// Main error type for authorization operations
#[derive(Error, Debug)]
pub enum AuthError {
    /// The OS random source could not supply bytes
    #[error("Random source unavailable: {0}")]
    Entropy(String),

    /// The authorization endpoint URL could not be built
    #[error("Could not construct authorization URL: {0}")]
    UrlConstruction(String),

    /// The local redirect listener could not bind or accept
    #[error("Redirect listener error: {0}")]
    Listener(#[source] std::io::Error),

    /// The user declined, or the callback failed state validation
    #[error("Authorization denied: {reason}")]
    AuthorizationDenied {
        /// Reason reported by the server or synthesized by the listener
        reason: String,
    },

    /// No redirect arrived before the callback timeout elapsed
    #[error("Timed out after {0:?} waiting for the authorization redirect")]
    TimedOut(Duration),

    /// Token endpoint request failed or returned an unusable response
    #[error("Token exchange failed ({grant_type} at {endpoint}): {message}")]
    TokenExchange {
        /// Grant type of the failed request
        grant_type: &'static str,
        /// Token endpoint that was contacted
        endpoint: String,
        /// What went wrong
        message: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Token storage error
    #[error("Token storage error: {0}")]
    Storage(#[from] TokenError),

    /// A valid token was obtained but could not be written to storage
    ///
    /// The token is usable for this process; the next run will not find it.
    #[error("Token obtained but not cached: {source}")]
    Persistence {
        /// The token that could not be persisted
        token: Box<TokenRecord>,
        /// Why the write failed
        source: TokenError,
    },
}

/// Result type alias for authorization operations
pub type AuthResult<T> = std::result::Result<T, AuthError>;

impl AuthError {
    /// Create an entropy error
    pub fn entropy(msg: impl Into<String>) -> Self {
        Self::Entropy(msg.into())
    }

    /// Create a URL construction error
    pub fn url_construction(msg: impl Into<String>) -> Self {
        Self::UrlConstruction(msg.into())
    }

    /// Create an authorization denied error
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::AuthorizationDenied {
            reason: reason.into(),
        }
    }

    /// Create a token exchange error
    pub fn token_exchange(
        grant_type: &'static str,
        endpoint: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::TokenExchange {
            grant_type,
            endpoint: endpoint.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a persistence error carrying the unsaved token
    pub fn persistence(token: TokenRecord, source: TokenError) -> Self {
        Self::Persistence {
            token: Box::new(token),
            source,
        }
    }

    /// Recover the in-memory token from a persistence failure
    ///
    /// Returns `None` for every other kind of error.
    #[must_use]
    pub fn into_token(self) -> Option<TokenRecord> {
        match self {
            Self::Persistence { token, .. } => Some(*token),
            _ => None,
        }
    }

    /// Whether this error means there is simply no usable cached token
    ///
    /// Cache misses and corrupt records are expected on first run and are
    /// answered with a fresh authorization flow.
    #[must_use]
    pub fn is_cache_miss(&self) -> bool {
        matches!(
            self,
            Self::Storage(TokenError::NotFound | TokenError::Corrupt(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_exchange_message_names_stage() {
        let err = AuthError::token_exchange(
            "refresh_token",
            "https://accounts.spotify.com/api/token",
            "invalid_grant",
        );
        let msg = err.to_string();
        assert!(msg.contains("refresh_token"));
        assert!(msg.contains("accounts.spotify.com"));
        assert!(msg.contains("invalid_grant"));
    }

    #[test]
    fn test_cache_miss_classification() {
        assert!(AuthError::from(TokenError::NotFound).is_cache_miss());
        assert!(!AuthError::denied("Invalid state").is_cache_miss());
    }

    #[test]
    fn test_timed_out_display() {
        let err = AuthError::TimedOut(Duration::from_secs(300));
        assert_eq!(
            err.to_string(),
            "Timed out after 300s waiting for the authorization redirect"
        );

        let err = AuthError::TimedOut(Duration::from_millis(250));
        assert_eq!(
            err.to_string(),
            "Timed out after 250ms waiting for the authorization redirect"
        );
    }

    #[test]
    fn test_persistence_keeps_token() {
        let token = TokenRecord {
            access_token: "A".to_string(),
            token_type: "Bearer".to_string(),
            scope: String::new(),
            expires_in: 3600,
            refresh_token: String::new(),
            created_at: chrono::Utc::now(),
            client_id: "client-1".to_string(),
        };
        let err = AuthError::persistence(
            token.clone(),
            TokenError::Persistence(std::io::Error::other("read-only")),
        );

        assert!(err.to_string().contains("read-only"));
        assert!(!err.is_cache_miss());
        assert_eq!(err.into_token(), Some(token));
        assert_eq!(AuthError::denied("x").into_token(), None);
    }
}
