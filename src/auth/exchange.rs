//! Token endpoint client: authorization code and refresh token grants

use super::token::{TokenRecord, default_token_type};
use crate::error::{AuthError, AuthResult};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
const GRANT_REFRESH_TOKEN: &str = "refresh_token";

/// Something that can turn an expired record into a fresh one
///
/// [`TokenStore::load`](super::TokenStore::load) refreshes through this
/// trait so the network call can be replaced in tests.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchange `record`'s refresh token for a new record
    async fn refresh(&self, record: &TokenRecord) -> AuthResult<TokenRecord>;
}

/// OAuth response from token endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    scope: Option<String>,
    expires_in: u64,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Error response from token endpoint
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client for the token endpoint
#[derive(Debug, Clone)]
pub struct TokenExchanger {
    token_url: String,
    http_client: reqwest::Client,
}

impl TokenExchanger {
    /// Create an exchanger for `token_url`
    #[must_use]
    pub fn new(token_url: impl Into<String>) -> Self {
        Self::with_client(token_url, reqwest::Client::new())
    }

    /// Create an exchanger that sends through an existing HTTP client
    #[must_use]
    pub fn with_client(token_url: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self {
            token_url: token_url.into(),
            http_client,
        }
    }

    /// Token endpoint URL
    #[must_use]
    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Exchange an authorization code and its PKCE verifier for a token
    ///
    /// # Errors
    ///
    /// Returns `AuthError::TokenExchange` if the request fails, the server
    /// answers with an error, or the body does not decode.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
        client_id: &str,
    ) -> AuthResult<TokenRecord> {
        let form = [
            ("grant_type", GRANT_AUTHORIZATION_CODE),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", client_id),
            ("code_verifier", code_verifier),
        ];
        let response = self.post(GRANT_AUTHORIZATION_CODE, &form).await?;

        tracing::info!(scope = ?response.scope, "Authorization code exchanged");
        Ok(TokenRecord {
            access_token: response.access_token,
            token_type: response.token_type,
            scope: response.scope.unwrap_or_default(),
            expires_in: response.expires_in,
            refresh_token: response.refresh_token.unwrap_or_default(),
            created_at: Utc::now(),
            client_id: client_id.to_string(),
        })
    }

    /// Exchange `record`'s refresh token for a new record
    ///
    /// Providers may omit `refresh_token` (and `scope`) from a refresh
    /// response; the previous values are kept in that case.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::TokenExchange` if the record has no refresh token,
    /// the request fails, or the response is unusable.
    pub async fn refresh_token(&self, record: &TokenRecord) -> AuthResult<TokenRecord> {
        if record.refresh_token.is_empty() {
            return Err(AuthError::token_exchange(
                GRANT_REFRESH_TOKEN,
                &self.token_url,
                "stored token has no refresh token",
            ));
        }

        let form = [
            ("grant_type", GRANT_REFRESH_TOKEN),
            ("refresh_token", record.refresh_token.as_str()),
            ("client_id", record.client_id.as_str()),
        ];
        let response = self.post(GRANT_REFRESH_TOKEN, &form).await?;

        let rotated = response.refresh_token.as_deref().is_some_and(|t| !t.is_empty());
        tracing::info!(rotated, "Access token refreshed");

        Ok(TokenRecord {
            access_token: response.access_token,
            token_type: response.token_type,
            scope: response
                .scope
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| record.scope.clone()),
            expires_in: response.expires_in,
            refresh_token: response
                .refresh_token
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| record.refresh_token.clone()),
            created_at: Utc::now(),
            client_id: record.client_id.clone(),
        })
    }

    async fn post(
        &self,
        grant_type: &'static str,
        form: &[(&str, &str)],
    ) -> AuthResult<TokenResponse> {
        let fail = |msg: String| AuthError::token_exchange(grant_type, &self.token_url, msg);

        let response = self
            .http_client
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| fail(format!("request failed: {e}")))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| fail(format!("could not read response: {e}")))?;

        if !status.is_success() {
            let msg = match serde_json::from_str::<ErrorResponse>(&response_text) {
                Ok(error) => error
                    .error_description
                    .map_or(error.error.clone(), |d| format!("{}: {d}", error.error)),
                Err(_) => format!("HTTP {status}"),
            };
            return Err(fail(msg));
        }

        serde_json::from_str(&response_text)
            .map_err(|e| fail(format!("could not decode token response: {e}")))
    }
}

#[async_trait]
impl TokenRefresher for TokenExchanger {
    async fn refresh(&self, record: &TokenRecord) -> AuthResult<TokenRecord> {
        self.refresh_token(record).await
    }
}
