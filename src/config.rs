//! Client configuration
//!
//! [`OAuthConfig`] carries everything the flow needs from the outside world:
//! the registered client id and redirect URI, the service endpoints, the
//! requested scopes and how long to wait for the browser redirect.

use crate::error::{AuthError, AuthResult};
use reqwest::Url;
use std::time::Duration;
use typed_builder::TypedBuilder;

/// Spotify authorization endpoint
pub const DEFAULT_AUTH_URL: &str = "https://accounts.spotify.com/authorize";
/// Spotify token endpoint
pub const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
/// Redirect URI used when none is configured
pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:3000/callback";
/// Scopes requested when none are configured
pub const DEFAULT_SCOPES: &str = "user-read-private user-read-email user-read-playback-state playlist-modify-public playlist-modify-private playlist-read-private";
/// How long to wait for the browser redirect by default
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

const ENV_CLIENT_ID: &str = "CLIENT_ID";
const ENV_REDIRECT_URI: &str = "REDIRECT_URI";
const ENV_SCOPES: &str = "SPOTIFY_SCOPES";

/// OAuth configuration
#[derive(Debug, Clone, TypedBuilder)]
#[builder(
    builder_method(doc = "Create a new builder for OAuthConfig"),
    builder_type(doc = "Builder for OAuthConfig", vis = "pub"),
    build_method(doc = "Build the OAuthConfig")
)]
pub struct OAuthConfig {
    /// OAuth client ID registered with the service
    #[builder(setter(into))]
    pub client_id: String,

    /// Redirect URI; must match the registered one and is where the
    /// redirect listener binds
    #[builder(default = DEFAULT_REDIRECT_URI.to_string(), setter(into))]
    pub redirect_uri: String,

    /// Authorization endpoint URL
    #[builder(default = DEFAULT_AUTH_URL.to_string(), setter(into))]
    pub auth_url: String,

    /// Token endpoint URL
    #[builder(default = DEFAULT_TOKEN_URL.to_string(), setter(into))]
    pub token_url: String,

    /// Space-separated scopes to request
    #[builder(default = DEFAULT_SCOPES.to_string(), setter(into))]
    pub scopes: String,

    /// How long to wait for the redirect; `None` waits forever
    #[builder(default = Some(DEFAULT_CALLBACK_TIMEOUT))]
    pub callback_timeout: Option<Duration>,
}

impl OAuthConfig {
    /// Load configuration from the environment
    ///
    /// A `.env` file in the working directory (or a parent) is loaded first
    /// if present. `CLIENT_ID` and `REDIRECT_URI` are required;
    /// `SPOTIFY_SCOPES` is optional.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidConfig` if a required variable is missing
    /// or the redirect URI is unusable.
    pub fn from_env() -> AuthResult<Self> {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!(error = %e, "No .env file loaded");
        }

        let client_id = required_var(ENV_CLIENT_ID)?;
        let redirect_uri = required_var(ENV_REDIRECT_URI)?;

        let mut config = Self::builder()
            .client_id(client_id)
            .redirect_uri(redirect_uri)
            .build();
        if let Some(scopes) = std::env::var(ENV_SCOPES).ok().filter(|s| !s.is_empty()) {
            config.scopes = scopes;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can drive a flow
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidConfig` if the client id is empty or the
    /// redirect URI is not an absolute `http` URL with a host.
    pub fn validate(&self) -> AuthResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::invalid_config("client_id is empty"));
        }
        self.redirect_url().map(|_| ())
    }

    /// Parsed redirect URI
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidConfig` if the URI does not parse, is not
    /// `http`, or has no host.
    pub fn redirect_url(&self) -> AuthResult<Url> {
        let url = Url::parse(&self.redirect_uri).map_err(|e| {
            AuthError::invalid_config(format!("redirect_uri {:?}: {e}", self.redirect_uri))
        })?;
        if url.scheme() != "http" {
            return Err(AuthError::invalid_config(format!(
                "redirect_uri {:?} must use http for a loopback listener",
                self.redirect_uri
            )));
        }
        if url.host_str().is_none() {
            return Err(AuthError::invalid_config(format!(
                "redirect_uri {:?} has no host",
                self.redirect_uri
            )));
        }
        Ok(url)
    }
}

fn required_var(name: &str) -> AuthResult<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AuthError::invalid_config(format!("{name} not set")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = OAuthConfig::builder().client_id("abc").build();
        assert_eq!(config.client_id, "abc");
        assert_eq!(config.auth_url, DEFAULT_AUTH_URL);
        assert_eq!(config.token_url, DEFAULT_TOKEN_URL);
        assert_eq!(config.redirect_uri, DEFAULT_REDIRECT_URI);
        assert_eq!(config.callback_timeout, Some(DEFAULT_CALLBACK_TIMEOUT));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_client_id() {
        let config = OAuthConfig::builder().client_id("  ").build();
        assert!(matches!(
            config.validate(),
            Err(AuthError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_https_redirect() {
        let config = OAuthConfig::builder()
            .client_id("abc")
            .redirect_uri("https://example.com/callback")
            .build();
        assert!(matches!(
            config.validate(),
            Err(AuthError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_redirect_url_keeps_port() {
        let config = OAuthConfig::builder()
            .client_id("abc")
            .redirect_uri("http://localhost:8888/callback")
            .build();
        let url = config.redirect_url().unwrap();
        assert_eq!(url.port_or_known_default(), Some(8888));
        assert_eq!(url.host_str(), Some("localhost"));
    }
}
