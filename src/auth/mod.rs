//! OAuth authentication module
//!
//! Implements the Authorization Code flow with PKCE (Proof Key for Code
//! Exchange) against the Spotify Accounts service.
//!
//! # Overview
//!
//! 1. Generate a code verifier, its challenge, and a fresh state value
//! 2. Bind a loopback listener on the redirect URI
//! 3. Open the browser at the authorization URL
//! 4. Receive the redirect, check the state, answer the browser
//! 5. Exchange code + verifier for a token
//! 6. Cache the token; refresh it when it expires
//!
//! # Example
//!
//! ```no_run
//! use spotify_pkce::OAuthConfig;
//! use spotify_pkce::auth::OAuthClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OAuthConfig::from_env()?;
//!     let client = OAuthClient::new(config)?;
//!
//!     // Cached token (refreshed if expired) or a new interactive flow
//!     let token = client.authenticate().await?;
//!     println!("Authenticated! Header: {}", token.authorization_header());
//!     Ok(())
//! }
//! ```
//!
//! # Token Storage
//!
//! Tokens are cached to disk in the platform-specific config directory by default
//! (e.g., `~/.config/spotify-pkce/token.json` on Linux).
//! The storage location can be customized via [`TokenStore`].
//!
//! # Security
//!
//! - PKCE prevents authorization code interception attacks
//! - The state value rejects redirects this process did not start
//! - Tokens are stored with user-only permissions (600)
//! - Refresh tokens are used when available to avoid re-authentication
//!
//! Concurrent processes sharing one token file are not coordinated: both may
//! refresh and the last write wins.

mod exchange;
mod listener;
mod oauth;
mod pkce;
mod request;
mod token;

pub use exchange::{TokenExchanger, TokenRefresher};
pub use listener::{
    AuthorizationGrant, AuthorizationResult, INVALID_STATE, MISSING_CODE, PendingAuthorization,
    RedirectListener, parse_callback,
};
pub use oauth::{
    BrowserLauncher, OAuthClient, OAuthClientBuilder, PrintUrl, SystemBrowser, authorize,
};
pub use pkce::{
    CHALLENGE_METHOD, MIN_STATE_BYTES, PkceChallenge, STATE_BYTES, VERIFIER_BYTES,
    generate_challenge, generate_code, generate_state, generate_verifier,
    generate_verifier_with_bytes,
};
pub use request::{AuthorizationParams, build_authorization_url};
pub use token::{TokenError, TokenRecord, TokenStore};
