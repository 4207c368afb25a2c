//! # spotify-pkce
//!
//! OAuth 2.0 Authorization Code + PKCE client for the Spotify Accounts
//! service. Async/await, strong typing, tokio-based.
//!
//! ## Quick Start
//!
//! ```no_run
//! use spotify_pkce::{OAuthClient, OAuthConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OAuthConfig::builder()
//!         .client_id("your-client-id")
//!         .redirect_uri("http://127.0.0.1:3000/callback")
//!         .build();
//!
//!     let client = OAuthClient::new(config)?;
//!     let token = client.authenticate().await?;
//!     println!("Access token expires at {:?}", token.expires_at());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`auth`]: PKCE generation, the authorization URL, the loopback redirect
//!   listener, token exchange and the token store
//! - [`config`]: Client configuration and environment loading
//! - [`error`]: Error types and handling
//!
//! A run consults the [`TokenStore`](auth::TokenStore) first. An expired
//! token is refreshed while loading. Only on a cache miss or a failed load
//! does the interactive flow run: the redirect listener is bound, the
//! browser opened, and the single redirect it receives is validated against
//! the state this attempt issued before the code is exchanged.
//!
//! ## Logging
//!
//! This crate uses [`tracing`](https://crates.io/crates/tracing) for structured logging.
//! Tracing events are always emitted but are zero-cost when no subscriber is attached.
//! To see logs, attach a tracing subscriber in your application:
//!
//! ```rust,ignore
//! tracing_subscriber::fmt::init();
//! ```
//!
//! ## Error Handling
//!
//! All fallible operations return [`AuthResult<T>`](AuthResult):
//!
//! ```no_run
//! # use spotify_pkce::{AuthError, OAuthClient};
//! # async fn example(client: OAuthClient) {
//! match client.authenticate().await {
//!     Ok(token) => { /* ... */ }
//!     Err(AuthError::AuthorizationDenied { reason }) => {
//!         eprintln!("Authorization was not granted: {reason}");
//!     }
//!     Err(e) => {
//!         eprintln!("Error: {e}");
//!     }
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use auth::{OAuthClient, OAuthClientBuilder, TokenRecord, TokenStore};
pub use config::OAuthConfig;
pub use error::{AuthError, AuthResult};

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
