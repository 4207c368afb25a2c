//! Authorization orchestration and the OAuth client façade

use super::exchange::TokenExchanger;
use super::listener::{AuthorizationGrant, AuthorizationResult, RedirectListener};
use super::pkce::{PkceChallenge, STATE_BYTES, generate_state};
use super::request::{AuthorizationParams, build_authorization_url};
use super::token::{TokenError, TokenRecord, TokenStore};
use crate::config::OAuthConfig;
use crate::error::{AuthError, AuthResult};
use std::sync::Arc;
use std::time::Duration;

/// Opens the authorization URL for the user
pub trait BrowserLauncher: Send + Sync {
    /// Show `url` to the user
    ///
    /// # Errors
    ///
    /// Returns an error if the URL could not be opened; the flow carries on
    /// and the user can open it by hand.
    fn open(&self, url: &str) -> std::io::Result<()>;
}

/// Opens URLs in the system's default browser
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> std::io::Result<()> {
        open::that(url)
    }
}

/// Only prints the URL; for headless sessions
#[derive(Debug, Clone, Copy, Default)]
pub struct PrintUrl;

impl BrowserLauncher for PrintUrl {
    fn open(&self, url: &str) -> std::io::Result<()> {
        println!("Open this URL in your browser to continue:");
        println!("  {url}");
        Ok(())
    }
}

/// Run one interactive authorization attempt
///
/// Binds the redirect listener, opens the browser at the authorization URL
/// and waits for the redirect. A browser that cannot be opened is reported
/// and the URL printed instead.
///
/// # Errors
///
/// Returns `AuthError::AuthorizationDenied` if the user declined or the
/// redirect failed state validation, `AuthError::TimedOut` if no redirect
/// arrived within `timeout`, `AuthError::UrlConstruction` for a malformed
/// endpoint, or `AuthError::Listener` / `AuthError::InvalidConfig` if the
/// redirect URI cannot be served or `params` carries no state.
pub async fn authorize(
    auth_url: &str,
    params: &AuthorizationParams,
    launcher: &dyn BrowserLauncher,
    timeout: Option<Duration>,
) -> AuthResult<AuthorizationGrant> {
    let url = build_authorization_url(auth_url, params)?;
    let redirect_url = reqwest::Url::parse(&params.redirect_uri).map_err(|e| {
        AuthError::invalid_config(format!("redirect_uri {:?}: {e}", params.redirect_uri))
    })?;

    // Bound before the browser opens so the redirect always finds it
    let pending = RedirectListener::bind(&redirect_url)
        .await?
        .spawn(params.state.clone())?;
    tracing::info!(listener = %pending.local_addr(), "Waiting for authorization redirect");

    if let Err(e) = launcher.open(url.as_str()) {
        tracing::warn!(error = %e, "Could not open browser");
        println!("(Could not open browser automatically - please open the URL manually)");
        println!("  {url}");
    }

    match pending.wait(timeout).await? {
        AuthorizationResult::Granted(grant) => {
            tracing::debug!("Authorization granted");
            Ok(grant)
        }
        AuthorizationResult::Denied { error, .. } => Err(AuthError::denied(error)),
    }
}

/// Builder for [`OAuthClient`]
pub struct OAuthClientBuilder {
    config: OAuthConfig,
    storage: Option<TokenStore>,
    exchanger: Option<TokenExchanger>,
    launcher: Option<Arc<dyn BrowserLauncher>>,
    auto_open_browser: bool,
}

impl OAuthClientBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            config,
            storage: None,
            exchanger: None,
            launcher: None,
            auto_open_browser: true,
        }
    }

    /// Set custom token storage
    #[must_use]
    pub fn storage(mut self, storage: TokenStore) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set a custom token endpoint client
    #[must_use]
    pub fn exchanger(mut self, exchanger: TokenExchanger) -> Self {
        self.exchanger = Some(exchanger);
        self
    }

    /// Set how the authorization URL reaches the user
    #[must_use]
    pub fn browser(mut self, launcher: impl BrowserLauncher + 'static) -> Self {
        let launcher: Arc<dyn BrowserLauncher> = Arc::new(launcher);
        self.launcher = Some(launcher);
        self
    }

    /// Set whether to automatically open browser (default: true)
    ///
    /// Ignored when a launcher was set with [`browser`](Self::browser).
    #[must_use]
    pub fn auto_open_browser(mut self, auto_open: bool) -> Self {
        self.auto_open_browser = auto_open;
        self
    }

    /// Build the OAuth client
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidConfig` if the configuration is unusable.
    pub fn build(self) -> AuthResult<OAuthClient> {
        self.config.validate()?;

        let launcher: Arc<dyn BrowserLauncher> = match self.launcher {
            Some(launcher) => launcher,
            None if self.auto_open_browser => Arc::new(SystemBrowser),
            None => Arc::new(PrintUrl),
        };
        let exchanger = self
            .exchanger
            .unwrap_or_else(|| TokenExchanger::new(self.config.token_url.clone()));

        Ok(OAuthClient {
            config: self.config,
            storage: self.storage.unwrap_or_default(),
            exchanger,
            launcher,
        })
    }
}

/// OAuth client: cached token first, interactive PKCE flow otherwise
pub struct OAuthClient {
    config: OAuthConfig,
    storage: TokenStore,
    exchanger: TokenExchanger,
    launcher: Arc<dyn BrowserLauncher>,
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("config", &self.config)
            .field("storage", &self.storage)
            .field("exchanger", &self.exchanger)
            .finish_non_exhaustive()
    }
}

impl OAuthClient {
    /// Create a client with default storage and the system browser
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidConfig` if the configuration is unusable.
    pub fn new(config: OAuthConfig) -> AuthResult<Self> {
        OAuthClientBuilder::new(config).build()
    }

    /// Create a builder for custom configuration
    #[must_use]
    pub fn builder(config: OAuthConfig) -> OAuthClientBuilder {
        OAuthClientBuilder::new(config)
    }

    /// Get the OAuth configuration
    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Get the token storage
    #[must_use]
    pub fn storage(&self) -> &TokenStore {
        &self.storage
    }

    /// Authenticate - try cached token first, then OAuth flow
    ///
    /// An expired cached token is refreshed as part of loading it. Only when
    /// there is no cached token, or loading or refreshing it fails, does the
    /// interactive flow run.
    ///
    /// # Errors
    ///
    /// Returns an error if the interactive flow fails (denied, timed out,
    /// token exchange failure, etc.). A token that was obtained but could not
    /// be cached comes back as `AuthError::Persistence`; see
    /// [`AuthError::into_token`].
    pub async fn authenticate(&self) -> AuthResult<TokenRecord> {
        match self.storage.load(&self.exchanger).await {
            Ok(token) => return Ok(token),
            Err(e @ AuthError::Persistence { .. }) => return Err(e),
            Err(AuthError::Storage(TokenError::NotFound)) => {
                tracing::debug!("No cached token found");
            }
            Err(e) if e.is_cache_miss() => {
                tracing::warn!(error = %e, "Cached token unreadable, re-authorizing");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cached token unusable, re-authorizing");
            }
        }

        self.start_oauth_flow().await
    }

    /// Run the interactive flow and cache the resulting token
    ///
    /// # Errors
    ///
    /// Returns an error if the OAuth flow fails, or `AuthError::Persistence`
    /// carrying the token if it could not be cached.
    pub async fn start_oauth_flow(&self) -> AuthResult<TokenRecord> {
        let pkce = PkceChallenge::generate()?;
        let state = generate_state(STATE_BYTES)?;
        let params = AuthorizationParams::new(&self.config, state, &pkce);

        println!("Authorizing with {} ...", self.config.auth_url);
        let grant = authorize(
            &self.config.auth_url,
            &params,
            &*self.launcher,
            self.config.callback_timeout,
        )
        .await?;

        let token = self
            .exchanger
            .exchange_code(
                &grant.code,
                &pkce.verifier,
                &self.config.redirect_uri,
                &self.config.client_id,
            )
            .await?;

        if let Err(e) = self.storage.save(&token) {
            tracing::error!(error = %e, "Token obtained but not cached");
            return Err(AuthError::persistence(token, e));
        }

        println!("Authentication successful! Token cached at:");
        println!("  {}", self.storage.path().display());
        Ok(token)
    }

    /// Log out - delete cached token
    ///
    /// # Errors
    ///
    /// Returns an error if token deletion fails.
    pub fn logout(&self) -> AuthResult<()> {
        self.storage.delete()?;
        tracing::info!(path = %self.storage.path().display(), "Cached token deleted");
        Ok(())
    }

    /// Check if user is authenticated (has an unexpired token)
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.storage.has_valid_token()
    }

    /// Get current token without refreshing
    #[must_use]
    pub fn current_token(&self) -> Option<TokenRecord> {
        self.storage.read().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records the URL it was asked to open
    #[derive(Default)]
    struct Recorder {
        opened: Mutex<Vec<String>>,
    }

    impl BrowserLauncher for Recorder {
        fn open(&self, url: &str) -> std::io::Result<()> {
            self.opened.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    struct Broken;

    impl BrowserLauncher for Broken {
        fn open(&self, _url: &str) -> std::io::Result<()> {
            Err(std::io::Error::other("no display"))
        }
    }

    fn params(redirect_uri: String) -> AuthorizationParams {
        let config = OAuthConfig::builder()
            .client_id("client-1")
            .redirect_uri(redirect_uri)
            .build();
        let pkce = PkceChallenge::from_verifier("v".repeat(43));
        AuthorizationParams::new(&config, "helloworld", &pkce)
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let config = OAuthConfig::builder().client_id("").build();
        assert!(OAuthClient::builder(config).build().is_err());
    }

    #[test]
    fn test_builder_uses_config_token_url() {
        let config = OAuthConfig::builder()
            .client_id("client-1")
            .token_url("http://127.0.0.1:9/token")
            .build();
        let client = OAuthClient::builder(config)
            .auto_open_browser(false)
            .build()
            .unwrap();
        assert_eq!(client.exchanger.token_url(), "http://127.0.0.1:9/token");
    }

    #[tokio::test]
    async fn test_authorize_opens_url_then_times_out() {
        let recorder = Recorder::default();
        let params = params(format!("http://127.0.0.1:{}/callback", free_port()));

        let err = authorize(
            "https://accounts.spotify.com/authorize",
            &params,
            &recorder,
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::TimedOut(_)));

        let opened = recorder.opened.lock().unwrap();
        assert_eq!(opened.len(), 1);
        assert!(opened[0].contains("state=helloworld"));
        assert!(opened[0].contains("code_challenge_method=S256"));
    }

    #[tokio::test]
    async fn test_browser_failure_is_not_fatal() {
        let params = params(format!("http://127.0.0.1:{}/callback", free_port()));
        let err = authorize(
            "https://accounts.spotify.com/authorize",
            &params,
            &Broken,
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
        // reached the wait, so the launcher error did not abort the flow
        assert!(matches!(err, AuthError::TimedOut(_)));
    }

    #[tokio::test]
    async fn test_empty_state_is_rejected() {
        let config = OAuthConfig::builder()
            .client_id("client-1")
            .redirect_uri(format!("http://127.0.0.1:{}/callback", free_port()))
            .build();
        let pkce = PkceChallenge::from_verifier("v".repeat(43));
        let params = AuthorizationParams::new(&config, "", &pkce);
        let recorder = Recorder::default();

        let err = authorize(&config.auth_url, &params, &recorder, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidConfig(_)));
        assert!(recorder.opened.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_endpoint_fails_before_binding() {
        let port = free_port();
        let params = params(format!("http://127.0.0.1:{port}/callback"));
        let err = authorize("::not a url::", &params, &Broken, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UrlConstruction(_)));
    }
}
