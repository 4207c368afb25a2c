//! Authorization request parameters and URL construction

use super::pkce::PkceChallenge;
use crate::config::OAuthConfig;
use crate::error::{AuthError, AuthResult};
use reqwest::Url;

/// Query parameters sent to the authorization endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationParams {
    /// OAuth client ID
    pub client_id: String,
    /// Always `code`
    pub response_type: String,
    /// Where the service sends the browser afterwards
    pub redirect_uri: String,
    /// Per-attempt CSRF value echoed back on the redirect
    pub state: String,
    /// Space-separated scopes
    pub scope: String,
    /// Always `S256`
    pub code_challenge_method: String,
    /// `BASE64URL(SHA256(verifier))`
    pub code_challenge: String,
}

impl AuthorizationParams {
    /// Parameters for one attempt, combining configuration, a fresh state and
    /// the attempt's PKCE challenge
    #[must_use]
    pub fn new(config: &OAuthConfig, state: impl Into<String>, pkce: &PkceChallenge) -> Self {
        Self {
            client_id: config.client_id.clone(),
            response_type: "code".to_string(),
            redirect_uri: config.redirect_uri.clone(),
            state: state.into(),
            scope: config.scopes.clone(),
            code_challenge_method: pkce.method().to_string(),
            code_challenge: pkce.challenge.clone(),
        }
    }

    fn pairs(&self) -> [(&'static str, &str); 7] {
        [
            ("client_id", self.client_id.as_str()),
            ("response_type", self.response_type.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("state", self.state.as_str()),
            ("scope", self.scope.as_str()),
            ("code_challenge_method", self.code_challenge_method.as_str()),
            ("code_challenge", self.code_challenge.as_str()),
        ]
    }
}

/// Render the authorization URL for `params` on top of `base`
///
/// Parameters are appended to any query the base already carries.
///
/// # Errors
///
/// Returns `AuthError::UrlConstruction` if `base` is not an absolute URL.
pub fn build_authorization_url(base: &str, params: &AuthorizationParams) -> AuthResult<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| AuthError::url_construction(format!("{base:?}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(AuthError::url_construction(format!(
            "{base:?} cannot carry query parameters"
        )));
    }

    url.query_pairs_mut().extend_pairs(params.pairs());
    Ok(url)
}
