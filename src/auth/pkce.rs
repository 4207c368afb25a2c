//! PKCE verifier/challenge generation and CSRF state values

use crate::error::{AuthError, AuthResult};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::TryRngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// Random bytes drawn for a code verifier (107 base64url characters)
pub const VERIFIER_BYTES: usize = 80;

/// Random bytes drawn for a state value
pub const STATE_BYTES: usize = 32;

/// Fewest random bytes accepted for a state value
pub const MIN_STATE_BYTES: usize = 16;

/// The only challenge method this client speaks
pub const CHALLENGE_METHOD: &str = "S256";

// Below 60 bytes the verifier is too guessable; 96 bytes encode to 128 chars,
// the longest verifier the authorization server accepts
const MIN_VERIFIER_BYTES: usize = 60;
const MAX_VERIFIER_BYTES: usize = 96;

/// Draw `n` bytes from the OS random source, base64url encoded without padding
///
/// # Errors
///
/// Returns `AuthError::Entropy` if the random source fails.
pub fn generate_code(n: usize) -> AuthResult<String> {
    let mut bytes = vec![0u8; n];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| AuthError::entropy(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Generate a code verifier from [`VERIFIER_BYTES`] random bytes
///
/// # Errors
///
/// Returns `AuthError::Entropy` if the random source fails.
pub fn generate_verifier() -> AuthResult<String> {
    generate_verifier_with_bytes(VERIFIER_BYTES)
}

/// Generate a code verifier from `n` random bytes
///
/// # Errors
///
/// Returns `AuthError::InvalidConfig` if `n` would not produce a verifier of
/// 80 to 128 characters, or `AuthError::Entropy` if the random source fails.
pub fn generate_verifier_with_bytes(n: usize) -> AuthResult<String> {
    if !(MIN_VERIFIER_BYTES..=MAX_VERIFIER_BYTES).contains(&n) {
        return Err(AuthError::invalid_config(format!(
            "verifier needs {MIN_VERIFIER_BYTES}..={MAX_VERIFIER_BYTES} random bytes, got {n}"
        )));
    }
    generate_code(n)
}

/// `BASE64URL(SHA256(verifier))` without padding
#[must_use]
pub fn generate_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Generate a fresh CSRF state value from `n` random bytes
///
/// # Errors
///
/// Returns `AuthError::InvalidConfig` if `n` is below [`MIN_STATE_BYTES`],
/// or `AuthError::Entropy` if the random source fails.
pub fn generate_state(n: usize) -> AuthResult<String> {
    if n < MIN_STATE_BYTES {
        return Err(AuthError::invalid_config(format!(
            "state needs at least {MIN_STATE_BYTES} random bytes, got {n}"
        )));
    }
    generate_code(n)
}

/// PKCE code challenge data
///
/// The verifier stays in memory for the lifetime of one flow attempt and is
/// never persisted.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// Code verifier (random string)
    pub verifier: String,
    /// Code challenge (SHA-256 hash of verifier, base64url encoded)
    pub challenge: String,
}

impl PkceChallenge {
    /// Generate a new verifier and its challenge
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Entropy` if the random source fails.
    pub fn generate() -> AuthResult<Self> {
        Ok(Self::from_verifier(generate_verifier()?))
    }

    /// Derive the challenge for an existing verifier
    #[must_use]
    pub fn from_verifier(verifier: String) -> Self {
        let challenge = generate_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    /// Challenge method, always `S256`
    #[must_use]
    pub fn method(&self) -> &'static str {
        CHALLENGE_METHOD
    }
}
