//! Spotify login
//!
//! Obtains a Spotify access token with the PKCE flow:
//! 1. Check for a cached token (refreshing it if expired)
//! 2. If there is none, open the browser at the authorization page
//! 3. Capture the redirect on the local callback listener
//! 4. Exchange the code for a token and cache it
//!
//! Reads `CLIENT_ID` and `REDIRECT_URI` from the environment or a `.env`
//! file.
//!
//! Run with: cargo run -p spotify-login -- [login|status|logout|help]

use anyhow::Context;
use spotify_pkce::{AuthError, OAuthClient, OAuthConfig, TokenRecord};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("spotify_pkce=info")),
        )
        .init();

    let command = std::env::args().nth(1);
    match command.as_deref() {
        None | Some("login") => login().await,
        Some("status" | "--status") => status(),
        Some("logout" | "--logout") => logout(),
        Some("help" | "--help" | "-h") => {
            print_help();
            Ok(())
        }
        Some(other) => {
            eprintln!("Unknown command: {other}");
            print_help();
            Ok(())
        }
    }
}

fn client() -> anyhow::Result<OAuthClient> {
    let config = OAuthConfig::from_env().context("loading CLIENT_ID / REDIRECT_URI")?;
    Ok(OAuthClient::new(config)?)
}

async fn login() -> anyhow::Result<()> {
    let client = client()?;
    let token = match client.authenticate().await {
        Ok(token) => token,
        Err(AuthError::Persistence { token, source }) => {
            eprintln!("Warning: token could not be cached ({source}).");
            eprintln!("It works for now, but the next run will authorize again.");
            *token
        }
        Err(e) => return Err(anyhow::Error::new(e).context("authorization failed")),
    };

    println!();
    print_token_info(&token);
    Ok(())
}

fn status() -> anyhow::Result<()> {
    let client = client()?;

    println!("Authentication Status");
    println!("---------------------");
    println!();

    match client.current_token() {
        Some(token) if token.is_expired() => {
            println!("Status: Expired");
            if token.refresh_token.is_empty() {
                println!("No refresh token - run 'login' to re-authenticate.");
            } else {
                println!("A refresh token is available - 'login' will refresh it.");
            }
        }
        Some(token) => {
            println!("Status: Authenticated");
            println!();
            print_token_info(&token);
        }
        None => {
            println!("Status: Not authenticated");
            println!("Run 'login' to authenticate.");
        }
    }

    println!();
    println!("Token storage: {}", client.storage().path().display());
    Ok(())
}

fn logout() -> anyhow::Result<()> {
    let client = client()?;
    if client.current_token().is_some() {
        client.logout()?;
        println!("Logged out.");
    } else {
        println!("Not currently authenticated.");
    }
    Ok(())
}

fn print_token_info(token: &TokenRecord) {
    println!("Token Information:");
    println!("  Type: {}", token.token_type);
    println!("  Access Token: {}...", preview(&token.access_token));
    if !token.scope.is_empty() {
        println!("  Scopes: {}", token.scope);
    }
    println!("  Obtained: {}", token.created_at.to_rfc3339());
    if let Some(remaining) = token.remaining_validity() {
        let minutes = remaining.as_secs() / 60;
        println!("  Expires in: {}h {}m", minutes / 60, minutes % 60);
    }
}

/// First 20 characters of a secret, safe for any UTF-8 input
fn preview(secret: &str) -> String {
    secret.chars().take(20).collect()
}

fn print_help() {
    println!("Usage: spotify-login [COMMAND]");
    println!();
    println!("Commands:");
    println!("  login      Use the cached token or start the browser flow (default)");
    println!("  status     Show current authentication status");
    println!("  logout     Delete cached token");
    println!("  help       Show this help message");
    println!();
    println!("Environment:");
    println!("  CLIENT_ID       Client ID registered with Spotify");
    println!("  REDIRECT_URI    Registered redirect URI, e.g. http://127.0.0.1:3000/callback");
    println!("  SPOTIFY_SCOPES  Optional space-separated scopes");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_by_characters() {
        assert_eq!(preview("short"), "short");
        assert_eq!(preview(&"a".repeat(40)), "a".repeat(20));
        // multi-byte characters straddling byte 20 must not split
        assert_eq!(preview(&"é".repeat(30)), "é".repeat(20));
    }
}
