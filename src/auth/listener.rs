//! Loopback listener that captures the authorization redirect
//!
//! A [`RedirectListener`] goes through three states during one attempt:
//!
//! - **Idle**: nothing is bound yet.
//! - **Listening**: [`RedirectListener::bind`] has bound the redirect URI's
//!   host and port, and [`RedirectListener::spawn`] starts the accept task.
//!   Binding happens before the browser is opened, so the redirect can never
//!   arrive before the listener exists.
//! - **Completed**: the first HTTP request has been answered and its
//!   [`AuthorizationResult`] handed over through a oneshot channel. The task
//!   then exits and the port is released.
//!
//! Every path is served by the same handler. Connections that close or stall
//! without sending a request line (browser preconnects) do not count as the
//! one request.

use crate::error::{AuthError, AuthResult};
use reqwest::Url;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Denial reason when the echoed state does not match
pub const INVALID_STATE: &str = "Invalid state";

/// Denial reason when the redirect carries neither a code nor an error
pub const MISSING_CODE: &str = "Missing authorization code";

// Upper bound on request head size; anything larger is not a redirect
const MAX_REQUEST_HEAD: usize = 16 * 1024;

const SUCCESS_HTML: &str = "<!DOCTYPE html>\n<html>\n<head><title>Authorization successful</title></head>\n<body style=\"font-family: system-ui; text-align: center; padding: 50px;\">\n<h1>Authorization successful</h1>\n<p>You can close this window and return to the terminal.</p>\n</body>\n</html>";

const FAILURE_HTML: &str = "<!DOCTYPE html>\n<html>\n<head><title>Authorization failed</title></head>\n<body style=\"font-family: system-ui; text-align: center; padding: 50px;\">\n<h1>Authorization failed</h1>\n<p>You can close this window and try again from the terminal.</p>\n</body>\n</html>";

/// Code and state from an accepted redirect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationGrant {
    /// Short-lived authorization code
    pub code: String,
    /// State echoed by the server; equal to the one this attempt issued
    pub state: String,
}

/// Outcome of one authorization attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationResult {
    /// The user approved and the state matched
    Granted(AuthorizationGrant),
    /// The user declined, the server reported an error, or validation failed
    Denied {
        /// Server error code or a locally synthesized reason
        error: String,
        /// State carried by the redirect, possibly empty
        state: String,
    },
}

impl AuthorizationResult {
    /// Whether the attempt was granted
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }
}

/// A bound, not yet serving, redirect listener
#[derive(Debug)]
pub struct RedirectListener {
    listener: TcpListener,
    // IPv6 loopback on the same port when the redirect host is `localhost`
    listener_v6: Option<TcpListener>,
    local_addr: SocketAddr,
}

impl RedirectListener {
    /// Bind the host and port of `redirect_uri`
    ///
    /// A `localhost` host is served on both `127.0.0.1` and `::1`, since the
    /// browser may resolve it to either.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidConfig` if the URI has no host or port, or
    /// `AuthError::Listener` if the address cannot be bound.
    pub async fn bind(redirect_uri: &Url) -> AuthResult<Self> {
        let host = redirect_uri
            .host_str()
            .ok_or_else(|| AuthError::invalid_config(format!("{redirect_uri} has no host")))?;
        // IPv6 hosts come back bracketed
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = redirect_uri
            .port_or_known_default()
            .ok_or_else(|| AuthError::invalid_config(format!("{redirect_uri} has no port")))?;

        let (listener, listener_v6) = if host.eq_ignore_ascii_case("localhost") {
            bind_loopback(port).await?
        } else {
            let listener = TcpListener::bind((host, port))
                .await
                .map_err(AuthError::Listener)?;
            (listener, None)
        };
        let local_addr = listener.local_addr().map_err(AuthError::Listener)?;
        tracing::debug!(
            %local_addr,
            dual_stack = listener_v6.is_some(),
            "Redirect listener bound"
        );

        Ok(Self {
            listener,
            listener_v6,
            local_addr,
        })
    }

    /// Address actually bound
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start serving; the returned handle yields the single result
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidConfig` if `expected_state` is empty, since
    /// a redirect without a state would then validate.
    pub fn spawn(self, expected_state: impl Into<String>) -> AuthResult<PendingAuthorization> {
        let expected_state = expected_state.into();
        if expected_state.is_empty() {
            return Err(AuthError::invalid_config(
                "refusing to wait for a redirect without a state value",
            ));
        }

        let local_addr = self.local_addr;
        let (tx, rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let Self {
                listener,
                listener_v6,
                ..
            } = self;
            tokio::select! {
                () = token.cancelled() => {
                    tracing::debug!("Redirect listener cancelled");
                }
                outcome = serve_one(&listener, listener_v6.as_ref(), &expected_state) => {
                    if tx.send(outcome).is_err() {
                        tracing::debug!("Redirect result dropped, nobody is waiting");
                    }
                }
            }
            // listeners drop here and the port is released
        });

        Ok(PendingAuthorization {
            result: rx,
            task: Some(task),
            cancel,
            local_addr,
        })
    }
}

/// Bind `127.0.0.1` and `::1` on one port; either family alone is enough
async fn bind_loopback(port: u16) -> AuthResult<(TcpListener, Option<TcpListener>)> {
    match TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
        Ok(v4) => {
            let port = v4.local_addr().map_err(AuthError::Listener)?.port();
            let v6 = TcpListener::bind((Ipv6Addr::LOCALHOST, port))
                .await
                .inspect_err(|e| tracing::debug!(error = %e, "IPv6 loopback not bound"))
                .ok();
            Ok((v4, v6))
        }
        Err(v4_err) => {
            let v6 = TcpListener::bind((Ipv6Addr::LOCALHOST, port))
                .await
                .map_err(|_| AuthError::Listener(v4_err))?;
            Ok((v6, None))
        }
    }
}

/// Handle to a listener that is waiting for the redirect
///
/// Dropping the handle cancels the listener, so the port is released on
/// every exit path.
#[derive(Debug)]
pub struct PendingAuthorization {
    result: oneshot::Receiver<io::Result<AuthorizationResult>>,
    task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    local_addr: SocketAddr,
}

impl PendingAuthorization {
    /// Address the listener is bound to
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the redirect, at most `timeout` if given
    ///
    /// The listener has shut down by the time this returns.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::TimedOut` if the timeout elapses first, or
    /// `AuthError::Listener` if accepting connections failed.
    pub async fn wait(mut self, timeout: Option<Duration>) -> AuthResult<AuthorizationResult> {
        let received = match timeout {
            Some(limit) => {
                if let Ok(received) = tokio::time::timeout(limit, &mut self.result).await {
                    received
                } else {
                    self.shutdown().await;
                    return Err(AuthError::TimedOut(limit));
                }
            }
            None => (&mut self.result).await,
        };

        self.shutdown().await;

        match received {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(AuthError::Listener(e)),
            Err(_) => Err(AuthError::Listener(io::Error::other(
                "redirect listener stopped before delivering a result",
            ))),
        }
    }

    async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(()) => tracing::debug!(addr = %self.local_addr, "Redirect listener closed"),
                Err(e) if e.is_cancelled() => {}
                Err(e) => tracing::warn!(error = %e, "Redirect listener did not shut down cleanly"),
            }
        }
    }
}

impl Drop for PendingAuthorization {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Accept connections until one carries a request, answer it, return its result
async fn serve_one(
    listener: &TcpListener,
    listener_v6: Option<&TcpListener>,
    expected_state: &str,
) -> io::Result<AuthorizationResult> {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = accept_any(listener, listener_v6) => {
                let (stream, peer) = accepted?;
                tracing::trace!(%peer, "Redirect connection accepted");
                connections.spawn(read_request_target(stream));
            }
            Some(joined) = connections.join_next() => {
                let Ok(Some((mut stream, target))) = joined else {
                    tracing::debug!("Ignoring connection without a request");
                    continue;
                };

                let result = parse_callback(&target, expected_state);
                if let AuthorizationResult::Denied { ref error, .. } = result {
                    tracing::warn!(reason = %error, "Authorization redirect denied");
                } else {
                    tracing::debug!("Authorization redirect accepted");
                }

                let response = render_response(&result);
                if let Err(e) = stream.write_all(response.as_bytes()).await {
                    tracing::debug!(error = %e, "Could not answer the redirect");
                }
                let _ = stream.shutdown().await;

                return Ok(result);
            }
        }
    }
}

async fn accept_any(
    listener: &TcpListener,
    listener_v6: Option<&TcpListener>,
) -> io::Result<(TcpStream, SocketAddr)> {
    match listener_v6 {
        Some(listener_v6) => tokio::select! {
            accepted = listener.accept() => accepted,
            accepted = listener_v6.accept() => accepted,
        },
        None => listener.accept().await,
    }
}

/// Read the request head and return the request target, or `None` if the
/// peer closed or sent something that is not HTTP
async fn read_request_target(mut stream: TcpStream) -> Option<(TcpStream, String)> {
    let mut head = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 || head.len() + n > MAX_REQUEST_HEAD {
            return None;
        }
        head.extend_from_slice(&chunk[..n]);
    }

    let head = String::from_utf8_lossy(&head);
    let mut parts = head.lines().next()?.split_whitespace();
    let _method = parts.next()?;
    let target = parts.next()?.to_string();
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }

    Some((stream, target))
}

/// Extract `code`, `state` and `error` from a request target and validate
/// the state
///
/// A server-reported error is passed through as is. Otherwise a state that
/// differs from `expected_state` is denied with [`INVALID_STATE`]. An empty
/// `expected_state` never matches.
#[must_use]
pub fn parse_callback(target: &str, expected_state: &str) -> AuthorizationResult {
    let mut code = None;
    let mut state = None;
    let mut error = None;

    if let Ok(url) = Url::parse("http://localhost/").and_then(|base| base.join(target)) {
        for (key, value) in url.query_pairs() {
            let slot = match key.as_ref() {
                "code" => &mut code,
                "state" => &mut state,
                "error" => &mut error,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
    }

    let state = state.unwrap_or_default();
    let error = error.filter(|e| !e.is_empty());
    let code = code.filter(|c| !c.is_empty());

    let state_matches = !expected_state.is_empty() && state == expected_state;

    match (error, code) {
        (Some(error), _) => AuthorizationResult::Denied { error, state },
        _ if !state_matches => AuthorizationResult::Denied {
            error: INVALID_STATE.to_string(),
            state,
        },
        (None, Some(code)) => AuthorizationResult::Granted(AuthorizationGrant { code, state }),
        (None, None) => AuthorizationResult::Denied {
            error: MISSING_CODE.to_string(),
            state,
        },
    }
}

fn render_response(result: &AuthorizationResult) -> String {
    let (status, body) = if result.is_granted() {
        ("200 OK", SUCCESS_HTML)
    } else {
        ("400 Bad Request", FAILURE_HTML)
    };
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}
