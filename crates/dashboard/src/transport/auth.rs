// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authentication and request-integrity checks for the HTTP/WebSocket
//! surface: the agent bearer token, the browser session cookie, the CSRF
//! token every state-changing browser request must echo back, the
//! WebSocket `Origin` allow-list, and the login/reboot rate limits.

use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::PrivateCookieJar;

use crate::credential::constant_time_eq;
use crate::error::DashboardError;
use crate::model::epoch_ms;
use crate::state::DashboardState;
use crate::store::Store;

/// Name of the cookie carrying the browser session id.
pub const SESSION_COOKIE: &str = "nixfleet_session";
/// Header carrying the CSRF token every state-changing browser request
/// must echo back.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// The session id resolved by [`session_layer`], stashed as a request
/// extension so handlers don't need to re-decrypt the cookie jar to learn
/// which session is making the request.
#[derive(Debug, Clone)]
pub struct SessionId(pub String);

/// Validate a Bearer token presented on the agent WebSocket upgrade.
/// `None` means agent auth is unconfigured and every upgrade is accepted —
/// loudly logged at startup by [`crate::config::AuthConfig::log_startup_warnings`].
pub fn validate_agent_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), DashboardError> {
    let Some(expected) = expected else { return Ok(()) };
    let header = headers.get("authorization").and_then(|v| v.to_str().ok()).ok_or(DashboardError::Unauthorized)?;
    let token = header.strip_prefix("Bearer ").ok_or(DashboardError::Unauthorized)?;
    if constant_time_eq(token, expected) {
        Ok(())
    } else {
        Err(DashboardError::Unauthorized)
    }
}

/// Whether a WebSocket upgrade's `Origin` header is acceptable. A missing
/// header passes (same-origin browsers and non-browser agents never send
/// one). An empty allow-list otherwise falls back to accepting
/// localhost-to-localhost, the common development shape; a configured
/// allow-list must name the origin explicitly.
pub fn origin_allowed(headers: &HeaderMap, allowed: &[String]) -> bool {
    let Some(origin) = headers.get("origin").and_then(|v| v.to_str().ok()) else {
        return true;
    };
    if allowed.iter().any(|o| o == origin) {
        return true;
    }
    if allowed.is_empty() {
        return origin.starts_with("http://localhost") || origin.starts_with("http://127.0.0.1");
    }
    false
}

/// Extract and validate the browser session cookie, returning the session
/// id on success.
pub async fn require_browser_session(jar: &PrivateCookieJar, store: &Store) -> Result<String, DashboardError> {
    let id = jar.get(SESSION_COOKIE).map(|c| c.value().to_owned()).ok_or(DashboardError::Unauthorized)?;
    let valid = store.browser_session_valid(&id, epoch_ms()).await.map_err(|_| DashboardError::Internal)?;
    if valid {
        Ok(id)
    } else {
        Err(DashboardError::Unauthorized)
    }
}

/// Validate the `x-csrf-token` header on a state-changing request against
/// the token minted alongside `session_id`.
pub async fn require_csrf(headers: &HeaderMap, store: &Store, session_id: &str) -> Result<(), DashboardError> {
    let presented = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok()).ok_or(DashboardError::Unauthorized)?;
    let expected = store
        .browser_session_csrf(session_id, epoch_ms())
        .await
        .map_err(|_| DashboardError::Internal)?
        .ok_or(DashboardError::Unauthorized)?;
    if constant_time_eq(presented, &expected) {
        Ok(())
    } else {
        Err(DashboardError::Unauthorized)
    }
}

/// Check and record a `/login` attempt against the rolling rate limit,
/// independent of whether the credentials turn out to be correct — the
/// limit exists to slow brute force, not just to lock out after success.
pub async fn check_login_rate_limit(store: &Store, limit: u32, window: Duration) -> Result<(), DashboardError> {
    let now = epoch_ms();
    let count = store
        .login_attempts_in_window(window.as_millis() as i64, now)
        .await
        .map_err(|_| DashboardError::Internal)?;
    if count >= limit as i64 {
        return Err(DashboardError::conflict("rate_limited", "too many login attempts, try again later"));
    }
    store.record_login_attempt(now).await.map_err(|_| DashboardError::Internal)?;
    Ok(())
}

/// Check and record a reboot attempt for `hostname` against the rolling
/// rate limit.
pub async fn check_reboot_rate_limit(
    store: &Store,
    hostname: &str,
    limit: u32,
    window: Duration,
) -> Result<(), DashboardError> {
    let now = epoch_ms();
    let count = store
        .reboot_attempts_in_window(hostname, window.as_millis() as i64, now)
        .await
        .map_err(|_| DashboardError::Internal)?;
    if count >= limit as i64 {
        return Err(DashboardError::conflict("rate_limited", "too many reboot attempts for this host, try again later"));
    }
    store.record_reboot_attempt(hostname, now).await.map_err(|_| DashboardError::Internal)?;
    Ok(())
}

/// Verify a TOTP code against the configured secret. Returns
/// `Unauthorized` both when second-factor isn't configured and when the
/// code is wrong — callers can't distinguish "disabled" from "wrong code"
/// from the response alone.
pub fn verify_totp_code(secret: Option<&str>, code: &str) -> Result<(), DashboardError> {
    match secret {
        Some(secret) if crate::credential::verify_totp(secret, code) => Ok(()),
        _ => Err(DashboardError::Unauthorized),
    }
}

/// Axum middleware enforcing a valid browser session cookie on every
/// request except the login page and the login/health endpoints. The
/// resolved session id is stashed as a request extension ([`SessionId`])
/// so handlers don't need to re-validate the cookie for CSRF checks.
///
/// Exempt: `/`, `/login`, `/health`, and the agent WebSocket upgrade, which
/// authenticates with a bearer token instead.
pub async fn session_layer(
    State(state): State<DashboardState>,
    jar: PrivateCookieJar,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if path == "/" || path == "/login" || path == "/health" || path == "/ws/agent" {
        return next.run(req).await;
    }

    match require_browser_session(&jar, state.hub.store()).await {
        Ok(session_id) => {
            req.extensions_mut().insert(SessionId(session_id));
            next.run(req).await
        }
        Err(err) => err.into_response(),
    }
}
