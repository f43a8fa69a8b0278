// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers: the login/logout surface, host CRUD and command dispatch,
//! log tails, and the flake-update watcher's status/check/merge-and-deploy
//! endpoints. Every state-changing handler resolves the browser session via
//! [`SessionId`] (stashed by [`super::auth::session_layer`]) and verifies the
//! CSRF header before touching the hub.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Html;
use axum::{Extension, Json};
use axum_extra::extract::cookie::{Cookie, PrivateCookieJar};
use serde::{Deserialize, Serialize};

use crate::credential::{new_token, verify_password};
use crate::error::DashboardError;
use crate::model::epoch_ms;
use crate::model::{Host, Op, OsKind, SpecialOp};
use crate::state::DashboardState;

use super::auth::{self, SessionId, SESSION_COOKIE};

const DASHBOARD_SHELL: &str = include_str!("../../web/index.html");

/// `GET /` — the dashboard shell. A thin, hand-rolled page: it embeds the
/// CSRF token for the current session (if any) and lets the browser's own
/// WebSocket connection pull the actual host list. Not a templating engine —
/// one placeholder substitution is all this surface needs.
pub async fn index(State(state): State<DashboardState>, jar: PrivateCookieJar) -> Html<String> {
    let csrf = match jar.get(SESSION_COOKIE) {
        Some(cookie) => state.hub.store().browser_session_csrf(cookie.value(), epoch_ms()).await.ok().flatten(),
        None => None,
    };
    let body = DASHBOARD_SHELL.replace("{{csrf_token}}", csrf.as_deref().unwrap_or(""));
    Html(body)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: String,
}

/// `GET /health` — liveness probe. Never touches the store.
pub async fn health(State(state): State<DashboardState>) -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", version: state.hub.dashboard_version().to_owned() })
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub password: String,
    #[serde(default)]
    pub totp_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub csrf_token: String,
}

/// `POST /login` — rate-limited password (plus optional TOTP) check; mints
/// a browser session and CSRF token on success.
pub async fn login(
    State(state): State<DashboardState>,
    jar: PrivateCookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(PrivateCookieJar, Json<LoginResponse>), DashboardError> {
    let auth_cfg = &state.config.auth;
    auth::check_login_rate_limit(state.hub.store(), auth_cfg.rate_limit, auth_cfg.rate_window()).await?;

    let Some(expected_hash) = auth_cfg.password_hash.as_deref() else {
        return Err(DashboardError::Unauthorized);
    };
    if !verify_password(expected_hash, &req.password) {
        return Err(DashboardError::Unauthorized);
    }
    if auth_cfg.totp_enabled() {
        let code = req.totp_code.as_deref().ok_or(DashboardError::Unauthorized)?;
        auth::verify_totp_code(auth_cfg.totp_secret.as_deref(), code)?;
    }

    let session_id = new_token();
    let csrf_token = new_token();
    let expires_at = epoch_ms() + auth_cfg.session_duration().as_millis() as i64;
    state
        .hub
        .store()
        .create_browser_session(&session_id, &csrf_token, expires_at)
        .await
        .map_err(|_| DashboardError::Internal)?;

    // Server-side expiry (`expires_at`, checked by every session lookup) is
    // authoritative; the cookie itself is a plain session cookie so no
    // client clock skew can extend a session past it.
    let cookie = Cookie::build((SESSION_COOKIE, session_id)).http_only(true).path("/").build();
    let jar = jar.add(cookie);
    Ok((jar, Json(LoginResponse { csrf_token })))
}

/// `POST /logout` — drop the session server-side and clear the cookie.
pub async fn logout(
    State(state): State<DashboardState>,
    headers: HeaderMap,
    jar: PrivateCookieJar,
    Extension(SessionId(session_id)): Extension<SessionId>,
) -> Result<(PrivateCookieJar, axum::http::StatusCode), DashboardError> {
    require_csrf(&headers, &state, &session_id).await?;
    state.hub.store().delete_browser_session(&session_id).await.map_err(|_| DashboardError::Internal)?;
    Ok((jar.remove(Cookie::from(SESSION_COOKIE)), axum::http::StatusCode::NO_CONTENT))
}

async fn require_csrf(headers: &HeaderMap, state: &DashboardState, session_id: &str) -> Result<(), DashboardError> {
    auth::require_csrf(headers, state.hub.store(), session_id).await
}

/// `GET /api/hosts` — every known host, online or not.
pub async fn list_hosts(State(state): State<DashboardState>) -> Result<Json<Vec<Host>>, DashboardError> {
    let hosts = state.hub.store().list_hosts().await.map_err(|_| DashboardError::Internal)?;
    Ok(Json(hosts))
}

#[derive(Debug, Deserialize)]
pub struct AddHostRequest {
    pub hostname: String,
    pub os_kind: OsKind,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub device_type: String,
}

/// `POST /api/hosts` — manually register a host entry ahead of its agent's
/// first connection, so it shows up (offline) in the fleet list immediately.
pub async fn add_host(
    State(state): State<DashboardState>,
    headers: HeaderMap,
    Extension(SessionId(session_id)): Extension<SessionId>,
    Json(req): Json<AddHostRequest>,
) -> Result<Json<Host>, DashboardError> {
    require_csrf(&headers, &state, &session_id).await?;
    if req.hostname.is_empty() || !req.hostname.is_ascii() {
        return Err(DashboardError::BadRequest);
    }
    if state.hub.store().get_host(&req.hostname).await.map_err(|_| DashboardError::Internal)?.is_some() {
        return Err(DashboardError::conflict("host_exists", "a host with this name already exists"));
    }
    let mut host = Host::new(&req.hostname, req.os_kind);
    host.location = req.location;
    host.device_type = req.device_type;
    state.hub.store().upsert_host(host.clone()).await.map_err(|_| DashboardError::Internal)?;
    state
        .hub
        .broadcast_change(crate::protocol::Change::HostAdded { host: host.clone() })
        .await
        .map_err(|_| DashboardError::Internal)?;
    Ok(Json(host))
}

/// `DELETE /api/hosts/{id}` — remove a host record. Refused while the host
/// is online: disconnecting an agent out from under a live session is not
/// this endpoint's job.
pub async fn delete_host(
    State(state): State<DashboardState>,
    headers: HeaderMap,
    Extension(SessionId(session_id)): Extension<SessionId>,
    Path(hostname): Path<String>,
) -> Result<(), DashboardError> {
    require_csrf(&headers, &state, &session_id).await?;
    let host = state
        .hub
        .store()
        .get_host(&hostname)
        .await
        .map_err(|_| DashboardError::Internal)?
        .ok_or(DashboardError::NotFound)?;
    if host.online {
        return Err(DashboardError::conflict("host_online", "host must be offline before it can be removed"));
    }
    state.hub.store().delete_host(&hostname).await.map_err(|_| DashboardError::Internal)?;
    state
        .hub
        .broadcast_change(crate::protocol::Change::HostRemoved { hostname })
        .await
        .map_err(|_| DashboardError::Internal)?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub force: bool,
}

/// `POST /api/hosts/{id}/command` — dispatch a regular op, running the
/// full precondition table unless `force` is set. `stop`/`restart` are
/// accepted here too (as [`SpecialOp`]s that bypass `pending_command`
/// entirely); `reboot` is deliberately excluded — it has its own
/// TOTP-gated, rate-limited endpoint.
pub async fn dispatch_command(
    State(state): State<DashboardState>,
    headers: HeaderMap,
    Extension(SessionId(session_id)): Extension<SessionId>,
    Path(hostname): Path<String>,
    Json(req): Json<CommandRequest>,
) -> Result<(), DashboardError> {
    require_csrf(&headers, &state, &session_id).await?;
    if let Some(op) = Op::from_str(&req.command) {
        return state.hub.dispatch_command(&hostname, op, req.args, req.force).await;
    }
    match SpecialOp::from_str(&req.command) {
        Some(SpecialOp::Stop) => state.hub.dispatch_special(&hostname, SpecialOp::Stop).await,
        Some(SpecialOp::Restart) => state.hub.dispatch_special(&hostname, SpecialOp::Restart).await,
        Some(SpecialOp::Reboot) => Err(DashboardError::BadRequest),
        None => Err(DashboardError::BadRequest),
    }
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub compartments: crate::model::Compartments,
}

/// `POST /api/hosts/{id}/refresh` — recompute compartments in place without
/// dispatching a command to the agent. Always permitted, per the spec's
/// "refresh is lightweight and always available" policy (open question,
/// resolved in [`crate::command::precheck`]).
pub async fn refresh_host(
    State(state): State<DashboardState>,
    headers: HeaderMap,
    Extension(SessionId(session_id)): Extension<SessionId>,
    Path(hostname): Path<String>,
) -> Result<Json<RefreshResponse>, DashboardError> {
    require_csrf(&headers, &state, &session_id).await?;
    let compartments = state.hub.refresh_compartments(&hostname).await?;
    Ok(Json(RefreshResponse { compartments }))
}

#[derive(Debug, Deserialize)]
pub struct RebootRequest {
    pub totp_code: String,
}

/// `POST /api/hosts/{id}/reboot` — TOTP-gated and per-host rate-limited;
/// unavailable entirely when second-factor isn't configured.
pub async fn reboot_host(
    State(state): State<DashboardState>,
    headers: HeaderMap,
    Extension(SessionId(session_id)): Extension<SessionId>,
    Path(hostname): Path<String>,
    Json(req): Json<RebootRequest>,
) -> Result<(), DashboardError> {
    require_csrf(&headers, &state, &session_id).await?;
    let auth_cfg = &state.config.auth;
    auth::verify_totp_code(auth_cfg.totp_secret.as_deref(), &req.totp_code)?;
    auth::check_reboot_rate_limit(state.hub.store(), &hostname, auth_cfg.reboot_rate_limit, auth_cfg.reboot_rate_window())
        .await?;
    state.hub.dispatch_special(&hostname, SpecialOp::Reboot).await
}

#[derive(Debug, Deserialize)]
pub struct ThemeColorRequest {
    pub theme_color: String,
}

/// `POST /api/hosts/{id}/theme-color` — purely cosmetic; no agent
/// interaction, no precheck.
pub async fn set_theme_color(
    State(state): State<DashboardState>,
    headers: HeaderMap,
    Extension(SessionId(session_id)): Extension<SessionId>,
    Path(hostname): Path<String>,
    Json(req): Json<ThemeColorRequest>,
) -> Result<Json<Host>, DashboardError> {
    require_csrf(&headers, &state, &session_id).await?;
    let host = state.hub.set_theme_color(&hostname, req.theme_color).await?;
    Ok(Json(host))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

/// `GET /api/hosts/{id}/logs` — last N command records for a host.
pub async fn host_logs(
    State(state): State<DashboardState>,
    Path(hostname): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<crate::model::CommandRecord>>, DashboardError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let records =
        state.hub.store().recent_commands_for_host(&hostname, limit).await.map_err(|_| DashboardError::Internal)?;
    Ok(Json(records))
}

/// `GET /api/system-logs?limit=N` — the state-machine log tail.
pub async fn system_logs(
    State(state): State<DashboardState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<crate::model::LogEntry>>, DashboardError> {
    let limit = query.limit.unwrap_or(200).clamp(1, 2000);
    let entries = state.hub.store().tail_events(limit).await.map_err(|_| DashboardError::Internal)?;
    Ok(Json(entries))
}

/// `GET /api/flake-updates/status` — last-known pending PR, regardless of
/// poll-TTL freshness.
pub async fn flake_status(State(state): State<DashboardState>) -> Json<Option<crate::flake::PendingPr>> {
    Json(state.flake.pending())
}

/// `POST /api/flake-updates/check` — force an immediate re-poll, bypassing
/// the TTL.
pub async fn flake_check(
    State(state): State<DashboardState>,
    headers: HeaderMap,
    Extension(SessionId(session_id)): Extension<SessionId>,
) -> Result<Json<Option<crate::flake::PendingPr>>, DashboardError> {
    require_csrf(&headers, &state, &session_id).await?;
    let pending = state.flake.check_now().await.map_err(|_| DashboardError::Upstream)?;
    Ok(Json(pending))
}

#[derive(Debug, Deserialize)]
pub struct MergeAndDeployRequest {
    pub hostnames: Vec<String>,
}

/// `POST /api/flake-updates/merge-and-deploy` — merge the pending PR and
/// fan `pull` then `switch` out across the given hosts. Refuses a second
/// concurrent run.
pub async fn flake_merge_and_deploy(
    State(state): State<DashboardState>,
    headers: HeaderMap,
    Extension(SessionId(session_id)): Extension<SessionId>,
    Json(req): Json<MergeAndDeployRequest>,
) -> Result<Json<Vec<crate::flake::DeployOutcome>>, DashboardError> {
    require_csrf(&headers, &state, &session_id).await?;
    let outcomes = state.flake.merge_and_deploy(&state.hub, req.hostnames).await?;
    Ok(Json(outcomes))
}
