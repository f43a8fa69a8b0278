// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the dashboard server.

pub mod auth;
pub mod http;
pub mod ws;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::DashboardState;

/// Build the axum `Router` with every NixFleet route, the browser-session
/// middleware, CORS, and request tracing layered on top.
pub fn build_router(state: DashboardState) -> Router {
    let cors = build_cors(&state);

    Router::new()
        .route("/", get(http::index))
        .route("/login", post(http::login))
        .route("/logout", post(http::logout))
        .route("/health", get(http::health))
        .route("/api/hosts", get(http::list_hosts).post(http::add_host))
        .route("/api/hosts/{id}", delete(http::delete_host))
        .route("/api/hosts/{id}/command", post(http::dispatch_command))
        .route("/api/hosts/{id}/refresh", post(http::refresh_host))
        .route("/api/hosts/{id}/reboot", post(http::reboot_host))
        .route("/api/hosts/{id}/theme-color", post(http::set_theme_color))
        .route("/api/hosts/{id}/logs", get(http::host_logs))
        .route("/api/system-logs", get(http::system_logs))
        .route("/api/flake-updates/status", get(http::flake_status))
        .route("/api/flake-updates/check", post(http::flake_check))
        .route("/api/flake-updates/merge-and-deploy", post(http::flake_merge_and_deploy))
        .route("/ws/agent", get(ws::agent_ws_handler))
        .route("/ws/browser", get(ws::browser_ws_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth::session_layer))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// CORS allow-list mirrors the WebSocket `Origin` allow-list
/// ([`crate::config::ServerConfig::allowed_origins_list`]); an empty list
/// falls back to permissive defaults for local development.
fn build_cors(state: &DashboardState) -> CorsLayer {
    let origins = state.config.server.allowed_origins_list();
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let headers: Vec<axum::http::HeaderValue> =
        origins.iter().filter_map(|o| axum::http::HeaderValue::from_str(o).ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(headers))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}
