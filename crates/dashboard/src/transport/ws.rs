// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket handlers for both surfaces the hub multiplexes: the agent
//! wire protocol (`/ws/agent`) and the browser state-sync protocol
//! (`/ws/browser`).

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::PrivateCookieJar;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::error::DashboardError;
use crate::hub::BROWSER_CHANNEL_CAPACITY;
use crate::protocol::{AgentFrame, ClientMessage, DashboardFrame, ServerMessage};
use crate::state::DashboardState;
use crate::transport::auth;

/// `GET /ws/agent` — upgrade for an agent connection. Auth is a bearer
/// token (there is no session cookie to check, and no CSRF surface since
/// the agent never issues a browser-originated request).
pub async fn agent_ws_handler(State(state): State<DashboardState>, headers: HeaderMap, ws: WebSocketUpgrade) -> Response {
    if let Err(err) = auth::validate_agent_bearer(&headers, state.config.auth.agent_token.as_deref()) {
        return err.into_response();
    }
    if !auth::origin_allowed(&headers, &state.config.server.allowed_origins_list()) {
        return DashboardError::Unauthorized.into_response();
    }

    let pong_timeout = state.config.server.ws_pong_timeout();
    let ping_interval = state.config.server.ws_ping_interval();
    ws.max_message_size(state.config.server.ws_max_message_bytes)
        .on_upgrade(move |socket| handle_agent_ws(socket, state, pong_timeout, ping_interval))
}

/// Per-connection agent handler. The first frame off the wire must be
/// `register`; everything else is dispatched through
/// [`crate::hub::Hub::handle_agent_frame`] once the session exists.
async fn handle_agent_ws(socket: WebSocket, state: DashboardState, pong_timeout: Duration, ping_interval: Duration) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let register = loop {
        match ws_rx.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<AgentFrame>(&text) {
                Ok(AgentFrame::Register(payload)) => break payload,
                Ok(_) => {
                    tracing::warn!("agent sent a non-register frame before registering; dropping connection");
                    return;
                }
                Err(err) => {
                    tracing::warn!(%err, "malformed frame before agent registration");
                    return;
                }
            },
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            _ => return,
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<DashboardFrame>();
    let session = match state.hub.agent_connected(tx, register).await {
        Ok(session) => session,
        Err(err) => {
            tracing::error!(%err, "failed to register agent");
            return;
        }
    };

    let mut ping_tick = tokio::time::interval(ping_interval);
    ping_tick.tick().await;
    let pong_deadline = tokio::time::sleep(pong_timeout);
    tokio::pin!(pong_deadline);

    loop {
        tokio::select! {
            _ = ping_tick.tick() => {
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            _ = &mut pong_deadline => {
                tracing::warn!(hostname = %session.hostname, "agent pong timeout, dropping connection");
                break;
            }
            outgoing = rx.recv() => {
                match outgoing {
                    Some(frame) => {
                        let Ok(text) = serde_json::to_string(&frame) else { continue };
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<AgentFrame>(&text) {
                        Ok(frame) => {
                            if let Err(err) = state.hub.handle_agent_frame(&session.hostname, frame).await {
                                tracing::error!(%err, hostname = %session.hostname, "failed to handle agent frame");
                            }
                        }
                        Err(err) => tracing::warn!(%err, hostname = %session.hostname, "malformed agent frame"),
                    },
                    Some(Ok(Message::Pong(_))) => {
                        pong_deadline.as_mut().reset(tokio::time::Instant::now() + pong_timeout);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::warn!(%err, hostname = %session.hostname, "agent websocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.hub.agent_disconnected(&session).await;
}

/// `GET /ws/browser` — upgrade for a dashboard browser tab. Auth is the
/// signed session cookie; it travels with the handshake request like any
/// other cookie.
pub async fn browser_ws_handler(
    State(state): State<DashboardState>,
    headers: HeaderMap,
    jar: PrivateCookieJar,
    ws: WebSocketUpgrade,
) -> Response {
    if !auth::origin_allowed(&headers, &state.config.server.allowed_origins_list()) {
        return DashboardError::Unauthorized.into_response();
    }
    if let Err(err) = auth::require_browser_session(&jar, state.hub.store()).await {
        return err.into_response();
    }

    let pong_timeout = state.config.server.ws_pong_timeout();
    let ping_interval = state.config.server.ws_ping_interval();
    ws.max_message_size(state.config.server.ws_max_message_bytes)
        .on_upgrade(move |socket| handle_browser_ws(socket, state, pong_timeout, ping_interval))
}

/// Per-connection browser handler: sends the unconditional `init` frame,
/// then relays the hub's broadcast stream out and `GetState`/`Subscribe`
/// requests in.
async fn handle_browser_ws(socket: WebSocket, state: DashboardState, pong_timeout: Duration, ping_interval: Duration) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(BROWSER_CHANNEL_CAPACITY);

    let (session, init) = match state.hub.register_browser(tx).await {
        Ok(pair) => pair,
        Err(err) => {
            tracing::error!(%err, "failed to register browser session");
            return;
        }
    };

    match serde_json::to_string(&init) {
        Ok(text) if ws_tx.send(Message::Text(text.into())).await.is_ok() => {}
        _ => {
            state.hub.unregister_browser(&session.id).await;
            return;
        }
    }

    let mut ping_tick = tokio::time::interval(ping_interval);
    ping_tick.tick().await;
    let pong_deadline = tokio::time::sleep(pong_timeout);
    tokio::pin!(pong_deadline);

    loop {
        tokio::select! {
            _ = ping_tick.tick() => {
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            _ = &mut pong_deadline => {
                tracing::warn!(session = %session.id, "browser pong timeout, dropping connection");
                break;
            }
            outgoing = rx.recv() => {
                match outgoing {
                    Some(message) => {
                        let Ok(text) = serde_json::to_string(&message) else { continue };
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(ClientMessage::GetState) => {
                            if let Ok(full) = state.hub.full_state_message(false).await {
                                let Ok(text) = serde_json::to_string(&full) else { continue };
                                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                        // Topic filtering isn't implemented yet: every browser gets the
                        // full delta stream, so these are accepted and otherwise ignored.
                        Ok(ClientMessage::Subscribe { .. }) | Ok(ClientMessage::Unsubscribe { .. }) => {}
                        Err(err) => tracing::warn!(%err, "malformed client message"),
                    },
                    Some(Ok(Message::Pong(_))) => {
                        pong_deadline.as_mut().reset(tokio::time::Instant::now() + pong_timeout);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::warn!(%err, "browser websocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.hub.unregister_browser(&session.id).await;
}
