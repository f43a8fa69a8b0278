// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared axum state: the hub, the flake-update watcher, the resolved
//! configuration, and the key used to sign/encrypt the browser session
//! cookie.

use std::sync::Arc;

use axum_extra::extract::cookie::Key;

use crate::config::DashboardConfig;
use crate::flake::FlakeWatcher;
use crate::hub::Hub;

#[derive(Clone)]
pub struct DashboardState {
    pub hub: Arc<Hub>,
    pub flake: Arc<FlakeWatcher>,
    pub config: Arc<DashboardConfig>,
    pub cookie_key: Key,
}

impl DashboardState {
    pub fn new(hub: Arc<Hub>, flake: Arc<FlakeWatcher>, config: Arc<DashboardConfig>) -> Self {
        let cookie_key = match config.auth.session_secret.as_deref() {
            Some(secret) => Key::derive_from(secret.as_bytes()),
            None => {
                tracing::warn!("deriving an ephemeral cookie key; browser sessions will not survive a restart");
                Key::generate()
            }
        };
        Self { hub, flake, config, cookie_key }
    }
}

impl axum::extract::FromRef<DashboardState> for Key {
    fn from_ref(state: &DashboardState) -> Self {
        state.cookie_key.clone()
    }
}
