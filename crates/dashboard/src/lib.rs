// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! NixFleet dashboard: connection hub, command state machine, compartment
//! evaluator, and state-sync protocol for a fleet of NixOS/macOS hosts.

pub mod command;
pub mod command_log;
pub mod compartment;
pub mod config;
pub mod credential;
pub mod error;
pub mod flake;
pub mod hub;
pub mod model;
pub mod protocol;
pub mod remote;
pub mod ring;
pub mod stale_sweep;
pub mod state;
pub mod state_manager;
pub mod store;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::DashboardConfig;
use crate::flake::FlakeWatcher;
use crate::hub::Hub;
use crate::remote::RemoteCache;
use crate::stale_sweep::spawn_stale_sweep;
use crate::state::DashboardState;
use crate::state_manager::StateManager;
use crate::store::Store;

/// Run the dashboard server until shutdown.
pub async fn run(config: DashboardConfig) -> anyhow::Result<()> {
    config.auth.log_startup_warnings();
    config.remote.log_startup_warning();
    config.flake.log_startup_warning();

    std::fs::create_dir_all(&config.server.data_dir)?;
    if let Some(parent) = config.server.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let shutdown = CancellationToken::new();

    let store = Store::open(&config.server.db_path)?;
    let state_manager = Arc::new(StateManager::load(store.clone()).await?);
    let remote = Arc::new(RemoteCache::new(
        config.remote.version_url.clone(),
        config.remote.version_token.clone(),
        config.remote.ttl(),
    ));
    let flake = FlakeWatcher::new(
        config.flake.github_repo.clone(),
        config.flake.github_token.clone(),
        config.flake.title_pattern.clone(),
        config.flake.label.clone(),
        config.flake.poll_ttl(),
        config.flake.deploy_propagation_delay(),
        config.flake.deploy_host_timeout(),
    );

    let hub = Hub::with_command_timeouts(
        store,
        state_manager,
        Arc::clone(&remote),
        config.server.dashboard_version.clone(),
        config.command_timeout.soft_timeout_ms as i64,
        config.command_timeout.hard_timeout_ms as i64,
        config.server.data_dir.clone(),
    );
    hub.resync_on_startup().await?;

    crate::remote::spawn_remote_watcher(Arc::clone(&remote), config.remote.ttl(), shutdown.clone());
    crate::flake::spawn_flake_watcher(Arc::clone(&flake), config.flake.poll_ttl(), shutdown.clone());
    spawn_stale_sweep(Arc::clone(&hub), config.stale_sweep.to_tuning(), shutdown.clone());

    let listen_addr = config.server.listen_addr.clone();
    let state = DashboardState::new(hub, flake, Arc::new(config));
    let router = crate::transport::build_router(state);

    tracing::info!(addr = %listen_addr, "nixfleetd listening");
    let listener = TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}
