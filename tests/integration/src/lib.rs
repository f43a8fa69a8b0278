// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared harness for building an in-process `nixfleet-dashboard` instance
//! against a temporary SQLite file, used by the integration test binaries
//! under `tests/`.

use std::sync::Arc;

use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::Argon2;
use nixfleet_dashboard::config::DashboardConfig;
use nixfleet_dashboard::flake::FlakeWatcher;
use nixfleet_dashboard::hub::Hub;
use nixfleet_dashboard::remote::RemoteCache;
use nixfleet_dashboard::state::DashboardState;
use nixfleet_dashboard::state_manager::StateManager;
use nixfleet_dashboard::store::Store;

/// Password every [`Harness`] accepts at `/login`, before hashing.
pub const TEST_PASSWORD: &str = "correct-horse-battery-staple";

/// Everything a test needs alive for the lifetime of one `#[tokio::test]`.
/// The backing SQLite file is deleted when `_db_dir` drops.
pub struct Harness {
    pub state: DashboardState,
    _db_dir: tempfile::TempDir,
}

impl Harness {
    /// Build a harness with no authentication configured — suitable for
    /// tests against endpoints that don't require a session.
    pub async fn bare() -> Self {
        Self::build(None, None).await
    }

    /// Build a harness with a password (and optional TOTP secret)
    /// configured, so `/login` is reachable.
    pub async fn with_login(totp_secret: Option<&str>) -> Self {
        let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
        let hash = Argon2::default()
            .hash_password(TEST_PASSWORD.as_bytes(), &salt)
            .expect("hash test password")
            .to_string();
        Self::build(Some(hash), totp_secret.map(str::to_owned)).await
    }

    async fn build(password_hash: Option<String>, totp_secret: Option<String>) -> Self {
        let db_dir = tempfile::tempdir().expect("create temp db dir");
        let db_path = db_dir.path().join("nixfleet.db");

        let mut config = DashboardConfig::parse_from(["nixfleetd"]);
        config.auth.password_hash = password_hash;
        config.auth.totp_secret = totp_secret;
        config.auth.session_secret = Some("a".repeat(128));
        // Slow every interval loop down far past a test's lifetime; this
        // harness never spawns them anyway (see below), but keeps the
        // config internally consistent if a test reaches for `to_tuning()`.
        config.stale_sweep.heartbeat_interval_ms = 3_600_000;

        let store = Store::open(&db_path).expect("open test store");
        let state_manager = Arc::new(StateManager::load(store.clone()).await.expect("load state manager"));
        let remote = Arc::new(RemoteCache::new(None, None, config.remote.ttl()));
        let flake = FlakeWatcher::new(
            None,
            None,
            config.flake.title_pattern.clone(),
            config.flake.label.clone(),
            config.flake.poll_ttl(),
            config.flake.deploy_propagation_delay(),
            config.flake.deploy_host_timeout(),
        );
        let hub = Hub::with_command_timeouts(
            store,
            state_manager,
            remote,
            config.server.dashboard_version.clone(),
            config.command_timeout.soft_timeout_ms as i64,
            config.command_timeout.hard_timeout_ms as i64,
            db_dir.path().join("data"),
        );
        hub.resync_on_startup().await.expect("resync on startup");

        let state = DashboardState::new(hub, flake, Arc::new(config));
        Self { state, _db_dir: db_dir }
    }

    pub fn router(&self) -> axum::Router {
        nixfleet_dashboard::transport::build_router(self.state.clone())
    }
}
