// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration for `nixfleetd`. One `clap::Args` struct per concern
//! (`#[arg(long, default_value_t = ..., env = "...")]`) rather than one flat
//! struct, since options naturally group by the subsystem they tune.

use std::time::Duration;

use clap::Parser;

/// Top-level CLI/env configuration for the dashboard server.
#[derive(Debug, Clone, Parser)]
#[command(name = "nixfleetd", version)]
pub struct DashboardConfig {
    #[command(flatten)]
    pub server: ServerConfig,

    #[command(flatten)]
    pub auth: AuthConfig,

    #[command(flatten)]
    pub stale_sweep: StaleSweepConfig,

    #[command(flatten)]
    pub command_timeout: CommandTimeoutConfig,

    #[command(flatten)]
    pub remote: RemoteVersionConfig,

    #[command(flatten)]
    pub flake: FlakeWatcherConfig,
}

/// Server placement.
#[derive(Debug, Clone, clap::Args)]
pub struct ServerConfig {
    /// Address the HTTP/WebSocket server binds on.
    #[arg(long, default_value = "127.0.0.1:8080", env = "NIXFLEET_LISTEN_ADDR")]
    pub listen_addr: String,

    /// Externally-visible base URL, used for links rendered in the
    /// dashboard template.
    #[arg(long, default_value = "http://127.0.0.1:8080", env = "NIXFLEET_BASE_URL")]
    pub base_url: String,

    /// Directory holding per-command output log files.
    #[arg(long, default_value = "./data", env = "NIXFLEET_DATA_DIR")]
    pub data_dir: std::path::PathBuf,

    /// Path to the SQLite database file.
    #[arg(long, default_value = "./data/nixfleet.db", env = "NIXFLEET_DB_PATH")]
    pub db_path: std::path::PathBuf,

    /// This dashboard build's own version, compared against agent-reported
    /// versions for the Agent compartment.
    #[arg(long, default_value = env!("CARGO_PKG_VERSION"), env = "NIXFLEET_VERSION")]
    pub dashboard_version: String,

    /// Comma-separated WebSocket `Origin` allow-list. Empty allows
    /// only same-origin and localhost-to-localhost in development builds.
    #[arg(long, default_value = "", env = "NIXFLEET_ALLOWED_ORIGINS")]
    pub allowed_origins: String,

    /// Maximum inbound WebSocket message size in bytes.
    #[arg(long, default_value_t = 1 << 20, env = "NIXFLEET_WS_MAX_MESSAGE_BYTES")]
    pub ws_max_message_bytes: usize,

    /// WebSocket pong/read-deadline timeout in milliseconds; a ping is sent
    /// at ~9/10 of this interval.
    #[arg(long, default_value_t = 60_000, env = "NIXFLEET_WS_PONG_TIMEOUT_MS")]
    pub ws_pong_timeout_ms: u64,

    /// `sync` heartbeat beacon interval for connected browsers.
    #[arg(long, default_value_t = 30_000, env = "NIXFLEET_SYNC_INTERVAL_MS")]
    pub sync_interval_ms: u64,
}

impl ServerConfig {
    pub fn ws_pong_timeout(&self) -> Duration {
        Duration::from_millis(self.ws_pong_timeout_ms)
    }

    pub fn ws_ping_interval(&self) -> Duration {
        Duration::from_millis(self.ws_pong_timeout_ms * 9 / 10)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    /// Parsed `allowed_origins`, trimmed and with blanks dropped.
    pub fn allowed_origins_list(&self) -> Vec<String> {
        self.allowed_origins.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect()
    }
}

/// Required credentials and second-factor configuration.
#[derive(Debug, Clone, clap::Args)]
pub struct AuthConfig {
    /// Argon2 PHC hash of the dashboard operator's password.
    #[arg(long, env = "NIXFLEET_PASSWORD_HASH")]
    pub password_hash: Option<String>,

    /// Secret used to sign/encrypt the browser session cookie.
    #[arg(long, env = "NIXFLEET_SESSION_SECRET")]
    pub session_secret: Option<String>,

    /// Bearer token agents present on WebSocket upgrade.
    #[arg(long, env = "NIXFLEET_AGENT_TOKEN")]
    pub agent_token: Option<String>,

    /// Base32 TOTP secret. When set, second-factor is enabled and the
    /// reboot endpoint becomes available.
    #[arg(long, env = "NIXFLEET_TOTP_SECRET")]
    pub totp_secret: Option<String>,

    /// Browser session lifetime in seconds.
    #[arg(long, default_value_t = 12 * 3600, env = "NIXFLEET_SESSION_DURATION_SECS")]
    pub session_duration_secs: u64,

    /// Login attempts allowed per window.
    #[arg(long, default_value_t = 10, env = "NIXFLEET_RATE_LIMIT")]
    pub rate_limit: u32,

    /// Rolling window, in seconds, the login rate limit applies over.
    #[arg(long, default_value_t = 300, env = "NIXFLEET_RATE_WINDOW_SECS")]
    pub rate_window_secs: u64,

    /// Reboot attempts allowed per rolling hour.
    #[arg(long, default_value_t = 5, env = "NIXFLEET_REBOOT_RATE_LIMIT")]
    pub reboot_rate_limit: u32,

    /// Rolling window, in seconds, the reboot rate limit applies over.
    #[arg(long, default_value_t = 3600, env = "NIXFLEET_REBOOT_RATE_WINDOW_SECS")]
    pub reboot_rate_window_secs: u64,
}

impl AuthConfig {
    pub fn session_duration(&self) -> Duration {
        Duration::from_secs(self.session_duration_secs)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }

    pub fn reboot_rate_window(&self) -> Duration {
        Duration::from_secs(self.reboot_rate_window_secs)
    }

    pub fn totp_enabled(&self) -> bool {
        self.totp_secret.is_some()
    }

    /// Emit startup warnings when credentials are partially configured.
    pub fn log_startup_warnings(&self) {
        if self.password_hash.is_none() {
            tracing::warn!("NIXFLEET_PASSWORD_HASH unset: login is disabled");
        }
        if self.session_secret.is_none() {
            tracing::warn!("NIXFLEET_SESSION_SECRET unset: browser sessions cannot be signed");
        }
        if self.agent_token.is_none() {
            tracing::warn!("NIXFLEET_AGENT_TOKEN unset: agent WebSocket auth is disabled");
        }
        if !self.totp_enabled() {
            tracing::warn!("NIXFLEET_TOTP_SECRET unset: /reboot endpoint is unavailable");
        }
    }
}

/// Stale-sweep tuning.
#[derive(Debug, Clone, clap::Args)]
pub struct StaleSweepConfig {
    #[arg(long, default_value_t = 30_000, env = "NIXFLEET_HEARTBEAT_INTERVAL_MS")]
    pub heartbeat_interval_ms: u64,

    #[arg(long, default_value_t = 120, env = "NIXFLEET_STALE_MULTIPLIER")]
    pub stale_multiplier: u32,

    #[arg(long, default_value_t = 300_000, env = "NIXFLEET_STALE_MINIMUM_MS")]
    pub stale_minimum_ms: u64,

    #[arg(long, default_value_t = 60_000, env = "NIXFLEET_STALE_CLEANUP_INTERVAL_MS")]
    pub stale_cleanup_interval_ms: u64,
}

impl StaleSweepConfig {
    pub fn to_tuning(&self) -> crate::stale_sweep::StaleSweepTuning {
        crate::stale_sweep::StaleSweepTuning {
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            stale_multiplier: self.stale_multiplier,
            stale_minimum: Duration::from_millis(self.stale_minimum_ms),
            cleanup_interval: Duration::from_millis(self.stale_cleanup_interval_ms),
        }
    }
}

/// Per-command soft/hard timeout tuning.
#[derive(Debug, Clone, clap::Args)]
pub struct CommandTimeoutConfig {
    /// Elapsed time before a running command moves to `running_warning`.
    #[arg(long, default_value_t = 10 * 60_000, env = "NIXFLEET_COMMAND_SOFT_TIMEOUT_MS")]
    pub soft_timeout_ms: u64,

    /// Elapsed time before a running command moves to `timeout_pending` and
    /// waits on a user decision.
    #[arg(long, default_value_t = 30 * 60_000, env = "NIXFLEET_COMMAND_HARD_TIMEOUT_MS")]
    pub hard_timeout_ms: u64,
}

impl CommandTimeoutConfig {
    pub fn soft_timeout(&self) -> Duration {
        Duration::from_millis(self.soft_timeout_ms)
    }

    pub fn hard_timeout(&self) -> Duration {
        Duration::from_millis(self.hard_timeout_ms)
    }
}

/// Remote desired-state document fetcher.
#[derive(Debug, Clone, clap::Args)]
pub struct RemoteVersionConfig {
    /// URL of the remote desired-state document (e.g. `version.json`).
    /// Unset disables the Git/Lock compartments (they stay `unknown`).
    #[arg(long, env = "NIXFLEET_VERSION_URL")]
    pub version_url: Option<String>,

    /// Bearer token for the remote fetch, if required.
    #[arg(long, env = "NIXFLEET_VERSION_TOKEN")]
    pub version_token: Option<String>,

    #[arg(long, default_value_t = 30_000, env = "NIXFLEET_VERSION_FETCH_TTL_MS")]
    pub version_fetch_ttl_ms: u64,
}

impl RemoteVersionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.version_fetch_ttl_ms)
    }

    pub fn log_startup_warning(&self) {
        if self.version_url.is_none() {
            tracing::warn!("NIXFLEET_VERSION_URL unset: Git/Lock compartments disabled (stay unknown)");
        }
    }
}

/// Flake-update watcher.
#[derive(Debug, Clone, clap::Args)]
pub struct FlakeWatcherConfig {
    #[arg(long, env = "NIXFLEET_GITHUB_TOKEN")]
    pub github_token: Option<String>,

    /// `owner/repo` to poll for flake-lock-update pull requests.
    #[arg(long, env = "NIXFLEET_GITHUB_REPO")]
    pub github_repo: Option<String>,

    #[arg(long, default_value_t = 60_000, env = "NIXFLEET_GITHUB_POLL_TTL_MS")]
    pub github_poll_ttl_ms: u64,

    /// How long the merge-and-deploy pipeline waits per host for a
    /// terminal `status` before giving up on that host.
    #[arg(long, default_value_t = 15 * 60_000, env = "NIXFLEET_DEPLOY_HOST_TIMEOUT_MS")]
    pub deploy_host_timeout_ms: u64,

    /// Time to wait after merging before fanning `pull` out to targets, to
    /// give the remote a moment to propagate.
    #[arg(long, default_value_t = 5_000, env = "NIXFLEET_DEPLOY_PROPAGATION_DELAY_MS")]
    pub deploy_propagation_delay_ms: u64,

    /// PR title substring that marks a flake-lock-update PR when labels
    /// aren't used.
    #[arg(long, default_value = "flake.lock", env = "NIXFLEET_FLAKE_UPDATE_TITLE_PATTERN")]
    pub title_pattern: String,

    /// PR label that marks a flake-lock-update PR.
    #[arg(long, default_value = "flake-update", env = "NIXFLEET_FLAKE_UPDATE_LABEL")]
    pub label: String,
}

impl FlakeWatcherConfig {
    pub fn poll_ttl(&self) -> Duration {
        Duration::from_millis(self.github_poll_ttl_ms)
    }

    pub fn deploy_host_timeout(&self) -> Duration {
        Duration::from_millis(self.deploy_host_timeout_ms)
    }

    pub fn deploy_propagation_delay(&self) -> Duration {
        Duration::from_millis(self.deploy_propagation_delay_ms)
    }

    pub fn enabled(&self) -> bool {
        self.github_repo.is_some()
    }

    pub fn log_startup_warning(&self) {
        if !self.enabled() {
            tracing::warn!("NIXFLEET_GITHUB_REPO unset: flake-update watcher disabled");
        } else if self.github_token.is_none() {
            tracing::warn!("NIXFLEET_GITHUB_TOKEN unset: flake-update watcher will hit unauthenticated rate limits");
        }
    }
}
