// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The connection hub: owns every live agent and browser session, the
//! state-sync version authority, and the in-memory log ring.
//!
//! Each agent connection already has exactly one read-pump task
//! (`transport::ws`), so frames from a single host are naturally ordered
//! without a global dispatcher. The hub instead exposes async methods
//! guarded by fine-grained locks, held only across map mutations — never
//! across I/O, store calls, or session sends.

mod dispatch;
mod frames;
mod host_admin;
mod session;

pub use session::{AgentSession, BrowserSession, BROWSER_CHANNEL_CAPACITY};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::command::timeout::{CommandTimeout, TimeoutState, UserChoice};
use crate::command_log::CommandLogWriter;
use crate::error::DashboardError;
use crate::model::{CommandRecord, LogEntry, LogLevel, Op, SpecialOp, Snapshot};
use crate::protocol::{Change, FullState, ServerMessage};
use crate::remote::RemoteCache;
use crate::ring::LogRing;
use crate::state_manager::StateManager;
use crate::store::Store;

/// How many recent system-log lines a fresh `init`/`full_state` carries.
const LOG_TAIL_CAPACITY: usize = 500;

/// Taken at dispatch time and consumed exactly once by the post-validator
/// when the matching `status` frame arrives. `notify`
/// is populated only for callers that need to await the outcome in-process
/// (the flake-update pipeline's pull-then-switch fan-out).
pub(crate) struct PendingSnapshot {
    pub command_id: i64,
    pub op: Op,
    pub snapshot: Snapshot,
    pub notify: Option<tokio::sync::oneshot::Sender<crate::command::ClassifyOutcome>>,
    pub timeout: CommandTimeout,
    /// Path of this command's append-only output log file, if it could be
    /// created. `None` means file logging failed (logged, non-fatal) — the
    /// command still runs.
    pub log_path: Option<std::path::PathBuf>,
}

/// Owns every session and the authoritative copy of fleet state reachable
/// without a store round trip.
pub struct Hub {
    agents: RwLock<HashMap<String, Arc<AgentSession>>>,
    browsers: RwLock<HashMap<String, Arc<BrowserSession>>>,
    pending: RwLock<HashMap<String, PendingSnapshot>>,
    store: Store,
    state: Arc<StateManager>,
    remote: Arc<RemoteCache>,
    log_ring: Mutex<LogRing<LogEntry>>,
    command_log: CommandLogWriter,
    dashboard_version: String,
    dropped_broadcasts: AtomicU64,
    command_soft_timeout_ms: i64,
    command_hard_timeout_ms: i64,
}

impl Hub {
    pub fn new(
        store: Store,
        state: Arc<StateManager>,
        remote: Arc<RemoteCache>,
        dashboard_version: impl Into<String>,
    ) -> Arc<Self> {
        Self::with_command_timeouts(
            store,
            state,
            remote,
            dashboard_version,
            10 * 60_000,
            30 * 60_000,
            std::env::temp_dir().join("nixfleet-dashboard"),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_command_timeouts(
        store: Store,
        state: Arc<StateManager>,
        remote: Arc<RemoteCache>,
        dashboard_version: impl Into<String>,
        command_soft_timeout_ms: i64,
        command_hard_timeout_ms: i64,
        data_dir: impl Into<std::path::PathBuf>,
    ) -> Arc<Self> {
        Arc::new(Self {
            agents: RwLock::new(HashMap::new()),
            browsers: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            store,
            state,
            remote,
            log_ring: Mutex::new(LogRing::new(LOG_TAIL_CAPACITY)),
            command_log: CommandLogWriter::new(data_dir),
            dashboard_version: dashboard_version.into(),
            dropped_broadcasts: AtomicU64::new(0),
            command_soft_timeout_ms,
            command_hard_timeout_ms,
        })
    }

    pub fn dashboard_version(&self) -> &str {
        &self.dashboard_version
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// H3: replay the log tail and mark every previously-online host
    /// offline. Call once at startup before accepting connections.
    pub async fn resync_on_startup(&self) -> anyhow::Result<()> {
        let affected = self.store.mark_all_offline().await?;
        let orphaned = self.store.orphan_executing_commands().await?;
        if affected > 0 || orphaned > 0 {
            tracing::info!(affected, orphaned, "startup resync: offline cache and in-flight commands reset");
        }
        Ok(())
    }

    pub async fn agent_of(&self, hostname: &str) -> Option<Arc<AgentSession>> {
        self.agents.read().await.get(hostname).cloned()
    }

    async fn insert_agent(&self, hostname: String, session: Arc<AgentSession>) {
        let previous = self.agents.write().await.insert(hostname, session);
        // H1: at most one session per hostname. The previous handle's close
        // happens outside the registry lock — it only flips an atomic and
        // drops its write half, never blocking.
        if let Some(previous) = previous {
            previous.close();
        }
    }

    /// Remove `session` from the registry iff it is still the live entry for
    /// its hostname — a reconnect may already have replaced it, in which
    /// case this is a no-op (prevents a stale disconnect racing ahead of a
    /// fresh registration).
    pub(crate) async fn remove_agent_if_current(&self, session: &Arc<AgentSession>) -> bool {
        let mut guard = self.agents.write().await;
        match guard.get(&session.hostname) {
            Some(current) if Arc::ptr_eq(current, session) => {
                guard.remove(&session.hostname);
                true
            }
            _ => false,
        }
    }

    async fn register_browser_session(&self, tx: mpsc::Sender<ServerMessage>) -> (String, Arc<BrowserSession>) {
        let id = Uuid::new_v4().to_string();
        let session = Arc::new(BrowserSession::new(id.clone(), tx));
        self.browsers.write().await.insert(id.clone(), Arc::clone(&session));
        (id, session)
    }

    pub async fn unregister_browser(&self, id: &str) {
        if let Some(session) = self.browsers.write().await.remove(id) {
            session.close();
        }
    }

    /// Admit a browser connection: assign it a session id and hand back the
    /// unconditional `init` message.
    pub async fn register_browser(&self, tx: mpsc::Sender<ServerMessage>) -> anyhow::Result<(Arc<BrowserSession>, ServerMessage)> {
        let (_, session) = self.register_browser_session(tx).await;
        let init = self.full_state_message(true).await?;
        Ok((session, init))
    }

    pub async fn full_state_message(&self, as_init: bool) -> anyhow::Result<ServerMessage> {
        let snapshot = self.build_full_state().await?;
        let version = self.state.current_version().await;
        Ok(if as_init {
            ServerMessage::Init { version, snapshot }
        } else {
            ServerMessage::FullState { version, snapshot }
        })
    }

    async fn build_full_state(&self) -> anyhow::Result<FullState> {
        let hosts = self.store.list_hosts().await?;
        let mut active_commands: Vec<CommandRecord> = Vec::new();
        for host in &hosts {
            if host.pending_command.is_some() {
                if let Some(record) = self.store.recent_commands_for_host(&host.hostname, 1).await?.into_iter().next() {
                    active_commands.push(record);
                }
            }
        }
        let log_tail = self.log_ring.lock().await.tail(LOG_TAIL_CAPACITY).into_iter().cloned().collect();
        Ok(FullState { hosts, active_commands, log_tail })
    }

    /// Apply a state change: bump the version, persist it, and fan the delta
    /// out to every connected browser. A browser whose channel is
    /// full or closed simply misses the delta — callers rely on `sync`
    /// beacons and `get_state` requests to recover.
    pub(crate) async fn broadcast_change(&self, change: Change) -> anyhow::Result<()> {
        let message = self.state.apply(change).await?;
        self.fan_out(message).await;
        Ok(())
    }

    pub async fn broadcast_sync(&self) {
        let message = self.state.sync_message().await;
        self.fan_out(message).await;
    }

    async fn fan_out(&self, message: ServerMessage) {
        let browsers = self.browsers.read().await;
        let mut dead = Vec::new();
        for (id, session) in browsers.iter() {
            if !session.send(message.clone()) {
                if session.is_closed() {
                    dead.push(id.clone());
                } else {
                    self.dropped_broadcasts.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(browser = %id, "dropped broadcast: channel full");
                }
            }
        }
        drop(browsers);
        if !dead.is_empty() {
            let mut guard = self.browsers.write().await;
            for id in dead {
                guard.remove(&id);
            }
        }
    }

    pub fn dropped_broadcasts(&self) -> u64 {
        self.dropped_broadcasts.load(Ordering::Relaxed)
    }

    /// Append to the system log ring, persist it, and broadcast it.
    pub(crate) async fn log(&self, entry: LogEntry) -> anyhow::Result<()> {
        self.store.append_event(&entry).await?;
        self.log_ring.lock().await.push(entry.clone());
        self.broadcast_change(Change::LogAppended { entry }).await
    }

    pub(crate) async fn log_info(&self, host: impl Into<String>, state: impl Into<String>, message: impl Into<String>) {
        let entry = LogEntry::new(LogLevel::Info, host, state, message);
        if let Err(err) = self.log(entry).await {
            tracing::error!(%err, "failed to persist log entry");
        }
    }

    pub(crate) async fn log_warn(&self, host: impl Into<String>, state: impl Into<String>, message: impl Into<String>) {
        let entry = LogEntry::new(LogLevel::Warn, host, state, message);
        if let Err(err) = self.log(entry).await {
            tracing::error!(%err, "failed to persist log entry");
        }
    }

    /// Advance every in-flight command's timeout state machine one tick.
    /// Called from the stale-sweep loop; broadcasts a `CommandTimeoutState`
    /// delta for every host whose state actually changed.
    pub async fn tick_command_timeouts(&self) {
        let now = crate::model::epoch_ms();
        let mut transitions = Vec::new();
        {
            let mut pending = self.pending.write().await;
            for (hostname, snap) in pending.iter_mut() {
                let before = snap.timeout.state;
                let after = snap.timeout.tick(now);
                if after != before {
                    transitions.push((hostname.clone(), snap.op, after));
                }
            }
        }
        for (hostname, op, state) in transitions {
            let _ = self
                .broadcast_change(Change::CommandTimeoutState {
                    hostname: hostname.clone(),
                    op: op.as_str().to_owned(),
                    state: state.as_str().to_owned(),
                })
                .await;
            if state == TimeoutState::TimeoutPending {
                self.log_warn(
                    &hostname,
                    "command_timeout_pending",
                    format!("{} exceeded its hard timeout; awaiting a user choice", op.as_str()),
                )
                .await;
            }
        }
    }

    /// Apply a user's `wait`/`kill`/`ignore` decision to a command sitting
    /// at `timeout_pending`. `kill` sends a `stop` frame to the agent; the
    /// agent's own terminal `status` frame (handled separately) is what
    /// actually clears `pending_command`.
    pub async fn apply_command_timeout_choice(&self, hostname: &str, choice: UserChoice) -> Result<(), DashboardError> {
        let op = {
            let mut pending = self.pending.write().await;
            let snap = pending.get_mut(hostname).ok_or(DashboardError::NotFound)?;
            snap.timeout.apply_choice(choice);
            (snap.timeout.state == TimeoutState::Killing).then_some(snap.op)
        };

        let Some(op) = op else { return Ok(()) };

        let _ = self.dispatch_special(hostname, SpecialOp::Stop).await;
        if let Some(snap) = self.pending.write().await.get_mut(hostname) {
            snap.timeout.finish_kill(true);
        }
        self.broadcast_change(Change::CommandTimeoutState {
            hostname: hostname.to_owned(),
            op: op.as_str().to_owned(),
            state: TimeoutState::Timeout.as_str().to_owned(),
        })
        .await
        .map_err(|_| DashboardError::Internal)
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
