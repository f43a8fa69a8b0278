// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite-backed persistence. Wraps a single [`rusqlite::Connection`]
//! behind a blocking mutex and runs every query on the blocking thread pool,
//! since SQLite connections are not `Sync` across an async executor without
//! one.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};

use crate::model::{
    CommandRecord, Compartments, Host, LogEntry, LogLevel, Metrics, Op, OsKind, PendingCommand,
    Snapshot,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS hosts (
    hostname        TEXT PRIMARY KEY,
    os_kind         TEXT NOT NULL,
    location        TEXT NOT NULL DEFAULT '',
    device_type     TEXT NOT NULL DEFAULT '',
    theme_color     TEXT NOT NULL DEFAULT '#6b7280',
    last_seen       INTEGER NOT NULL DEFAULT 0,
    online          INTEGER NOT NULL DEFAULT 0,
    agent_version   TEXT NOT NULL DEFAULT '',
    os_version      TEXT NOT NULL DEFAULT '',
    nixpkgs_version TEXT NOT NULL DEFAULT '',
    generation      TEXT NOT NULL DEFAULT '',
    lock_hash       TEXT NOT NULL DEFAULT '',
    tests_passed_generation TEXT NOT NULL DEFAULT '',
    pending_command TEXT,
    compartments    TEXT NOT NULL DEFAULT '{}',
    metrics         TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS sessions (
    id          TEXT PRIMARY KEY,
    hostname    TEXT,
    kind        TEXT NOT NULL,
    csrf_token  TEXT NOT NULL DEFAULT '',
    created_at  INTEGER NOT NULL,
    expires_at  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS commands (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    hostname        TEXT NOT NULL,
    op              TEXT NOT NULL,
    started_at      INTEGER NOT NULL,
    finished_at     INTEGER,
    exit_code       INTEGER,
    classification  TEXT,
    status          TEXT NOT NULL DEFAULT 'executing',
    snapshot_before  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS command_logs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    command_id  INTEGER NOT NULL,
    path        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pipelines (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    kind        TEXT NOT NULL,
    started_at  INTEGER NOT NULL,
    finished_at INTEGER,
    status      TEXT NOT NULL DEFAULT 'running',
    detail      TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS event_log (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    ts       INTEGER NOT NULL,
    level    TEXT NOT NULL,
    host     TEXT NOT NULL,
    state    TEXT NOT NULL,
    code     TEXT,
    message  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS state_version (
    id      INTEGER PRIMARY KEY CHECK (id = 0),
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS reboot_attempts (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    hostname  TEXT NOT NULL,
    at        INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS login_attempts (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    at        INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_log (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    ts        INTEGER NOT NULL,
    actor     TEXT NOT NULL,
    action    TEXT NOT NULL,
    detail    TEXT NOT NULL DEFAULT '{}'
);
"#;

/// Handle to the SQLite-backed store. Cheap to clone (an `Arc` around the
/// connection mutex).
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (creating if absent) the database at `path` and run schema
    /// migrations. No migration framework — out of proportion for this
    /// crate's scope.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        conn.execute(
            "INSERT OR IGNORE INTO state_version (id, version) VALUES (0, 0)",
            [],
        )?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        conn.execute(
            "INSERT OR IGNORE INTO state_version (id, version) VALUES (0, 0)",
            [],
        )?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn blocking<F, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| anyhow::anyhow!("store mutex poisoned"))?;
            f(&guard)
        })
        .await?
    }

    // -- hosts ----------------------------------------------------------

    pub async fn upsert_host(&self, host: Host) -> anyhow::Result<()> {
        self.blocking(move |conn| {
            let pending = host.pending_command.as_ref().map(serde_json::to_string).transpose()?;
            let compartments = serde_json::to_string(&host.compartments)?;
            let metrics = serde_json::to_string(&host.metrics)?;
            conn.execute(
                "INSERT INTO hosts (hostname, os_kind, location, device_type, theme_color,
                    last_seen, online, agent_version, os_version, nixpkgs_version, generation,
                    lock_hash, tests_passed_generation, pending_command, compartments, metrics)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                 ON CONFLICT(hostname) DO UPDATE SET
                    os_kind = excluded.os_kind,
                    location = excluded.location,
                    device_type = excluded.device_type,
                    theme_color = excluded.theme_color,
                    last_seen = excluded.last_seen,
                    online = excluded.online,
                    agent_version = excluded.agent_version,
                    os_version = excluded.os_version,
                    nixpkgs_version = excluded.nixpkgs_version,
                    generation = excluded.generation,
                    lock_hash = excluded.lock_hash,
                    tests_passed_generation = excluded.tests_passed_generation,
                    pending_command = excluded.pending_command,
                    compartments = excluded.compartments,
                    metrics = excluded.metrics",
                params![
                    host.hostname,
                    os_kind_str(host.os_kind),
                    host.location,
                    host.device_type,
                    host.theme_color,
                    host.last_seen,
                    host.online as i64,
                    host.agent_version,
                    host.os_version,
                    host.nixpkgs_version,
                    host.generation,
                    host.lock_hash,
                    host.tests_passed_generation,
                    pending,
                    compartments,
                    metrics,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_host(&self, hostname: &str) -> anyhow::Result<Option<Host>> {
        let hostname = hostname.to_owned();
        self.blocking(move |conn| {
            let row = conn
                .query_row(
                    "SELECT hostname, os_kind, location, device_type, theme_color, last_seen,
                        online, agent_version, os_version, nixpkgs_version, generation,
                        lock_hash, tests_passed_generation, pending_command, compartments, metrics
                     FROM hosts WHERE hostname = ?1",
                    params![hostname],
                    row_to_host,
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    pub async fn list_hosts(&self) -> anyhow::Result<Vec<Host>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT hostname, os_kind, location, device_type, theme_color, last_seen,
                    online, agent_version, os_version, nixpkgs_version, generation,
                    lock_hash, tests_passed_generation, pending_command, compartments, metrics
                 FROM hosts ORDER BY hostname",
            )?;
            let hosts = stmt.query_map([], row_to_host)?.collect::<Result<Vec<_>, _>>()?;
            Ok(hosts)
        })
        .await
    }

    pub async fn delete_host(&self, hostname: &str) -> anyhow::Result<()> {
        let hostname = hostname.to_owned();
        self.blocking(move |conn| {
            conn.execute("DELETE FROM hosts WHERE hostname = ?1", params![hostname])?;
            Ok(())
        })
        .await
    }

    /// H3: on startup, every previously-online host is marked offline since
    /// the `status` column caches "has a live session handle", which is
    /// never true across a restart.
    pub async fn mark_all_offline(&self) -> anyhow::Result<u64> {
        self.blocking(move |conn| {
            let n = conn.execute("UPDATE hosts SET online = 0 WHERE online = 1", [])?;
            Ok(n as u64)
        })
        .await
    }

    /// Stale-sweep: clear `pending_command` for hosts offline past the
    /// threshold. Returns the affected hostnames.
    pub async fn clear_stale_pending(&self, threshold_ms: i64, now_ms: i64) -> anyhow::Result<Vec<String>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT hostname FROM hosts
                 WHERE online = 0 AND pending_command IS NOT NULL AND (?1 - last_seen) >= ?2",
            )?;
            let hostnames: Vec<String> =
                stmt.query_map(params![now_ms, threshold_ms], |r| r.get(0))?.collect::<Result<_, _>>()?;
            conn.execute(
                "UPDATE hosts SET pending_command = NULL
                 WHERE online = 0 AND pending_command IS NOT NULL AND (?1 - last_seen) >= ?2",
                params![now_ms, threshold_ms],
            )?;
            Ok(hostnames)
        })
        .await
    }

    // -- commands ---------------------------------------------------------

    pub async fn begin_command(&self, record: &CommandRecord) -> anyhow::Result<i64> {
        let record = record.clone();
        self.blocking(move |conn| {
            let snapshot = serde_json::to_string(&record.snapshot_before)?;
            conn.execute(
                "INSERT INTO commands (hostname, op, started_at, status, snapshot_before)
                 VALUES (?1, ?2, ?3, 'executing', ?4)",
                params![record.host, record.op.as_str(), record.started_at, snapshot],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn finish_command(
        &self,
        id: i64,
        exit_code: i32,
        classification: &str,
        finished_at: i64,
    ) -> anyhow::Result<()> {
        let classification = classification.to_owned();
        self.blocking(move |conn| {
            conn.execute(
                "UPDATE commands SET exit_code = ?1, classification = ?2, finished_at = ?3,
                    status = 'finished' WHERE id = ?4",
                params![exit_code, classification, finished_at, id],
            )?;
            Ok(())
        })
        .await
    }

    /// Record the append-only output log file path for a command, once its
    /// header has been written.
    pub async fn record_command_log_path(&self, command_id: i64, path: &Path) -> anyhow::Result<()> {
        let path = path.to_string_lossy().into_owned();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO command_logs (command_id, path) VALUES (?1, ?2)",
                params![command_id, path],
            )?;
            Ok(())
        })
        .await
    }

    /// Mark every still-`executing` command row as `orphaned` on startup,
    /// the same terminal shape `finish_command` would have left behind had
    /// the agent answered before the crash.
    pub async fn orphan_executing_commands(&self) -> anyhow::Result<u64> {
        let now = crate::model::epoch_ms();
        self.blocking(move |conn| {
            let n = conn.execute(
                "UPDATE commands SET status = 'orphaned', classification = 'orphaned',
                    exit_code = -1, finished_at = ?1 WHERE status = 'executing'",
                params![now],
            )?;
            Ok(n as u64)
        })
        .await
    }

    /// Retention: commands older than 30 days, event log older than 7 days
    ///.
    pub async fn run_retention(&self, now_ms: i64) -> anyhow::Result<()> {
        self.blocking(move |conn| {
            let commands_cutoff = now_ms - 30 * 24 * 3600 * 1000;
            let events_cutoff = now_ms - 7 * 24 * 3600 * 1000;
            conn.execute("DELETE FROM commands WHERE started_at < ?1", params![commands_cutoff])?;
            conn.execute("DELETE FROM event_log WHERE ts < ?1", params![events_cutoff])?;
            Ok(())
        })
        .await
    }

    pub async fn recent_commands_for_host(&self, hostname: &str, limit: i64) -> anyhow::Result<Vec<CommandRecord>> {
        let hostname = hostname.to_owned();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT hostname, op, started_at, snapshot_before, classification, finished_at, exit_code
                 FROM commands WHERE hostname = ?1 ORDER BY started_at DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![hostname, limit], row_to_command)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    // -- event log ----------------------------------------------------------

    pub async fn append_event(&self, entry: &LogEntry) -> anyhow::Result<()> {
        let entry = entry.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO event_log (ts, level, host, state, code, message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.ts,
                    log_level_str(entry.level),
                    entry.host,
                    entry.state,
                    entry.code,
                    entry.message,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn tail_events(&self, limit: i64) -> anyhow::Result<Vec<LogEntry>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT ts, level, host, state, code, message FROM event_log
                 ORDER BY id DESC LIMIT ?1",
            )?;
            let mut rows =
                stmt.query_map(params![limit], row_to_log_entry)?.collect::<Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
        .await
    }

    // -- state version --------------------------------------------------

    pub async fn load_version(&self) -> anyhow::Result<u64> {
        self.blocking(move |conn| {
            let v: i64 = conn.query_row("SELECT version FROM state_version WHERE id = 0", [], |r| r.get(0))?;
            Ok(v as u64)
        })
        .await
    }

    pub async fn save_version(&self, version: u64) -> anyhow::Result<()> {
        self.blocking(move |conn| {
            conn.execute(
                "UPDATE state_version SET version = ?1 WHERE id = 0",
                params![version as i64],
            )?;
            Ok(())
        })
        .await
    }

    // -- reboot rate limiting --------------------------------------------

    /// Count reboot attempts for `hostname` within the rolling window
    /// ending at `now_ms`.
    pub async fn reboot_attempts_in_window(&self, hostname: &str, window_ms: i64, now_ms: i64) -> anyhow::Result<i64> {
        let hostname = hostname.to_owned();
        self.blocking(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM reboot_attempts WHERE hostname = ?1 AND at >= ?2",
                params![hostname, now_ms - window_ms],
                |r| r.get(0),
            )?;
            Ok(count)
        })
        .await
    }

    pub async fn record_reboot_attempt(&self, hostname: &str, at: i64) -> anyhow::Result<()> {
        let hostname = hostname.to_owned();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO reboot_attempts (hostname, at) VALUES (?1, ?2)",
                params![hostname, at],
            )?;
            Ok(())
        })
        .await
    }

    /// Count `/login` attempts within the rolling window ending at `now_ms`,
    /// across all callers — the dashboard has exactly one operator account,
    /// so there is no per-identity key to rate-limit against.
    pub async fn login_attempts_in_window(&self, window_ms: i64, now_ms: i64) -> anyhow::Result<i64> {
        self.blocking(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM login_attempts WHERE at >= ?1",
                params![now_ms - window_ms],
                |r| r.get(0),
            )?;
            Ok(count)
        })
        .await
    }

    pub async fn record_login_attempt(&self, at: i64) -> anyhow::Result<()> {
        self.blocking(move |conn| {
            conn.execute("INSERT INTO login_attempts (at) VALUES (?1)", params![at])?;
            Ok(())
        })
        .await
    }

    // -- browser login sessions ------------------------------------------

    /// Record a freshly-issued browser session cookie. `id` is
    /// the value placed in the signed cookie, never the cookie's own MAC.
    /// `csrf_token` is a second, independent random value the browser must
    /// echo back on every state-changing request.
    pub async fn create_browser_session(&self, id: &str, csrf_token: &str, expires_at: i64) -> anyhow::Result<()> {
        let id = id.to_owned();
        let csrf_token = csrf_token.to_owned();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, hostname, kind, csrf_token, created_at, expires_at)
                 VALUES (?1, NULL, 'browser', ?2, ?3, ?4)",
                params![id, csrf_token, crate::model::epoch_ms(), expires_at],
            )?;
            Ok(())
        })
        .await
    }

    /// Whether `id` names a live, unexpired browser session.
    pub async fn browser_session_valid(&self, id: &str, now_ms: i64) -> anyhow::Result<bool> {
        let id = id.to_owned();
        self.blocking(move |conn| {
            let expires_at: Option<i64> = conn
                .query_row(
                    "SELECT expires_at FROM sessions WHERE id = ?1 AND kind = 'browser'",
                    params![id],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(expires_at.is_some_and(|exp| exp > now_ms))
        })
        .await
    }

    /// The CSRF token minted alongside this session, if the session exists
    /// and is unexpired.
    pub async fn browser_session_csrf(&self, id: &str, now_ms: i64) -> anyhow::Result<Option<String>> {
        let id = id.to_owned();
        self.blocking(move |conn| {
            let row: Option<(String, i64)> = conn
                .query_row(
                    "SELECT csrf_token, expires_at FROM sessions WHERE id = ?1 AND kind = 'browser'",
                    params![id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;
            Ok(row.filter(|(_, exp)| *exp > now_ms).map(|(token, _)| token))
        })
        .await
    }

    pub async fn delete_browser_session(&self, id: &str) -> anyhow::Result<()> {
        let id = id.to_owned();
        self.blocking(move |conn| {
            conn.execute("DELETE FROM sessions WHERE id = ?1 AND kind = 'browser'", params![id])?;
            Ok(())
        })
        .await
    }

    // -- audit --------------------------------------------------------------

    pub async fn audit(&self, actor: &str, action: &str, detail: serde_json::Value) -> anyhow::Result<()> {
        let actor = actor.to_owned();
        let action = action.to_owned();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO audit_log (ts, actor, action, detail) VALUES (?1, ?2, ?3, ?4)",
                params![crate::model::epoch_ms(), actor, action, detail.to_string()],
            )?;
            Ok(())
        })
        .await
    }
}

fn os_kind_str(kind: OsKind) -> &'static str {
    match kind {
        OsKind::Nixos => "nixos",
        OsKind::Macos => "macos",
    }
}

fn os_kind_from_str(s: &str) -> OsKind {
    match s {
        "macos" => OsKind::Macos,
        _ => OsKind::Nixos,
    }
}

fn log_level_str(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

fn log_level_from_str(s: &str) -> LogLevel {
    match s {
        "debug" => LogLevel::Debug,
        "warn" => LogLevel::Warn,
        "error" => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

fn row_to_host(row: &rusqlite::Row<'_>) -> rusqlite::Result<Host> {
    let tests_passed_generation: String = row.get(12)?;
    let pending_json: Option<String> = row.get(13)?;
    let compartments_json: String = row.get(14)?;
    let metrics_json: String = row.get(15)?;

    let pending_command: Option<PendingCommand> = pending_json
        .and_then(|s| serde_json::from_str(&s).ok());
    let compartments: Compartments =
        serde_json::from_str(&compartments_json).unwrap_or_else(|_| Compartments::unknown());
    let metrics: Metrics = serde_json::from_str(&metrics_json).unwrap_or_default();

    Ok(Host {
        hostname: row.get(0)?,
        os_kind: os_kind_from_str(&row.get::<_, String>(1)?),
        location: row.get(2)?,
        device_type: row.get(3)?,
        theme_color: row.get(4)?,
        last_seen: row.get(5)?,
        online: row.get::<_, i64>(6)? != 0,
        agent_version: row.get(7)?,
        os_version: row.get(8)?,
        nixpkgs_version: row.get(9)?,
        generation: row.get(10)?,
        lock_hash: row.get(11)?,
        tests_passed_generation,
        pending_command,
        compartments,
        metrics,
    })
}

fn row_to_command(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommandRecord> {
    let snapshot_json: String = row.get(3)?;
    let snapshot_before: Snapshot =
        serde_json::from_str(&snapshot_json).unwrap_or(Snapshot {
            generation: String::new(),
            agent_version: String::new(),
            agent_outdated: false,
            compartments: Compartments::unknown(),
        });
    Ok(CommandRecord {
        host: row.get(0)?,
        op: Op::from_str(&row.get::<_, String>(1)?).unwrap_or(Op::Refresh),
        started_at: row.get(2)?,
        snapshot_before,
        classifier_result: row.get(4)?,
        finished_at: row.get(5)?,
        exit_code: row.get(6)?,
    })
}

fn row_to_log_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LogEntry> {
    Ok(LogEntry {
        ts: row.get(0)?,
        level: log_level_from_str(&row.get::<_, String>(1)?),
        host: row.get(2)?,
        state: row.get(3)?,
        code: row.get(4)?,
        message: row.get(5)?,
    })
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
