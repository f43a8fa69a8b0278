// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Core data model: hosts, compartments, command records, snapshots, and the
//! in-memory system log line shape.

use serde::{Deserialize, Serialize};

/// Operating-system family a host reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsKind {
    Nixos,
    Macos,
}

/// One of the five status columns shown per host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompartmentKind {
    Agent,
    Git,
    Lock,
    System,
    Tests,
}

/// The value every compartment takes, regardless of source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompartmentStatus {
    Ok,
    Outdated,
    Working,
    Error,
    Unknown,
}

/// `{status, message, checked_at}` triple shared by every compartment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCheck {
    pub status: CompartmentStatus,
    pub message: String,
    /// Epoch milliseconds.
    pub checked_at: i64,
}

impl StatusCheck {
    pub fn unknown(message: impl Into<String>) -> Self {
        Self { status: CompartmentStatus::Unknown, message: message.into(), checked_at: epoch_ms() }
    }

    pub fn new(status: CompartmentStatus, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), checked_at: epoch_ms() }
    }
}

/// The five-dot display model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Compartments {
    pub agent: StatusCheck,
    pub git: StatusCheck,
    pub lock: StatusCheck,
    pub system: StatusCheck,
    pub tests: StatusCheck,
}

impl Compartments {
    pub fn unknown() -> Self {
        Self {
            agent: StatusCheck::unknown("no data yet"),
            git: StatusCheck::unknown("no data yet"),
            lock: StatusCheck::unknown("no data yet"),
            system: StatusCheck::unknown("no data yet"),
            tests: StatusCheck::unknown("no data yet"),
        }
    }

    pub fn get(&self, kind: CompartmentKind) -> &StatusCheck {
        match kind {
            CompartmentKind::Agent => &self.agent,
            CompartmentKind::Git => &self.git,
            CompartmentKind::Lock => &self.lock,
            CompartmentKind::System => &self.system,
            CompartmentKind::Tests => &self.tests,
        }
    }
}

/// Sampled host metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub cpu_pct: f32,
    pub ram_pct: f32,
    pub swap_pct: f32,
    pub load_avg: f32,
}

/// An operation a user may request against a host. Distinct from
/// [`SpecialOp`] — only these participate in `pending_command` gating and
/// post-validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Pull,
    Switch,
    PullSwitch,
    Test,
    Refresh,
    Update,
}

impl Op {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Switch => "switch",
            Self::PullSwitch => "pull-switch",
            Self::Test => "test",
            Self::Refresh => "refresh",
            Self::Update => "update",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pull" => Some(Self::Pull),
            "switch" => Some(Self::Switch),
            "pull-switch" => Some(Self::PullSwitch),
            "test" => Some(Self::Test),
            "refresh" => Some(Self::Refresh),
            "update" => Some(Self::Update),
            _ => None,
        }
    }

    /// Whether this op bypasses `pending_command` entirely — always
    /// permitted, since it's a lightweight read-only poke.
    pub fn bypasses_pending(self) -> bool {
        matches!(self, Self::Refresh)
    }
}

/// `stop` / `restart` / `reboot` — dispatch-adjacent but never pre-validated
/// or post-validated as a regular op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialOp {
    Stop,
    Restart,
    Reboot,
}

impl SpecialOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Reboot => "reboot",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "stop" => Some(Self::Stop),
            "restart" => Some(Self::Restart),
            "reboot" => Some(Self::Reboot),
            _ => None,
        }
    }
}

/// The one command a host may have in flight, the single source of truth
/// for "busy".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCommand {
    pub op: Op,
    pub started_at: i64,
    /// `args[]` sent alongside the `command` frame.
    #[serde(default)]
    pub args: Vec<String>,
}

/// A deep copy of the fields the post-validator needs, taken at dispatch
/// time and consumed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub generation: String,
    pub agent_version: String,
    pub agent_outdated: bool,
    pub compartments: Compartments,
}

/// `{host, op, started_at, snapshot_before, classifier_result?, finished_at?,
/// exit_code?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRecord {
    pub host: String,
    pub op: Op,
    pub started_at: i64,
    pub snapshot_before: Snapshot,
    pub classifier_result: Option<String>,
    pub finished_at: Option<i64>,
    pub exit_code: Option<i32>,
}

/// One known machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub hostname: String,
    pub os_kind: OsKind,
    pub location: String,
    pub device_type: String,
    pub theme_color: String,

    pub last_seen: i64,
    pub online: bool,

    pub agent_version: String,
    pub os_version: String,
    pub nixpkgs_version: String,
    pub generation: String,
    pub lock_hash: String,
    /// Generation the last `Ok` Tests pass was recorded against, so the
    /// pass can be degraded once `generation` moves on with no fresh
    /// report.
    pub tests_passed_generation: String,

    pub pending_command: Option<PendingCommand>,

    pub compartments: Compartments,
    pub metrics: Metrics,
}

impl Host {
    pub fn new(hostname: impl Into<String>, os_kind: OsKind) -> Self {
        let now = epoch_ms();
        Self {
            hostname: hostname.into(),
            os_kind,
            location: String::new(),
            device_type: String::new(),
            theme_color: "#6b7280".to_owned(),
            last_seen: now,
            online: false,
            agent_version: String::new(),
            os_version: String::new(),
            nixpkgs_version: String::new(),
            generation: String::new(),
            lock_hash: String::new(),
            tests_passed_generation: String::new(),
            pending_command: None,
            compartments: Compartments::unknown(),
            metrics: Metrics::default(),
        }
    }

    /// Whether the agent's reported version is behind the dashboard's own
    /// build.
    pub fn agent_outdated(&self, dashboard_version: &str) -> bool {
        !self.agent_version.is_empty() && self.agent_version != dashboard_version
    }

    pub fn snapshot(&self, dashboard_version: &str) -> Snapshot {
        Snapshot {
            generation: self.generation.clone(),
            agent_version: self.agent_version.clone(),
            agent_outdated: self.agent_outdated(dashboard_version),
            compartments: self.compartments.clone(),
        }
    }
}

/// Log levels for both the system log ring and per-command log files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// `LogEntry{ts, level, host, state, code, message}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub ts: i64,
    pub level: LogLevel,
    pub host: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

impl LogEntry {
    pub fn new(
        level: LogLevel,
        host: impl Into<String>,
        state: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            ts: epoch_ms(),
            level,
            host: host.into(),
            state: state.into(),
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Remote desired-state document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteVersion {
    pub commit: String,
    pub message: String,
    pub branch: String,
    pub timestamp: i64,
    pub repo: String,
    pub lock_hash: String,
}

/// Current epoch milliseconds.
pub fn epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
