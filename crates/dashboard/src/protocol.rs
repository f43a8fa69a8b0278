// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire frames for both WebSocket surfaces: agent <-> dashboard and
//! browser <-> dashboard.

use serde::{Deserialize, Serialize};

use crate::model::{CommandRecord, Compartments, Host, LogEntry, Metrics, Op, SpecialOp};

// -- Agent -> dashboard ------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum AgentFrame {
    Register(RegisterPayload),
    Heartbeat(HeartbeatPayload),
    Output(OutputPayload),
    Status(StatusPayload),
    TestProgress(TestProgressPayload),
    Rejected(RejectedPayload),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterPayload {
    pub hostname: String,
    #[serde(rename = "os-kind")]
    pub os_kind: String,
    pub location: String,
    #[serde(rename = "device-type")]
    pub device_type: String,
    #[serde(rename = "theme-color", default)]
    pub theme_color: Option<String>,
    #[serde(rename = "agent-version")]
    pub agent_version: String,
    #[serde(rename = "os-version")]
    pub os_version: String,
    #[serde(rename = "nixpkgs-version")]
    pub nixpkgs_version: String,
    pub generation: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeartbeatPayload {
    pub generation: String,
    #[serde(rename = "nixpkgs-version", default)]
    pub nixpkgs_version: String,
    /// Agent's own view of what's pending; used only defensively.
    #[serde(default)]
    pub pending_command: Option<String>,
    #[serde(default)]
    pub metrics: Metrics,
    #[serde(default)]
    pub lock_hash: Option<String>,
    #[serde(default)]
    pub test_summary: Option<TestSummary>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TestSummary {
    pub passed: u32,
    pub total: u32,
    pub generation: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputPayload {
    pub command: String,
    pub line: String,
    pub stream: StreamKind,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Success,
    Error,
    Stopped,
    Timeout,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusPayload {
    pub command: String,
    pub status: TerminalStatus,
    pub exit_code: i32,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestProgressPayload {
    pub current: u32,
    pub total: u32,
    pub passed: u32,
    pub running: bool,
    #[serde(default)]
    pub result: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Busy,
    Unsupported,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RejectedPayload {
    pub command: String,
    pub reason: RejectReason,
}

// -- Dashboard -> agent ------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum DashboardFrame {
    Registered { hostname: String },
    Command { command: String, args: Vec<String> },
}

impl DashboardFrame {
    pub fn command_for_op(op: Op, args: Vec<String>) -> Self {
        Self::Command { command: op.as_str().to_owned(), args }
    }

    pub fn command_for_special(op: SpecialOp, args: Vec<String>) -> Self {
        Self::Command { command: op.as_str().to_owned(), args }
    }
}

// -- Browser <-> dashboard --------------------------------------

/// Full-state snapshot sent as the body of `init`/`full_state`.
#[derive(Debug, Clone, Serialize)]
pub struct FullState {
    pub hosts: Vec<Host>,
    pub active_commands: Vec<CommandRecord>,
    pub log_tail: Vec<LogEntry>,
}

/// One unit of change broadcast on every accepted mutation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Change {
    HostAdded { host: Host },
    HostRemoved { hostname: String },
    HostUpdated { host: Host },
    CommandStarted { hostname: String, op: String },
    CommandProgress { hostname: String, op: String, stream: String, line: String },
    CommandFinished { hostname: String, op: String, classification: String },
    CommandTimeoutState { hostname: String, op: String, state: String },
    LogAppended { entry: LogEntry },
    PrChanged { pr: serde_json::Value },
}

impl Change {
    /// The `host_id` every delta carries when it is host-scoped.
    pub fn host_id(&self) -> Option<&str> {
        match self {
            Self::HostAdded { host } | Self::HostUpdated { host } => Some(&host.hostname),
            Self::HostRemoved { hostname }
            | Self::CommandStarted { hostname, .. }
            | Self::CommandProgress { hostname, .. }
            | Self::CommandFinished { hostname, .. }
            | Self::CommandTimeoutState { hostname, .. } => Some(hostname),
            Self::LogAppended { .. } | Self::PrChanged { .. } => None,
        }
    }
}

/// Messages the dashboard sends to browsers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Init { version: u64, snapshot: FullState },
    Delta { version: u64, change: Change },
    FullState { version: u64, snapshot: FullState },
    Sync { version: u64 },
}

/// Messages browsers send to the dashboard.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    GetState,
    Subscribe { #[serde(default)] topics: Vec<String> },
    Unsubscribe { #[serde(default)] topics: Vec<String> },
}
