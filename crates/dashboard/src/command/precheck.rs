// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pre-dispatch validation.

use crate::model::{CompartmentStatus, Host, Op};

/// Result of a pre-validator: `valid=false` yields an HTTP 409 with
/// `{code, message}` and nothing is dispatched or snapshotted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecheckResult {
    pub valid: bool,
    pub code: String,
    pub message: String,
}

impl PrecheckResult {
    pub fn ok() -> Self {
        Self { valid: true, code: "ok".to_owned(), message: "precheck passed".to_owned() }
    }

    pub fn refuse(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { valid: false, code: code.into(), message: message.into() }
    }
}

/// Base check shared by every regular op: host
/// must be online and `pending_command` must be empty.
pub fn can_execute(host: &Host) -> PrecheckResult {
    if !host.online {
        return PrecheckResult::refuse("host_offline", "host is not connected");
    }
    if host.pending_command.is_some() {
        return PrecheckResult::refuse("command_pending", "a command is already in flight");
    }
    PrecheckResult::ok()
}

/// Full pre-validator for a regular op. `force` skips the
/// command-specific check but never the base check. `dashboard_version` is
/// needed to evaluate the agent-outdated condition in the `switch` /
/// `pull-switch` rows.
pub fn precheck(host: &Host, op: Op, force: bool, dashboard_version: &str) -> PrecheckResult {
    if op.bypasses_pending() {
        // refresh: lightweight, always permitted.
        if !host.online {
            return PrecheckResult::refuse("host_offline", "host is not connected");
        }
        return PrecheckResult::ok();
    }

    let base = can_execute(host);
    if !base.valid {
        return base;
    }
    if force {
        return PrecheckResult::ok();
    }

    let git = host.compartments.git.status;
    let system = host.compartments.system.status;
    let agent_outdated = host.agent_outdated(dashboard_version);

    match op {
        Op::Pull => {
            if git == CompartmentStatus::Ok {
                PrecheckResult::refuse("git_ok", "already current, nothing to pull")
            } else {
                PrecheckResult::ok()
            }
        }
        Op::Switch => {
            if git == CompartmentStatus::Outdated {
                PrecheckResult::refuse(
                    "git_outdated",
                    "Pull required before switch (git outdated)",
                )
            } else if system == CompartmentStatus::Ok && !agent_outdated {
                PrecheckResult::refuse("system_ok", "already switched to the latest system")
            } else {
                PrecheckResult::ok()
            }
        }
        Op::PullSwitch => {
            if git == CompartmentStatus::Ok && system == CompartmentStatus::Ok && !agent_outdated {
                PrecheckResult::refuse("already_current", "git, system, and agent all current")
            } else {
                PrecheckResult::ok()
            }
        }
        Op::Test => PrecheckResult::ok(),
        Op::Refresh | Op::Update => PrecheckResult::ok(),
    }
}

#[cfg(test)]
#[path = "precheck_tests.rs"]
mod tests;
