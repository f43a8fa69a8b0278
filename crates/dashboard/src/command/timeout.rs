// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-command timeout state machine:
//! `running -> running_warning -> timeout_pending -> killing -> (timeout |
//! kill_failed)`. While `timeout_pending`, a user may `wait(+N min)`,
//! `kill`, or `ignore`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutState {
    Running,
    RunningWarning,
    TimeoutPending,
    Killing,
    Timeout,
    KillFailed,
}

impl TimeoutState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::RunningWarning => "running_warning",
            Self::TimeoutPending => "timeout_pending",
            Self::Killing => "killing",
            Self::Timeout => "timeout",
            Self::KillFailed => "kill_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserChoice {
    Wait { extend_minutes: u32 },
    Kill,
    Ignore,
}

/// Tracks one in-flight command's elapsed time against its soft/hard
/// timeouts and any user extension.
#[derive(Debug, Clone)]
pub struct CommandTimeout {
    pub state: TimeoutState,
    pub started_at: i64,
    pub soft_timeout_ms: i64,
    pub hard_timeout_ms: i64,
    pub extended_ms: i64,
}

impl CommandTimeout {
    pub fn new(started_at: i64, soft_timeout_ms: i64, hard_timeout_ms: i64) -> Self {
        Self { state: TimeoutState::Running, started_at, soft_timeout_ms, hard_timeout_ms, extended_ms: 0 }
    }

    /// Advance the state machine given the current time. Called from the
    /// stale-sweep / per-command ticker; never blocks.
    pub fn tick(&mut self, now_ms: i64) -> TimeoutState {
        let elapsed = now_ms.saturating_sub(self.started_at) - self.extended_ms;
        match self.state {
            TimeoutState::Running if elapsed >= self.soft_timeout_ms => {
                self.state = TimeoutState::RunningWarning;
            }
            TimeoutState::RunningWarning if elapsed >= self.hard_timeout_ms => {
                self.state = TimeoutState::TimeoutPending;
            }
            _ => {}
        }
        self.state
    }

    /// Apply a user decision while `timeout_pending`. No-op otherwise.
    pub fn apply_choice(&mut self, choice: UserChoice) {
        if self.state != TimeoutState::TimeoutPending {
            return;
        }
        match choice {
            UserChoice::Wait { extend_minutes } => {
                self.extended_ms += extend_minutes as i64 * 60_000;
                self.state = TimeoutState::RunningWarning;
            }
            UserChoice::Kill => {
                self.state = TimeoutState::Killing;
            }
            UserChoice::Ignore => {
                // Stay in timeout_pending; the next tick re-evaluates.
            }
        }
    }

    /// Record the outcome of a SIGTERM/SIGKILL attempt issued while
    /// `killing`.
    pub fn finish_kill(&mut self, succeeded: bool) {
        if self.state != TimeoutState::Killing {
            return;
        }
        self.state = if succeeded { TimeoutState::Timeout } else { TimeoutState::KillFailed };
    }
}

#[cfg(test)]
#[path = "timeout_tests.rs"]
mod tests;
