// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Post-validation classifier: compares a pre-dispatch [`Snapshot`]
//! to the freshly-updated host record and a terminal `status` frame, and
//! decides what "success" meant for that op.

use crate::model::{CompartmentStatus, Op, Snapshot};

/// Classifier outcomes across all ops. Kept as one enum
/// (rather than one per op) so `pull-switch`'s compound cases can reuse the
/// single-goal variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyOutcome {
    GoalAchieved,
    GoalAchievedWithAgent,
    PendingRestart,
    Partial,
    PartialGitOnly,
    PartialSystemOnly,
    GoalNotAchieved,
    ExitNonzero,
    TestPassed,
    TestFailed,
}

impl ClassifyOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GoalAchieved => "goal_achieved",
            Self::GoalAchievedWithAgent => "goal_achieved_with_agent",
            Self::PendingRestart => "pending_restart",
            Self::Partial => "partial",
            Self::PartialGitOnly => "partial_git_only",
            Self::PartialSystemOnly => "partial_system_only",
            Self::GoalNotAchieved => "goal_not_achieved",
            Self::ExitNonzero => "exit_nonzero",
            Self::TestPassed => "test_passed",
            Self::TestFailed => "test_failed",
        }
    }

    /// Whether this outcome is a form of success. Post-validation failures
    /// still clear `pending_command` but are logged as errors.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            Self::GoalAchieved
                | Self::GoalAchievedWithAgent
                | Self::PendingRestart
                | Self::TestPassed
        )
    }
}

/// `after` is the host record re-evaluated post-command; `exit_code` and
/// `generation_changed`/`agent_version_changed` are read off the terminal
/// `status` frame and the fresh host row respectively.
pub fn classify(
    op: Op,
    before: &Snapshot,
    after_compartments_system: CompartmentStatus,
    after_compartments_git: CompartmentStatus,
    after_agent_outdated: bool,
    after_generation: &str,
    after_agent_version: &str,
    exit_code: i32,
) -> ClassifyOutcome {
    let generation_changed = after_generation != before.generation;
    let agent_version_changed = after_agent_version != before.agent_version;

    match op {
        Op::Pull => {
            if exit_code != 0 {
                return ClassifyOutcome::ExitNonzero;
            }
            if after_compartments_git == CompartmentStatus::Ok {
                ClassifyOutcome::GoalAchieved
            } else if generation_changed {
                ClassifyOutcome::Partial
            } else {
                ClassifyOutcome::GoalNotAchieved
            }
        }
        Op::Switch => {
            if exit_code != 0 {
                return ClassifyOutcome::ExitNonzero;
            }
            if after_compartments_system == CompartmentStatus::Ok {
                if before.agent_outdated && !after_agent_outdated {
                    ClassifyOutcome::GoalAchievedWithAgent
                } else {
                    ClassifyOutcome::GoalAchieved
                }
            } else if agent_version_changed && after_agent_outdated {
                ClassifyOutcome::PendingRestart
            } else {
                ClassifyOutcome::GoalNotAchieved
            }
        }
        Op::Test => {
            if exit_code == 0 {
                ClassifyOutcome::TestPassed
            } else {
                ClassifyOutcome::TestFailed
            }
        }
        Op::PullSwitch => {
            if exit_code != 0 {
                return ClassifyOutcome::ExitNonzero;
            }
            let git_ok = after_compartments_git == CompartmentStatus::Ok;
            let system_ok = after_compartments_system == CompartmentStatus::Ok;
            match (git_ok, system_ok) {
                (true, true) => ClassifyOutcome::GoalAchieved,
                (true, false) => ClassifyOutcome::PartialGitOnly,
                (false, true) => ClassifyOutcome::PartialSystemOnly,
                (false, false) => ClassifyOutcome::GoalNotAchieved,
            }
        }
        Op::Refresh | Op::Update => {
            if exit_code == 0 {
                ClassifyOutcome::GoalAchieved
            } else {
                ClassifyOutcome::ExitNonzero
            }
        }
    }
}

#[cfg(test)]
#[path = "classify_tests.rs"]
mod tests;
