// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::model::Compartments;

fn snapshot(generation: &str, agent_version: &str, agent_outdated: bool) -> Snapshot {
    Snapshot {
        generation: generation.to_owned(),
        agent_version: agent_version.to_owned(),
        agent_outdated,
        compartments: Compartments::unknown(),
    }
}

/// S1: happy-path pull, exit 0, git after = ok.
#[test]
fn s1_pull_goal_achieved() {
    let before = snapshot("abc1234", "1.0.0", false);
    let outcome = classify(
        Op::Pull,
        &before,
        CompartmentStatus::Unknown,
        CompartmentStatus::Ok,
        false,
        "def5678",
        "1.0.0",
        0,
    );
    assert_eq!(outcome, ClassifyOutcome::GoalAchieved);
}

#[test]
fn pull_partial_when_generation_changed_but_git_not_ok() {
    let before = snapshot("abc1234", "1.0.0", false);
    let outcome = classify(
        Op::Pull,
        &before,
        CompartmentStatus::Unknown,
        CompartmentStatus::Outdated,
        false,
        "def5678",
        "1.0.0",
        0,
    );
    assert_eq!(outcome, ClassifyOutcome::Partial);
}

#[test]
fn pull_goal_not_achieved_when_nothing_changed() {
    let before = snapshot("abc1234", "1.0.0", false);
    let outcome = classify(
        Op::Pull,
        &before,
        CompartmentStatus::Unknown,
        CompartmentStatus::Outdated,
        false,
        "abc1234",
        "1.0.0",
        0,
    );
    assert_eq!(outcome, ClassifyOutcome::GoalNotAchieved);
}

#[test]
fn pull_exit_nonzero_wins_regardless_of_state() {
    let before = snapshot("abc1234", "1.0.0", false);
    let outcome = classify(
        Op::Pull,
        &before,
        CompartmentStatus::Unknown,
        CompartmentStatus::Ok,
        false,
        "def5678",
        "1.0.0",
        1,
    );
    assert_eq!(outcome, ClassifyOutcome::ExitNonzero);
}

#[test]
fn switch_goal_achieved_with_agent_when_outdated_flips_false() {
    let before = snapshot("abc1234", "1.0.0", true);
    let outcome = classify(
        Op::Switch,
        &before,
        CompartmentStatus::Ok,
        CompartmentStatus::Unknown,
        false,
        "abc1234",
        "1.1.0",
        0,
    );
    assert_eq!(outcome, ClassifyOutcome::GoalAchievedWithAgent);
}

/// S4: switch with agent restart -> deferred classification lands on
/// pending_restart when system isn't ok yet but the agent has a new
/// version and is still outdated (waiting on reconnect/heartbeat).
#[test]
fn s4_switch_pending_restart() {
    let before = snapshot("abc1234", "1.0.0", false);
    let outcome = classify(
        Op::Switch,
        &before,
        CompartmentStatus::Outdated,
        CompartmentStatus::Unknown,
        true,
        "abc1234",
        "1.1.0",
        0,
    );
    assert_eq!(outcome, ClassifyOutcome::PendingRestart);
}

#[test]
fn switch_goal_not_achieved_otherwise() {
    let before = snapshot("abc1234", "1.0.0", false);
    let outcome = classify(
        Op::Switch,
        &before,
        CompartmentStatus::Outdated,
        CompartmentStatus::Unknown,
        false,
        "abc1234",
        "1.0.0",
        0,
    );
    assert_eq!(outcome, ClassifyOutcome::GoalNotAchieved);
}

#[test]
fn test_op_maps_exit_code_directly() {
    let before = snapshot("abc1234", "1.0.0", false);
    assert_eq!(
        classify(Op::Test, &before, CompartmentStatus::Unknown, CompartmentStatus::Unknown, false, "abc1234", "1.0.0", 0),
        ClassifyOutcome::TestPassed
    );
    assert_eq!(
        classify(Op::Test, &before, CompartmentStatus::Unknown, CompartmentStatus::Unknown, false, "abc1234", "1.0.0", 1),
        ClassifyOutcome::TestFailed
    );
}

#[test]
fn pull_switch_compound_outcomes() {
    let before = snapshot("abc1234", "1.0.0", false);
    assert_eq!(
        classify(Op::PullSwitch, &before, CompartmentStatus::Ok, CompartmentStatus::Ok, false, "def5678", "1.0.0", 0),
        ClassifyOutcome::GoalAchieved
    );
    assert_eq!(
        classify(Op::PullSwitch, &before, CompartmentStatus::Unknown, CompartmentStatus::Ok, false, "def5678", "1.0.0", 0),
        ClassifyOutcome::PartialGitOnly
    );
    assert_eq!(
        classify(Op::PullSwitch, &before, CompartmentStatus::Ok, CompartmentStatus::Unknown, false, "def5678", "1.0.0", 0),
        ClassifyOutcome::PartialSystemOnly
    );
    assert_eq!(
        classify(Op::PullSwitch, &before, CompartmentStatus::Unknown, CompartmentStatus::Unknown, false, "def5678", "1.0.0", 0),
        ClassifyOutcome::GoalNotAchieved
    );
    assert_eq!(
        classify(Op::PullSwitch, &before, CompartmentStatus::Ok, CompartmentStatus::Ok, false, "def5678", "1.0.0", 1),
        ClassifyOutcome::ExitNonzero
    );
}

/// Classifier purity law: same input, same output.
#[test]
fn classify_is_pure() {
    let before = snapshot("abc1234", "1.0.0", false);
    let a = classify(Op::Pull, &before, CompartmentStatus::Unknown, CompartmentStatus::Ok, false, "def5678", "1.0.0", 0);
    let b = classify(Op::Pull, &before, CompartmentStatus::Unknown, CompartmentStatus::Ok, false, "def5678", "1.0.0", 0);
    assert_eq!(a, b);
}

mod classify_purity_proptest {
    use super::*;
    use proptest::prelude::*;

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Pull),
            Just(Op::Switch),
            Just(Op::PullSwitch),
            Just(Op::Test),
            Just(Op::Refresh),
            Just(Op::Update),
        ]
    }

    fn status_strategy() -> impl Strategy<Value = CompartmentStatus> {
        prop_oneof![
            Just(CompartmentStatus::Ok),
            Just(CompartmentStatus::Outdated),
            Just(CompartmentStatus::Working),
            Just(CompartmentStatus::Error),
            Just(CompartmentStatus::Unknown),
        ]
    }

    proptest! {
        /// §8 classifier-purity law: `Classify<Op>(before, after, exit) =
        /// Classify<Op>(before, after, exit)` for the same input, over the
        /// full input space rather than the handful of cases above.
        #[test]
        fn classify_same_input_same_output(
            op in op_strategy(),
            before_generation in "[a-z0-9]{1,8}",
            before_agent_version in "[0-9.]{1,6}",
            before_agent_outdated in any::<bool>(),
            after_system in status_strategy(),
            after_git in status_strategy(),
            after_agent_outdated in any::<bool>(),
            after_generation in "[a-z0-9]{1,8}",
            after_agent_version in "[0-9.]{1,6}",
            exit_code in any::<i32>(),
        ) {
            let before = snapshot(&before_generation, &before_agent_version, before_agent_outdated);
            let a = classify(
                op, &before, after_system, after_git, after_agent_outdated,
                &after_generation, &after_agent_version, exit_code,
            );
            let b = classify(
                op, &before, after_system, after_git, after_agent_outdated,
                &after_generation, &after_agent_version, exit_code,
            );
            prop_assert_eq!(a, b);
        }

        /// A nonzero exit code always wins for the ops that gate on it,
        /// regardless of the post-command compartment state.
        #[test]
        fn nonzero_exit_always_classifies_as_exit_nonzero(
            op in prop_oneof![Just(Op::Pull), Just(Op::Switch), Just(Op::PullSwitch), Just(Op::Refresh), Just(Op::Update)],
            after_system in status_strategy(),
            after_git in status_strategy(),
            after_agent_outdated in any::<bool>(),
            after_generation in "[a-z0-9]{1,8}",
            after_agent_version in "[0-9.]{1,6}",
            exit_code in 1..i32::MAX,
        ) {
            let before = snapshot("abc1234", "1.0.0", false);
            let outcome = classify(
                op, &before, after_system, after_git, after_agent_outdated,
                &after_generation, &after_agent_version, exit_code,
            );
            prop_assert_eq!(outcome, ClassifyOutcome::ExitNonzero);
        }
    }
}
