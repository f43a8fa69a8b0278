// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::model::CompartmentStatus;

fn remote(commit: &str, lock_hash: &str) -> RemoteVersion {
    RemoteVersion {
        commit: commit.to_owned(),
        message: String::new(),
        branch: "main".to_owned(),
        timestamp: 0,
        repo: "org/repo".to_owned(),
        lock_hash: lock_hash.to_owned(),
    }
}

#[test]
fn agent_unknown_when_no_version_reported() {
    let check = evaluate_agent("", "1.2.3");
    assert_eq!(check.status, CompartmentStatus::Unknown);
}

#[test]
fn agent_ok_when_versions_match() {
    assert_eq!(evaluate_agent("1.2.3", "1.2.3").status, CompartmentStatus::Ok);
}

#[test]
fn agent_outdated_on_mismatch() {
    assert_eq!(evaluate_agent("1.2.2", "1.2.3").status, CompartmentStatus::Outdated);
}

#[test]
fn git_error_is_never_unknown_on_fetch_failure() {
    let check = evaluate_git("abc1234", Some(Err("timeout")));
    assert_eq!(check.status, CompartmentStatus::Error);
}

#[test]
fn git_unknown_when_remote_not_configured() {
    let check = evaluate_git("abc1234", None);
    assert_eq!(check.status, CompartmentStatus::Unknown);
}

#[test]
fn git_ok_on_prefix_match() {
    let r = remote("abc1234def", "hash");
    let check = evaluate_git("abc1234xyz999", Some(Ok(&r)));
    assert_eq!(check.status, CompartmentStatus::Ok);
}

#[test]
fn git_outdated_on_full_mismatch() {
    let r = remote("def5678", "hash");
    let check = evaluate_git("abc1234", Some(Ok(&r)));
    assert_eq!(check.status, CompartmentStatus::Outdated);
}

#[test]
fn lock_never_time_based_just_compared() {
    let r = remote("abc1234", "samehash");
    assert_eq!(evaluate_lock("samehash", Some(Ok(&r))).status, CompartmentStatus::Ok);
    assert_eq!(evaluate_lock("otherhash", Some(Ok(&r))).status, CompartmentStatus::Outdated);
}

#[test]
fn h4_system_never_ok_when_git_errors() {
    let git = StatusCheck::new(CompartmentStatus::Error, "x");
    let lock = StatusCheck::new(CompartmentStatus::Ok, "x");
    let prev = StatusCheck::new(CompartmentStatus::Ok, "x");
    let system = evaluate_system(SystemSignal::SwitchSucceeded, &git, &lock, &prev);
    assert_ne!(system.status, CompartmentStatus::Ok);
}

#[test]
fn h4_system_never_ok_when_lock_outdated() {
    let git = StatusCheck::new(CompartmentStatus::Ok, "x");
    let lock = StatusCheck::new(CompartmentStatus::Outdated, "x");
    let prev = StatusCheck::new(CompartmentStatus::Unknown, "x");
    let system = evaluate_system(SystemSignal::SwitchSucceeded, &git, &lock, &prev);
    assert_ne!(system.status, CompartmentStatus::Ok);
}

#[test]
fn system_ok_when_switch_succeeded_and_gated_ok() {
    let git = StatusCheck::new(CompartmentStatus::Ok, "x");
    let lock = StatusCheck::new(CompartmentStatus::Ok, "x");
    let prev = StatusCheck::new(CompartmentStatus::Unknown, "x");
    let system = evaluate_system(SystemSignal::SwitchSucceeded, &git, &lock, &prev);
    assert_eq!(system.status, CompartmentStatus::Ok);
}

#[test]
fn system_unchanged_preserves_previous() {
    let git = StatusCheck::new(CompartmentStatus::Ok, "x");
    let lock = StatusCheck::new(CompartmentStatus::Ok, "x");
    let prev = StatusCheck::new(CompartmentStatus::Error, "stale error");
    let system = evaluate_system(SystemSignal::Unchanged, &git, &lock, &prev);
    assert_eq!(system.status, CompartmentStatus::Error);
}

#[test]
fn h6_tests_outdated_after_generation_change() {
    let prev = StatusCheck::new(CompartmentStatus::Ok, "10/10 passed");
    let degraded = degrade_tests_on_generation_change(&prev, "gen-a", "gen-b");
    assert_eq!(degraded.status, CompartmentStatus::Outdated);
}

#[test]
fn h6_tests_untouched_when_generation_unchanged() {
    let prev = StatusCheck::new(CompartmentStatus::Ok, "10/10 passed");
    let same = degrade_tests_on_generation_change(&prev, "gen-a", "gen-a");
    assert_eq!(same.status, CompartmentStatus::Ok);
}

#[test]
fn h6_no_fresh_report_degrades_stale_pass_via_evaluate_tests() {
    let git = StatusCheck::new(CompartmentStatus::Ok, "x");
    let lock = StatusCheck::new(CompartmentStatus::Ok, "x");
    let prev = StatusCheck::new(CompartmentStatus::Ok, "10/10 passed");
    let tests = evaluate_tests(None, "gen-b", &git, &lock, &prev, "gen-a");
    assert_eq!(tests.status, CompartmentStatus::Outdated);
}

#[test]
fn h6_no_fresh_report_keeps_pass_when_generation_unchanged() {
    let git = StatusCheck::new(CompartmentStatus::Ok, "x");
    let lock = StatusCheck::new(CompartmentStatus::Ok, "x");
    let prev = StatusCheck::new(CompartmentStatus::Ok, "10/10 passed");
    let tests = evaluate_tests(None, "gen-a", &git, &lock, &prev, "gen-a");
    assert_eq!(tests.status, CompartmentStatus::Ok);
}

#[test]
fn tests_gated_by_h4_even_with_fresh_report() {
    let git = StatusCheck::new(CompartmentStatus::Outdated, "x");
    let lock = StatusCheck::new(CompartmentStatus::Ok, "x");
    let prev = StatusCheck::unknown("x");
    let report = TestReport { passed: 5, total: 5, generation: "gen-a".to_owned() };
    let tests = evaluate_tests(Some(&report), "gen-a", &git, &lock, &prev, "gen-a");
    assert_ne!(tests.status, CompartmentStatus::Ok);
}

#[test]
fn stale_working_recovers_to_unknown() {
    let check = StatusCheck { status: CompartmentStatus::Working, message: "running".into(), checked_at: 0 };
    let recovered = recover_stale_working(&check, STALE_WORKING_MS + 1);
    assert_eq!(recovered.status, CompartmentStatus::Unknown);
}

#[test]
fn fresh_working_is_not_recovered() {
    let check = StatusCheck { status: CompartmentStatus::Working, message: "running".into(), checked_at: 1000 };
    let recovered = recover_stale_working(&check, 1500);
    assert_eq!(recovered.status, CompartmentStatus::Working);
}

/// Classifier-purity law: same inputs, same output.
#[test]
fn evaluate_git_is_pure() {
    let r = remote("abc1234", "hash");
    let a = evaluate_git("abc1234", Some(Ok(&r)));
    let b = evaluate_git("abc1234", Some(Ok(&r)));
    assert_eq!(a.status, b.status);
    assert_eq!(a.message, b.message);
}
