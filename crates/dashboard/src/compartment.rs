// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pure compartment evaluator. Turns raw inputs — heartbeat fields,
//! remote desired-state, command outcomes — into the five-dot display
//! model. Kept as standalone functions over plain values (no `Hub`/`Store`
//! dependency) so the classifier-purity law is checkable directly.

use crate::model::{CompartmentStatus, Host, RemoteVersion, StatusCheck};

/// Minimum generation-prefix length accepted as a match (full or >= 7-char
/// prefix).
const GENERATION_PREFIX_LEN: usize = 7;

/// How long a compartment may sit at `working` before the stale-recovery
/// rule forces it back to `unknown`.
pub const STALE_WORKING_MS: i64 = 10 * 60 * 1000;

fn generations_match(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    let len = GENERATION_PREFIX_LEN.min(a.len()).min(b.len());
    len >= GENERATION_PREFIX_LEN && a[..len] == b[..len]
}

/// Agent compartment: compare agent-reported version with the dashboard's
/// own build.
pub fn evaluate_agent(agent_version: &str, dashboard_version: &str) -> StatusCheck {
    if agent_version.is_empty() {
        StatusCheck::unknown("agent has not reported a version")
    } else if agent_version == dashboard_version {
        StatusCheck::new(CompartmentStatus::Ok, "agent up to date")
    } else {
        StatusCheck::new(
            CompartmentStatus::Outdated,
            format!("agent {agent_version} != dashboard {dashboard_version}"),
        )
    }
}

/// Whether the remote desired-state document is configured and fetchable.
/// `None` means "not configured" (unknown); `Some(Err)` means "fetch
/// failed" (error, H5); `Some(Ok(remote))` is the happy path.
pub type RemoteResult<'a> = Option<Result<&'a RemoteVersion, &'a str>>;

/// Git compartment.
pub fn evaluate_git(host_generation: &str, remote: RemoteResult<'_>) -> StatusCheck {
    match remote {
        None => StatusCheck::unknown("remote desired state not configured"),
        Some(Err(reason)) => {
            StatusCheck::new(CompartmentStatus::Error, format!("remote fetch failed: {reason}"))
        }
        Some(Ok(remote)) => {
            if generations_match(host_generation, &remote.commit) {
                StatusCheck::new(CompartmentStatus::Ok, "generation matches remote")
            } else {
                StatusCheck::new(
                    CompartmentStatus::Outdated,
                    format!("behind remote ({host_generation} -> {})", remote.commit),
                )
            }
        }
    }
}

/// Lock compartment: identical shape to Git but never time-based.
pub fn evaluate_lock(host_lock_hash: &str, remote: RemoteResult<'_>) -> StatusCheck {
    match remote {
        None => StatusCheck::unknown("remote lock hash not configured"),
        Some(Err(reason)) => {
            StatusCheck::new(CompartmentStatus::Error, format!("remote fetch failed: {reason}"))
        }
        Some(Ok(remote)) => {
            if host_lock_hash.is_empty() || remote.lock_hash.is_empty() {
                StatusCheck::unknown("lock hash not yet reported")
            } else if host_lock_hash == remote.lock_hash {
                StatusCheck::new(CompartmentStatus::Ok, "flake.lock matches remote")
            } else {
                StatusCheck::new(CompartmentStatus::Outdated, "flake.lock differs from remote")
            }
        }
    }
}

/// Outcome of the most recent `pull`/`switch` command, as inferred by the
/// command state machine's classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemSignal {
    PullChangedInputs,
    SwitchSucceeded,
    SwitchFailed,
    Unchanged,
}

/// System compartment.
///
/// `previous` is carried forward via COALESCE semantics so an
/// absent heartbeat never clobbers the last inferred value.
pub fn evaluate_system(
    signal: SystemSignal,
    git: &StatusCheck,
    lock: &StatusCheck,
    previous: &StatusCheck,
) -> StatusCheck {
    if let Some(degraded) = remote_gate_degrade(git, lock) {
        return degraded;
    }
    match signal {
        SystemSignal::PullChangedInputs => {
            StatusCheck::new(CompartmentStatus::Outdated, "pull changed inputs; switch required")
        }
        SystemSignal::SwitchSucceeded => {
            StatusCheck::new(CompartmentStatus::Ok, "switch succeeded")
        }
        SystemSignal::SwitchFailed => StatusCheck::new(CompartmentStatus::Error, "switch failed"),
        SystemSignal::Unchanged => previous.clone(),
    }
}

/// H4/H5: if Git or Lock is `error`, System/Tests must never show `ok`;
/// if either is outdated or unknown while the other side would have been
/// `ok`, the pair stays gated too (System/Tests are *never* set `ok`
/// unless both Git and Lock are `ok`).
fn remote_gate_degrade(git: &StatusCheck, lock: &StatusCheck) -> Option<StatusCheck> {
    if git.status == CompartmentStatus::Error || lock.status == CompartmentStatus::Error {
        return Some(StatusCheck::new(
            CompartmentStatus::Outdated,
            "remote verification degraded (git/lock error)",
        ));
    }
    if git.status != CompartmentStatus::Ok || lock.status != CompartmentStatus::Ok {
        return Some(StatusCheck::new(
            CompartmentStatus::Outdated,
            "remote verification degraded (git/lock not ok)",
        ));
    }
    None
}

/// Tests compartment input: a fresh report from the agent, generation-
/// scoped.
#[derive(Debug, Clone)]
pub struct TestReport {
    pub passed: u32,
    pub total: u32,
    pub generation: String,
}

/// Tests compartment. `tests_passed_generation` is the generation the last
/// `Ok` pass was recorded against, so a pass survives heartbeats but still
/// degrades once the host moves on to a new generation with no fresh
/// report (H6).
pub fn evaluate_tests(
    report: Option<&TestReport>,
    current_generation: &str,
    git: &StatusCheck,
    lock: &StatusCheck,
    previous: &StatusCheck,
    tests_passed_generation: &str,
) -> StatusCheck {
    if let Some(degraded) = remote_gate_degrade(git, lock) {
        return degraded;
    }
    match report {
        Some(report) => {
            if report.generation != current_generation {
                StatusCheck::new(
                    CompartmentStatus::Outdated,
                    format!("tests pass for {} but host is now on {current_generation}", report.generation),
                )
            } else if report.passed == report.total && report.total > 0 {
                StatusCheck::new(CompartmentStatus::Ok, format!("{}/{} tests passed", report.passed, report.total))
            } else {
                StatusCheck::new(
                    CompartmentStatus::Error,
                    format!("{}/{} tests passed", report.passed, report.total),
                )
            }
        }
        None => degrade_tests_on_generation_change(previous, tests_passed_generation, current_generation),
    }
}

/// Degrade a prior `Tests` pass to `outdated` when the host's generation no
/// longer matches the generation the pass was recorded for, called
/// whenever the host's generation changes (e.g. on heartbeat).
pub fn degrade_tests_on_generation_change(
    previous: &StatusCheck,
    passed_generation: &str,
    current_generation: &str,
) -> StatusCheck {
    if previous.status == CompartmentStatus::Ok && passed_generation != current_generation {
        StatusCheck::new(
            CompartmentStatus::Outdated,
            format!("tests passed for {passed_generation}, host now on {current_generation}"),
        )
    } else {
        previous.clone()
    }
}

/// Stale `working` recovery: if a compartment has sat at `working`
/// longer than [`STALE_WORKING_MS`] with no terminal status frame, force it
/// back to `unknown` so a stuck dot never lingers forever.
pub fn recover_stale_working(check: &StatusCheck, now_ms: i64) -> StatusCheck {
    if check.status == CompartmentStatus::Working && now_ms.saturating_sub(check.checked_at) > STALE_WORKING_MS {
        StatusCheck::unknown("stale working state recovered")
    } else {
        check.clone()
    }
}

/// Recompute every compartment for a host given the latest remote state and
/// command signal, preserving System/Tests history via COALESCE semantics.
pub fn evaluate_all(
    host: &Host,
    dashboard_version: &str,
    remote: RemoteResult<'_>,
    system_signal: SystemSignal,
    test_report: Option<&TestReport>,
) -> crate::model::Compartments {
    let agent = evaluate_agent(&host.agent_version, dashboard_version);
    let git = evaluate_git(&host.generation, remote);
    let lock = evaluate_lock(&host.lock_hash, remote);
    let system = evaluate_system(system_signal, &git, &lock, &host.compartments.system);
    let tests = evaluate_tests(
        test_report,
        &host.generation,
        &git,
        &lock,
        &host.compartments.tests,
        &host.tests_passed_generation,
    );
    crate::model::Compartments { agent, git, lock, system, tests }
}

#[cfg(test)]
#[path = "compartment_tests.rs"]
mod tests;
