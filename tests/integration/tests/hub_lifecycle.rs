// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios driven straight against [`nixfleet_dashboard::hub::Hub`],
//! the way an agent's read-pump and the HTTP dispatch handler would: register,
//! heartbeat, dispatch, and the terminal frames that close a command out.

use nixfleet_dashboard::model::{CompartmentStatus, Op};
use nixfleet_dashboard::protocol::{
    AgentFrame, HeartbeatPayload, OutputPayload, RegisterPayload, RejectReason, RejectedPayload,
    StatusPayload, StreamKind, TerminalStatus,
};
use nixfleet_specs::Harness;

fn register_payload(hostname: &str, generation: &str) -> RegisterPayload {
    RegisterPayload {
        hostname: hostname.to_owned(),
        os_kind: "nixos".to_owned(),
        location: "rack-1".to_owned(),
        device_type: "server".to_owned(),
        theme_color: None,
        agent_version: "0.0.0".to_owned(),
        os_version: "nixos-24.05".to_owned(),
        nixpkgs_version: "nixpkgs-24.05".to_owned(),
        generation: generation.to_owned(),
    }
}

async fn register(harness: &Harness, hostname: &str, generation: &str) -> tokio::sync::mpsc::UnboundedReceiver<nixfleet_dashboard::protocol::DashboardFrame> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    harness.state.hub.agent_connected(tx, register_payload(hostname, generation)).await.expect("register agent");
    rx
}

/// H1: a second `register` for the same hostname evicts the first session
/// rather than running the two side by side.
#[tokio::test]
async fn duplicate_register_evicts_previous_session() {
    let harness = Harness::bare().await;
    let hub = &harness.state.hub;

    let (tx1, _rx1) = tokio::sync::mpsc::unbounded_channel();
    let first = hub.agent_connected(tx1, register_payload("hsb0", "gen-1")).await.expect("first register");
    assert!(!first.is_closed());

    let (tx2, _rx2) = tokio::sync::mpsc::unbounded_channel();
    let second = hub.agent_connected(tx2, register_payload("hsb0", "gen-1")).await.expect("second register");

    assert!(first.is_closed(), "the evicted session must be closed");
    assert!(!second.is_closed());
    assert!(hub.agent_of("hsb0").await.is_some());
}

/// S2: `switch` is refused with the `git_outdated` code while Git is
/// `outdated`, matching the precondition table exactly.
#[tokio::test]
async fn switch_refused_when_git_outdated() {
    let harness = Harness::bare().await;
    let hub = &harness.state.hub;
    let _rx = register(&harness, "hsb1", "gen-1").await;

    let mut host = harness.state.hub.store().get_host("hsb1").await.unwrap().unwrap();
    host.compartments.git = nixfleet_dashboard::model::StatusCheck::new(CompartmentStatus::Outdated, "behind remote");
    harness.state.hub.store().upsert_host(host).await.unwrap();

    let err = hub.dispatch_command("hsb1", Op::Switch, Vec::new(), false).await.unwrap_err();
    match err {
        nixfleet_dashboard::error::DashboardError::Conflict { code, .. } => assert_eq!(code, "git_outdated"),
        other => panic!("expected a git_outdated conflict, got {other:?}"),
    }
}

/// `force` bypasses the op-specific precondition (`system_ok`) but never the
/// base busy check.
#[tokio::test]
async fn force_bypasses_business_rule_but_not_busy_guard() {
    let harness = Harness::bare().await;
    let hub = &harness.state.hub;
    let _rx = register(&harness, "hsb2", "gen-1").await;

    let mut host = harness.state.hub.store().get_host("hsb2").await.unwrap().unwrap();
    host.compartments.system = nixfleet_dashboard::model::StatusCheck::new(CompartmentStatus::Ok, "already switched");
    harness.state.hub.store().upsert_host(host).await.unwrap();

    let refused = hub.dispatch_command("hsb2", Op::Switch, Vec::new(), false).await.unwrap_err();
    match refused {
        nixfleet_dashboard::error::DashboardError::Conflict { code, .. } => assert_eq!(code, "system_ok"),
        other => panic!("expected a system_ok conflict, got {other:?}"),
    }

    hub.dispatch_command("hsb2", Op::Switch, Vec::new(), true).await.expect("force should bypass system_ok");

    let busy = hub.dispatch_command("hsb2", Op::Pull, Vec::new(), true).await.unwrap_err();
    match busy {
        nixfleet_dashboard::error::DashboardError::Conflict { code, .. } => assert_eq!(code, "command_pending"),
        other => panic!("expected command_pending even with force, got {other:?}"),
    }
}

/// Happy-path `pull`: dispatch, then a terminal `status{exit_code: 0}`
/// clears `pending_command` and finishes the command record.
#[tokio::test]
async fn pull_dispatch_then_status_clears_pending_command() {
    let harness = Harness::bare().await;
    let hub = &harness.state.hub;
    let _rx = register(&harness, "hsb3", "gen-1").await;

    hub.dispatch_command("hsb3", Op::Pull, Vec::new(), false).await.expect("dispatch pull");
    let host = hub.store().get_host("hsb3").await.unwrap().unwrap();
    assert!(host.pending_command.is_some());

    hub.handle_agent_frame(
        "hsb3",
        AgentFrame::Output(OutputPayload { command: "pull".to_owned(), line: "fetching...".to_owned(), stream: StreamKind::Stdout }),
    )
    .await
    .expect("handle output");

    hub.handle_agent_frame(
        "hsb3",
        AgentFrame::Status(StatusPayload { command: "pull".to_owned(), status: TerminalStatus::Success, exit_code: 0, message: String::new() }),
    )
    .await
    .expect("handle status");

    let host = hub.store().get_host("hsb3").await.unwrap().unwrap();
    assert!(host.pending_command.is_none());

    let records = hub.store().recent_commands_for_host("hsb3", 1).await.unwrap();
    let record = records.into_iter().next().expect("one finished command");
    assert_eq!(record.exit_code, Some(0));
    assert!(record.classifier_result.is_some());
}

/// S4: a `switch` that restarts the agent drops the connection before the
/// terminal `status` frame arrives. The snapshot taken at dispatch survives
/// in the pending table and is consumed on the first heartbeat after
/// reconnect that reports a changed generation.
#[tokio::test]
async fn deferred_switch_resolves_on_reconnect_heartbeat() {
    let harness = Harness::bare().await;
    let hub = &harness.state.hub;
    let _rx = register(&harness, "hsb4", "gen-1").await;

    hub.dispatch_command("hsb4", Op::Switch, Vec::new(), true).await.expect("dispatch switch");
    let host = hub.store().get_host("hsb4").await.unwrap().unwrap();
    assert!(host.pending_command.is_some());

    // Agent's own restart drops the connection before `status` arrives.
    if let Some(session) = hub.agent_of("hsb4").await {
        hub.agent_disconnected(&session).await;
    }

    // Reconnect and re-register at the same generation — not the deferred
    // case yet, a fresh heartbeat at gen-1 would be a no-op here.
    let _rx = register(&harness, "hsb4", "gen-1").await;

    // The agent's first heartbeat after reboot reports the new generation.
    hub.handle_agent_frame(
        "hsb4",
        AgentFrame::Heartbeat(HeartbeatPayload { generation: "gen-2".to_owned(), ..Default::default() }),
    )
    .await
    .expect("handle heartbeat");

    let host = hub.store().get_host("hsb4").await.unwrap().unwrap();
    assert!(host.pending_command.is_none(), "deferred post-validation should have cleared pending_command");

    let records = hub.store().recent_commands_for_host("hsb4", 1).await.unwrap();
    let record = records.into_iter().next().expect("one finished command");
    assert_eq!(record.exit_code, Some(0));
    assert!(record.classifier_result.is_some());
}

/// An agent `rejected` frame (busy/unsupported) clears `pending_command`
/// without running the post-validator, and is recorded as `rejected`.
#[tokio::test]
async fn rejected_frame_finishes_command_without_classifying() {
    let harness = Harness::bare().await;
    let hub = &harness.state.hub;
    let _rx = register(&harness, "hsb5", "gen-1").await;

    hub.dispatch_command("hsb5", Op::Test, Vec::new(), false).await.expect("dispatch test");

    hub.handle_agent_frame("hsb5", AgentFrame::Rejected(RejectedPayload { command: "test".to_owned(), reason: RejectReason::Busy }))
        .await
        .expect("handle rejected");

    let host = hub.store().get_host("hsb5").await.unwrap().unwrap();
    assert!(host.pending_command.is_none());

    let records = hub.store().recent_commands_for_host("hsb5", 1).await.unwrap();
    let record = records.into_iter().next().expect("one finished command");
    assert_eq!(record.classifier_result.as_deref(), Some("rejected"));
}

/// H3: `resync_on_startup` marks every previously-online host offline and
/// orphans any command still `executing` — the crash-recovery path no agent
/// reconnect is required to trigger.
#[tokio::test]
async fn resync_on_startup_clears_stale_online_and_pending_state() {
    let harness = Harness::bare().await;
    let hub = &harness.state.hub;
    let _rx = register(&harness, "hsb6", "gen-1").await;
    hub.dispatch_command("hsb6", Op::Pull, Vec::new(), false).await.expect("dispatch pull");

    // Simulate a dashboard crash: the host is still marked online with a
    // pending_command in the store, but there is no live agent session to
    // ever answer it (a fresh process wouldn't have one either).
    hub.resync_on_startup().await.expect("resync");

    let host = hub.store().get_host("hsb6").await.unwrap().unwrap();
    assert!(!host.online);

    let records = hub.store().recent_commands_for_host("hsb6", 1).await.unwrap();
    let record = records.into_iter().next().expect("one command record");
    assert_eq!(record.classifier_result.as_deref(), Some("orphaned"));
}
