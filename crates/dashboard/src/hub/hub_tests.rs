// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::*;
use crate::model::OsKind;
use crate::protocol::RegisterPayload;
use crate::remote::RemoteCache;
use crate::store::Store;

async fn test_hub() -> Arc<Hub> {
    let store = Store::open_in_memory().unwrap();
    let state = Arc::new(StateManager::load(store.clone()).await.unwrap());
    let remote = Arc::new(RemoteCache::new(None, None, Duration::from_secs(30)));
    Hub::new(store, state, remote, "1.2.3")
}

fn register_payload(hostname: &str) -> RegisterPayload {
    RegisterPayload {
        hostname: hostname.to_owned(),
        os_kind: "nixos".to_owned(),
        location: "rack-1".to_owned(),
        device_type: "server".to_owned(),
        theme_color: None,
        agent_version: "1.2.3".to_owned(),
        os_version: "24.11".to_owned(),
        nixpkgs_version: "24.11".to_owned(),
        generation: "abc1234".to_owned(),
    }
}

#[tokio::test]
async fn register_creates_host_and_sends_registered_frame() {
    let hub = test_hub().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = hub.agent_connected(tx, register_payload("hsb0")).await.unwrap();

    assert_eq!(session.hostname, "hsb0");
    let frame = rx.try_recv().unwrap();
    match frame {
        crate::protocol::DashboardFrame::Registered { hostname } => assert_eq!(hostname, "hsb0"),
        _ => panic!("expected registered frame"),
    }

    let host = hub.store().get_host("hsb0").await.unwrap().unwrap();
    assert!(host.online);
    assert_eq!(hub.state.current_version().await, 1);
}

/// S5: a duplicate register for the same hostname evicts the incumbent
/// session exactly once, with no panic and no leaked read-pump.
#[tokio::test]
async fn duplicate_register_evicts_incumbent_exactly_once() {
    let hub = test_hub().await;
    let (tx1, _rx1) = mpsc::unbounded_channel();
    let first = hub.agent_connected(tx1, register_payload("hsb0")).await.unwrap();
    assert!(!first.is_closed());

    let (tx2, _rx2) = mpsc::unbounded_channel();
    let second = hub.agent_connected(tx2, register_payload("hsb0")).await.unwrap();

    assert!(first.is_closed(), "incumbent session must be closed on eviction");
    assert!(!second.is_closed());
    assert!(!Arc::ptr_eq(&first, &second));

    let current = hub.agent_of("hsb0").await.unwrap();
    assert!(Arc::ptr_eq(&current, &second));

    // Closing twice (e.g. a slow-to-notice disconnect of the evicted
    // session) must never panic and must never evict the new incumbent.
    first.close();
    assert!(Arc::ptr_eq(&hub.agent_of("hsb0").await.unwrap(), &second));
}

#[tokio::test]
async fn stale_disconnect_does_not_evict_a_reconnected_session() {
    let hub = test_hub().await;
    let (tx1, _rx1) = mpsc::unbounded_channel();
    let first = hub.agent_connected(tx1, register_payload("hsb0")).await.unwrap();

    let (tx2, _rx2) = mpsc::unbounded_channel();
    let _second = hub.agent_connected(tx2, register_payload("hsb0")).await.unwrap();

    // `first`'s read-pump notices the close only after the reconnect has
    // already replaced it in the registry.
    hub.agent_disconnected(&first).await;
    assert!(hub.agent_of("hsb0").await.is_some());
}

#[tokio::test]
async fn disconnect_marks_host_offline_and_broadcasts() {
    let hub = test_hub().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let session = hub.agent_connected(tx, register_payload("hsb0")).await.unwrap();

    hub.agent_disconnected(&session).await;

    let host = hub.store().get_host("hsb0").await.unwrap().unwrap();
    assert!(!host.online);
    assert!(hub.agent_of("hsb0").await.is_none());
}

#[tokio::test]
async fn browser_register_receives_unconditional_init() {
    let hub = test_hub().await;
    let (tx, mut rx) = mpsc::unbounded_channel::<crate::protocol::DashboardFrame>();
    hub.agent_connected(tx, register_payload("hsb0")).await.unwrap();
    let _ = rx.try_recv();

    let (btx, _brx) = mpsc::channel(BROWSER_CHANNEL_CAPACITY);
    let (_session, init) = hub.register_browser(btx).await.unwrap();
    match init {
        ServerMessage::Init { version, snapshot } => {
            assert_eq!(version, 1);
            assert_eq!(snapshot.hosts.len(), 1);
        }
        _ => panic!("expected init"),
    }
}

#[tokio::test]
async fn dispatch_command_refused_when_host_offline() {
    let hub = test_hub().await;
    hub.store().upsert_host(crate::model::Host::new("hsb0", OsKind::Nixos)).await.unwrap();

    let err = hub.dispatch_command("hsb0", crate::model::Op::Pull, vec![], false).await.unwrap_err();
    assert_eq!(err.code(), "host_offline");
}

/// S1: happy-path pull dispatch reaches the agent and marks the host busy.
#[tokio::test]
async fn dispatch_command_sends_frame_and_marks_pending() {
    let hub = test_hub().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    hub.agent_connected(tx, register_payload("hsb0")).await.unwrap();
    let _ = rx.try_recv();

    hub.dispatch_command("hsb0", crate::model::Op::Pull, vec![], false).await.unwrap();

    let frame = rx.try_recv().unwrap();
    match frame {
        crate::protocol::DashboardFrame::Command { command, .. } => assert_eq!(command, "pull"),
        _ => panic!("expected command frame"),
    }
    let host = hub.store().get_host("hsb0").await.unwrap().unwrap();
    assert!(host.pending_command.is_some());

    // A second dispatch while busy is refused by the base precheck.
    let err = hub.dispatch_command("hsb0", crate::model::Op::Pull, vec![], false).await.unwrap_err();
    assert_eq!(err.code(), "command_pending");
}

#[tokio::test]
async fn status_frame_clears_pending_and_classifies() {
    let hub = test_hub().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    hub.agent_connected(tx, register_payload("hsb0")).await.unwrap();
    let _ = rx.try_recv();

    hub.dispatch_command("hsb0", crate::model::Op::Test, vec![], false).await.unwrap();
    let _ = rx.try_recv();

    hub.handle_agent_frame(
        "hsb0",
        crate::protocol::AgentFrame::Status(crate::protocol::StatusPayload {
            command: "test".to_owned(),
            status: crate::protocol::TerminalStatus::Success,
            exit_code: 0,
            message: String::new(),
        }),
    )
    .await
    .unwrap();

    let host = hub.store().get_host("hsb0").await.unwrap().unwrap();
    assert!(host.pending_command.is_none());
}

/// H6 wiring: a heartbeat with no fresh test report still threads the
/// host's `tests_passed_generation` through to the evaluator, so a stale
/// pass degrades once the generation has moved on (pure-function coverage
/// of the degrade rule itself lives in `compartment_tests.rs`).
#[tokio::test]
async fn heartbeat_without_test_report_preserves_tests_passed_generation() {
    let hub = test_hub().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    hub.agent_connected(tx, register_payload("hsb0")).await.unwrap();
    let _ = rx.try_recv();

    let mut host = hub.store().get_host("hsb0").await.unwrap().unwrap();
    host.tests_passed_generation = "abc1234".to_owned();
    hub.store().upsert_host(host).await.unwrap();

    hub.handle_agent_frame(
        "hsb0",
        crate::protocol::AgentFrame::Heartbeat(crate::protocol::HeartbeatPayload {
            generation: "def5678".to_owned(),
            ..Default::default()
        }),
    )
    .await
    .unwrap();

    let host = hub.store().get_host("hsb0").await.unwrap().unwrap();
    assert_eq!(host.tests_passed_generation, "abc1234");
    assert_ne!(host.compartments.tests.status, crate::model::CompartmentStatus::Ok);
}

#[tokio::test]
async fn command_timeout_ticks_to_timeout_pending_and_kill_stops_it() {
    let store = Store::open_in_memory().unwrap();
    let state = Arc::new(StateManager::load(store.clone()).await.unwrap());
    let hub = Hub::with_command_timeouts(
        store,
        state,
        Arc::new(RemoteCache::new(None, None, Duration::from_secs(30))),
        "1.2.3",
        0,
        0,
        std::env::temp_dir().join("nixfleet-dashboard-hub-tests"),
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    hub.agent_connected(tx, register_payload("hsb0")).await.unwrap();
    let _ = rx.try_recv();

    hub.dispatch_command("hsb0", crate::model::Op::Pull, vec![], false).await.unwrap();
    let _ = rx.try_recv();

    hub.tick_command_timeouts().await;
    hub.tick_command_timeouts().await;

    hub.apply_command_timeout_choice("hsb0", crate::command::UserChoice::Kill).await.unwrap();
    let frame = rx.try_recv().unwrap();
    match frame {
        crate::protocol::DashboardFrame::Command { command, .. } => assert_eq!(command, "stop"),
        _ => panic!("expected a stop command frame from the kill choice"),
    }
}
