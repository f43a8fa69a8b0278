// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handling for every `AgentFrame` variant. `Register` is handled
//! separately by [`super::Hub::agent_connected`] since it owns the new
//! session's write half; everything else funnels through
//! [`super::Hub::handle_agent_frame`].

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::compartment::{self, SystemSignal, TestReport};
use crate::model::{Host, LogLevel, OsKind};
use crate::protocol::{
    AgentFrame, DashboardFrame, HeartbeatPayload, OutputPayload, RegisterPayload, RejectedPayload,
    StatusPayload, TerminalStatus, TestProgressPayload,
};
use crate::protocol::Change;

use super::{AgentSession, Hub};

fn os_kind_from_wire(s: &str) -> OsKind {
    match s {
        "macos" => OsKind::Macos,
        _ => OsKind::Nixos,
    }
}

impl Hub {
    /// Admit a newly-authenticated agent connection.
    /// Returns the session handle the caller's read-pump task retains for
    /// the lifetime of the connection.
    pub async fn agent_connected(
        &self,
        tx: mpsc::UnboundedSender<DashboardFrame>,
        payload: RegisterPayload,
    ) -> anyhow::Result<Arc<AgentSession>> {
        let hostname = payload.hostname.clone();
        let loaded = self.store.get_host(&hostname).await?;
        let existed = loaded.is_some();
        let mut host = loaded.unwrap_or_else(|| Host::new(&hostname, OsKind::Nixos));

        host.os_kind = os_kind_from_wire(&payload.os_kind);
        host.location = payload.location;
        host.device_type = payload.device_type;
        if let Some(color) = payload.theme_color {
            host.theme_color = color;
        }
        host.agent_version = payload.agent_version;
        host.os_version = payload.os_version;
        host.nixpkgs_version = payload.nixpkgs_version;
        host.generation = payload.generation;
        host.online = true;
        host.last_seen = crate::model::epoch_ms();

        let remote = self.remote.current();
        let remote_result = remote.as_ref().map(|r| r.as_ref().map_err(|e| e.as_str()));
        host.compartments = compartment::evaluate_all(
            &host,
            &self.dashboard_version,
            remote_result,
            SystemSignal::Unchanged,
            None,
        );
        if host.compartments.tests.status == crate::model::CompartmentStatus::Ok {
            host.tests_passed_generation = host.generation.clone();
        }

        self.store.upsert_host(host.clone()).await?;

        let session = Arc::new(AgentSession::new(hostname.clone(), tx));
        self.insert_agent(hostname.clone(), Arc::clone(&session)).await;

        session.send(DashboardFrame::Registered { hostname: hostname.clone() });

        let change = if existed { Change::HostUpdated { host } } else { Change::HostAdded { host } };
        self.broadcast_change(change).await?;
        self.log_info(&hostname, "register", "agent registered").await;

        Ok(session)
    }

    /// React to an agent's WebSocket read-pump ending (peer close, read
    /// error, or cancellation). No-op if a reconnect has already replaced
    /// this session (guards the stale-disconnect race, H1).
    pub async fn agent_disconnected(&self, session: &Arc<AgentSession>) {
        if !self.remove_agent_if_current(session).await {
            return;
        }
        if let Ok(Some(mut host)) = self.store.get_host(&session.hostname).await {
            host.online = false;
            if self.store.upsert_host(host.clone()).await.is_ok() {
                let _ = self.broadcast_change(Change::HostUpdated { host }).await;
            }
        }
        self.log_warn(&session.hostname, "disconnect", "agent connection closed").await;
    }

    /// Dispatch table for every non-`register` agent frame.
    pub async fn handle_agent_frame(&self, hostname: &str, frame: AgentFrame) -> anyhow::Result<()> {
        match frame {
            AgentFrame::Register(_) => {
                tracing::warn!(%hostname, "register frame arrived on an already-registered session; ignoring");
                Ok(())
            }
            AgentFrame::Heartbeat(payload) => self.handle_heartbeat(hostname, payload).await,
            AgentFrame::Output(payload) => self.handle_output(hostname, payload).await,
            AgentFrame::Status(payload) => self.handle_status(hostname, payload).await,
            AgentFrame::TestProgress(payload) => self.handle_test_progress(hostname, payload).await,
            AgentFrame::Rejected(payload) => self.handle_rejected(hostname, payload).await,
        }
    }

    /// Deferred post-validation for `switch`/`pull-switch` (§4.2): the
    /// agent's own restart drops the connection before it can send the
    /// terminal `status` frame, so the snapshot taken at dispatch survives
    /// the disconnect in `self.pending` and is consumed here, on the first
    /// heartbeat after re-register to report a generation different from
    /// the one recorded at dispatch. Treated as if `status{exit_code: 0}`
    /// had arrived — a generation change on reconnect after a switch
    /// dispatch is the only way that happens.
    async fn consume_deferred_switch(&self, hostname: &str, fresh_generation: &str) -> anyhow::Result<()> {
        let is_deferred_switch = {
            let pending = self.pending.read().await;
            matches!(
                pending.get(hostname),
                Some(p) if matches!(p.op, crate::model::Op::Switch | crate::model::Op::PullSwitch)
                    && fresh_generation != p.snapshot.generation
                    && !fresh_generation.is_empty()
            )
        };
        if !is_deferred_switch {
            return Ok(());
        }
        let Some(pending) = self.pending.write().await.remove(hostname) else { return Ok(()) };
        let Some(mut host) = self.store.get_host(hostname).await? else { return Ok(()) };

        let remote = self.remote.current();
        let remote_result = remote.as_ref().map(|r| r.as_ref().map_err(|e| e.as_str()));
        host.compartments = compartment::evaluate_all(
            &host,
            &self.dashboard_version,
            remote_result,
            SystemSignal::SwitchSucceeded,
            None,
        );
        if host.compartments.tests.status == crate::model::CompartmentStatus::Ok {
            host.tests_passed_generation = host.generation.clone();
        }
        host.pending_command = None;

        let after_agent_outdated = host.agent_outdated(&self.dashboard_version);
        let outcome = crate::command::classify(
            pending.op,
            &pending.snapshot,
            host.compartments.system.status,
            host.compartments.git.status,
            after_agent_outdated,
            &host.generation,
            &host.agent_version,
            0,
        );

        self.store.upsert_host(host.clone()).await?;
        self.store
            .finish_command(pending.command_id, 0, outcome.as_str(), crate::model::epoch_ms())
            .await?;
        if let Some(path) = &pending.log_path {
            if let Err(err) = self.command_log.footer(path, outcome.as_str(), Some(0)).await {
                tracing::warn!(%err, %hostname, "failed to write command log footer");
            }
        }

        self.broadcast_change(Change::HostUpdated { host }).await?;
        self.broadcast_change(Change::CommandFinished {
            hostname: hostname.to_owned(),
            op: pending.op.as_str().to_owned(),
            classification: outcome.as_str().to_owned(),
        })
        .await?;
        self.log(crate::model::LogEntry::new(
            LogLevel::Info,
            hostname,
            "command_finished",
            format!("{} -> {} (deferred across reconnect)", pending.op.as_str(), outcome.as_str()),
        ))
        .await?;
        if let Some(notify) = pending.notify {
            let _ = notify.send(outcome);
        }
        Ok(())
    }

    async fn handle_heartbeat(&self, hostname: &str, payload: HeartbeatPayload) -> anyhow::Result<()> {
        self.consume_deferred_switch(hostname, &payload.generation).await?;

        let Some(mut host) = self.store.get_host(hostname).await? else {
            tracing::warn!(%hostname, "heartbeat from unknown host; dropping");
            return Ok(());
        };

        host.online = true;
        host.last_seen = crate::model::epoch_ms();
        host.generation = payload.generation;
        if !payload.nixpkgs_version.is_empty() {
            host.nixpkgs_version = payload.nixpkgs_version;
        }
        host.metrics = payload.metrics;
        if let Some(lock_hash) = payload.lock_hash {
            host.lock_hash = lock_hash;
        }

        let now = crate::model::epoch_ms();
        host.compartments.system = compartment::recover_stale_working(&host.compartments.system, now);
        host.compartments.tests = compartment::recover_stale_working(&host.compartments.tests, now);

        let remote = self.remote.current();
        let remote_result = remote.as_ref().map(|r| r.as_ref().map_err(|e| e.as_str()));
        let test_report = payload.test_summary.as_ref().map(|s| TestReport {
            passed: s.passed,
            total: s.total,
            generation: s.generation.clone(),
        });
        host.compartments = compartment::evaluate_all(
            &host,
            &self.dashboard_version,
            remote_result,
            SystemSignal::Unchanged,
            test_report.as_ref(),
        );
        if host.compartments.tests.status == crate::model::CompartmentStatus::Ok {
            host.tests_passed_generation = host.generation.clone();
        }

        self.store.upsert_host(host.clone()).await?;
        self.broadcast_change(Change::HostUpdated { host }).await
    }

    async fn handle_output(&self, hostname: &str, payload: OutputPayload) -> anyhow::Result<()> {
        let stream = match payload.stream {
            crate::protocol::StreamKind::Stdout => "stdout",
            crate::protocol::StreamKind::Stderr => "stderr",
        };

        if let Some(path) = self.pending.read().await.get(hostname).and_then(|p| p.log_path.clone()) {
            if let Err(err) = self.command_log.append_line(&path, stream, &payload.line).await {
                tracing::warn!(%err, %hostname, "failed to append to command log file");
            }
        }

        self.broadcast_change(Change::CommandProgress {
            hostname: hostname.to_owned(),
            op: payload.command,
            stream: stream.to_owned(),
            line: payload.line,
        })
        .await
    }

    async fn handle_test_progress(&self, hostname: &str, payload: TestProgressPayload) -> anyhow::Result<()> {
        let line = format!(
            "tests: {}/{} ({} passed){}",
            payload.current,
            payload.total,
            payload.passed,
            payload.result.map(|r| format!(" -> {r}")).unwrap_or_default()
        );
        self.broadcast_change(Change::CommandProgress {
            hostname: hostname.to_owned(),
            op: "test".to_owned(),
            stream: "stdout".to_owned(),
            line,
        })
        .await
    }

    /// A rejected dispatch: the agent refused to run the
    /// command (already busy, or an op it doesn't support). Clear the
    /// pending slot and log; no classification, since nothing executed.
    async fn handle_rejected(&self, hostname: &str, payload: RejectedPayload) -> anyhow::Result<()> {
        if let Some(pending) = self.pending.write().await.remove(hostname) {
            self.store.finish_command(pending.command_id, -1, "rejected", crate::model::epoch_ms()).await?;
            if let Some(path) = &pending.log_path {
                if let Err(err) = self.command_log.footer(path, "rejected", None).await {
                    tracing::warn!(%err, %hostname, "failed to write command log footer");
                }
            }
            // No post-validator runs here (§4.2); dropping `pending.notify`
            // unblocks any in-process awaiter (e.g. the flake-update
            // pipeline) with a closed-channel error rather than a fabricated
            // classification.
        }
        if let Some(mut host) = self.store.get_host(hostname).await? {
            host.pending_command = None;
            self.store.upsert_host(host.clone()).await?;
            self.broadcast_change(Change::HostUpdated { host }).await?;
        }
        let reason = match payload.reason {
            crate::protocol::RejectReason::Busy => "agent reported busy",
            crate::protocol::RejectReason::Unsupported => "agent does not support this command",
        };
        self.log_warn(hostname, "rejected", format!("{} ({})", reason, payload.command)).await;
        Ok(())
    }

    /// The terminal `status` frame for an in-flight command. Looks up the snapshot taken at dispatch time,
    /// re-evaluates compartments against the freshly-stored host, classifies
    /// the outcome, clears `pending_command`, and persists the finished
    /// command record.
    async fn handle_status(&self, hostname: &str, payload: StatusPayload) -> anyhow::Result<()> {
        let Some(pending) = self.pending.write().await.remove(hostname) else {
            tracing::warn!(%hostname, command = %payload.command, "status frame with no matching pending command");
            return Ok(());
        };

        let Some(mut host) = self.store.get_host(hostname).await? else {
            return Ok(());
        };

        let system_signal = match (pending.op, payload.status == TerminalStatus::Success) {
            (crate::model::Op::Pull, true) => SystemSignal::PullChangedInputs,
            (crate::model::Op::Switch, true) | (crate::model::Op::PullSwitch, true) => SystemSignal::SwitchSucceeded,
            (crate::model::Op::Switch, false) | (crate::model::Op::PullSwitch, false) => SystemSignal::SwitchFailed,
            _ => SystemSignal::Unchanged,
        };

        let remote = self.remote.current();
        let remote_result = remote.as_ref().map(|r| r.as_ref().map_err(|e| e.as_str()));
        host.compartments = compartment::evaluate_all(
            &host,
            &self.dashboard_version,
            remote_result,
            system_signal,
            None,
        );
        if host.compartments.tests.status == crate::model::CompartmentStatus::Ok {
            host.tests_passed_generation = host.generation.clone();
        }
        host.pending_command = None;

        let after_agent_outdated = host.agent_outdated(&self.dashboard_version);
        let outcome = crate::command::classify(
            pending.op,
            &pending.snapshot,
            host.compartments.system.status,
            host.compartments.git.status,
            after_agent_outdated,
            &host.generation,
            &host.agent_version,
            payload.exit_code,
        );

        self.store.upsert_host(host.clone()).await?;
        self.store
            .finish_command(pending.command_id, payload.exit_code, outcome.as_str(), crate::model::epoch_ms())
            .await?;
        if let Some(path) = &pending.log_path {
            if let Err(err) = self.command_log.footer(path, outcome.as_str(), Some(payload.exit_code)).await {
                tracing::warn!(%err, %hostname, "failed to write command log footer");
            }
        }

        self.broadcast_change(Change::HostUpdated { host }).await?;
        self.broadcast_change(Change::CommandFinished {
            hostname: hostname.to_owned(),
            op: pending.op.as_str().to_owned(),
            classification: outcome.as_str().to_owned(),
        })
        .await?;

        let level = if outcome.is_success() { LogLevel::Info } else { LogLevel::Error };
        self.log(crate::model::LogEntry::new(
            level,
            hostname,
            "command_finished",
            format!("{} -> {}", pending.op.as_str(), outcome.as_str()),
        ))
        .await?;

        if let Some(notify) = pending.notify {
            let _ = notify.send(outcome);
        }

        Ok(())
    }
}
