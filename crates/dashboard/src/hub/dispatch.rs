// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command dispatch: pre-validation, snapshot capture, and handing the
//! `command` frame to the agent. The matching post-validation runs
//! later, in [`super::frames`], when the terminal `status` frame arrives.

use crate::command::{precheck, PrecheckResult};
use crate::error::DashboardError;
use crate::model::{CommandRecord, Op, PendingCommand, SpecialOp};
use crate::protocol::{Change, DashboardFrame};

use super::{Hub, PendingSnapshot};

impl Hub {
    /// Dispatch a regular op against `hostname`. Runs the
    /// full precondition table unless `force` is set, in which case only
    /// the base online/not-busy check applies.
    pub async fn dispatch_command(
        &self,
        hostname: &str,
        op: Op,
        args: Vec<String>,
        force: bool,
    ) -> Result<(), DashboardError> {
        self.dispatch_command_inner(hostname, op, args, force, None).await
    }

    /// Like [`Self::dispatch_command`], but returns a receiver that
    /// resolves with the classification once the matching `status` frame
    /// arrives — used by the flake-update pipeline to sequence `pull` then
    /// `switch` per host.
    pub async fn dispatch_command_awaiting(
        &self,
        hostname: &str,
        op: Op,
        args: Vec<String>,
        force: bool,
    ) -> Result<tokio::sync::oneshot::Receiver<crate::command::ClassifyOutcome>, DashboardError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.dispatch_command_inner(hostname, op, args, force, Some(tx)).await?;
        Ok(rx)
    }

    async fn dispatch_command_inner(
        &self,
        hostname: &str,
        op: Op,
        args: Vec<String>,
        force: bool,
        notify: Option<tokio::sync::oneshot::Sender<crate::command::ClassifyOutcome>>,
    ) -> Result<(), DashboardError> {
        let host = self
            .store
            .get_host(hostname)
            .await
            .map_err(|_| DashboardError::Internal)?
            .ok_or(DashboardError::NotFound)?;

        let PrecheckResult { valid, code, message } = precheck(&host, op, force, &self.dashboard_version);
        if !valid {
            self.log_warn(hostname, "precheck_refused", format!("{code}: {message}")).await;
            return Err(DashboardError::conflict(code, message));
        }

        // H2: at most one pending snapshot per host at a time. A clean
        // precheck pass already implies no live pending_command, but guard
        // the snapshot table too in case `force` bypassed the host-level
        // check.
        if self.pending.read().await.contains_key(hostname) {
            return Err(DashboardError::conflict("command_pending", "a command is already in flight"));
        }

        let started_at = crate::model::epoch_ms();
        let snapshot = host.snapshot(&self.dashboard_version);
        let record = CommandRecord {
            host: hostname.to_owned(),
            op,
            started_at,
            snapshot_before: snapshot.clone(),
            classifier_result: None,
            finished_at: None,
            exit_code: None,
        };

        let command_id = self
            .store
            .begin_command(&record)
            .await
            .map_err(|_| DashboardError::Internal)?;

        let Some(session) = self.agent_of(hostname).await else {
            return Err(DashboardError::conflict("host_offline", "host is not connected"));
        };

        let log_path = match self.command_log.open(hostname, command_id, op.as_str(), &args).await {
            Ok(path) => {
                let _ = self.store.record_command_log_path(command_id, &path).await;
                Some(path)
            }
            Err(err) => {
                tracing::warn!(%err, %hostname, command_id, "failed to open per-command log file");
                None
            }
        };

        let timeout = crate::command::CommandTimeout::new(started_at, self.command_soft_timeout_ms, self.command_hard_timeout_ms);
        self.pending.write().await.insert(
            hostname.to_owned(),
            PendingSnapshot { command_id, op, snapshot, notify, timeout, log_path },
        );

        if !session.send(DashboardFrame::command_for_op(op, args.clone())) {
            // Agent disconnected between the lookup above and the send;
            // undo the in-flight bookkeeping rather than leaving a stuck
            // pending_command with no agent to ever answer it.
            self.pending.write().await.remove(hostname);
            return Err(DashboardError::conflict("host_offline", "host is not connected"));
        }

        let mut updated = host;
        updated.pending_command = Some(PendingCommand { op, started_at, args });
        self.store.upsert_host(updated.clone()).await.map_err(|_| DashboardError::Internal)?;
        self.broadcast_change(Change::HostUpdated { host: updated }).await.map_err(|_| DashboardError::Internal)?;
        self.broadcast_change(Change::CommandStarted { hostname: hostname.to_owned(), op: op.as_str().to_owned() })
            .await
            .map_err(|_| DashboardError::Internal)?;

        self.log_info(hostname, "dispatched", format!("{} dispatched (command #{command_id})", op.as_str())).await;
        Ok(())
    }

    /// Dispatch a special op (`stop`/`restart`/`reboot`) — never pre-
    /// validated or post-validated as a regular op; it bypasses
    /// `pending_command` and the snapshot machinery entirely.
    /// Rate limiting and the TOTP gate for `reboot` are enforced by the
    /// HTTP layer before this is called.
    pub async fn dispatch_special(&self, hostname: &str, op: SpecialOp) -> Result<(), DashboardError> {
        let Some(session) = self.agent_of(hostname).await else {
            return Err(DashboardError::conflict("host_offline", "host is not connected"));
        };
        if !session.send(DashboardFrame::command_for_special(op, Vec::new())) {
            return Err(DashboardError::conflict("host_offline", "host is not connected"));
        }
        self.log_info(hostname, "special_dispatched", op.as_str()).await;
        let _ = self
            .store
            .audit("dashboard", op.as_str(), serde_json::json!({ "hostname": hostname }))
            .await;
        Ok(())
    }

    /// Clear a stuck `pending_command` without waiting for a terminal
    /// `status` frame. Logged as a warning since this
    /// represents an agent that went silent mid-command.
    pub(crate) async fn force_clear_pending(&self, hostname: &str) -> anyhow::Result<()> {
        if let Some(pending) = self.pending.write().await.remove(hostname) {
            self.store.finish_command(pending.command_id, -1, "orphaned", crate::model::epoch_ms()).await?;
            if let Some(path) = &pending.log_path {
                if let Err(err) = self.command_log.footer(path, "orphaned", None).await {
                    tracing::warn!(%err, %hostname, "failed to write command log footer");
                }
            }
        }
        if let Some(mut host) = self.store.get_host(hostname).await? {
            if host.pending_command.take().is_some() {
                self.store.upsert_host(host.clone()).await?;
                self.broadcast_change(Change::HostUpdated { host }).await?;
            }
        }
        self.log_warn(hostname, "stale_sweep", "cleared stale pending_command").await;
        Ok(())
    }
}
