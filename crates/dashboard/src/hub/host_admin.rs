// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host-admin operations that don't go through the agent wire protocol:
//! a lightweight compartment `refresh` and the theme-color cosmetic update.
//! Both are plain store read-modify-write-broadcast cycles, never touching
//! `pending_command` or the snapshot machinery.

use crate::compartment::{self, SystemSignal};
use crate::error::DashboardError;
use crate::model::{Compartments, CompartmentStatus, Host};
use crate::protocol::Change;

use super::Hub;

impl Hub {
    /// Recompute every compartment for `hostname` against the current
    /// cached remote state, without dispatching anything to the agent.
    /// Always permitted regardless of `pending_command` — the open
    /// question in [`crate::command::precheck`] resolves `refresh` as
    /// "always permitted, lightweight".
    pub async fn refresh_compartments(&self, hostname: &str) -> Result<Compartments, DashboardError> {
        let mut host: Host =
            self.store.get_host(hostname).await.map_err(|_| DashboardError::Internal)?.ok_or(DashboardError::NotFound)?;

        let remote = self.remote.current();
        let remote_result = remote.as_ref().map(|r| r.as_ref().map_err(|e| e.as_str()));
        host.compartments = compartment::evaluate_all(&host, &self.dashboard_version, remote_result, SystemSignal::Unchanged, None);
        if host.compartments.tests.status == CompartmentStatus::Ok {
            host.tests_passed_generation = host.generation.clone();
        }

        self.store.upsert_host(host.clone()).await.map_err(|_| DashboardError::Internal)?;
        self.broadcast_change(Change::HostUpdated { host: host.clone() }).await.map_err(|_| DashboardError::Internal)?;
        Ok(host.compartments)
    }

    /// Update a host's display color. Cosmetic only — no precheck, no
    /// effect on any compartment.
    pub async fn set_theme_color(&self, hostname: &str, theme_color: String) -> Result<Host, DashboardError> {
        let mut host: Host =
            self.store.get_host(hostname).await.map_err(|_| DashboardError::Internal)?.ok_or(DashboardError::NotFound)?;
        host.theme_color = theme_color;
        self.store.upsert_host(host.clone()).await.map_err(|_| DashboardError::Internal)?;
        self.broadcast_change(Change::HostUpdated { host: host.clone() }).await.map_err(|_| DashboardError::Internal)?;
        Ok(host)
    }
}
