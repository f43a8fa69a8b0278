// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic reclamation: stale `pending_command` clearing and retention.
//! An interval loop that snapshots state, acts, and never holds a lock
//! across I/O.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::hub::Hub;

/// Tuning knobs for the sweep.
#[derive(Debug, Clone)]
pub struct StaleSweepTuning {
    pub heartbeat_interval: Duration,
    pub stale_multiplier: u32,
    pub stale_minimum: Duration,
    pub cleanup_interval: Duration,
}

impl Default for StaleSweepTuning {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            stale_multiplier: 120,
            stale_minimum: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl StaleSweepTuning {
    /// `max(heartbeat_interval * multiplier, floor)`.
    pub fn threshold(&self) -> Duration {
        (self.heartbeat_interval * self.stale_multiplier).max(self.stale_minimum)
    }
}

/// One sweep pass: clear `pending_command` for hosts offline past the
/// threshold, and run retention. Exposed standalone (not just via
/// [`spawn_stale_sweep`]) so it can be exercised directly in tests.
pub async fn run_once(hub: &Hub, tuning: &StaleSweepTuning) -> anyhow::Result<usize> {
    let threshold_ms = tuning.threshold().as_millis() as i64;
    let now_ms = crate::model::epoch_ms();
    let affected = hub.store().clear_stale_pending(threshold_ms, now_ms).await?;
    for hostname in &affected {
        hub.force_clear_pending(hostname).await?;
    }
    hub.store().run_retention(now_ms).await?;
    hub.tick_command_timeouts().await;
    Ok(affected.len())
}

/// Background task: run the sweep on `tuning.cleanup_interval` until
/// `shutdown` fires.
pub fn spawn_stale_sweep(hub: std::sync::Arc<Hub>, tuning: StaleSweepTuning, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tuning.cleanup_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("stale-sweep task shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match run_once(&hub, &tuning).await {
                        Ok(n) if n > 0 => tracing::info!(cleared = n, "stale-sweep cleared pending commands"),
                        Ok(_) => {}
                        Err(err) => tracing::error!(%err, "stale-sweep pass failed"),
                    }
                }
            }
        }
    })
}
