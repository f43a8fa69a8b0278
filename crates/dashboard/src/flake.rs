// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Flake-update watcher: discovers open flake-lock-update pull requests on
//! a configured GitHub repo and drives a merge-and-deploy pipeline across
//! selected hosts.
//!
//! The GitHub client is a thin wrapper (a `reqwest::Client` with a short
//! timeout, one method per remote call) polled on an interval. The
//! per-host fan-out in [`FlakeWatcher::merge_and_deploy`] uses a
//! `Semaphore`-bounded concurrent-task pattern.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::command::ClassifyOutcome;
use crate::hub::Hub;
use crate::model::Op;
use crate::protocol::Change;

/// Maximum concurrent per-host pull/switch dispatches during a
/// merge-and-deploy pipeline run.
const MAX_CONCURRENT_DEPLOYS: usize = 8;

/// One open PR discovered on the watched repo, filtered to those that look
/// like flake-lock updates: title matches the configured pattern, or
/// labels include the configured tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingPr {
    pub number: u64,
    pub title: String,
    pub branch: String,
    pub url: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

struct Cached {
    pending: Option<PendingPr>,
    fetched_at: Instant,
}

/// Polls a single GitHub repo for flake-lock-update PRs and exposes the
/// current pending one, plus drives the merge-and-deploy pipeline.
pub struct FlakeWatcher {
    client: reqwest::Client,
    repo: Option<String>,
    token: Option<String>,
    title_pattern: String,
    label: String,
    ttl: Duration,
    propagation_delay: Duration,
    host_timeout: Duration,
    cached: RwLock<Option<Cached>>,
    deploy_in_progress: AtomicBool,
}

/// Per-host outcome of a merge-and-deploy run.
#[derive(Debug, Clone, Serialize)]
pub struct DeployOutcome {
    pub hostname: String,
    pub pull: Option<String>,
    pub switch: Option<String>,
    pub success: bool,
}

impl FlakeWatcher {
    pub fn new(
        repo: Option<String>,
        token: Option<String>,
        title_pattern: String,
        label: String,
        ttl: Duration,
        propagation_delay: Duration,
        host_timeout: Duration,
    ) -> Arc<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Arc::new(Self {
            client,
            repo,
            token,
            title_pattern,
            label,
            ttl,
            propagation_delay,
            host_timeout,
            cached: RwLock::new(None),
            deploy_in_progress: AtomicBool::new(false),
        })
    }

    pub fn enabled(&self) -> bool {
        self.repo.is_some()
    }

    /// Last-known pending PR, regardless of TTL freshness.
    pub fn pending(&self) -> Option<PendingPr> {
        self.cached.read().unwrap_or_else(|e| e.into_inner()).as_ref().and_then(|c| c.pending.clone())
    }

    fn is_stale(&self) -> bool {
        match self.cached.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(c) => c.fetched_at.elapsed() >= self.ttl,
            None => true,
        }
    }

    /// Force an immediate re-check, bypassing the TTL.
    pub async fn check_now(&self) -> anyhow::Result<Option<PendingPr>> {
        let pending = self.fetch_open_prs().await?;
        let mut guard = self.cached.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Cached { pending: pending.clone(), fetched_at: Instant::now() });
        Ok(pending)
    }

    async fn refresh_if_stale(&self) {
        if !self.enabled() || !self.is_stale() {
            return;
        }
        if let Err(err) = self.check_now().await {
            tracing::warn!(%err, "flake-update PR poll failed");
        }
    }

    async fn fetch_open_prs(&self) -> anyhow::Result<Option<PendingPr>> {
        let Some(repo) = self.repo.as_deref() else { return Ok(None) };
        let url = format!("https://api.github.com/repos/{repo}/pulls?state=open");
        let mut request = self.client.get(&url).header("User-Agent", "nixfleet-dashboard");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let prs: Vec<GithubPr> = request.send().await?.error_for_status()?.json().await?;
        Ok(prs
            .into_iter()
            .find(|pr| self.looks_like_flake_update(pr))
            .map(|pr| PendingPr {
                number: pr.number,
                title: pr.title,
                branch: pr.head.r#ref,
                url: pr.html_url,
                labels: pr.labels.into_iter().map(|l| l.name).collect(),
            }))
    }

    fn looks_like_flake_update(&self, pr: &GithubPr) -> bool {
        pr.title.contains(self.title_pattern.as_str()) || pr.labels.iter().any(|l| l.name == self.label)
    }

    /// Merge the pending PR and fan a `pull` then `switch` out across
    /// `hostnames`. Refuses a second concurrent run with an in-progress
    /// error rather than queueing or interleaving two pipelines.
    pub async fn merge_and_deploy(
        self: &Arc<Self>,
        hub: &Arc<Hub>,
        hostnames: Vec<String>,
    ) -> Result<Vec<DeployOutcome>, crate::error::DashboardError> {
        if self
            .deploy_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(crate::error::DashboardError::conflict(
                "deploy_in_progress",
                "a merge-and-deploy pipeline is already running",
            ));
        }
        let result = self.run_pipeline(hub, hostnames).await;
        self.deploy_in_progress.store(false, Ordering::SeqCst);
        result.map_err(|_| crate::error::DashboardError::Internal)
    }

    async fn run_pipeline(&self, hub: &Arc<Hub>, hostnames: Vec<String>) -> anyhow::Result<Vec<DeployOutcome>> {
        let pending = self.pending().ok_or_else(|| anyhow::anyhow!("no pending flake-update PR"))?;
        self.merge_pr(&pending).await?;
        let _ = hub
            .store()
            .audit("flake-watcher", "merge", serde_json::json!({"pr": pending.number}))
            .await;
        hub.broadcast_change(Change::PrChanged { pr: serde_json::json!({"number": pending.number, "merged": true}) })
            .await
            .ok();

        tokio::time::sleep(self.propagation_delay).await;

        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_DEPLOYS));
        let mut handles = Vec::with_capacity(hostnames.len());
        for hostname in hostnames {
            let sem = Arc::clone(&semaphore);
            let hub = Arc::clone(hub);
            let host_timeout = self.host_timeout;
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire().await;
                run_one_host(&hub, &hostname, host_timeout).await
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => tracing::error!(%err, "deploy task panicked"),
            }
        }
        Ok(outcomes)
    }

    async fn merge_pr(&self, pr: &PendingPr) -> anyhow::Result<()> {
        let Some(repo) = self.repo.as_deref() else {
            anyhow::bail!("flake-update watcher has no configured repo");
        };
        let url = format!("https://api.github.com/repos/{repo}/pulls/{}/merge", pr.number);
        let mut request = self.client.put(&url).header("User-Agent", "nixfleet-dashboard");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request.send().await?.error_for_status()?;
        Ok(())
    }
}

/// Dispatch `pull` then `switch` for one host, awaiting each terminal
/// outcome with a bounded wait before continuing to the next step.
async fn run_one_host(hub: &Arc<Hub>, hostname: &str, host_timeout: Duration) -> DeployOutcome {
    let pull = match await_op(hub, hostname, Op::Pull, host_timeout).await {
        Ok(outcome) => outcome,
        Err(err) => {
            return DeployOutcome { hostname: hostname.to_owned(), pull: Some(err), switch: None, success: false }
        }
    };
    if !pull.is_success() {
        return DeployOutcome {
            hostname: hostname.to_owned(),
            pull: Some(pull.as_str().to_owned()),
            switch: None,
            success: false,
        };
    }

    let switch = await_op(hub, hostname, Op::Switch, host_timeout).await;
    match switch {
        Ok(outcome) => DeployOutcome {
            hostname: hostname.to_owned(),
            pull: Some(pull.as_str().to_owned()),
            switch: Some(outcome.as_str().to_owned()),
            success: outcome.is_success(),
        },
        Err(err) => DeployOutcome {
            hostname: hostname.to_owned(),
            pull: Some(pull.as_str().to_owned()),
            switch: Some(err),
            success: false,
        },
    }
}

async fn await_op(hub: &Arc<Hub>, hostname: &str, op: Op, timeout: Duration) -> Result<ClassifyOutcome, String> {
    let rx = hub
        .dispatch_command_awaiting(hostname, op, Vec::new(), false)
        .await
        .map_err(|err| err.to_string())?;
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(_)) => Err("command channel closed before a terminal status arrived".to_owned()),
        Err(_) => Err("timed out waiting for a terminal status".to_owned()),
    }
}

#[derive(Debug, Deserialize)]
struct GithubPr {
    number: u64,
    title: String,
    html_url: String,
    head: GithubRef,
    #[serde(default)]
    labels: Vec<GithubLabel>,
}

#[derive(Debug, Deserialize)]
struct GithubRef {
    r#ref: String,
}

#[derive(Debug, Deserialize)]
struct GithubLabel {
    name: String,
}

/// Background task: poll for pending PRs on `ttl` until `shutdown` fires.
pub fn spawn_flake_watcher(
    watcher: Arc<FlakeWatcher>,
    poll_interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => watcher.refresh_if_stale().await,
            }
        }
    })
}
