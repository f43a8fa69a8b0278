// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote desired-state fetcher. A thin, short-timeout HTTP client, polled
//! on an interval by a background task (`spawn_remote_watcher`) and cached
//! behind a short TTL so every heartbeat's compartment evaluation is a
//! cheap in-memory read.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::model::RemoteVersion;

/// `None` before the first successful fetch (git/lock read `unknown`);
/// `Some(Err)` after a fetch failure (git/lock read `error`, never
/// `unknown`).
pub type RemoteSnapshot = Option<Result<RemoteVersion, String>>;

struct Cached {
    snapshot: RemoteSnapshot,
    fetched_at: Instant,
}

/// Polls a single configured repo endpoint for its current commit/lock
/// state and caches the result.
pub struct RemoteCache {
    client: reqwest::Client,
    url: Option<String>,
    token: Option<String>,
    ttl: Duration,
    cached: RwLock<Option<Cached>>,
}

impl RemoteCache {
    /// `url: None` disables remote polling entirely — git/lock stay
    /// `unknown` forever, a valid deployment mode for an offline fleet.
    pub fn new(url: Option<String>, token: Option<String>, ttl: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, url, token, ttl, cached: RwLock::new(None) }
    }

    /// Last-known snapshot, regardless of TTL freshness. Cheap — callers on
    /// the heartbeat hot path never block on the network.
    pub fn current(&self) -> RemoteSnapshot {
        self.cached
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|c| c.snapshot.clone())
            .unwrap_or(None)
    }

    fn is_stale(&self) -> bool {
        match self.cached.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(c) => c.fetched_at.elapsed() >= self.ttl,
            None => true,
        }
    }

    /// Fetch the remote's current state if the configured TTL has elapsed.
    /// A network or parse failure is cached as `Some(Err(..))`, never
    /// silently dropped, so `git`/`lock` degrade to `error` rather than
    /// `unknown`.
    pub async fn refresh_if_stale(&self) {
        if self.url.is_none() || !self.is_stale() {
            return;
        }
        let snapshot = self.fetch_once().await;
        let mut guard = self.cached.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Cached { snapshot, fetched_at: Instant::now() });
    }

    async fn fetch_once(&self) -> RemoteSnapshot {
        let Some(url) = self.url.as_deref() else { return None };
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let result = async {
            let response = request.send().await?.error_for_status()?;
            response.json::<RemoteVersion>().await
        }
        .await;
        match result {
            Ok(version) => Some(Ok(version)),
            Err(err) => {
                tracing::warn!(%err, "remote-version fetch failed");
                Some(Err(err.to_string()))
            }
        }
    }
}

/// Background task: refresh the cache on a fixed interval for as long as
/// `shutdown` is not triggered. `interval` + `MissedTickBehavior::Skip`,
/// one snapshot-and-act pass per tick, no work held across ticks.
pub fn spawn_remote_watcher(
    cache: std::sync::Arc<RemoteCache>,
    poll_interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => cache.refresh_if_stale().await,
            }
        }
    })
}
