// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Version authority for the state-sync protocol. Exactly one
//! critical section increments the version and pairs it with the change
//! that earned it, so no observer can ever see a version skip.

use tokio::sync::Mutex;

use crate::protocol::{Change, ServerMessage};
use crate::store::Store;

/// Owns the monotonically-increasing version counter. The counter is
/// persisted alongside each accepted mutation so a dashboard restart never
/// causes silent collisions.
pub struct StateManager {
    store: Store,
    version: Mutex<u64>,
}

impl StateManager {
    pub async fn load(store: Store) -> anyhow::Result<Self> {
        let version = store.load_version().await?;
        Ok(Self { store, version: Mutex::new(version) })
    }

    pub async fn current_version(&self) -> u64 {
        *self.version.lock().await
    }

    /// Bump the version by exactly one and pair it with `change`, returning
    /// the `delta` message to broadcast. The store update for the new
    /// version is visible (persisted) before this returns, satisfying "a
    /// mutation is visible in the store before its delta is enqueued"
    ///.
    pub async fn apply(&self, change: Change) -> anyhow::Result<ServerMessage> {
        let mut guard = self.version.lock().await;
        let next = *guard + 1;
        self.store.save_version(next).await?;
        *guard = next;
        Ok(ServerMessage::Delta { version: next, change })
    }

    /// Heartbeat beacon every ~30s.
    pub async fn sync_message(&self) -> ServerMessage {
        ServerMessage::Sync { version: self.current_version().await }
    }
}

#[cfg(test)]
#[path = "state_manager_tests.rs"]
mod tests;
