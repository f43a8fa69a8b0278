// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session handles the hub owns: one per connected agent, one per connected
//! browser. Each owns a bounded write channel, an atomic `closed` flag, and
//! a single-shot close action so both read- and write-pump can tear the
//! session down without racing each other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

use tokio::sync::mpsc;

use crate::protocol::{DashboardFrame, ServerMessage};

/// Bounded capacity for a browser's outbound message channel.
pub const BROWSER_CHANNEL_CAPACITY: usize = 256;

/// `SafeSend`: treat a send against a closed/full channel as a dropped
/// message, never a panic. Safe-Rust channels never panic on a closed send — they return
/// `Err` — so here `SafeSend` means "swallow that `Err` as a warning".
fn safe_send_unbounded<T>(tx: &mpsc::UnboundedSender<T>, value: T) -> bool {
    tx.send(value).is_ok()
}

fn safe_try_send<T>(tx: &mpsc::Sender<T>, value: T) -> bool {
    tx.try_send(value).is_ok()
}

/// A single-shot close guard, modeled on `sync.Once`.
struct CloseOnce {
    once: Once,
    closed: AtomicBool,
}

impl CloseOnce {
    fn new() -> Self {
        Self { once: Once::new(), closed: AtomicBool::new(false) }
    }

    fn close(&self, action: impl FnOnce()) {
        self.once.call_once(|| {
            self.closed.store(true, Ordering::SeqCst);
            action();
        });
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// An agent's live WebSocket connection, keyed by hostname.
pub struct AgentSession {
    pub hostname: String,
    tx: mpsc::UnboundedSender<DashboardFrame>,
    close: CloseOnce,
}

impl AgentSession {
    pub fn new(hostname: String, tx: mpsc::UnboundedSender<DashboardFrame>) -> Self {
        Self { hostname, tx, close: CloseOnce::new() }
    }

    /// Send a `command`/`registered` frame downstream. Returns `false` if
    /// the session is closed or its channel is full/dropped — never panics.
    pub fn send(&self, frame: DashboardFrame) -> bool {
        if self.close.is_closed() {
            return false;
        }
        safe_send_unbounded(&self.tx, frame)
    }

    /// Close exactly once (H1 eviction, peer-close, shutdown).
    pub fn close(&self) {
        self.close.close(|| {});
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_closed()
    }
}

/// A browser's live WebSocket connection.
pub struct BrowserSession {
    pub id: String,
    tx: mpsc::Sender<ServerMessage>,
    close: CloseOnce,
}

impl BrowserSession {
    pub fn new(id: String, tx: mpsc::Sender<ServerMessage>) -> Self {
        Self { id, tx, close: CloseOnce::new() }
    }

    /// Non-blocking send; a slow or closed browser never stalls the
    /// broadcast loop.
    pub fn send(&self, message: ServerMessage) -> bool {
        if self.close.is_closed() {
            return false;
        }
        safe_try_send(&self.tx, message)
    }

    pub fn close(&self) {
        self.close.close(|| {});
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_closed()
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
