//! Connection state, observer events and tunnel statistics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use serde_json::{json, Value};

/// Lifecycle of the single relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// A handshake is in flight; blocks concurrent connect attempts.
    Connecting,
    Connected,
}

/// Connectivity transitions reported to the [`Observer`](super::collab::Observer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    ConnectionFailed,
}

impl ConnectionEvent {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::ConnectionFailed => "connection-failed",
        }
    }
}

/// A recorded lifecycle event with the time it happened.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub timestamp: Instant,
    pub event: ConnectionEvent,
    pub detail: String,
}

/// Maximum number of recent events to retain.
const MAX_EVENTS: usize = 50;

/// Tunnel counters. Atomics on the hot path, a mutex only for the event ring.
pub struct TunnelStats {
    pub connected: AtomicBool,
    pub connect_attempts: AtomicU64,
    pub connects: AtomicU64,
    pub connect_failures: AtomicU64,
    pub disconnects: AtomicU64,
    pub frames_received: AtomicU64,
    pub frames_sent: AtomicU64,
    pub dropped_writes: AtomicU64,
    pub handler_failures: AtomicU64,
    pub refresh_failures: AtomicU64,
    events: Mutex<VecDeque<EventRecord>>,
}

impl TunnelStats {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            connect_attempts: AtomicU64::new(0),
            connects: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            dropped_writes: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            refresh_failures: AtomicU64::new(0),
            events: Mutex::new(VecDeque::with_capacity(MAX_EVENTS)),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Push a lifecycle event, evicting the oldest if at capacity.
    pub fn push_event(&self, event: ConnectionEvent, detail: String) {
        let mut events = self
            .events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if events.len() >= MAX_EVENTS {
            events.pop_front();
        }
        events.push_back(EventRecord {
            timestamp: Instant::now(),
            event,
            detail,
        });
    }

    /// Most recent events, newest first.
    pub fn recent_events(&self, limit: usize) -> Vec<EventRecord> {
        let events = self
            .events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        events.iter().rev().take(limit).cloned().collect()
    }

    /// JSON summary used by the `health` command.
    pub fn to_json(&self) -> Value {
        let now = Instant::now();
        let recent: Vec<Value> = self
            .recent_events(10)
            .into_iter()
            .map(|e| {
                json!({
                    "ago_secs": now.duration_since(e.timestamp).as_secs(),
                    "event": e.event.as_str(),
                    "detail": e.detail,
                })
            })
            .collect();
        json!({
            "connected": self.connected.load(Ordering::Relaxed),
            "connect_attempts": self.connect_attempts.load(Ordering::Relaxed),
            "connects": self.connects.load(Ordering::Relaxed),
            "connect_failures": self.connect_failures.load(Ordering::Relaxed),
            "disconnects": self.disconnects.load(Ordering::Relaxed),
            "frames_received": self.frames_received.load(Ordering::Relaxed),
            "frames_sent": self.frames_sent.load(Ordering::Relaxed),
            "dropped_writes": self.dropped_writes.load(Ordering::Relaxed),
            "handler_failures": self.handler_failures.load(Ordering::Relaxed),
            "refresh_failures": self.refresh_failures.load(Ordering::Relaxed),
            "recent_events": recent,
        })
    }
}

impl Default for TunnelStats {
    fn default() -> Self {
        Self::new()
    }
}
