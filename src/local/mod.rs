//! Built-in local agent: the default handler, cache and observer used by the
//! `relaylink` binary.
//!
//! Requests carry a `cmd` field:
//!
//! | `cmd`    | Response                                              |
//! |----------|-------------------------------------------------------|
//! | `ping`   | `{"ok": true}`                                        |
//! | `info`   | cached [`SystemSnapshot`], refreshed every tick       |
//! | `health` | version, agent uptime, tunnel statistics              |

pub mod system;

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::error::{AgentError, HandlerError};
use crate::tunnel::collab::{Handler, LocalAgent, Observer};
use crate::tunnel::{ConnectionEvent, TunnelStats};
pub use system::SystemSnapshot;

/// Handler and cache for the machine this agent runs on.
pub struct DeviceAgent {
    version: String,
    start_time: Instant,
    stats: Arc<TunnelStats>,
    cache: RwLock<Option<SystemSnapshot>>,
}

impl DeviceAgent {
    pub fn new(version: String, stats: Arc<TunnelStats>) -> Self {
        Self {
            version,
            start_time: Instant::now(),
            stats,
            cache: RwLock::new(None),
        }
    }

    fn cached(&self) -> Option<SystemSnapshot> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, snapshot: SystemSnapshot) {
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }

    fn health(&self) -> Value {
        json!({
            "status": "ok",
            "version": self.version,
            "uptime_secs": self.start_time.elapsed().as_secs(),
            "tunnel": self.stats.to_json(),
        })
    }
}

#[async_trait]
impl Handler for DeviceAgent {
    async fn handle(&self, data: Value) -> Result<Value, HandlerError> {
        let Some(cmd) = data.get("cmd").and_then(Value::as_str) else {
            return Err(HandlerError::BadRequest("missing \"cmd\"".into()));
        };
        debug!(cmd, "Handling request");
        match cmd {
            "ping" => Ok(json!({"ok": true})),
            "health" => Ok(self.health()),
            "info" => {
                let snapshot = self
                    .cached()
                    .ok_or_else(|| HandlerError::Failed("system info not collected yet".into()))?;
                serde_json::to_value(snapshot).map_err(|e| HandlerError::Failed(e.to_string()))
            }
            other => Err(HandlerError::UnknownCommand(other.to_string())),
        }
    }
}

#[async_trait]
impl LocalAgent for DeviceAgent {
    async fn refresh_cache(&self) -> Result<(), AgentError> {
        let snapshot = SystemSnapshot::collect()?;
        self.store(snapshot);
        Ok(())
    }

    async fn status_snapshot(&self) -> Result<Value, AgentError> {
        let hostname = self.cached().map(|s| s.hostname);
        Ok(json!({
            "type": "status",
            "version": self.version,
            "uptime_secs": self.start_time.elapsed().as_secs(),
            "hostname": hostname,
        }))
    }
}

/// Observer that surfaces connectivity changes as log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn notify(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => info!("Connected to relay"),
            ConnectionEvent::Disconnected => warn!("Disconnected from relay"),
            ConnectionEvent::ConnectionFailed => error!("Failed to connect to relay"),
        }
    }
}
