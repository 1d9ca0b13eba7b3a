//! Error types, one per boundary.
//!
//! Each boundary has its own recovery action:
//!
//! | Error            | Raised by                | Recovery                                   |
//! |------------------|--------------------------|--------------------------------------------|
//! | `ConfigError`    | config file read/parse   | startup: exit; connect attempt: skip       |
//! | `TransportError` | handshake / send         | notify `connection-failed`, retry on tick  |
//! | `HandlerError`   | request handler          | canonical error payload, connection kept   |
//! | `AgentError`     | cache refresh / snapshot | log, never surfaced to the relay           |
//! | `TunnelError`    | inbound frame decode     | current connection closed, retry on tick   |

use thiserror::Error;

/// Failure to load configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Failure at the transport boundary (handshake or frame I/O).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid connect request: {0}")]
    InvalidRequest(String),
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("connection closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

/// Failure reported by the local request handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("malformed request: {0}")]
    BadRequest(String),
    #[error("{0}")]
    Failed(String),
}

/// Failure reported by the local agent's cache refresh or status snapshot.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("cache refresh failed: {0}")]
    Refresh(String),
    #[error("status snapshot unavailable: {0}")]
    Snapshot(String),
}

/// Failure that ends the current tunnel connection.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("malformed inbound frame: {0}")]
    Decode(#[from] serde_json::Error),
}
