//! Collaborators the tunnel drives but does not own.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AgentError, HandlerError};
use crate::tunnel::state::ConnectionEvent;

/// Opaque basic-auth style credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub identity: String,
    pub secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Source of credentials and agent version, queried on every connect attempt.
pub trait CredentialSource: Send + Sync {
    /// `None` when credentials are not configured yet.
    fn credentials(&self) -> Option<Credentials>;
    /// Value of the `addonversion` handshake header.
    fn version(&self) -> String;

    /// Credentials and version for one connect attempt, read together.
    fn resolve(&self) -> Option<(Credentials, String)> {
        Some((self.credentials()?, self.version()))
    }
}

/// Turns an inbound request payload into a response payload.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, data: Value) -> Result<Value, HandlerError>;
}

/// Receives connectivity transitions for user-visible notification.
pub trait Observer: Send + Sync {
    fn notify(&self, event: ConnectionEvent);
}

/// The local side of the tunnel: periodic cache refresh and status snapshots.
#[async_trait]
pub trait LocalAgent: Send + Sync {
    /// Called on every periodic tick regardless of connection state.
    async fn refresh_cache(&self) -> Result<(), AgentError>;
    /// Pushed to the relay shortly after each successful connect.
    async fn status_snapshot(&self) -> Result<Value, AgentError>;
}
