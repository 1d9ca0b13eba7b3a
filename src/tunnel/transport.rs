//! Transport boundary between the tunnel and the underlying message stream.
//!
//! A successful handshake yields two halves. The write half stays with the
//! tunnel behind its write chokepoint; the read half moves into the
//! connection's read loop.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::tunnel::collab::Credentials;

/// Everything a transport needs to open one connection.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub url: String,
    /// Sent as the `addonversion` header.
    pub version: String,
    pub credentials: Credentials,
}

/// Write half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Next text frame, or `None` once the peer closed or the stream failed.
    async fn next_frame(&mut self) -> Option<String>;
}

/// Opens connections to the relay.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        request: &ConnectRequest,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), TransportError>;
}
