//! WebSocket transport over `tokio-tungstenite`.
//!
//! The handshake carries the agent version in an `addonversion` header and the
//! credentials as HTTP Basic auth. Transport-level ping/pong and binary frames
//! never reach the tunnel; tungstenite answers pings on its own.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::tunnel::collab::Credentials;
use crate::tunnel::transport::{ConnectRequest, FrameSink, FrameStream, Transport};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Name of the handshake header carrying the agent version.
pub const VERSION_HEADER: &str = "addonversion";

/// Production transport: one `connect_async` per attempt.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(
        &self,
        request: &ConnectRequest,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), TransportError> {
        let handshake = build_request(request)?;
        let (ws_stream, response) = tokio_tungstenite::connect_async(handshake).await?;
        debug!("Tunnel: handshake complete ({})", response.status());
        let (sink, stream) = ws_stream.split();
        Ok((Box::new(WsSink { sink }), Box::new(WsReader { stream })))
    }
}

/// Build the client handshake request with version and auth headers.
pub fn build_request(request: &ConnectRequest) -> Result<Request, TransportError> {
    let mut handshake = request.url.as_str().into_client_request()?;
    let headers = handshake.headers_mut();
    headers.insert(VERSION_HEADER, header_value(&request.version)?);
    headers.insert(
        AUTHORIZATION,
        header_value(&basic_auth(&request.credentials))?,
    );
    Ok(handshake)
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value).map_err(|e| TransportError::InvalidRequest(e.to_string()))
}

/// `Basic base64(identity:secret)`.
pub fn basic_auth(credentials: &Credentials) -> String {
    use base64::Engine;
    let raw = format!("{}:{}", credentials.identity, credentials.secret);
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(raw)
    )
}

struct WsSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink.close().await?;
        Ok(())
    }
}

struct WsReader {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for WsReader {
    async fn next_frame(&mut self) -> Option<String> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(text.as_str().to_owned()),
                Ok(Message::Close(frame)) => {
                    debug!("Tunnel: relay sent close frame: {frame:?}");
                    return None;
                }
                Ok(_) => {} // Binary/Ping/Pong/raw frames
                Err(e) => {
                    warn!("Tunnel: read error: {e}");
                    return None;
                }
            }
        }
    }
}
