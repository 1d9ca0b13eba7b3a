//! Tunnel client: the persistent outbound connection from agent to relay.
//!
//! [`Tunnel::start`] runs the event loop: a periodic tick either retries a
//! missing connection or sends a keepalive, and always refreshes the local
//! agent's cache. While connected, a read loop dispatches each request to the
//! [`Handler`] and writes back a correlated response before reading the next
//! frame. Every outbound frame goes through [`Tunnel::write`], which holds the
//! only reference to the transport's write half.
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──handshake ok──▶ Connected
//!      ▲                          │                            │
//!      └──────handshake failed────┘                            │
//!      └──────────────read loop saw closure / stop()───────────┘
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::error::{HandlerError, TunnelError};
use crate::tunnel::collab::{CredentialSource, Handler, LocalAgent, Observer};
use crate::tunnel::envelope::{handler_error_payload, Outbound, Request};
use crate::tunnel::state::{ConnectionEvent, ConnectionState, TunnelStats};
use crate::tunnel::transport::{ConnectRequest, FrameSink, FrameStream, Transport};

/// Endpoint and timer settings for one tunnel.
#[derive(Debug, Clone)]
pub struct TunnelOptions {
    pub url: String,
    /// Period of the keepalive / reconnect tick.
    pub keepalive_interval: Duration,
    /// Delay of the single extra tick scheduled by `start()`.
    pub initial_tick_delay: Duration,
    /// Delay between a successful handshake and the status push.
    pub status_push_delay: Duration,
}

impl From<&RelayConfig> for TunnelOptions {
    fn from(relay: &RelayConfig) -> Self {
        Self {
            url: relay.url.clone(),
            keepalive_interval: relay.keepalive_interval(),
            initial_tick_delay: relay.initial_tick_delay(),
            status_push_delay: relay.status_push_delay(),
        }
    }
}

/// External collaborators the tunnel drives.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub credentials: Arc<dyn CredentialSource>,
    pub handler: Arc<dyn Handler>,
    pub observer: Arc<dyn Observer>,
    pub agent: Arc<dyn LocalAgent>,
}

/// Connection manager. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct Tunnel {
    inner: Arc<Inner>,
}

struct Inner {
    options: TunnelOptions,
    parts: Collaborators,
    stats: Arc<TunnelStats>,
    state: watch::Sender<ConnectionState>,
    /// Write half of the live connection. The write chokepoint.
    sink: Mutex<Option<Box<dyn FrameSink>>>,
    started: AtomicBool,
    /// Set once by `stop()`, never cleared.
    stopped: AtomicBool,
    shutdown: CancellationToken,
    push_tx: mpsc::UnboundedSender<Value>,
    /// Taken by the event loop on `start()`.
    push_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
}

/// Handle for sending fire-and-forget `{"async": true, "data": ...}` messages.
///
/// Safe to use from any task or thread: the payload is queued and the write
/// itself happens on the tunnel's event loop.
#[derive(Clone)]
pub struct PushHandle {
    tx: mpsc::UnboundedSender<Value>,
}

impl PushHandle {
    pub fn push(&self, payload: Value) {
        if self.tx.send(payload).is_err() {
            debug!("Tunnel: event loop gone, dropping async push");
        }
    }
}

/// Holds the `Connecting` state for one connect attempt.
///
/// Dropping it without calling [`complete`](Self::complete) returns the state
/// to `Disconnected`, whichever way the attempt ended.
struct ConnectingGuard<'a> {
    state: &'a watch::Sender<ConnectionState>,
    completed: bool,
}

impl<'a> ConnectingGuard<'a> {
    fn claim(state: &'a watch::Sender<ConnectionState>) -> Option<Self> {
        let claimed = state.send_if_modified(|s| {
            if *s == ConnectionState::Disconnected {
                *s = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        claimed.then_some(Self {
            state,
            completed: false,
        })
    }

    fn complete(mut self) {
        self.state.send_replace(ConnectionState::Connected);
        self.completed = true;
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        self.state.send_if_modified(|s| {
            if *s == ConnectionState::Connecting {
                *s = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
    }
}

impl Tunnel {
    pub fn new(options: TunnelOptions, parts: Collaborators, stats: Arc<TunnelStats>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                options,
                parts,
                stats,
                state,
                sink: Mutex::new(None),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                push_tx,
                push_rx: std::sync::Mutex::new(Some(push_rx)),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Subscribe to state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn stats(&self) -> &Arc<TunnelStats> {
        &self.inner.stats
    }

    pub fn push_handle(&self) -> PushHandle {
        PushHandle {
            tx: self.inner.push_tx.clone(),
        }
    }

    /// Run the event loop until [`stop`](Self::stop) is called.
    ///
    /// Arms the periodic tick, attempts a first connection and schedules one
    /// extra tick after `initial_tick_delay`. Calling it again while running,
    /// or after it returned, is a no-op.
    pub async fn start(&self) {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::SeqCst) {
            debug!("Tunnel: already started");
            return;
        }
        let push_rx = inner
            .push_rx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        let Some(mut push_rx) = push_rx else {
            return;
        };

        let period = inner.options.keepalive_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let first_tick = tokio::time::sleep(inner.options.initial_tick_delay);
        tokio::pin!(first_tick);
        let mut first_tick_pending = true;

        info!(
            "Tunnel: starting (relay {}, keepalive every {}s)",
            inner.options.url,
            period.as_secs()
        );
        self.spawn_connect();

        loop {
            tokio::select! {
                biased;
                () = inner.shutdown.cancelled() => break,
                () = &mut first_tick, if first_tick_pending => {
                    first_tick_pending = false;
                    self.tick().await;
                }
                _ = ticker.tick() => self.tick().await,
                Some(payload) = push_rx.recv() => {
                    self.write(&Outbound::push(payload)).await;
                }
            }
        }
        info!("Tunnel: event loop ended");
    }

    /// Stop reconnecting, close the live connection and end the event loop.
    ///
    /// An in-flight handshake or handler call is not interrupted.
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            debug!("Tunnel: already stopped");
        } else {
            info!("Tunnel: stopping");
        }
        self.close_transport().await;
        self.inner.shutdown.cancel();
    }

    /// Attempt one connection. Returns once the handshake has resolved.
    ///
    /// No-op while connected or connecting, after `stop()`, or while
    /// credentials are not configured.
    pub async fn connect(&self) {
        let inner = &self.inner;
        if inner.stopped.load(Ordering::SeqCst) {
            debug!("Tunnel: stopped, not connecting");
            return;
        }
        let current = self.state();
        if current != ConnectionState::Disconnected {
            debug!("Tunnel: connect skipped ({current:?})");
            return;
        }
        let Some((credentials, version)) = inner.parts.credentials.resolve() else {
            debug!("Tunnel: identity and/or secret not configured, not connecting");
            return;
        };
        let Some(guard) = ConnectingGuard::claim(&inner.state) else {
            return;
        };

        TunnelStats::bump(&inner.stats.connect_attempts);
        let request = ConnectRequest {
            url: inner.options.url.clone(),
            version,
            credentials,
        };
        info!("Tunnel: connecting to relay at {}", request.url);

        let (mut sink, stream) = match inner.parts.transport.connect(&request).await {
            Ok(halves) => halves,
            Err(e) => {
                warn!("Tunnel: connection error: {e}");
                TunnelStats::bump(&inner.stats.connect_failures);
                inner
                    .stats
                    .push_event(ConnectionEvent::ConnectionFailed, e.to_string());
                drop(guard);
                inner.parts.observer.notify(ConnectionEvent::ConnectionFailed);
                return;
            }
        };

        if inner.stopped.load(Ordering::SeqCst) {
            info!("Tunnel: stopped during handshake, closing new connection");
            if let Err(e) = sink.close().await {
                debug!("Tunnel: close after stop failed: {e}");
            }
            return;
        }

        *inner.sink.lock().await = Some(sink);
        guard.complete();
        inner.stats.connected.store(true, Ordering::Relaxed);
        TunnelStats::bump(&inner.stats.connects);
        inner
            .stats
            .push_event(ConnectionEvent::Connected, request.url.clone());
        info!("Tunnel: connected to relay");
        inner.parts.observer.notify(ConnectionEvent::Connected);

        self.schedule_status_push();
        let tunnel = self.clone();
        tokio::spawn(async move { tunnel.run(stream).await });
    }

    /// One periodic tick: reconnect or keepalive, then refresh the local cache.
    pub async fn tick(&self) {
        let inner = &self.inner;
        if inner.stopped.load(Ordering::SeqCst) {
            return;
        }
        if self.state() == ConnectionState::Connected {
            self.write(&Outbound::keepalive()).await;
        } else {
            self.spawn_connect();
        }

        if let Err(e) = inner.parts.agent.refresh_cache().await {
            TunnelStats::bump(&inner.stats.refresh_failures);
            error!("Tunnel: {e}");
        }
    }

    /// Encode `message` and send it over the live connection.
    ///
    /// Without a live connection the message is dropped and logged; it is
    /// never queued or retried.
    pub async fn write(&self, message: &Outbound) {
        let stats = &self.inner.stats;
        let kind = message.kind();
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                error!("Tunnel: failed to encode {kind}: {e}");
                TunnelStats::bump(&stats.dropped_writes);
                return;
            }
        };

        let mut sink = self.inner.sink.lock().await;
        let Some(sink) = sink.as_mut() else {
            error!("Tunnel: not connected, dropping {kind}");
            TunnelStats::bump(&stats.dropped_writes);
            return;
        };
        match sink.send(text).await {
            Ok(()) => TunnelStats::bump(&stats.frames_sent),
            Err(e) => {
                error!("Tunnel: sending {kind} failed: {e}");
                TunnelStats::bump(&stats.dropped_writes);
            }
        }
    }

    fn spawn_connect(&self) {
        let tunnel = self.clone();
        tokio::spawn(async move { tunnel.connect().await });
    }

    fn schedule_status_push(&self) {
        let tunnel = self.clone();
        let delay = self.inner.options.status_push_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tunnel.state() != ConnectionState::Connected {
                return;
            }
            match tunnel.inner.parts.agent.status_snapshot().await {
                Ok(snapshot) => tunnel.push_handle().push(snapshot),
                Err(e) => warn!("Tunnel: {e}"),
            }
        });
    }

    /// Drive one connection's read loop, then tear the connection down.
    async fn run(&self, stream: Box<dyn FrameStream>) {
        let detail = match self.read_loop(stream).await {
            Ok(()) => {
                info!("Tunnel: connection closed");
                "closed".to_string()
            }
            Err(e) => {
                warn!("Tunnel: dropping connection: {e}");
                e.to_string()
            }
        };

        let inner = &self.inner;
        self.close_transport().await;
        inner.state.send_replace(ConnectionState::Disconnected);
        inner.stats.connected.store(false, Ordering::Relaxed);
        TunnelStats::bump(&inner.stats.disconnects);
        inner.stats.push_event(ConnectionEvent::Disconnected, detail);
        inner.parts.observer.notify(ConnectionEvent::Disconnected);
    }

    /// Read, dispatch and answer requests until the connection closes.
    ///
    /// Each response is written before the next frame is read, so responses
    /// leave in request order. A frame that does not decode ends the loop; a
    /// failing or panicking handler only costs that request an error payload.
    async fn read_loop(&self, mut stream: Box<dyn FrameStream>) -> Result<(), TunnelError> {
        let inner = &self.inner;
        loop {
            let frame = tokio::select! {
                biased;
                () = inner.shutdown.cancelled() => return Ok(()),
                frame = stream.next_frame() => frame,
            };
            let Some(text) = frame else {
                return Ok(());
            };
            TunnelStats::bump(&inner.stats.frames_received);

            let request = Request::decode(&text)?;
            debug!(correlation_id = %request.correlation_id, "Tunnel: request received");

            let handled = AssertUnwindSafe(inner.parts.handler.handle(request.data))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(HandlerError::Failed("handler panicked".into())));
            let data = match handled {
                Ok(data) => data,
                Err(e) => {
                    error!(
                        correlation_id = %request.correlation_id,
                        "Tunnel: handler failed: {e}"
                    );
                    TunnelStats::bump(&inner.stats.handler_failures);
                    handler_error_payload()
                }
            };

            self.write(&Outbound::response(request.correlation_id, data))
                .await;
        }
    }

    async fn close_transport(&self) {
        let sink = self.inner.sink.lock().await.take();
        if let Some(mut sink) = sink {
            match sink.close().await {
                Ok(()) => debug!("Tunnel: transport closed"),
                Err(e) => debug!("Tunnel: transport close failed: {e}"),
            }
        }
    }
}
