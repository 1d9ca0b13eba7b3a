//! Persistent tunnel to the relay.
//!
//! - `client` - the [`Tunnel`] connection manager (lifecycle, read loop,
//!   keepalive tick, write chokepoint, async push bridge)
//! - `collab` - traits for the collaborators the tunnel drives
//! - `envelope` - wire message shapes
//! - `state` - connection state, observer events, statistics
//! - `transport` - transport boundary traits
//! - `ws` - `tokio-tungstenite` transport

pub mod client;
pub mod collab;
pub mod envelope;
pub mod state;
pub mod transport;
pub mod ws;

pub use client::{Collaborators, PushHandle, Tunnel, TunnelOptions};
pub use state::{ConnectionEvent, ConnectionState, TunnelStats};
