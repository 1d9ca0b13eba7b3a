#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

//! relaylink library: the relay tunnel and its building blocks.
//!
//! - `tunnel`: connection manager, wire envelopes, transport boundary
//! - `config`: TOML + env configuration, per-attempt credential source
//! - `local`: built-in handler, cache and observer for the binary
//! - `error`: error types per boundary

pub mod config;
pub mod error;
pub mod local;
pub mod tunnel;

pub use config::{Config, ConfigCredentials};
pub use tunnel::{
    Collaborators, ConnectionEvent, ConnectionState, PushHandle, Tunnel, TunnelOptions,
};
