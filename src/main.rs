#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # relaylink
//!
//! Keeps one WebSocket open from this machine to a relay server. The relay
//! sends `{"correlationId", "data"}` requests; each is answered by the local
//! handler with a response carrying the same id. The agent also sends a
//! `{"ping": "pong"}` keepalive every tick and `{"async": true, "data"}`
//! status pushes.
//!
//! ## Subcommands
//!
//! - `relaylink run` (default) - connect and serve until SIGINT/SIGTERM
//! - `relaylink check-config` - print the resolved configuration
//!
//! ## Architecture
//!
//! ```text
//! main.rs           entry point, clap subcommands, signal-driven shutdown
//! config.rs         TOML + env-var configuration, per-attempt credentials
//! error.rs          error types per boundary
//! tunnel/
//!   client.rs       Tunnel: lifecycle, read loop, keepalive, write chokepoint
//!   collab.rs       Handler / Observer / LocalAgent / CredentialSource traits
//!   envelope.rs     wire envelopes
//!   state.rs        ConnectionState, events, TunnelStats
//!   transport.rs    Transport / FrameSink / FrameStream traits
//!   ws.rs           tokio-tungstenite transport
//! local/
//!   mod.rs          DeviceAgent (ping/info/health), LogObserver
//!   system.rs       /proc snapshot
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use relaylink::config::{mask, Config, ConfigCredentials};
use relaylink::local::{DeviceAgent, LogObserver};
use relaylink::tunnel::ws::WsTransport;
use relaylink::tunnel::{Collaborators, Tunnel, TunnelOptions, TunnelStats};

/// Persistent relay tunnel client.
#[derive(Parser)]
#[command(name = "relaylink", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the relay and serve requests (default when no subcommand given).
    Run {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the resolved configuration (secret masked) and exit.
    CheckConfig {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Some(Commands::CheckConfig { config }) => check_config(config.as_deref()),
        Some(Commands::Run { config }) => run(config),
        None => run(None),
    }
}

fn check_config(path: Option<&Path>) -> ExitCode {
    match Config::load(path) {
        Ok(config) => {
            println!("relay.url                     = {}", config.relay.url);
            println!("relay.keepalive_interval_secs = {}", config.relay.keepalive_interval_secs);
            println!("relay.initial_tick_delay_ms   = {}", config.relay.initial_tick_delay_ms);
            println!("relay.status_push_delay_ms    = {}", config.relay.status_push_delay_ms);
            println!("auth.identity                 = {}", config.auth.identity);
            println!("auth.secret                   = {}", mask(&config.auth.secret));
            println!("agent.version                 = {}", config.agent.version);
            println!("logging.level                 = {}", config.logging.level);
            if config.credentials().is_none() {
                println!("(credentials incomplete: the tunnel will not connect)");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("relaylink: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: Option<PathBuf>) -> ExitCode {
    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("relaylink: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    // All tunnel state lives on one event loop.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(serve(config, config_path));
    ExitCode::SUCCESS
}

async fn serve(config: Config, config_path: Option<PathBuf>) {
    info!("relaylink v{} starting", env!("CARGO_PKG_VERSION"));
    if config.credentials().is_none() {
        info!("Credentials not configured yet; will retry on every tick");
    }

    let stats = Arc::new(TunnelStats::new());
    let agent = Arc::new(DeviceAgent::new(config.agent.version.clone(), Arc::clone(&stats)));
    let parts = Collaborators {
        transport: Arc::new(WsTransport),
        credentials: Arc::new(ConfigCredentials::new(config_path)),
        handler: agent.clone(),
        observer: Arc::new(LogObserver),
        agent,
    };
    let tunnel = Tunnel::new(TunnelOptions::from(&config.relay), parts, stats);

    let stopper = tunnel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        stopper.stop().await;
    });

    tunnel.start().await;
    info!("Goodbye");
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                error!("Failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
