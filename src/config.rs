//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** - `RELAYLINK_URL`, `RELAYLINK_IDENTITY`,
//!    `RELAYLINK_SECRET`
//! 2. **Config file** - path via `--config <path>`, or `relaylink.toml` in CWD
//! 3. **Compiled defaults** - see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [relay]
//! url = "wss://relay.example.com/ws"
//! keepalive_interval_secs = 20
//! initial_tick_delay_ms = 1000
//! status_push_delay_ms = 1000
//!
//! [auth]
//! identity = "user@example.com"
//! secret = "opaque-secret"
//!
//! [agent]
//! version = "1.2.3"    # defaults to the relaylink version
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Credentials are not cached: [`ConfigCredentials`] re-resolves the whole
//! chain on every connect attempt, so edits to the file or environment take
//! effect on the next reconnect.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::error::ConfigError;
use crate::tunnel::collab::{CredentialSource, Credentials};

/// File looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "relaylink.toml";

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Relay endpoint and timer settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// WebSocket URL of the relay. Override with `RELAYLINK_URL`.
    #[serde(default = "default_url")]
    pub url: String,
    /// Period of the keepalive / reconnect tick (default 20).
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,
    /// Delay of the one extra tick scheduled at startup (default 1000).
    #[serde(default = "default_initial_tick_delay")]
    pub initial_tick_delay_ms: u64,
    /// Delay between a successful handshake and the status push (default 1000).
    #[serde(default = "default_status_push_delay")]
    pub status_push_delay_ms: u64,
}

/// Basic-auth style credentials. Empty values mean "not configured yet".
#[derive(Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Override with `RELAYLINK_IDENTITY`.
    #[serde(default)]
    pub identity: String,
    /// Override with `RELAYLINK_SECRET`.
    #[serde(default)]
    pub secret: String,
}

// Hand-written so the secret never reaches a log line.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("identity", &self.identity)
            .field("secret", &mask(&self.secret))
            .finish()
    }
}

/// Identity of the local agent, sent in the `addonversion` handshake header.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_version")]
    pub version: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_url() -> String {
    "wss://localhost/ws".to_string()
}
fn default_keepalive_interval() -> u64 {
    20
}
fn default_initial_tick_delay() -> u64 {
    1000
}
fn default_status_push_delay() -> u64 {
    1000
}
fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            keepalive_interval_secs: default_keepalive_interval(),
            initial_tick_delay_ms: default_initial_tick_delay(),
            status_push_delay_ms: default_status_push_delay(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl RelayConfig {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs.max(1))
    }

    pub fn initial_tick_delay(&self) -> Duration {
        Duration::from_millis(self.initial_tick_delay_ms)
    }

    pub fn status_push_delay(&self) -> Duration {
        Duration::from_millis(self.status_push_delay_ms)
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist. Otherwise `relaylink.toml` in
    /// the current directory is used when present, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    /// Parse a TOML document; missing sections and fields take their defaults.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply env var overrides, reading variables through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("RELAYLINK_URL") {
            self.relay.url = url;
        }
        if let Some(identity) = lookup("RELAYLINK_IDENTITY") {
            self.auth.identity = identity;
        }
        if let Some(secret) = lookup("RELAYLINK_SECRET") {
            self.auth.secret = secret;
        }
    }

    /// Credentials, or `None` while either half is still empty.
    pub fn credentials(&self) -> Option<Credentials> {
        if self.auth.identity.is_empty() || self.auth.secret.is_empty() {
            return None;
        }
        Some(Credentials {
            identity: self.auth.identity.clone(),
            secret: self.auth.secret.clone(),
        })
    }
}

/// Replace all but the first two characters of a secret with `*`.
pub fn mask(secret: &str) -> String {
    if secret.is_empty() {
        return String::new();
    }
    let visible: String = secret.chars().take(2).collect();
    format!("{visible}{}", "*".repeat(secret.chars().count().saturating_sub(2)))
}

/// [`CredentialSource`] that re-reads the configuration on every call.
pub struct ConfigCredentials {
    path: Option<PathBuf>,
}

impl ConfigCredentials {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    fn current(&self) -> Option<Config> {
        match Config::load(self.path.as_deref()) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("Config reload failed, treating credentials as absent: {e}");
                None
            }
        }
    }
}

impl CredentialSource for ConfigCredentials {
    fn credentials(&self) -> Option<Credentials> {
        self.current()?.credentials()
    }

    fn version(&self) -> String {
        self.current()
            .map_or_else(default_version, |config| config.agent.version)
    }

    fn resolve(&self) -> Option<(Credentials, String)> {
        let config = self.current()?;
        let credentials = config.credentials()?;
        Some((credentials, config.agent.version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.relay.keepalive_interval_secs, 20);
        assert_eq!(config.relay.initial_tick_delay_ms, 1000);
        assert_eq!(config.relay.status_push_delay_ms, 1000);
        assert_eq!(config.agent.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(config.logging.level, "info");
        assert!(config.credentials().is_none());
    }

    #[test]
    fn parses_full_document() {
        let config = Config::parse(
            r#"
            [relay]
            url = "wss://relay.example.com/ws"
            keepalive_interval_secs = 5

            [auth]
            identity = "me@example.com"
            secret = "hunter2"

            [agent]
            version = "9.9.9"
            "#,
        )
        .unwrap();
        assert_eq!(config.relay.url, "wss://relay.example.com/ws");
        assert_eq!(config.relay.keepalive_interval(), Duration::from_secs(5));
        assert_eq!(config.agent.version, "9.9.9");
        let creds = config.credentials().unwrap();
        assert_eq!(creds.identity, "me@example.com");
        assert_eq!(creds.secret, "hunter2");
    }

    #[test]
    fn half_configured_credentials_are_absent() {
        let config = Config::parse("[auth]\nidentity = \"me@example.com\"\n").unwrap();
        assert!(config.credentials().is_none());
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = Config::parse("[auth]\nidentity = \"file\"\nsecret = \"file\"\n").unwrap();
        config.apply_env(|key| match key {
            "RELAYLINK_SECRET" => Some("env-secret".to_string()),
            "RELAYLINK_URL" => Some("ws://127.0.0.1:9000".to_string()),
            _ => None,
        });
        assert_eq!(config.auth.identity, "file");
        assert_eq!(config.auth.secret, "env-secret");
        assert_eq!(config.relay.url, "ws://127.0.0.1:9000");
    }

    #[test]
    fn zero_interval_is_clamped() {
        let config = Config::parse("[relay]\nkeepalive_interval_secs = 0\n").unwrap();
        assert_eq!(config.relay.keepalive_interval(), Duration::from_secs(1));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/relaylink.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn credentials_follow_file_edits() {
        let path = std::env::temp_dir().join(format!(
            "relaylink-credentials-{}.toml",
            std::process::id()
        ));
        let source = ConfigCredentials::new(Some(path.clone()));

        std::fs::write(&path, "[auth]\nidentity = \"a\"\nsecret = \"b\"\n").unwrap();
        let (first, version) = source.resolve().unwrap();
        assert_eq!(first.identity, "a");
        assert_eq!(version, env!("CARGO_PKG_VERSION"));

        std::fs::write(
            &path,
            "[auth]\nidentity = \"c\"\nsecret = \"d\"\n[agent]\nversion = \"2.0.0\"\n",
        )
        .unwrap();
        let (second, version) = source.resolve().unwrap();
        assert_eq!(second.identity, "c");
        assert_eq!(second.secret, "d");
        assert_eq!(version, "2.0.0");
        assert_eq!(source.credentials(), Some(second));

        std::fs::remove_file(&path).unwrap();
        assert!(source.resolve().is_none());
    }

    #[test]
    fn debug_output_masks_secret() {
        let auth = AuthConfig {
            identity: "me".into(),
            secret: "supersecret".into(),
        };
        let rendered = format!("{auth:?}");
        assert!(!rendered.contains("supersecret"));
        assert!(rendered.contains("su*********"));
    }
}
