//! # Configuration Module
//!
//! Service configuration loaded from YAML, then overridden from the
//! environment, then from command-line flags.
//!
//! ## File Format
//!
//! ```yaml
//! server:
//!   host: 0.0.0.0
//!   port: 24879
//!   max_connections: 64
//!   cors_origin: "*"        # omit to disable CORS
//!   join_timeout_ms: 2000
//!   read_timeout_ms: 30000
//! player:
//!   initial_volume: 32768   # 0..=65536
//!   volume_steps: 64
//!   autoplay: true
//! events:
//!   relay: true
//! ```
//!
//! Every key is optional; missing keys take the defaults shown.
//!
//! ## Environment Variables
//!
//! | Variable | Overrides |
//! |---|---|
//! | `CONNECT_API_HOST` | `server.host` |
//! | `CONNECT_API_PORT` | `server.port` |
//! | `CONNECT_API_MAX_CONNECTIONS` | `server.max_connections` |
//! | `CONNECT_API_CORS_ORIGIN` | `server.cors_origin` (empty string disables) |
//! | `CONNECT_API_EVENTS_RELAY` | `events.relay` |
//!
//! Unparseable values are ignored with a warning and the previous value kept.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::session::MAX_VOLUME;

/// Default port of the control-plane API.
pub const DEFAULT_PORT: u16 = 24879;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    pub server: ServerConfig,
    pub player: PlayerConfig,
    pub events: EventsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Concurrent connections admitted before the accept loop waits
    pub max_connections: usize,
    /// `Access-Control-Allow-Origin` value; `None` disables CORS
    pub cors_origin: Option<String>,
    /// Bound on each join during shutdown
    pub join_timeout_ms: u64,
    /// Socket read timeout while a request is being received
    pub read_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_connections: 64,
            cors_origin: None,
            join_timeout_ms: 2000,
            read_timeout_ms: 30_000,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Static configuration handed to the player factory for every new engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlayerConfig {
    pub initial_volume: u32,
    /// Number of `volume-up` presses from silence to full scale
    pub volume_steps: u32,
    /// Start playing right after `load` unless the request says otherwise
    pub autoplay: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            initial_volume: MAX_VOLUME / 2,
            volume_steps: 64,
            autoplay: true,
        }
    }
}

impl PlayerConfig {
    /// Volume change of one `volume-up`/`volume-down`.
    #[must_use]
    pub fn volume_step(&self) -> u32 {
        MAX_VOLUME / self.volume_steps.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventsConfig {
    /// Attach the event relay to sessions and engines
    pub relay: bool,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { relay: true }
    }
}

impl ApiConfig {
    /// Load and validate a YAML configuration file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, is not valid YAML for this schema,
    /// or fails [`validate`](Self::validate).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: ApiConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        Ok(config)
    }

    /// Apply `CONNECT_API_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("CONNECT_API_HOST") {
            self.server.host = host;
        }
        override_parsed(&lookup, "CONNECT_API_PORT", &mut self.server.port);
        override_parsed(
            &lookup,
            "CONNECT_API_MAX_CONNECTIONS",
            &mut self.server.max_connections,
        );
        if let Some(origin) = lookup("CONNECT_API_CORS_ORIGIN") {
            self.server.cors_origin = (!origin.is_empty()).then_some(origin);
        }
        if let Some(raw) = lookup("CONNECT_API_EVENTS_RELAY") {
            match parse_bool(&raw) {
                Some(v) => self.events.relay = v,
                None => {
                    warn!(
                        key = "CONNECT_API_EVENTS_RELAY",
                        value = %raw,
                        "Ignoring invalid boolean"
                    );
                }
            }
        }
    }

    /// Check value ranges the types alone cannot express.
    ///
    /// # Errors
    ///
    /// Describes the first offending key.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.max_connections == 0 {
            bail!("server.max_connections must be at least 1");
        }
        if self.player.initial_volume > MAX_VOLUME {
            bail!(
                "player.initial_volume must be at most {MAX_VOLUME}, got {}",
                self.player.initial_volume
            );
        }
        if self.player.volume_steps == 0 || self.player.volume_steps > MAX_VOLUME {
            bail!("player.volume_steps must be between 1 and {MAX_VOLUME}");
        }
        Ok(())
    }
}

fn override_parsed<T, F>(lookup: &F, key: &str, slot: &mut T)
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(v) => *slot = v,
            Err(_) => warn!(key, value = %raw, "Ignoring unparseable override"),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
