//! # Kiosk Configuration
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [server]
//! host = "192.168.1.100"
//! port = 5000
//! path = "/ws"
//!
//! [machine]
//! id = "ender-5"
//!
//! [reconnect]
//! interval_ms = 5000
//! on_disconnect = "clear_all"
//!
//! [display]
//! dev_stats = true
//! ```
//!
//! Every section is optional except `[machine]`, whose `id` must match the
//! machine ID configured on the Connect3Dp server.

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::machine_state::DisconnectPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the kiosk.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KioskConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub machine: MachineConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

/// Connect3Dp WebSocket endpoint. Plain `ws://` only.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
        }
    }
}

impl ServerConfig {
    pub fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("ws://{}:{}{}", self.host, self.port, path)
    }
}

/// The single machine this kiosk monitors.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MachineConfig {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_interval_ms")]
    pub interval_ms: u64,
    /// What the machine state forgets when the link drops.
    #[serde(default)]
    pub on_disconnect: DisconnectPolicy,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_reconnect_interval_ms(),
            on_disconnect: DisconnectPolicy::default(),
        }
    }
}

impl ReconnectConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DisplayConfig {
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    /// Show link counters under the status line.
    #[serde(default)]
    pub dev_stats: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval_ms(),
            dev_stats: false,
        }
    }
}

impl DisplayConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 5000 }
fn default_path() -> String { "/ws".to_string() }
fn default_reconnect_interval_ms() -> u64 { 5000 }
fn default_refresh_interval_ms() -> u64 { 250 }

impl KioskConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.machine.id.trim().is_empty() {
            return Err(ConfigError::Invalid("machine.id must not be empty".to_string()));
        }
        if self.server.host.is_empty() {
            return Err(ConfigError::Invalid("server.host must not be empty".to_string()));
        }
        if self.reconnect.interval_ms == 0 {
            return Err(ConfigError::Invalid("reconnect.interval_ms must be positive".to_string()));
        }
        if self.display.refresh_interval_ms == 0 {
            return Err(ConfigError::Invalid("display.refresh_interval_ms must be positive".to_string()));
        }
        Ok(())
    }
}

/// Load and parse the kiosk configuration from a TOML file.
pub fn load_config(path: &str) -> Result<KioskConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                Err(ConfigError::Toml(e))
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            Err(ConfigError::Io(e))
        }
    }
}
