//! # Configuration Management Module
//!
//! Centralized configuration for the bridge: a TOML file with serde defaults, environment
//! variable overrides, and validation.
//!
//! ## Configuration Structure
//!
//! - [`SignalConfig`] - Signal JSON-RPC daemon, target group, polling and sender filters
//! - [`MeshtasticConfig`] - Device path, channel index, warmup and send pacing
//! - [`BridgeConfig`] - Relay mode and mesh → Signal operating mode
//! - [`LoggingConfig`] - Log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use meshbridge::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load("config.toml").await?;
//!     config.apply_env_overrides();
//!     config.validate()?;
//!     println!("Signal group: {}", config.signal.group_id);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [signal]
//! group_id = "base64-group-id=="
//! poll_interval_secs = 2
//! filter_chars = "📢"
//!
//! [meshtastic]
//! port = "/dev/ttyUSB0"
//! channel = 1
//! node_db_warmup_secs = 15
//!
//! [bridge]
//! relay_mode = 2
//! mesh_to_chat = "on"
//! ```
//!
//! ## Environment Integration
//!
//! Precedence: CLI args > Environment > Config file > Defaults. The environment variable
//! names are the ones used by existing container deployments (`SIGNAL_GROUP_ID`,
//! `MESH_DEVICE`, `MESH_CHANNEL_INDEX`, `RELAY_MODE`, ...).

use anyhow::{anyhow, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::relay::state::RelayMode;
use crate::signal::{DEFAULT_RPC_TIMEOUT, DEFAULT_RPC_URL};
use crate::validation::{ConfigError, MIN_MESH_TEXT_BYTES};

/// Hard lower bound for spacing between mesh text sends.
pub const MIN_SEND_GAP_MS: u64 = 2000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// signal-cli JSON-RPC HTTP endpoint
    pub rpc_url: String,
    /// Target Signal group (base64 group id as reported by signal-cli)
    pub group_id: String,
    pub poll_interval_secs: u64,
    pub rpc_timeout_secs: u64,
    /// Show only the first word of Signal profile names on the mesh
    pub short_names: bool,
    /// Only relay Signal senders whose display name contains one of `filter_chars`
    pub filter_enabled: bool,
    pub filter_chars: String,
    /// Messages older than bridge start minus this window are discarded
    pub startup_skew_minutes: u64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            group_id: String::new(),
            poll_interval_secs: 2,
            rpc_timeout_secs: DEFAULT_RPC_TIMEOUT.as_secs(),
            short_names: false,
            filter_enabled: true,
            filter_chars: "\u{1F4E2}".to_string(),
            startup_skew_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshtasticConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Mesh channel index used for both receive filtering and sending (0 = primary)
    pub channel: u32,
    /// Seconds to wait after connecting so the node database can populate
    pub node_db_warmup_secs: u64,
    /// Open the serial device with exclusive access (TIOCEXCL on Unix)
    pub exclusive: bool,
    pub connect_timeout_secs: u64,
    /// Spacing between consecutive mesh text sends (ms). Clamped to >= 2000ms.
    pub send_gap_ms: u64,
    /// Maximum UTF-8 byte length of a single mesh text
    pub max_text_bytes: usize,
}

impl Default for MeshtasticConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115200,
            channel: 1,
            node_db_warmup_secs: 15,
            exclusive: false,
            connect_timeout_secs: 20,
            send_gap_ms: 3200,
            max_text_bytes: 200,
        }
    }
}

impl MeshtasticConfig {
    pub fn send_gap(&self) -> Duration {
        if self.send_gap_ms < MIN_SEND_GAP_MS {
            warn!(
                "Configured send_gap_ms={}ms is below {}ms; clamping",
                self.send_gap_ms, MIN_SEND_GAP_MS
            );
            return Duration::from_millis(MIN_SEND_GAP_MS);
        }
        Duration::from_millis(self.send_gap_ms)
    }

    pub fn is_primary_channel(&self) -> bool {
        self.channel == 0
    }
}

/// What the bridge does with traffic heard on the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshToChat {
    /// Normal operation: commands and relaying
    On,
    /// Only log confirmation when the bridge hears its own transmissions
    Echo,
    /// Do not subscribe to mesh traffic at all
    Off,
}

impl MeshToChat {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "on" => MeshToChat::On,
            "echo" => MeshToChat::Echo,
            "off" => MeshToChat::Off,
            other => {
                warn!("mesh_to_chat='{}' is invalid. Defaulting to off.", other);
                MeshToChat::Off
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MeshToChat::On => "on",
            MeshToChat::Echo => "echo",
            MeshToChat::Off => "off",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Initial relay mode (1, 2 or 3). Anything else falls back to 2.
    pub relay_mode: i64,
    /// "on", "echo" or "off"
    pub mesh_to_chat: String,
    /// Development filter: only relay Signal senders with 🔧 in their name
    pub dev_mode: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            relay_mode: 2,
            mesh_to_chat: "on".to_string(),
            dev_mode: false,
        }
    }
}

impl BridgeConfig {
    pub fn relay_mode(&self) -> RelayMode {
        RelayMode::from_config(self.relay_mode)
    }

    pub fn mesh_to_chat(&self) -> MeshToChat {
        MeshToChat::parse(&self.mesh_to_chat)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> log::LevelFilter {
        match self.level.trim().to_ascii_lowercase().as_str() {
            "debug" => log::LevelFilter::Debug,
            "info" => log::LevelFilter::Info,
            "warning" | "warn" => log::LevelFilter::Warn,
            "error" => log::LevelFilter::Error,
            _ => log::LevelFilter::Info,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub meshtastic: MeshtasticConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Apply overrides from the process environment.
    ///
    /// Returns the rejected values as warnings. Overrides are usually applied before the
    /// logger exists, so the caller logs them once logging is up.
    pub fn apply_env_overrides(&mut self) -> Vec<String> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();
        if let Some(v) = lookup("SIGNAL_GROUP_ID") {
            self.signal.group_id = v;
        }
        if let Some(v) = lookup("SIGNAL_RPC_URL") {
            self.signal.rpc_url = v;
        }
        if let Some(v) = lookup("MESH_DEVICE") {
            self.meshtastic.port = v;
        }
        override_int(&lookup, "MESH_CHANNEL_INDEX", &mut self.meshtastic.channel, &mut warnings);
        override_int(&lookup, "SIGNAL_POLL_INTERVAL", &mut self.signal.poll_interval_secs, &mut warnings);
        override_int(&lookup, "NODE_DB_WARMUP", &mut self.meshtastic.node_db_warmup_secs, &mut warnings);
        override_int(&lookup, "RELAY_MODE", &mut self.bridge.relay_mode, &mut warnings);
        override_bool(&lookup, "SIGNAL_SHORT_NAMES", &mut self.signal.short_names);
        override_bool(&lookup, "DEV_MODE", &mut self.bridge.dev_mode);
        override_bool(&lookup, "SIGNAL_FILTER_ENABLED", &mut self.signal.filter_enabled);
        if let Some(v) = lookup("SIGNAL_FILTER_CHARS") {
            self.signal.filter_chars = v;
        }
        if let Some(v) = lookup("MESH_TO_SIGNAL") {
            self.bridge.mesh_to_chat = v;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.logging.level = v;
        }
        warnings
    }

    /// Reject configurations the bridge cannot run with.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.signal.group_id.trim().is_empty() {
            return Err(ConfigError::MissingGroupId);
        }
        if self.meshtastic.channel > 7 {
            return Err(ConfigError::ChannelOutOfRange(self.meshtastic.channel));
        }
        if self.signal.poll_interval_secs == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.meshtastic.port.trim().is_empty() {
            return Err(ConfigError::MissingDevice);
        }
        if self.meshtastic.max_text_bytes < MIN_MESH_TEXT_BYTES {
            return Err(ConfigError::TextLimitTooSmall(self.meshtastic.max_text_bytes));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.signal.poll_interval_secs)
    }

    pub fn node_db_warmup(&self) -> Duration {
        Duration::from_secs(self.meshtastic.node_db_warmup_secs)
    }

    /// Characters accepted by the Signal sender filter
    pub fn filter_chars(&self) -> Vec<char> {
        self.signal.filter_chars.chars().collect()
    }
}

fn override_int<F, T>(lookup: &F, name: &str, target: &mut T, warnings: &mut Vec<String>)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        match raw.trim().parse::<T>() {
            Ok(v) => *target = v,
            Err(_) => warnings.push(format!("{} invalid. Using {}", name, target)),
        }
    }
}

fn override_bool<F>(lookup: &F, name: &str, target: &mut bool)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *target = matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
    }
}
