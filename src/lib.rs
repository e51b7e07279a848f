//! # meshbridge - Meshtastic ↔ Signal group relay
//!
//! meshbridge joins one Meshtastic channel and one Signal group so plain-text messages and a
//! small command set flow between them under a configurable relay policy.
//!
//! ## Features
//!
//! - **Three relay modes**: open symmetric relay, Signal → mesh only with explicit `!relay`
//!   the other way, or mesh → Signal via `!relay` only.
//! - **Mesh commands**: `!test`, `!on`/`!off`, `!mode[1,2,3]`, `!status`, `!relay`, `!help`.
//!   Policy-changing commands are only accepted from the mesh in mode 1.
//! - **Airtime-friendly delivery**: every mesh transmission goes through one FIFO with a fixed
//!   gap between sends.
//! - **Loop and replay protection**: bracket-prefixed bridge output is never relayed again,
//!   and Signal messages older than the start cutoff are dropped.
//! - **Admission filters**: optional dev-mode marker and allow-character filter on Signal
//!   sender names.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshbridge::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load("config.toml").await?;
//!     config.apply_env_overrides();
//!     config.validate()?;
//!     println!("relay mode {}", config.bridge.relay_mode());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`relay`] - relay state, commands, the outbound mesh queue and both inbound processors
//! - [`meshtastic`] - serial radio adapter, stream framing and protobuf subset
//! - [`signal`] - signal-cli JSON-RPC client and envelope model
//! - [`config`] - configuration loading, environment overrides and validation
//! - [`validation`] - configuration errors and mesh text sanitation
//! - [`metrics`] - relay counters
//! - [`logutil`] - log-safe rendering of untrusted text
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  packets   ┌──────────────┐  send   ┌──────────────┐
//! │  Meshtastic  │ ─────────▶ │    Relay     │ ──────▶ │    Signal    │
//! │   adapter    │ ◀───────── │    core      │ ◀────── │  RPC client  │
//! └──────────────┘ mesh queue └──────────────┘  poll   └──────────────┘
//! ```

pub mod config;
pub mod logutil;
pub mod meshtastic;
pub mod metrics;
pub mod relay;
pub mod signal;
pub mod validation;
