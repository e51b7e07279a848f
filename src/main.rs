//! Binary entrypoint for the meshbridge CLI.
//!
//! Commands:
//! - `start [--port <path>]` - connect to the radio and run the bridge
//! - `init` - write a starter `config.toml`
//! - `check-config` - load, apply environment overrides and validate the configuration
//!
//! See the library crate docs for module-level details: `meshbridge::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::Path;

use meshbridge::config::{Config, MeshToChat};

#[derive(Parser)]
#[command(name = "meshbridge")]
#[command(about = "Relay messages between a Meshtastic channel and a Signal group")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bridge
    Start {
        /// Meshtastic device port (e.g., /dev/ttyUSB0); overrides config and MESH_DEVICE
        #[arg(short, long)]
        port: Option<String>,
    },
    /// Write a default configuration file
    Init,
    /// Validate the effective configuration and print it
    CheckConfig,
}

/// File config (if present) with environment overrides applied, plus the override warnings
/// to log once logging is initialized.
async fn effective_config(path: &str) -> Result<(Config, Vec<String>)> {
    let mut config = if Path::new(path).exists() {
        Config::load(path).await?
    } else {
        Config::default()
    };
    let warnings = config.apply_env_overrides();
    Ok((config, warnings))
}

fn log_deferred(warnings: &[String]) {
    for w in warnings {
        warn!("{}", w);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            init_logging(None, cli.verbose);
            if Path::new(&cli.config).exists() {
                anyhow::bail!("{} already exists; refusing to overwrite", cli.config);
            }
            Config::create_default(&cli.config).await?;
            info!("Wrote default configuration to {}", cli.config);
            println!("Edit {} and set signal.group_id before starting.", cli.config);
            Ok(())
        }
        Commands::CheckConfig => {
            let (config, warnings) = effective_config(&cli.config).await?;
            init_logging(Some(&config), cli.verbose);
            log_deferred(&warnings);
            config.validate()?;
            println!("{}", toml::to_string_pretty(&config)?);
            println!("Configuration OK");
            Ok(())
        }
        Commands::Start { port } => {
            let (mut config, warnings) = effective_config(&cli.config).await?;
            if let Some(p) = port {
                config.meshtastic.port = p;
            }
            init_logging(Some(&config), cli.verbose);
            log_deferred(&warnings);
            if !Path::new(&cli.config).exists() {
                warn!(
                    "{} not found; using defaults and environment only",
                    cli.config
                );
            }
            config.validate()?;
            if let Err(e) = run_bridge(config).await {
                error!("Bridge stopped: {:#}", e);
                return Err(e);
            }
            Ok(())
        }
    }
}

fn log_banner(config: &Config) {
    info!("======================================");
    info!(" Meshtastic ↔ Signal Bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("======================================");
    info!("Device: {}", config.meshtastic.port);
    info!("Mesh channel index: {}", config.meshtastic.channel);
    info!("Signal group: {}", config.signal.group_id);
    info!("Poll interval: {} sec", config.signal.poll_interval_secs);
    info!("Node DB warmup: {} sec", config.meshtastic.node_db_warmup_secs);
    info!("Log level: {}", config.logging.level);
    info!("Signal short names: {}", config.signal.short_names);
    info!("Relay mode: {}", config.bridge.relay_mode());
    info!("Dev mode: {}", config.bridge.dev_mode);
    info!(
        "Signal filter: {} (chars: {})",
        config.signal.filter_enabled, config.signal.filter_chars
    );
    info!("Mesh → Signal: {}", config.bridge.mesh_to_chat().as_str());
    info!("");
}

#[cfg(feature = "serial")]
async fn run_bridge(config: Config) -> Result<()> {
    use meshbridge::meshtastic::MeshtasticDevice;
    use meshbridge::relay::{NodeDirectory, RelayCore};
    use meshbridge::signal::SignalClient;
    use std::sync::Arc;
    use std::time::Duration;

    log_banner(&config);
    let started_ms = chrono::Utc::now().timestamp_millis();

    info!("Connecting to Meshtastic on {}...", config.meshtastic.port);
    let device = MeshtasticDevice::connect(&config.meshtastic, NodeDirectory::new()).await?;
    info!("Meshtastic connected");

    let bridge_id = device.own_node_id();
    match &bridge_id {
        Some(id) => info!("Bridge node ID: {}", id),
        None => warn!("Bridge node ID unavailable; echo detection disabled"),
    }

    info!(
        "Waiting {} seconds for node database to populate...",
        config.meshtastic.node_db_warmup_secs
    );
    tokio::time::sleep(config.node_db_warmup()).await;
    let _heartbeat = device.spawn_heartbeat();

    let chat = Arc::new(SignalClient::new(
        config.signal.rpc_url.clone(),
        config.signal.group_id.clone(),
        Duration::from_secs(config.signal.rpc_timeout_secs),
    ));
    let core = RelayCore::start(
        &config,
        device.clone(),
        device.link().directory().clone(),
        bridge_id,
        chat,
        started_ms,
    );
    info!(
        "Node database ready ({} nodes known)",
        device.link().directory().len()
    );

    info!("");
    if config.meshtastic.is_primary_channel() {
        warn!("Signal → Mesh relay is DISABLED while MESH_CHANNEL_INDEX=0");
    }
    let mesh_to_chat = config.bridge.mesh_to_chat();
    match mesh_to_chat {
        MeshToChat::On => {
            info!("Mesh commands: !help, !test, !on/!off, !mode[1,2,3], !status, !relay")
        }
        MeshToChat::Echo => info!("Mesh → Signal disabled (echo monitoring active)"),
        MeshToChat::Off => info!("Mesh → Signal disabled (mesh receive off)"),
    }
    info!("Signal commands: !status");
    info!("");
    info!("======================================");
    info!("Bridge active - relaying messages");
    info!("======================================");

    if mesh_to_chat != MeshToChat::Off {
        let packets = device.subscribe();
        tokio::spawn(core.inbound.clone().run(packets));
    }

    let poller = core.poller.clone();
    tokio::select! {
        _ = poller.run(config.poll_interval()) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }
    Ok(())
}

#[cfg(not(feature = "serial"))]
async fn run_bridge(config: Config) -> Result<()> {
    log_banner(&config);
    anyhow::bail!("meshbridge was built without the `serial` feature; no radio transport available")
}

fn init_logging(config: Option<&Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    let configured = config
        .map(|c| c.logging.level_filter())
        .unwrap_or(log::LevelFilter::Info);
    // -v / -vv only ever raise verbosity
    let level = match verbosity {
        0 => configured,
        1 => configured.max(log::LevelFilter::Debug),
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(level);

    let log_file = config
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    match log_file {
        Some(f) => {
            let file = std::sync::Mutex::new(f);
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = file.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    let _ = builder.try_init();
}
