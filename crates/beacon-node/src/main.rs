//! LAN beacon headless node.
//!
//! Announces this host on the LAN multicast group, answers other beacons,
//! and logs the peer list whenever it changes.  Runs until Ctrl-C, or until
//! the beacon stops on its own because the network failed.
//!
//! # Usage
//!
//! ```text
//! beacon-node [OPTIONS]
//!
//! Options:
//!   --config <PATH>        Config file [default: platform config dir]
//!   --port <PORT>          Beacon UDP port [default: 9903]
//!   --group <ADDR>         Multicast group [default: 224.0.0.255]
//!   --bind <ADDR>          Local interface address [default: 0.0.0.0]
//!   --interval-ms <MS>     Announcement interval [default: 5000]
//!   --fresh-secs <SECS>    Fresh window [default: 10]
//!   --evict-secs <SECS>    Eviction window, 0 = never [default: 60]
//!   --literal              Use the bare PING/PONG wire format
//!   --loopback             Receive this host's own multicast
//!   --save                 Write the effective settings back to the config file
//! ```
//!
//! Every option can also be set through a `LANBEACON_*` environment variable.
//! Precedence: command line, then environment, then config file, then
//! built-in default.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use beacon_core::WireFormat;
use beacon_node::application::controller::{BeaconController, BeaconState};
use beacon_node::infrastructure::storage::config::{
    config_file_path, load_config, load_config_from, save_config, save_config_to, AppConfig,
    BeaconSection, ConfigError,
};
use beacon_node::infrastructure::transport::udp::UdpTransportFactory;
use beacon_node::infrastructure::ui_bridge::LoggingObserver;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// LAN presence beacon.
///
/// Values left unset fall back to the config file.
#[derive(Debug, Parser)]
#[command(
    name = "beacon-node",
    about = "Announces this host on the LAN and lists the other beacons it hears",
    version
)]
struct Cli {
    /// Path to a TOML config file instead of the platform default.
    #[arg(long, env = "LANBEACON_CONFIG")]
    config: Option<PathBuf>,

    /// UDP port bound, announced to, and replied to.
    #[arg(long, env = "LANBEACON_PORT")]
    port: Option<u16>,

    /// Multicast group address.
    #[arg(long, env = "LANBEACON_GROUP")]
    group: Option<Ipv4Addr>,

    /// Local interface address to bind and join the group on.
    #[arg(long, env = "LANBEACON_BIND")]
    bind: Option<Ipv4Addr>,

    /// Milliseconds between announcements.
    #[arg(long, env = "LANBEACON_INTERVAL_MS")]
    interval_ms: Option<u64>,

    /// Seconds of silence after which a peer is shown as stale.
    #[arg(long, env = "LANBEACON_FRESH_SECS")]
    fresh_secs: Option<u64>,

    /// Seconds of silence after which a peer is forgotten; 0 keeps it.
    #[arg(long, env = "LANBEACON_EVICT_SECS")]
    evict_secs: Option<u64>,

    /// Send bare `PING`/`PONG` text instead of JSON.
    #[arg(long, env = "LANBEACON_LITERAL")]
    literal: bool,

    /// Deliver this host's own multicast back to it.
    #[arg(long, env = "LANBEACON_LOOPBACK")]
    loopback: bool,

    /// Persist the settings in effect (file plus overrides) before starting.
    #[arg(long)]
    save: bool,
}

impl Cli {
    /// Overlays the command-line values onto the loaded config section.
    fn apply(&self, beacon: &mut BeaconSection) {
        if let Some(port) = self.port {
            beacon.port = port;
        }
        if let Some(group) = self.group {
            beacon.multicast_group = group;
        }
        if let Some(bind) = self.bind {
            beacon.bind_address = bind;
        }
        if let Some(ms) = self.interval_ms {
            beacon.announce_interval_ms = ms;
        }
        if let Some(secs) = self.fresh_secs {
            beacon.fresh_window_secs = secs;
        }
        if let Some(secs) = self.evict_secs {
            beacon.eviction_window_secs = secs;
        }
        if self.literal {
            beacon.wire_format = WireFormat::Literal;
        }
        if self.loopback {
            beacon.loopback = true;
        }
    }

    fn load_app_config(&self) -> anyhow::Result<AppConfig> {
        match &self.config {
            Some(path) => load_config_from(path)
                .with_context(|| format!("failed to load config from {}", path.display())),
            None => match load_config() {
                Err(ConfigError::NoPlatformConfigDir) => Ok(AppConfig::default()),
                other => other.context("failed to load config"),
            },
        }
    }

    /// Writes `config` to `--config` if given, else to the platform file.
    ///
    /// Returns the path written.
    fn save_app_config(&self, config: &AppConfig) -> anyhow::Result<PathBuf> {
        match &self.config {
            Some(path) => {
                save_config_to(config, path)
                    .with_context(|| format!("failed to save config to {}", path.display()))?;
                Ok(path.clone())
            }
            None => {
                save_config(config).context("failed to save config")?;
                Ok(config_file_path()?)
            }
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut app_config = cli.load_app_config()?;
    cli.apply(&mut app_config.beacon);

    // `RUST_LOG` wins over the configured level.
    let log_level = app_config.node.log_level.clone();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .init();

    let beacon_config = app_config
        .beacon
        .beacon_config()
        .context("invalid beacon configuration")?;

    if cli.save {
        let path = cli.save_app_config(&app_config)?;
        info!("saved config to {}", path.display());
    }

    info!(
        "LAN beacon starting: group={} format={:?}",
        beacon_config.group_addr(),
        beacon_config.wire_format
    );

    let controller = BeaconController::spawn(
        beacon_config,
        Arc::new(UdpTransportFactory::new(app_config.beacon.bind_address)),
        Arc::new(LoggingObserver::new()),
    );

    let session_id = controller.start().await.context("failed to start beacon")?;
    info!("session {session_id} running.  Press Ctrl-C to exit.");

    // ── Wait for Ctrl-C or an unrequested stop ────────────────────────────────
    let mut status = controller.subscribe();
    let outcome = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                info!("shutdown signal received");
                break Ok(());
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break Err(anyhow!("beacon controller exited"));
                }
                let current = status.borrow_and_update().clone();
                if current.state == BeaconState::Idle {
                    let reason = current
                        .last_error
                        .unwrap_or_else(|| "beacon stopped".to_string());
                    break Err(anyhow!(reason));
                }
            }
        }
    };

    controller.stop(None).await.ok();
    info!("LAN beacon stopped");
    outcome
}
