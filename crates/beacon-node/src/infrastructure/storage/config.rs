//! TOML-based configuration persistence for the beacon node.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\LanBeacon\config.toml`
//! - Linux:    `~/.config/lanbeacon/config.toml`
//! - macOS:    `~/Library/Application Support/LanBeacon/config.toml`
//!
//! Example file:
//!
//! ```toml
//! [node]
//! log_level = "info"
//!
//! [beacon]
//! port = 9903
//! multicast_group = "224.0.0.255"
//! announce_interval_ms = 5000
//! fresh_window_secs = 10
//! eviction_window_secs = 60
//! loopback = false
//! wire_format = "structured"
//! bind_address = "0.0.0.0"
//! ```
//!
//! Every field has a `#[serde(default = "...")]` helper, so a missing file,
//! an empty table, or a file written by an older version all load cleanly.
//! `eviction_window_secs = 0` keeps stale peers forever.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use beacon_core::protocol::messages::{BEACON_PORT, MULTICAST_GROUP};
use beacon_core::{FreshnessPolicy, WireFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::controller::BeaconConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The values parsed but cannot be used.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub beacon: BeaconSection,
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Beacon protocol settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BeaconSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_multicast_group")]
    pub multicast_group: Ipv4Addr,
    #[serde(default = "default_announce_interval_ms")]
    pub announce_interval_ms: u64,
    #[serde(default = "default_fresh_window_secs")]
    pub fresh_window_secs: u64,
    /// `0` disables eviction.
    #[serde(default = "default_eviction_window_secs")]
    pub eviction_window_secs: u64,
    #[serde(default)]
    pub loopback: bool,
    #[serde(default)]
    pub wire_format: WireFormat,
    /// Local interface address; `0.0.0.0` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: Ipv4Addr,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_port() -> u16 {
    BEACON_PORT
}
fn default_multicast_group() -> Ipv4Addr {
    MULTICAST_GROUP
}
fn default_announce_interval_ms() -> u64 {
    5000
}
fn default_fresh_window_secs() -> u64 {
    FreshnessPolicy::DEFAULT_FRESH_WINDOW.as_secs()
}
fn default_eviction_window_secs() -> u64 {
    FreshnessPolicy::DEFAULT_EVICTION_WINDOW.as_secs()
}
fn default_bind_address() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for BeaconSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            multicast_group: default_multicast_group(),
            announce_interval_ms: default_announce_interval_ms(),
            fresh_window_secs: default_fresh_window_secs(),
            eviction_window_secs: default_eviction_window_secs(),
            loopback: false,
            wire_format: WireFormat::default(),
            bind_address: default_bind_address(),
        }
    }
}

impl BeaconSection {
    /// Converts the on-disk section into the runtime [`BeaconConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the group is not a multicast
    /// address, the interval is zero, or the eviction window does not exceed
    /// the fresh window.
    pub fn beacon_config(&self) -> Result<BeaconConfig, ConfigError> {
        if !self.multicast_group.is_multicast() {
            return Err(ConfigError::Invalid(format!(
                "{} is not a multicast group address",
                self.multicast_group
            )));
        }
        if self.announce_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "announce_interval_ms must be greater than zero".to_string(),
            ));
        }
        let eviction_window = match self.eviction_window_secs {
            0 => None,
            secs if secs <= self.fresh_window_secs => {
                return Err(ConfigError::Invalid(format!(
                    "eviction_window_secs ({secs}) must exceed fresh_window_secs ({})",
                    self.fresh_window_secs
                )));
            }
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(BeaconConfig {
            port: self.port,
            multicast_group: self.multicast_group,
            announce_interval: Duration::from_millis(self.announce_interval_ms),
            freshness: FreshnessPolicy::new(
                Duration::from_secs(self.fresh_window_secs),
                eviction_window,
            ),
            loopback: self.loopback,
            wire_format: self.wire_format,
        })
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(platform_config_dir()
        .ok_or(ConfigError::NoPlatformConfigDir)?
        .join("config.toml"))
}

/// Loads `AppConfig` from the platform config file, returning defaults if it
/// does not yet exist.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning defaults if it does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to the platform config file.
///
/// # Errors
///
/// See [`save_config_to`].
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Persists `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config directory including the `LanBeacon`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("LanBeacon"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("lanbeacon"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("LanBeacon")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
