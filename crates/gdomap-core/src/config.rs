//! Configuration system for gdomap.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $GDOMAP_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/gdomap/config.toml
//!   3. ~/.config/gdomap/config.toml

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GdomapConfig {
    /// Where SIGUSR1 writes the peer table.
    pub dump_path: PathBuf,
    pub network: NetworkConfig,
    pub probe: ProbeConfig,
    pub timeouts: TimeoutConfig,
    /// Explicit interface table. Empty = ask the OS.
    pub interfaces: Vec<InterfaceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Well-known TCP/UDP port. 0 = service database, then 538.
    pub port: u16,
    /// Address both well-known sockets bind to.
    pub bind_addr: Ipv4Addr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Disable to run as a purely local name server.
    pub enabled: bool,
    /// Probe broadcast-capable networks with a single broadcast datagram.
    pub broadcast: bool,
    /// Seconds between probe sweeps.
    pub interval_secs: u64,
    /// Largest network whose hosts are probed one by one.
    pub max_unicast_hosts: u32,
    /// Hosts to probe on networks that can be neither broadcast to nor
    /// enumerated.
    pub peers: Vec<Ipv4Addr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_secs: u64,
    pub write_secs: u64,
    pub read_secs: u64,
    /// Server side: how long a client has to deliver its frame.
    pub request_secs: u64,
}

/// One entry of an explicit interface table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    #[serde(default)]
    pub broadcast: Option<Ipv4Addr>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for GdomapConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            probe: ProbeConfig::default(),
            timeouts: TimeoutConfig::default(),
            interfaces: Vec::new(),
            dump_path: std::env::temp_dir().join("gdomap.dump"),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: 0,
            bind_addr: Ipv4Addr::UNSPECIFIED,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            broadcast: true,
            interval_secs: 300,
            max_unicast_hosts: 254,
            peers: Vec::new(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            write_secs: 10,
            read_secs: 3,
            request_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn write(&self) -> Duration {
        Duration::from_secs(self.write_secs)
    }

    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("gdomap")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl GdomapConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file(&Self::file_path())?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse `path`, or return defaults if it does not exist.
    pub fn load_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(GdomapConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("GDOMAP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config to `path` if nothing is there yet.
    pub fn write_default_if_missing(path: &std::path::Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text =
            toml::to_string_pretty(&GdomapConfig::default()).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Apply GDOMAP_* overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(p) = lookup("GDOMAP_NETWORK__PORT").and_then(|v| v.parse().ok()) {
            self.network.port = p;
        }
        if let Some(v) = lookup("GDOMAP_PROBE__ENABLED") {
            self.probe.enabled = v == "true" || v == "1";
        }
        if let Some(secs) = lookup("GDOMAP_PROBE__INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.probe.interval_secs = secs;
        }
        if let Some(v) = lookup("GDOMAP_PROBE__PEERS") {
            self.probe.peers = v
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
        }
    }
}
