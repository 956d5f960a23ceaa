//! Configuration for the umbra daemon.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Node identity settings
    #[serde(default)]
    pub node: NodeConfig,
    /// Socket settings
    #[serde(default)]
    pub network: NetworkConfig,
    /// Overlay membership and feature toggles
    #[serde(default)]
    pub overlay: OverlayConfig,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node identity settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identity key file (hex-encoded secret); created on first run
    #[serde(default = "default_key_file")]
    pub key_file: PathBuf,
    /// Remote session slots
    #[serde(default = "default_peer_slots")]
    pub peer_slots: usize,
    /// Concurrent handshake slots
    #[serde(default = "default_auth_slots")]
    pub auth_slots: usize,
}

/// Socket settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// UDP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

/// Overlay membership and feature toggles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Network name separating disjoint overlays
    #[serde(default = "default_network")]
    pub network: String,
    /// Shared group password
    #[serde(default)]
    pub password: String,
    /// Bootstrap peer addresses (host:port)
    #[serde(default)]
    pub peers: Vec<String>,
    /// Accept and emit userdata
    #[serde(default = "default_true")]
    pub userdata: bool,
    /// Relay traffic for third parties
    #[serde(default)]
    pub relay: bool,
    /// Deliver messages to self through the loopback shortcut
    #[serde(default)]
    pub loopback: bool,
    /// Produce multi-fragment userdata
    #[serde(default = "default_true")]
    pub fragmentation: bool,
    /// Skip the handshake resend delay
    #[serde(default)]
    pub fastauth: bool,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (overridden by RUST_LOG)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Seconds between status dumps at debug level; 0 disables
    #[serde(default = "default_status_interval")]
    pub status_interval: u64,
}

fn default_key_file() -> PathBuf {
    PathBuf::from("umbra.key")
}

fn default_peer_slots() -> usize {
    64
}

fn default_auth_slots() -> usize {
    8
}

fn default_listen_addr() -> String {
    "0.0.0.0:2342".to_string()
}

fn default_network() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_status_interval() -> u64 {
    60
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            key_file: default_key_file(),
            peer_slots: default_peer_slots(),
            auth_slots: default_auth_slots(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            password: String::new(),
            peers: Vec::new(),
            userdata: true,
            relay: false,
            loopback: false,
            fragmentation: true,
            fastauth: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            status_interval: default_status_interval(),
        }
    }
}

impl Config {
    /// Load a configuration file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Render the default configuration as TOML.
    pub fn example() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_roundtrip() {
        let rendered = Config::example();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.network.listen_addr, "0.0.0.0:2342");
        assert_eq!(parsed.node.peer_slots, 64);
        assert!(parsed.overlay.userdata);
        assert!(!parsed.overlay.relay);
    }

    #[test]
    fn test_partial_config() {
        let parsed: Config = toml::from_str(
            r#"
            [overlay]
            network = "mesh7"
            password = "hunter2"
            peers = ["198.51.100.4:2342"]
            relay = true
            "#,
        )
        .unwrap();
        assert_eq!(parsed.overlay.network, "mesh7");
        assert_eq!(parsed.overlay.peers.len(), 1);
        assert!(parsed.overlay.relay);
        // untouched sections keep their defaults
        assert_eq!(parsed.node.auth_slots, 8);
    }
}
