//! Node registry configuration
//!
//! Handles loading and validation of the registry limits, this node's own
//! identity, and the boot-list peers used for initial network bootstrap.
//! Values are read once at startup; the registry never re-reads them.

use serde::{Deserialize, Serialize};
use std::fs;

use crate::p2p::errors::ConfigError;
use crate::p2p::node::{self, Node};
use crate::p2p::peer_metric::DEFAULT_BAN_INTERVAL_MS;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMgrConfig {
    /// Upper bound on handshaked peers
    #[serde(default = "default_max_active_nodes")]
    pub max_active_nodes: usize,

    /// Upper bound on discovered-but-unconnected peers
    #[serde(default = "default_max_temp_nodes")]
    pub max_temp_nodes: usize,

    /// Boot-list peers (`p2p://{id}@{ip}:{port}`)
    #[serde(default)]
    pub boot_nodes: Vec<String>,

    /// This node's 36-char id
    pub self_id: String,

    #[serde(default = "default_self_ip")]
    pub self_ip: String,

    #[serde(default = "default_self_port")]
    pub self_port: u16,

    /// Period of the timeout sweep (ms)
    #[serde(default = "default_timeout_check_interval_ms")]
    pub timeout_check_interval_ms: u64,

    /// Period of the status log; 0 disables it
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,

    /// Include non-seed peers in the status log
    #[serde(default = "default_status_complete")]
    pub status_complete: bool,

    /// Ban window stamped on every peer entering the registry (ms)
    #[serde(default = "default_ban_interval_ms")]
    pub ban_interval_ms: u64,
}

fn default_max_active_nodes() -> usize {
    128
}

fn default_max_temp_nodes() -> usize {
    128
}

fn default_self_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_self_port() -> u16 {
    30303
}

fn default_timeout_check_interval_ms() -> u64 {
    1_000
}

fn default_status_interval_secs() -> u64 {
    10
}

fn default_status_complete() -> bool {
    true
}

fn default_ban_interval_ms() -> u64 {
    DEFAULT_BAN_INTERVAL_MS
}

impl Default for NodeMgrConfig {
    fn default() -> Self {
        Self {
            max_active_nodes: default_max_active_nodes(),
            max_temp_nodes: default_max_temp_nodes(),
            boot_nodes: vec![],
            self_id: "00000000-0000-0000-0000-000000000000".to_string(),
            self_ip: default_self_ip(),
            self_port: default_self_port(),
            timeout_check_interval_ms: default_timeout_check_interval_ms(),
            status_interval_secs: default_status_interval_secs(),
            status_complete: default_status_complete(),
            ban_interval_ms: default_ban_interval_ms(),
        }
    }
}

impl NodeMgrConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_active_nodes == 0 {
            return Err(ConfigError::Invalid(
                "max_active_nodes must be at least 1".to_string(),
            ));
        }

        if self.max_temp_nodes == 0 {
            return Err(ConfigError::Invalid(
                "max_temp_nodes must be at least 1".to_string(),
            ));
        }

        if !node::is_uuid(&self.self_id) {
            return Err(ConfigError::Invalid(format!(
                "self_id must be a lowercase 36-char node id: {}",
                self.self_id
            )));
        }

        if node::ip_to_bytes(&self.self_ip).is_empty() {
            return Err(ConfigError::Invalid(format!(
                "self_ip is not a dotted ipv4 address: {}",
                self.self_ip
            )));
        }

        if self.timeout_check_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "timeout_check_interval_ms must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// This node as a peer would see it
    pub fn self_node(&self) -> Node {
        Node::new(
            false,
            self.self_id.as_bytes(),
            &node::ip_to_bytes(&self.self_ip),
            u32::from(self.self_port),
        )
    }

    pub fn self_short_id(&self) -> String {
        self.self_id.chars().take(node::ID_SHORT_LEN).collect()
    }
}

/// Load the registry configuration from a TOML file
pub fn load_config(path: &str) -> Result<NodeMgrConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_string(),
        source,
    })?;

    let mut config: NodeMgrConfig = toml::from_str(&content)?;

    // Override from environment variables if present
    if let Some(v) = env_usize("NODEMGR_MAX_ACTIVE_NODES") {
        config.max_active_nodes = v;
    }
    if let Some(v) = env_usize("NODEMGR_MAX_TEMP_NODES") {
        config.max_temp_nodes = v;
    }

    config.validate()?;

    tracing::info!(
        boot_nodes = config.boot_nodes.len(),
        max_active = config.max_active_nodes,
        max_temp = config.max_temp_nodes,
        "Loaded node registry configuration"
    );

    Ok(config)
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.trim().parse().ok()
}
