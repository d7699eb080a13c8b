//! P2P node registry
//!
//! Tracks every peer the node knows about through its connection lifecycle:
//! - Discovered peers queued for dialing (temp)
//! - Connected peers mid-handshake (inbound / outbound)
//! - Handshaked peers eligible for protocol traffic (active)
//!
//! The wire layer plugs in through [`transport::Transport`]; the registry only
//! ever asks it to close channels.

pub mod close_tracker;
pub mod errors;
pub mod maintenance;
pub mod metrics;
pub mod node;
pub mod node_mgr;
pub mod p2p_config;
pub mod peer_metric;
pub mod route_stats;
pub mod transport;

// Test utilities for isolated unit testing
#[cfg(test)]
pub mod test_utils;

/// Wall-clock milliseconds since the unix epoch
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub use errors::{ConfigError, NodeMgrError, TransportError};
pub use node::{ChainStatus, ConnectionDirection, Node, NodeSummary};
pub use node_mgr::NodeMgr;
pub use p2p_config::{load_config, NodeMgrConfig};
pub use peer_metric::PeerMetric;
pub use transport::{Channel, Transport};
