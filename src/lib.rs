//! Peer registry for a blockchain p2p layer.
//!
//! See [`p2p::NodeMgr`] for the entry point.

pub mod p2p;

pub use p2p::{
    load_config, Channel, ConnectionDirection, Node, NodeMgr, NodeMgrConfig, NodeMgrError,
    Transport,
};
