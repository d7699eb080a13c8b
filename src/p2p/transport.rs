//! Transport boundary
//!
//! The registry never touches sockets. It holds opaque channel handles and asks
//! the network I/O layer to close them, and it asks the same layer whether a
//! freshly handshaked peer is actually this node talking to itself.

use std::fmt;
use std::sync::Arc;

use crate::p2p::errors::TransportError;
use crate::p2p::node::Node;

/// Opaque handle to one live connection owned by the I/O layer.
pub trait Channel: Send + Sync + fmt::Debug {
    /// Stable id for this connection; inbound nodes are keyed by it.
    fn channel_id(&self) -> u64;

    fn is_connected(&self) -> bool;
}

/// Capabilities the registry needs from the network I/O layer.
///
/// `close_connection` is a fire-and-forget request: implementations must not
/// block on socket teardown.
pub trait Transport: Send + Sync {
    fn close_connection(&self, channel: &Arc<dyn Channel>, reason: &str)
        -> Result<(), TransportError>;

    fn is_self(&self, node: &Node) -> bool;
}
