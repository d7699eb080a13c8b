//! Test utilities for registry testing with proper isolation
//!
//! Mock channel and transport implementations so unit tests can drive the
//! registry without sockets and inspect every close request it issues.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::p2p::errors::TransportError;
use crate::p2p::node::{ip_to_bytes, Node};
use crate::p2p::transport::{Channel, Transport};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub struct MockChannel {
    id: u64,
    connected: AtomicBool,
}

impl MockChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            connected: AtomicBool::new(true),
        })
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }
}

impl Channel for MockChannel {
    fn channel_id(&self) -> u64 {
        self.id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

/// Transport that records close requests and can be told to fail them
#[derive(Default)]
pub struct RecordingTransport {
    pub closed: Mutex<Vec<(u64, String)>>,
    pub self_id_hash: Mutex<Option<u64>>,
    pub fail_closes: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_self(self_node: &Node) -> Arc<Self> {
        let transport = Self::default();
        *transport.self_id_hash.lock() = Some(self_node.id_hash());
        Arc::new(transport)
    }

    pub fn closed(&self) -> Vec<(u64, String)> {
        self.closed.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closed.lock().len()
    }
}

impl Transport for RecordingTransport {
    fn close_connection(
        &self,
        channel: &Arc<dyn Channel>,
        reason: &str,
    ) -> Result<(), TransportError> {
        self.closed
            .lock()
            .push((channel.channel_id(), reason.to_string()));
        if self.fail_closes.load(Ordering::Relaxed) {
            return Err(TransportError::CloseFailed {
                channel: channel.channel_id(),
                message: "mock failure".to_string(),
            });
        }
        Ok(())
    }

    fn is_self(&self, node: &Node) -> bool {
        matches!(*self.self_id_hash.lock(), Some(h) if h == node.id_hash())
    }
}

/// Deterministic 36-char id for test peer `n`; the short id is `n` in hex
pub fn test_id(n: u32) -> String {
    format!("{:06x}00-0000-4000-8000-{:012x}", n, n)
}

/// Node with id `n` at `10.0.x.y:30303` and a live mock channel
pub fn connected_node(n: u32) -> (Arc<Node>, Arc<MockChannel>) {
    let ip = format!("10.0.{}.{}", (n >> 8) & 0xff, n & 0xff);
    let node = Arc::new(Node::new(
        false,
        test_id(n).as_bytes(),
        &ip_to_bytes(&ip),
        30303,
    ));
    let channel = MockChannel::new();
    node.set_channel(channel.clone());
    (node, channel)
}

/// Channel-less discovery node with id `n`
pub fn discovered_node(n: u32, from_seed_list: bool) -> Arc<Node> {
    let ip = format!("10.1.{}.{}", (n >> 8) & 0xff, n & 0xff);
    Arc::new(Node::new(
        from_seed_list,
        test_id(n).as_bytes(),
        &ip_to_bytes(&ip),
        30303,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_valid_uuids() {
        assert_eq!(test_id(1).len(), 36);
        assert!(crate::p2p::node::is_uuid(&test_id(0xdead)));
    }

    #[test]
    fn test_mock_channel_ids_unique() {
        assert_ne!(MockChannel::new().channel_id(), MockChannel::new().channel_id());
    }

    #[test]
    fn test_recording_transport() {
        let transport = RecordingTransport::new();
        let channel: Arc<dyn Channel> = MockChannel::new();
        transport.close_connection(&channel, "bye").expect("close");
        assert_eq!(transport.closed()[0].1, "bye");

        transport.fail_closes.store(true, Ordering::Relaxed);
        assert!(transport.close_connection(&channel, "again").is_err());
        assert_eq!(transport.close_count(), 2);
    }
}
