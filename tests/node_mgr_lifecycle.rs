use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use p2p_nodemgr::p2p::node::ip_to_bytes;
use p2p_nodemgr::p2p::now_millis;
use p2p_nodemgr::{
    Channel, ConnectionDirection, Node, NodeMgr, NodeMgrConfig, Transport,
};
use p2p_nodemgr::p2p::TransportError;

static CHANNEL_IDS: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct TestChannel {
    id: u64,
    connected: AtomicBool,
}

impl TestChannel {
    fn open() -> Arc<Self> {
        Arc::new(Self {
            id: CHANNEL_IDS.fetch_add(1, Ordering::Relaxed),
            connected: AtomicBool::new(true),
        })
    }
}

impl Channel for TestChannel {
    fn channel_id(&self) -> u64 {
        self.id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct CountingTransport {
    closed: Mutex<Vec<(u64, String)>>,
}

impl Transport for CountingTransport {
    fn close_connection(
        &self,
        channel: &Arc<dyn Channel>,
        reason: &str,
    ) -> Result<(), TransportError> {
        self.closed
            .lock()
            .push((channel.channel_id(), reason.to_string()));
        Ok(())
    }

    fn is_self(&self, _node: &Node) -> bool {
        false
    }
}

fn peer_id(n: u32) -> String {
    format!("{:06x}00-1111-4000-8000-{:012x}", n, n)
}

fn registry(max_active: usize) -> (Arc<NodeMgr>, Arc<CountingTransport>) {
    let transport = Arc::new(CountingTransport::default());
    let config = NodeMgrConfig {
        max_active_nodes: max_active,
        max_temp_nodes: 64,
        boot_nodes: vec![
            format!("p2p://{}@10.20.0.1:30303", peer_id(1)),
            format!("p2p://{}@10.20.0.2:30303", peer_id(2)),
        ],
        ..Default::default()
    };
    let mgr = NodeMgr::new(&config, transport.clone()).expect("registry");
    (Arc::new(mgr), transport)
}

#[test]
fn boot_node_dial_to_active_and_back() {
    let (mgr, transport) = registry(8);
    assert!(mgr.is_seed_ip("10.20.0.1"));
    assert_eq!(mgr.temp_nodes_size(), 2);

    // Connector picks a seed, dials it, registers it as outbound
    let candidate = mgr.next_dial_candidate().expect("candidate");
    assert!(candidate.is_from_seed_list());
    candidate.set_channel(TestChannel::open());
    mgr.record_dial_result(&candidate, true);
    mgr.add_outbound_node(candidate.clone()).expect("outbound");
    assert!(!mgr.not_at_outbound_list(candidate.id_hash()));

    // Handshake completes
    mgr.promote_to_active(candidate.id_hash(), ConnectionDirection::Outbound);
    assert!(mgr.has_active_node(candidate.id_hash()));
    assert_eq!(mgr.outbound_nodes_size(), 0);
    assert_eq!(candidate.direction(), Some(ConnectionDirection::Outbound));

    // The same seed is never dialed twice while active
    for _ in 0..4 {
        if let Some(next) = mgr.next_dial_candidate() {
            assert_ne!(next.id_hash(), candidate.id_hash());
        }
    }

    // Seed view lists it
    let dump = mgr.dump_status(mgr.self_short_id(), false);
    assert!(dump.contains(&candidate.id_short()));

    mgr.drop_active(candidate.id_hash(), "sync stalled");
    assert_eq!(mgr.active_nodes_size(), 0);
    assert_eq!(transport.closed.lock().len(), 1);
}

#[test]
fn inbound_handshake_then_timeout_of_idle_peer() {
    let (mgr, transport) = registry(8);

    let channel = TestChannel::open();
    let node = mgr.alloc_inbound_node("10.30.0.1", 50_000);
    node.set_channel(channel.clone());
    mgr.add_inbound_node(node.clone()).expect("inbound");
    assert!(node.set_id(peer_id(30).as_bytes()));
    mgr.promote_to_active(channel.id, ConnectionDirection::Inbound);
    assert!(mgr.has_active_node(node.id_hash()));

    // Healthy peer keeps talking, then falls silent for two minutes
    let later = now_millis() + 120_000;
    let busy = mgr.alloc_inbound_node("10.30.0.2", 50_000);
    busy.set_id(peer_id(31).as_bytes());
    let busy_channel = TestChannel::open();
    busy.set_channel(busy_channel.clone());
    mgr.add_inbound_node(busy.clone()).expect("inbound");
    mgr.promote_to_active(busy_channel.id, ConnectionDirection::Inbound);
    busy.refresh_timestamp_at(later);

    mgr.timeout_check(later);
    assert!(!mgr.has_active_node(node.id_hash()));
    assert!(mgr.has_active_node(busy.id_hash()));
    let closed = transport.closed.lock();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].1, "active-timeout ip=10.30.0.1");
}

#[test]
fn concurrent_duplicate_promotions_keep_one_peer_per_id() {
    const THREADS: u32 = 8;
    const IDS: u32 = 50;

    let (mgr, transport) = registry(1_000);
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let mgr = mgr.clone();
            thread::spawn(move || {
                for n in 0..IDS {
                    let id = peer_id(100 + n);
                    let channel = TestChannel::open();
                    if t % 2 == 0 {
                        let ip = format!("10.40.{}.{}", t, n);
                        let node = Arc::new(Node::new(false, id.as_bytes(), &ip_to_bytes(&ip), 30303));
                        node.set_channel(channel);
                        // Lost the race to an already-active twin
                        if mgr.add_outbound_node(node.clone()).is_ok() {
                            mgr.promote_to_active(node.id_hash(), ConnectionDirection::Outbound);
                        }
                    } else {
                        let node = mgr.alloc_inbound_node(&format!("10.41.{}.{}", t, n), 40000);
                        node.set_channel(channel.clone());
                        mgr.add_inbound_node(node.clone()).expect("inbound");
                        node.set_id(id.as_bytes());
                        mgr.promote_to_active(channel.id, ConnectionDirection::Inbound);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker");
    }

    assert_eq!(mgr.active_nodes_size(), IDS as usize);
    assert_eq!(mgr.inbound_nodes_size(), 0);
    assert_eq!(mgr.outbound_nodes_size(), 0);
    for node in mgr.get_active_nodes_list() {
        assert!(mgr.not_at_outbound_list(node.id_hash()), "{} also outbound", node);
    }

    // Every active peer's channel was left open
    let closed: HashSet<u64> = transport.closed.lock().iter().map(|(c, _)| *c).collect();
    for node in mgr.get_active_nodes_list() {
        assert!(!closed.contains(&node.channel_id().expect("channel")));
    }
    // Closed channels are never closed twice
    assert_eq!(closed.len(), transport.closed.lock().len());
}

#[test]
fn accepted_connection_supersedes_pending_dial() {
    let (mgr, transport) = registry(8);

    let dial_channel = TestChannel::open();
    let dialed = Arc::new(Node::new(false, peer_id(70).as_bytes(), &ip_to_bytes("10.70.0.1"), 30303));
    dialed.set_channel(dial_channel.clone());
    mgr.add_outbound_node(dialed.clone()).expect("outbound");

    let accept_channel = TestChannel::open();
    let accepted = mgr.alloc_inbound_node("10.70.0.1", 51_000);
    accepted.set_channel(accept_channel.clone());
    mgr.add_inbound_node(accepted.clone()).expect("inbound");
    assert!(accepted.set_id(peer_id(70).as_bytes()));
    mgr.promote_to_active(accept_channel.id, ConnectionDirection::Inbound);

    assert!(mgr.has_active_node(dialed.id_hash()));
    assert!(mgr.not_at_outbound_list(dialed.id_hash()));
    assert_eq!(mgr.inbound_nodes_size(), 0);
    let closed = transport.closed.lock();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].0, dial_channel.id);
}

#[test]
fn sweep_racing_promotion_never_loses_a_peer_silently() {
    let (mgr, transport) = registry(1_000);
    let stop = Arc::new(AtomicBool::new(false));

    let sweeper = {
        let mgr = mgr.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                mgr.timeout_check(now_millis());
            }
        })
    };

    let mut promoted = Vec::new();
    for n in 0..200 {
        let channel = TestChannel::open();
        let node = mgr.alloc_inbound_node(&format!("10.50.{}.{}", n / 256, n % 256), 40000);
        node.set_channel(channel.clone());
        node.set_id(peer_id(1_000 + n).as_bytes());
        mgr.add_inbound_node(node.clone()).expect("inbound");
        mgr.promote_to_active(channel.id, ConnectionDirection::Inbound);
        promoted.push(node);
    }
    stop.store(true, Ordering::Relaxed);
    sweeper.join().expect("sweeper");

    // Each peer is either active or was closed, never both and never neither
    let closed: HashSet<u64> = transport.closed.lock().iter().map(|(c, _)| *c).collect();
    for node in promoted {
        let active = mgr.has_active_node(node.id_hash());
        let was_closed = closed.contains(&node.channel_id().expect("channel"));
        assert!(active ^ was_closed, "peer {} active={} closed={}", node, active, was_closed);
    }
}

#[test]
fn shutdown_empties_every_map() {
    let (mgr, transport) = registry(8);
    for n in 0..3 {
        let node = Arc::new(Node::new(
            false,
            peer_id(200 + n).as_bytes(),
            &ip_to_bytes(&format!("10.60.0.{}", n + 1)),
            30303,
        ));
        node.set_channel(TestChannel::open());
        mgr.add_outbound_node(node.clone()).expect("outbound");
        if n > 0 {
            mgr.promote_to_active(node.id_hash(), ConnectionDirection::Outbound);
        }
    }
    let inbound = mgr.alloc_inbound_node("10.60.1.1", 40000);
    inbound.set_channel(TestChannel::open());
    mgr.add_inbound_node(inbound).expect("inbound");

    mgr.shutdown();
    assert_eq!(mgr.active_nodes_size(), 0);
    assert_eq!(mgr.outbound_nodes_size(), 0);
    assert_eq!(mgr.inbound_nodes_size(), 0);
    assert_eq!(transport.closed.lock().len(), 4);
    assert_eq!(mgr.metrics().close_count("shutdown"), 4);
    assert!(mgr.metrics().render().contains("nodemgr_active_nodes 0"));
}
