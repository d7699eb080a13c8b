//! Node registry
//!
//! Owns every peer this node knows about, split by connection state:
//! - **temp**: discovered peers waiting for the connector to dial them
//! - **inbound / outbound**: sockets open, handshake still pending
//! - **active**: handshaked peers eligible for protocol traffic
//!
//! The acceptor, connector and sweep threads all mutate the registry at once.
//! There is no registry-wide lock: each collection is its own concurrent
//! container, and promotion/eviction of one peer is serialized by that peer's
//! own lock only.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use crate::p2p::close_tracker::{CloseEvent, CloseTracker};
use crate::p2p::errors::NodeMgrError;
use crate::p2p::metrics::NodeMgrMetrics;
use crate::p2p::node::{ChainStatus, ConnectionDirection, Node, NodeSummary};
use crate::p2p::now_millis;
use crate::p2p::p2p_config::NodeMgrConfig;
use crate::p2p::transport::Transport;

/// Idle limit for inbound peers mid-handshake (ms)
pub const TIMEOUT_INBOUND_NODES_MS: u64 = 10_000;

/// Idle limit for outbound peers mid-handshake (ms)
pub const TIMEOUT_OUTBOUND_NODES_MS: u64 = 20_000;

/// Bounds of the adaptive active-peer timeout (ms)
pub const TIMEOUT_ACTIVE_MIN_MS: u64 = 10_000;
pub const TIMEOUT_ACTIVE_MAX_MS: u64 = 60_000;

/// Multiplier applied to the mean idle time of the active set
pub const TIMEOUT_ACTIVE_FACTOR: u64 = 5;

/// Mean idle assumed when there are no active peers (ms)
const DEFAULT_MEAN_IDLE_MS: u64 = 4_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseKind {
    Timeout,
    ChannelClosed,
    Full,
    SelfConnected,
    Duplicate,
    Invalid,
    Drop,
    Shutdown,
}

impl CloseKind {
    fn as_str(&self) -> &'static str {
        match self {
            CloseKind::Timeout => "timeout",
            CloseKind::ChannelClosed => "channel_closed",
            CloseKind::Full => "full",
            CloseKind::SelfConnected => "self",
            CloseKind::Duplicate => "duplicate",
            CloseKind::Invalid => "invalid",
            CloseKind::Drop => "drop",
            CloseKind::Shutdown => "shutdown",
        }
    }
}

/// Bounded FIFO of dial candidates plus the peer hashes it holds
#[derive(Default)]
struct TempQueue {
    nodes: VecDeque<Arc<Node>>,
    keys: HashSet<u64>,
}

/// Adaptive idle limit for the active set: five times the mean idle time,
/// clamped to `[TIMEOUT_ACTIVE_MIN_MS, TIMEOUT_ACTIVE_MAX_MS]`.
///
/// A uniformly slow network raises the limit instead of evicting everyone.
pub fn adaptive_active_timeout(idle_times: &[u64]) -> u64 {
    mean_ms(idle_times)
        .unwrap_or(DEFAULT_MEAN_IDLE_MS)
        .saturating_mul(TIMEOUT_ACTIVE_FACTOR)
        .clamp(TIMEOUT_ACTIVE_MIN_MS, TIMEOUT_ACTIVE_MAX_MS)
}

fn mean_ms(values: &[u64]) -> Option<u64> {
    if values.is_empty() {
        return None;
    }
    let sum: u128 = values.iter().map(|&v| u128::from(v)).sum();
    Some((sum / values.len() as u128) as u64)
}

pub struct NodeMgr {
    max_active_nodes: usize,
    max_temp_nodes: usize,
    ban_interval_ms: u64,
    self_short_id: String,
    seed_ips: RwLock<HashSet<String>>,
    temp_nodes: Mutex<TempQueue>,
    /// key: channel id
    inbound_nodes: DashMap<u64, Arc<Node>>,
    /// key: id hash
    outbound_nodes: DashMap<u64, Arc<Node>>,
    /// key: id hash
    active_nodes: DashMap<u64, Arc<Node>>,
    transport: Arc<dyn Transport>,
    closes: Mutex<CloseTracker>,
    metrics: NodeMgrMetrics,
}

impl NodeMgr {
    /// Build the registry from config and queue the configured boot nodes.
    pub fn new(config: &NodeMgrConfig, transport: Arc<dyn Transport>) -> Result<Self, NodeMgrError> {
        let mgr = Self {
            max_active_nodes: config.max_active_nodes,
            max_temp_nodes: config.max_temp_nodes,
            ban_interval_ms: config.ban_interval_ms,
            self_short_id: config.self_short_id(),
            seed_ips: RwLock::new(HashSet::new()),
            temp_nodes: Mutex::new(TempQueue::default()),
            inbound_nodes: DashMap::new(),
            outbound_nodes: DashMap::new(),
            active_nodes: DashMap::new(),
            transport,
            closes: Mutex::new(CloseTracker::new()),
            metrics: NodeMgrMetrics::new()?,
        };

        let queued = mgr.load_seeds(&config.boot_nodes);
        info!(
            max_active = mgr.max_active_nodes,
            max_temp = mgr.max_temp_nodes,
            boot_nodes = queued,
            "[NODE_MGR] Initialized"
        );
        Ok(mgr)
    }

    pub fn max_active_nodes(&self) -> usize {
        self.max_active_nodes
    }

    pub fn max_temp_nodes(&self) -> usize {
        self.max_temp_nodes
    }

    pub fn self_short_id(&self) -> &str {
        &self.self_short_id
    }

    pub fn metrics(&self) -> &NodeMgrMetrics {
        &self.metrics
    }

    // ------------------------------------------------------------------
    // Seeds
    // ------------------------------------------------------------------

    pub fn add_seed_ip(&self, ip: &str) {
        self.seed_ips.write().insert(ip.to_string());
    }

    pub fn is_seed_ip(&self, ip: &str) -> bool {
        self.seed_ips.read().contains(ip)
    }

    /// Parse boot-list URIs, register their ips as seeds and queue them for
    /// dialing. Malformed entries are skipped. Returns how many were queued.
    pub fn load_seeds(&self, uris: &[String]) -> usize {
        let mut queued = 0;
        for uri in uris {
            let Some(node) = Node::parse_uri(uri) else {
                warn!("[NODE_MGR] Skipping malformed boot node: {}", uri);
                continue;
            };
            self.add_seed_ip(node.ip_str());
            if self.add_temp_node(Arc::new(node)) {
                queued += 1;
            }
        }
        queued
    }

    // ------------------------------------------------------------------
    // Temp queue
    // ------------------------------------------------------------------

    /// Queue a discovered peer for dialing.
    ///
    /// Skipped when the peer is already queued, when it is already active
    /// (unless it is a seed peer, which is always re-queued so reconnects keep
    /// happening), or when the queue is full. Returns whether it was queued.
    pub fn add_temp_node(&self, node: Arc<Node>) -> bool {
        node.set_ban_interval(self.ban_interval_ms);
        let key = node.peer_hash();
        let queued = {
            let mut temp = self.temp_nodes.lock();
            if temp.keys.len() >= self.max_temp_nodes {
                debug!(
                    "[NODE_MGR] Temp queue full ({}), dropping {}",
                    self.max_temp_nodes, node
                );
                false
            } else if temp.keys.contains(&key) {
                false
            } else if !self.active_nodes.contains_key(&node.id_hash()) || node.is_from_seed_list() {
                temp.keys.insert(key);
                temp.nodes.push_back(node);
                true
            } else {
                false
            }
        };
        if queued {
            self.metrics.temp_nodes.set(self.temp_nodes_size() as i64);
        }
        queued
    }

    /// Pop the oldest dial candidate.
    pub fn take_temp_node(&self) -> Option<Arc<Node>> {
        let node = {
            let mut temp = self.temp_nodes.lock();
            let node = temp.nodes.pop_front()?;
            temp.keys.remove(&node.peer_hash());
            node
        };
        self.metrics.temp_nodes.set(self.temp_nodes_size() as i64);
        Some(node)
    }

    pub fn temp_nodes_size(&self) -> usize {
        self.temp_nodes.lock().nodes.len()
    }

    /// Connector step: pick the next peer worth dialing.
    ///
    /// Seed peers are put back in the queue as they are taken. Peers already
    /// outbound or active, and peers whose metric refuses a connection, are
    /// skipped. Nothing is returned while the active set is full.
    pub fn next_dial_candidate(&self) -> Option<Arc<Node>> {
        if self.active_nodes.len() >= self.max_active_nodes {
            debug!(
                "[NODE_MGR] Active set full ({}), not dialing",
                self.max_active_nodes
            );
            return None;
        }

        // Each queued node is looked at once per call; re-queued seeds would
        // otherwise keep this loop spinning.
        let budget = self.temp_nodes_size();
        for _ in 0..budget {
            let node = self.take_temp_node()?;
            if self.is_seed_ip(node.ip_str()) {
                node.set_from_seed_list(true);
            }
            if node.is_from_seed_list() {
                self.add_temp_node(node.clone());
            }

            let id_hash = node.id_hash();
            if id_hash != 0
                && (self.outbound_nodes.contains_key(&id_hash)
                    || self.active_nodes.contains_key(&id_hash))
            {
                trace!("[NODE_MGR] Already connected to {}, skipping", node);
                continue;
            }

            if node.with_metric(|m| m.should_not_connect()) {
                debug!("[NODE_MGR] Backing off {}", node);
                continue;
            }

            return Some(node);
        }
        None
    }

    /// Feed the outcome of a dial attempt back into the peer's metric.
    pub fn record_dial_result(&self, node: &Node, connected: bool) {
        node.with_metric(|m| {
            if connected {
                m.dec_failed_count();
            } else {
                m.inc_failed_count();
            }
        });
    }

    // ------------------------------------------------------------------
    // Pending connections
    // ------------------------------------------------------------------

    /// Node for a freshly accepted socket, flagged as seed if its ip is one.
    pub fn alloc_inbound_node(&self, ip: &str, port: u32) -> Arc<Node> {
        let node = Node::inbound(ip, port);
        node.set_ban_interval(self.ban_interval_ms);
        if self.is_seed_ip(ip) {
            node.set_from_seed_list(true);
        }
        Arc::new(node)
    }

    /// Register an accepted connection, keyed by its channel id.
    pub fn add_inbound_node(&self, node: Arc<Node>) -> Result<(), NodeMgrError> {
        let key = node.channel_id().ok_or_else(|| NodeMgrError::MissingChannel {
            ip: node.ip_str().to_string(),
            port: node.port(),
        })?;
        trace!("[NODE_MGR] addInboundNode {}", node);
        if let Some(previous) = self.inbound_nodes.insert(key, node.clone()) {
            if !Arc::ptr_eq(&previous, &node) {
                error!(
                    "[NODE_MGR] Inbound key {} reused: {} replaced by {}",
                    key, previous, node
                );
            }
        }
        self.metrics.inbound_nodes.set(self.inbound_nodes.len() as i64);
        Ok(())
    }

    /// Register a dialed connection, keyed by the peer's id hash.
    pub fn add_outbound_node(&self, node: Arc<Node>) -> Result<(), NodeMgrError> {
        let key = node.id_hash();
        if key == 0 {
            return Err(NodeMgrError::MissingId {
                ip: node.ip_str().to_string(),
                port: node.port(),
            });
        }
        if node.channel().is_none() {
            return Err(NodeMgrError::MissingChannel {
                ip: node.ip_str().to_string(),
                port: node.port(),
            });
        }
        node.set_ban_interval(self.ban_interval_ms);

        // The active check runs under the outbound shard lock, so a promotion
        // that lands in between still finds and evicts this entry.
        let slot = self.outbound_nodes.entry(key);
        if self.active_nodes.contains_key(&key) {
            return Err(NodeMgrError::AlreadyActive(node.id_short()));
        }
        trace!("[NODE_MGR] addOutboundNode {}", node);
        match slot {
            Entry::Occupied(mut slot) => {
                let previous = slot.insert(node.clone());
                if !Arc::ptr_eq(&previous, &node) {
                    error!(
                        "[NODE_MGR] Outbound key {} reused: {} replaced by {}",
                        key, previous, node
                    );
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(node.clone());
            }
        }
        self.metrics
            .outbound_nodes
            .set(self.outbound_nodes.len() as i64);
        Ok(())
    }

    pub fn inbound_nodes_size(&self) -> usize {
        self.inbound_nodes.len()
    }

    pub fn outbound_nodes_size(&self) -> usize {
        self.outbound_nodes.len()
    }

    pub fn get_inbound_node(&self, channel_id: u64) -> Option<Arc<Node>> {
        self.inbound_nodes.get(&channel_id).map(|n| n.clone())
    }

    pub fn get_outbound_node(&self, id_hash: u64) -> Option<Arc<Node>> {
        self.outbound_nodes.get(&id_hash).map(|n| n.clone())
    }

    pub fn not_at_outbound_list(&self, id_hash: u64) -> bool {
        !self.outbound_nodes.contains_key(&id_hash)
    }

    fn pending(&self, direction: ConnectionDirection) -> &DashMap<u64, Arc<Node>> {
        match direction {
            ConnectionDirection::Inbound => &self.inbound_nodes,
            ConnectionDirection::Outbound => &self.outbound_nodes,
        }
    }

    // ------------------------------------------------------------------
    // Promotion
    // ------------------------------------------------------------------

    /// Move a handshaked peer from its pending map into the active set.
    ///
    /// `key` is the channel id for inbound peers and the id hash for outbound
    /// ones. Unknown keys are ignored, so repeated handshake signals are
    /// harmless. When another connection for the same id is already active the
    /// existing one wins and the new one is closed. A pending dial to a peer
    /// that just became active is closed as well.
    pub fn promote_to_active(&self, key: u64, direction: ConnectionDirection) {
        let Some((_, node)) = self.pending(direction).remove(&key) else {
            trace!("[NODE_MGR] promote: no {} node under key {}", direction, key);
            return;
        };
        trace!("[NODE_MGR] promote {} {}", direction, node);

        {
            let _guard = node.lock();

            if self.active_nodes.len() >= self.max_active_nodes {
                self.close_node(
                    &node,
                    &format!("{} -> active, active full", direction),
                    CloseKind::Full,
                );
            } else if self.transport.is_self(&node) {
                self.close_node(
                    &node,
                    &format!("{} -> active, self-connected", direction),
                    CloseKind::SelfConnected,
                );
            } else if node.id_hash() == 0 {
                self.close_node(
                    &node,
                    &format!("{} -> active, missing node id", direction),
                    CloseKind::Invalid,
                );
            } else {
                node.set_direction(direction);
                node.set_from_seed_list(self.is_seed_ip(node.ip_str()));

                let existing = match self.active_nodes.entry(node.id_hash()) {
                    Entry::Occupied(slot) => Some(slot.get().id_short()),
                    Entry::Vacant(slot) => {
                        slot.insert(node.clone());
                        None
                    }
                };

                match existing {
                    Some(existing_short) => {
                        self.close_node(
                            &node,
                            &format!("{} -> active, node {} exits", direction, existing_short),
                            CloseKind::Duplicate,
                        );
                    }
                    None => {
                        self.metrics.promotions.inc();
                        debug!(
                            "[NODE_MGR] {} -> active node-id={} ip={}",
                            direction,
                            node.id_short(),
                            node.ip_str()
                        );

                        // A dial to the same peer may still be pending
                        if let Some((_, pending)) = self
                            .outbound_nodes
                            .remove_if(&node.id_hash(), |_, n| !Arc::ptr_eq(n, &node))
                        {
                            self.close_node(
                                &pending,
                                &format!(
                                    "{} -> active, node {} exits",
                                    ConnectionDirection::Outbound,
                                    node.id_short()
                                ),
                                CloseKind::Duplicate,
                            );
                        }
                    }
                }
            }
        }

        self.refresh_gauges();
    }

    // ------------------------------------------------------------------
    // Active set
    // ------------------------------------------------------------------

    pub fn active_nodes_size(&self) -> usize {
        self.active_nodes.len()
    }

    pub fn has_active_node(&self, id_hash: u64) -> bool {
        self.active_nodes.contains_key(&id_hash)
    }

    pub fn get_active_node(&self, id_hash: u64) -> Option<Arc<Node>> {
        self.active_nodes.get(&id_hash).map(|n| n.clone())
    }

    pub fn get_active_nodes_list(&self) -> Vec<Arc<Node>> {
        self.active_nodes.iter().map(|e| e.value().clone()).collect()
    }

    /// Copy of the active map; later registry changes do not show up in it.
    pub fn get_active_nodes_snapshot(&self) -> HashMap<u64, Arc<Node>> {
        self.active_nodes
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    /// Uniform pick over the active set.
    pub fn get_random_active(&self) -> Option<Arc<Node>> {
        let keys: Vec<u64> = self.active_nodes.iter().map(|e| *e.key()).collect();
        if keys.is_empty() {
            return None;
        }
        let pick = keys[rand::thread_rng().gen_range(0..keys.len())];
        // The pick may have been evicted since the keys were copied
        self.get_active_node(pick)
    }

    /// Remove an active peer and close its connection.
    pub fn drop_active(&self, id_hash: u64, reason: &str) {
        debug!("[NODE_MGR] dropActive idHash:{} reason:{}", id_hash, reason);
        let Some((_, node)) = self.active_nodes.remove(&id_hash) else {
            debug!("[NODE_MGR] dropActive: {} not active", id_hash);
            return;
        };
        self.close_node(&node, reason, CloseKind::Drop);
        self.metrics.active_nodes.set(self.active_nodes.len() as i64);
    }

    /// Ban an active peer; unknown ids are ignored.
    pub fn ban(&self, id_hash: u64) {
        if let Some(node) = self.get_active_node(id_hash) {
            node.with_metric(|m| m.ban());
            info!("[NODE_MGR] Banned {}", node);
        }
    }

    // ------------------------------------------------------------------
    // Timeouts
    // ------------------------------------------------------------------

    /// Evict stale peers from the inbound, outbound and active maps.
    ///
    /// Entries removed by another thread mid-sweep are skipped.
    pub fn timeout_check(&self, now: u64) {
        self.timeout_pending(
            ConnectionDirection::Inbound,
            now,
            TIMEOUT_INBOUND_NODES_MS,
        );
        self.timeout_pending(
            ConnectionDirection::Outbound,
            now,
            TIMEOUT_OUTBOUND_NODES_MS,
        );
        self.timeout_active(now);
        self.refresh_gauges();
    }

    fn timeout_pending(&self, direction: ConnectionDirection, now: u64, timeout_ms: u64) {
        let map = self.pending(direction);
        let expired = |node: &Node| now.saturating_sub(node.timestamp()) > timeout_ms;

        let candidates: Vec<u64> = map
            .iter()
            .filter(|e| expired(e.value()))
            .map(|e| *e.key())
            .collect();

        for key in candidates {
            // Re-checked under the shard lock: the peer may have been promoted
            // or refreshed since the scan.
            if let Some((_, node)) = map.remove_if(&key, |_, n| expired(n)) {
                self.close_node(
                    &node,
                    &format!("{}-timeout ip={}", direction, node.ip_str()),
                    CloseKind::Timeout,
                );
            }
        }
    }

    fn timeout_active(&self, now: u64) {
        let snapshot: Vec<(u64, Arc<Node>)> = self
            .active_nodes
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        let idle: Vec<u64> = snapshot
            .iter()
            .map(|(_, n)| now.saturating_sub(n.timestamp()))
            .collect();
        let timeout_ms = adaptive_active_timeout(&idle);
        debug!(
            "[NODE_MGR] average-delay={}ms active-timeout={}ms",
            mean_ms(&idle).unwrap_or(0),
            timeout_ms
        );

        for (key, node) in snapshot {
            if stale_reason(&node, now, timeout_ms).is_none() {
                continue;
            }

            let _guard = node.lock();
            let removed = self
                .active_nodes
                .remove_if(&key, |_, n| {
                    Arc::ptr_eq(n, &node) && stale_reason(n, now, timeout_ms).is_some()
                })
                .is_some();
            if removed {
                if let Some((reason, kind)) = stale_reason(&node, now, timeout_ms) {
                    self.close_node(&node, &reason, kind);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    fn sorted_active(&self, complete: bool) -> Vec<(Arc<Node>, ChainStatus)> {
        let mut sorted: Vec<(Arc<Node>, ChainStatus)> = self
            .active_nodes
            .iter()
            .map(|e| e.value().clone())
            .filter(|n| complete || n.is_from_seed_list())
            .map(|n| {
                let status = n.status();
                (n, status)
            })
            .collect();
        sorted.sort_by(|(_, a), (_, b)| {
            b.total_difficulty
                .cmp(&a.total_difficulty)
                .then_with(|| b.best_block_number.cmp(&a.best_block_number))
        });
        sorted
    }

    /// Human-readable table of the active set, best chain first.
    ///
    /// With `complete == false` only seed peers are listed.
    pub fn dump_status(&self, self_short_id: &str, complete: bool) -> String {
        let mut out = String::from("\n");
        out.push_str(&format!(
            "==================================================== p2p-status-{:>6} ====================================================\n",
            self_short_id
        ));
        out.push_str(&format!(
            "temp[{:3}] inbound[{:3}] outbound[{:3}] active[{:3}]          s - seed node, td - total difficulty, # - block number, bv - binary version\n",
            self.temp_nodes_size(),
            self.inbound_nodes.len(),
            self.outbound_nodes.len(),
            self.active_nodes.len()
        ));
        out.push_str(&format!(
            "\n{:>11}{:>17}{:>11} {:>64} {:>15} {:>5} {:>8} {:>15} {:>12}\n",
            "s", "td", "#", "hash", "ip", "port", "conn", "bv", "ci"
        ));
        out.push_str(&"-".repeat(172));
        out.push('\n');

        for (node, status) in self.sorted_active(complete) {
            out.push_str(&format!(
                "id:{:>6} {} {:>16} {:>10} {:>64} {:>15} {:>5} {:>8} {:>15} {:>12}\n",
                node.id_short(),
                if node.is_from_seed_list() { 'y' } else { ' ' },
                status.total_difficulty,
                status.best_block_number,
                status
                    .best_block_hash
                    .as_deref()
                    .map(hex::encode)
                    .unwrap_or_default(),
                node.ip_str(),
                node.port(),
                node.direction().map(|d| d.as_str()).unwrap_or(""),
                status.binary_version,
                node.channel_id().unwrap_or(0)
            ));
        }
        out
    }

    /// Same ordering and filter as [`NodeMgr::dump_status`], as data.
    pub fn status_summaries(&self, complete: bool) -> Vec<NodeSummary> {
        self.sorted_active(complete)
            .into_iter()
            .map(|(n, _)| n.summary())
            .collect()
    }

    pub fn recent_closes(&self) -> Vec<CloseEvent> {
        self.closes.lock().recent()
    }

    pub fn refresh_gauges(&self) {
        self.metrics.temp_nodes.set(self.temp_nodes_size() as i64);
        self.metrics
            .inbound_nodes
            .set(self.inbound_nodes.len() as i64);
        self.metrics
            .outbound_nodes
            .set(self.outbound_nodes.len() as i64);
        self.metrics.active_nodes.set(self.active_nodes.len() as i64);
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Close and forget every outbound, inbound and active connection.
    ///
    /// A failing close is logged and does not stop the rest.
    pub fn shutdown(&self) {
        let mut failures = 0;
        for (label, map) in [
            ("outbound", &self.outbound_nodes),
            ("inbound", &self.inbound_nodes),
            ("active", &self.active_nodes),
        ] {
            let mut drained = Vec::with_capacity(map.len());
            map.retain(|_, n| {
                drained.push(n.clone());
                false
            });

            for node in drained {
                let reason = if label == "inbound" {
                    format!("p2p-shutdown {} ip={}", label, node.ip_str())
                } else {
                    format!(
                        "p2p-shutdown {} node={} ip={}",
                        label,
                        node.id_short(),
                        node.ip_str()
                    )
                };
                if !self.close_node(&node, &reason, CloseKind::Shutdown) {
                    failures += 1;
                }
            }
        }
        if failures > 0 {
            warn!("[NODE_MGR] p2p-shutdown: {} close requests failed", failures);
        }
        self.refresh_gauges();
        info!("[NODE_MGR] p2p-shutdown complete");
    }

    /// Ask the transport to close `node`'s channel and record the request.
    /// Returns whether the transport accepted it.
    fn close_node(&self, node: &Node, reason: &str, kind: CloseKind) -> bool {
        let delivered = match node.channel() {
            Some(channel) => match self.transport.close_connection(&channel, reason) {
                Ok(()) => {
                    debug!("[NODE_MGR] close {} ({})", node, reason);
                    true
                }
                Err(e) => {
                    warn!("[NODE_MGR] close {} ({}) failed: {}", node, reason, e);
                    false
                }
            },
            None => {
                warn!("[NODE_MGR] close {} ({}): no channel", node, reason);
                false
            }
        };

        self.metrics.record_close(kind.as_str());
        self.closes.lock().record(CloseEvent {
            addr: format!("{}:{}", node.ip_str(), node.port()),
            reason: reason.to_string(),
            timestamp_ms: now_millis(),
            source: kind.as_str().to_string(),
            delivered,
        });
        delivered
    }
}

/// Why an active peer should be evicted, if at all.
fn stale_reason(node: &Node, now: u64, timeout_ms: u64) -> Option<(String, CloseKind)> {
    if now.saturating_sub(node.timestamp()) > timeout_ms {
        return Some((
            format!("active-timeout ip={}", node.ip_str()),
            CloseKind::Timeout,
        ));
    }
    let connected = node.channel().map(|c| c.is_connected()).unwrap_or(false);
    if !connected {
        return Some((
            format!(
                "channel-already-closed node={} ip={}",
                node.id_short(),
                node.ip_str()
            ),
            CloseKind::ChannelClosed,
        ));
    }
    None
}
