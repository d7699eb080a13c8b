//! Peer identity and session state
//!
//! One `Node` exists per remote peer the registry knows about. The address is
//! fixed at construction; everything learned later (id after handshake, channel,
//! chain status, activity stamps) sits behind fine-grained locks or atomics so a
//! node can be shared as `Arc<Node>` between the acceptor, connector and sweep
//! threads.
//!
//! **Boot-list URI format:**
//! `p2p://<node-id>@<ipv4>:<port>`
//!
//! Example: `p2p://3e2cab6a-09dd-4771-b28d-6aa674009796@127.0.0.1:30303`

use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::p2p::now_millis;
use crate::p2p::peer_metric::PeerMetric;
use crate::p2p::route_stats::RouteStats;
use crate::p2p::transport::Channel;

/// Node ids are 36-byte uuid strings
pub const ID_LEN: usize = 36;

/// Bytes shown in logs and status tables
pub const ID_SHORT_LEN: usize = 6;

/// Packed ipv4 width: four octets stored as 16-bit big-endian values
pub const SIZE_BYTES_IPV4: usize = 8;

const URI_SCHEME: &str = "p2p://";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionDirection {
    Inbound,
    Outbound,
}

impl ConnectionDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionDirection::Inbound => "inbound",
            ConnectionDirection::Outbound => "outbound",
        }
    }
}

impl fmt::Display for ConnectionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best-chain status reported by the sync layer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainStatus {
    pub best_block_number: u64,
    pub best_block_hash: Option<Vec<u8>>,
    pub total_difficulty: u128,
    pub binary_version: String,
    pub peer_count: u32,
    pub pending_tx_count: u32,
    pub latency_ms: u32,
}

#[derive(Debug, Default)]
struct NodeIdentity {
    id: Option<[u8; ID_LEN]>,
    id_hash: u64,
    id_short: String,
    port: u16,
    peer_hash: u64,
}

#[derive(Debug, Default)]
struct Session {
    channel: Option<Arc<dyn Channel>>,
    direction: Option<ConnectionDirection>,
}

/// Serializable view of a node for status consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id_short: String,
    pub id_hash: u64,
    pub ip: String,
    pub port: u16,
    pub direction: Option<ConnectionDirection>,
    pub from_seed_list: bool,
    pub total_difficulty: String,
    pub best_block_number: u64,
    pub best_block_hash: String,
    pub binary_version: String,
    pub peer_count: u32,
    pub pending_tx_count: u32,
    pub latency_ms: u32,
    pub timestamp: u64,
    pub channel_id: Option<u64>,
}

#[derive(Debug)]
pub struct Node {
    ip: Vec<u8>,
    ip_str: String,
    identity: RwLock<NodeIdentity>,
    session: RwLock<Session>,
    status: RwLock<ChainStatus>,
    /// Last activity, ms since the Unix epoch
    timestamp: AtomicU64,
    from_seed_list: AtomicBool,
    metric: Mutex<PeerMetric>,
    routes: RouteStats,
    /// Per-peer critical section for promotion and eviction
    guard: Mutex<()>,
}

impl Node {
    /// Node for a freshly accepted inbound socket; no id until handshake.
    pub fn inbound(ip_str: &str, port: u32) -> Self {
        let ip = ip_to_bytes(ip_str);
        Self::build(false, None, ip, ip_str.to_string(), sanitize_port(port))
    }

    /// Node for a discovery or boot-list entry.
    ///
    /// An `id` that is not exactly `ID_LEN` bytes is ignored and the node stays
    /// without identity.
    pub fn new(from_seed_list: bool, id: &[u8], ip: &[u8], port: u32) -> Self {
        let ip_str = bytes_to_ip(ip);
        Self::build(
            from_seed_list,
            to_id(id),
            ip.to_vec(),
            ip_str,
            sanitize_port(port),
        )
    }

    fn build(
        from_seed_list: bool,
        id: Option<[u8; ID_LEN]>,
        ip: Vec<u8>,
        ip_str: String,
        port: u16,
    ) -> Self {
        let mut identity = NodeIdentity {
            id,
            port,
            ..Default::default()
        };
        if let Some(id) = &identity.id {
            identity.id_hash = id_hash_of(id);
            identity.id_short = short_of(id);
        }
        identity.peer_hash = peer_hash_of(identity.id.as_ref(), &ip, port);

        Self {
            ip,
            ip_str,
            identity: RwLock::new(identity),
            session: RwLock::new(Session::default()),
            status: RwLock::new(ChainStatus::default()),
            timestamp: AtomicU64::new(now_millis()),
            from_seed_list: AtomicBool::new(from_seed_list),
            metric: Mutex::new(PeerMetric::new()),
            routes: RouteStats::new(),
            guard: Mutex::new(()),
        }
    }

    /// Parse a `p2p://{id}@{ipv4}:{port}` boot-list entry.
    ///
    /// Returns `None` on any deviation from the format. Parsed nodes are
    /// flagged as seed-list nodes.
    pub fn parse_uri(text: &str) -> Option<Node> {
        let rest = text.strip_prefix(URI_SCHEME)?;
        let (id, addr) = rest.split_once('@')?;
        if !is_uuid(id) {
            return None;
        }
        let (ip, port) = addr.rsplit_once(':')?;
        if !is_dotted_ipv4(ip) {
            return None;
        }
        if port.is_empty() || port.len() > 5 || !port.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let port: u32 = port.parse().ok()?;

        Some(Node::new(true, id.as_bytes(), &ip_to_bytes(ip), port))
    }

    /// Inverse of [`Node::parse_uri`]; `None` while the node has no id.
    pub fn to_uri(&self) -> Option<String> {
        let identity = self.identity.read();
        let id = identity.id.as_ref()?;
        Some(format!(
            "{}{}@{}:{}",
            URI_SCHEME,
            String::from_utf8_lossy(id),
            self.ip_str,
            identity.port
        ))
    }

    pub fn id(&self) -> Option<[u8; ID_LEN]> {
        self.identity.read().id
    }

    /// Set the id learned from the handshake.
    ///
    /// Refused when the id has the wrong length or the node already has one:
    /// `id_hash` keys the connection maps and must never move.
    pub fn set_id(&self, id: &[u8]) -> bool {
        let Some(id) = to_id(id) else {
            return false;
        };
        let mut identity = self.identity.write();
        if identity.id.is_some() {
            warn!(
                "[NODE] Ignoring id change for {} ({}:{})",
                identity.id_short, self.ip_str, identity.port
            );
            return false;
        }
        identity.id_hash = id_hash_of(&id);
        identity.id_short = short_of(&id);
        identity.peer_hash = peer_hash_of(Some(&id), &self.ip, identity.port);
        identity.id = Some(id);
        true
    }

    /// 0 until an id is known
    pub fn id_hash(&self) -> u64 {
        self.identity.read().id_hash
    }

    pub fn id_short(&self) -> String {
        self.identity.read().id_short.clone()
    }

    /// Dedup key for the temp queue (id + ip + port)
    pub fn peer_hash(&self) -> u64 {
        self.identity.read().peer_hash
    }

    pub fn ip(&self) -> &[u8] {
        &self.ip
    }

    pub fn ip_str(&self) -> &str {
        &self.ip_str
    }

    pub fn port(&self) -> u16 {
        self.identity.read().port
    }

    pub fn set_port(&self, port: u32) {
        let mut identity = self.identity.write();
        identity.port = sanitize_port(port);
        identity.peer_hash = peer_hash_of(identity.id.as_ref(), &self.ip, identity.port);
    }

    pub fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.session.read().channel.clone()
    }

    pub fn channel_id(&self) -> Option<u64> {
        self.session.read().channel.as_ref().map(|c| c.channel_id())
    }

    pub fn set_channel(&self, channel: Arc<dyn Channel>) {
        self.session.write().channel = Some(channel);
    }

    pub fn direction(&self) -> Option<ConnectionDirection> {
        self.session.read().direction
    }

    pub fn set_direction(&self, direction: ConnectionDirection) {
        self.session.write().direction = Some(direction);
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp.load(Ordering::Relaxed)
    }

    /// Mark traffic or handshake activity for this peer.
    pub fn refresh_timestamp(&self) {
        self.refresh_timestamp_at(now_millis());
    }

    pub fn refresh_timestamp_at(&self, now: u64) {
        self.timestamp.store(now, Ordering::Relaxed);
    }

    pub fn is_from_seed_list(&self) -> bool {
        self.from_seed_list.load(Ordering::Relaxed)
    }

    pub fn set_from_seed_list(&self, from_seed_list: bool) {
        self.from_seed_list.store(from_seed_list, Ordering::Relaxed);
    }

    /// Bulk update of the chain status; absent total difficulty counts as zero.
    #[allow(clippy::too_many_arguments)]
    pub fn update_status(
        &self,
        best_block_number: u64,
        best_block_hash: Option<Vec<u8>>,
        total_difficulty: Option<u128>,
        binary_version: Option<String>,
        peer_count: u32,
        pending_tx_count: u32,
        latency_ms: u32,
    ) {
        let mut status = self.status.write();
        status.best_block_number = best_block_number;
        status.best_block_hash = best_block_hash;
        status.total_difficulty = total_difficulty.unwrap_or(0);
        if let Some(version) = binary_version {
            status.binary_version = version;
        }
        status.peer_count = peer_count;
        status.pending_tx_count = pending_tx_count;
        status.latency_ms = latency_ms;
    }

    pub fn status(&self) -> ChainStatus {
        self.status.read().clone()
    }

    pub fn best_block_number(&self) -> u64 {
        self.status.read().best_block_number
    }

    pub fn total_difficulty(&self) -> u128 {
        self.status.read().total_difficulty
    }

    pub fn set_binary_version(&self, version: &str) {
        self.status.write().binary_version = version.to_string();
    }

    /// Run `f` against this peer's metric under its lock.
    pub fn with_metric<R>(&self, f: impl FnOnce(&mut PeerMetric) -> R) -> R {
        f(&mut self.metric.lock())
    }

    pub fn metric(&self) -> PeerMetric {
        self.metric.lock().clone()
    }

    pub fn set_ban_interval(&self, ban_interval_ms: u64) {
        self.metric.lock().set_ban_interval(ban_interval_ms);
    }

    pub fn routes(&self) -> &RouteStats {
        &self.routes
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.guard.lock()
    }

    pub fn summary(&self) -> NodeSummary {
        let identity = self.identity.read();
        let status = self.status.read();
        NodeSummary {
            id_short: identity.id_short.clone(),
            id_hash: identity.id_hash,
            ip: self.ip_str.clone(),
            port: identity.port,
            direction: self.direction(),
            from_seed_list: self.is_from_seed_list(),
            total_difficulty: status.total_difficulty.to_string(),
            best_block_number: status.best_block_number,
            best_block_hash: status
                .best_block_hash
                .as_deref()
                .map(hex::encode)
                .unwrap_or_default(),
            binary_version: status.binary_version.clone(),
            peer_count: status.peer_count,
            pending_tx_count: status.pending_tx_count,
            latency_ms: status.latency_ms,
            timestamp: self.timestamp(),
            channel_id: self.channel_id(),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let identity = self.identity.read();
        write!(
            f,
            "node={} ip={}:{} seed={}",
            identity.id_short,
            self.ip_str,
            identity.port,
            self.is_from_seed_list()
        )
    }
}

/// Pack a dotted ipv4 string into 8 bytes (four 16-bit big-endian octets).
///
/// Returns an empty vec when the input is not four dotted octets.
pub fn ip_to_bytes(ip: &str) -> Vec<u8> {
    let frags: Vec<&str> = ip.split('.').collect();
    if frags.len() != 4 {
        return Vec::new();
    }
    let mut packed = Vec::with_capacity(SIZE_BYTES_IPV4);
    for frag in frags {
        match frag.parse::<u8>() {
            Ok(octet) => packed.extend_from_slice(&u16::from(octet).to_be_bytes()),
            Err(_) => return Vec::new(),
        }
    }
    packed
}

/// Unpack the 8-byte form back into dotted decimal; `""` on wrong length.
pub fn bytes_to_ip(ip: &[u8]) -> String {
    if ip.len() != SIZE_BYTES_IPV4 {
        return String::new();
    }
    ip.chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]).to_string())
        .collect::<Vec<_>>()
        .join(".")
}

fn sanitize_port(port: u32) -> u16 {
    if (1..=65535).contains(&port) {
        port as u16
    } else {
        0
    }
}

fn to_id(id: &[u8]) -> Option<[u8; ID_LEN]> {
    <[u8; ID_LEN]>::try_from(id).ok()
}

fn short_of(id: &[u8; ID_LEN]) -> String {
    String::from_utf8_lossy(&id[..ID_SHORT_LEN]).into_owned()
}

fn hash_prefix(hash: blake3::Hash) -> u64 {
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    // 0 is reserved for "no id"
    u64::from_le_bytes(prefix).max(1)
}

fn id_hash_of(id: &[u8; ID_LEN]) -> u64 {
    hash_prefix(blake3::hash(id))
}

fn peer_hash_of(id: Option<&[u8; ID_LEN]>, ip: &[u8], port: u16) -> u64 {
    let mut hasher = blake3::Hasher::new();
    if let Some(id) = id {
        hasher.update(id);
    }
    hasher.update(ip);
    hasher.update(&u32::from(port).to_be_bytes());
    hash_prefix(hasher.finalize())
}

/// Lowercase 8-4-4-4-12 uuid text
pub(crate) fn is_uuid(s: &str) -> bool {
    s.len() == ID_LEN
        && s.bytes().enumerate().all(|(i, b)| match i {
            8 | 13 | 18 | 23 => b == b'-',
            _ => b.is_ascii_digit() || (b'a'..=b'f').contains(&b),
        })
}

fn is_dotted_ipv4(s: &str) -> bool {
    let frags: Vec<&str> = s.split('.').collect();
    frags.len() == 4
        && frags.iter().all(|frag| {
            !frag.is_empty()
                && frag.len() <= 3
                && frag.bytes().all(|b| b.is_ascii_digit())
                && frag.parse::<u16>().map(|v| v <= 255).unwrap_or(false)
        })
}
