//! Per-peer connection health
//!
//! Tracks failed connection attempts and the last ban stamp for one peer.
//! Ban state is never stored as a flag; it is derived from the ban timestamp
//! and the configured ban interval every time it is asked for.

use serde::{Deserialize, Serialize};

use crate::p2p::now_millis;

/// Failures tolerated before the retry backoff kicks in
pub const FAILED_CONN_THRESHOLD: u32 = 2;

/// Backoff window after too many failures (ms)
pub const FAILED_RETRY_INTERVAL_MS: u64 = 3_000;

/// Default ban window (ms)
pub const DEFAULT_BAN_INTERVAL_MS: u64 = 30_000;

/// Upper bound for a caller-supplied ban window (24h)
pub const MAX_BAN_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerMetric {
    pub failed_connection_count: u32,
    pub last_failure_ms: u64,
    pub last_ban_ms: Option<u64>,
    ban_interval_ms: u64,
}

impl Default for PeerMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerMetric {
    pub fn new() -> Self {
        Self {
            failed_connection_count: 0,
            last_failure_ms: 0,
            last_ban_ms: None,
            ban_interval_ms: DEFAULT_BAN_INTERVAL_MS,
        }
    }

    /// Create a metric with a custom ban window, clamped to
    /// `[FAILED_RETRY_INTERVAL_MS, MAX_BAN_INTERVAL_MS]`.
    pub fn with_ban_interval(ban_interval_ms: u64) -> Self {
        let mut metric = Self::new();
        metric.set_ban_interval(ban_interval_ms);
        metric
    }

    pub fn set_ban_interval(&mut self, ban_interval_ms: u64) {
        self.ban_interval_ms = ban_interval_ms.clamp(FAILED_RETRY_INTERVAL_MS, MAX_BAN_INTERVAL_MS);
    }

    pub fn ban_interval_ms(&self) -> u64 {
        self.ban_interval_ms
    }

    pub fn inc_failed_count(&mut self) {
        self.inc_failed_count_at(now_millis());
    }

    pub fn inc_failed_count_at(&mut self, now: u64) {
        self.failed_connection_count = self.failed_connection_count.saturating_add(1);
        self.last_failure_ms = now;
    }

    pub fn dec_failed_count(&mut self) {
        self.failed_connection_count = self.failed_connection_count.saturating_sub(1);
    }

    pub fn ban(&mut self) {
        self.ban_at(now_millis());
    }

    pub fn ban_at(&mut self, now: u64) {
        self.last_ban_ms = Some(now);
    }

    pub fn not_ban(&self) -> bool {
        self.not_ban_at(now_millis())
    }

    pub fn not_ban_at(&self, now: u64) -> bool {
        match self.last_ban_ms {
            Some(banned_at) => now.saturating_sub(banned_at) > self.ban_interval_ms,
            None => true,
        }
    }

    /// Admission gate consulted before dialing or accepting this peer.
    ///
    /// Refuses while the failure backoff is running or while the peer is banned;
    /// either reason alone is enough.
    pub fn should_not_connect(&self) -> bool {
        self.should_not_connect_at(now_millis())
    }

    pub fn should_not_connect_at(&self, now: u64) -> bool {
        let backing_off = self.failed_connection_count > FAILED_CONN_THRESHOLD
            && now.saturating_sub(self.last_failure_ms) < FAILED_RETRY_INTERVAL_MS;
        backing_off || !self.not_ban_at(now)
    }
}
