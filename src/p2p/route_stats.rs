//! Per-route rate limiting
//!
//! Remembers when each route id was last let through for a peer so repeated
//! requests of the same type can be dropped until the minimum interval passes.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::p2p::now_millis;

#[derive(Debug, Clone, Copy, Default)]
pub struct RouteCount {
    pub last_ms: u64,
    /// Requests dropped since the last one that went through
    pub suppressed: u64,
}

#[derive(Debug, Default)]
pub struct RouteStats {
    routes: DashMap<u32, RouteCount>,
}

impl RouteStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true (and stamps now) if `route` has never been seen or the last
    /// accepted request is at least `min_interval_ms` old.
    pub fn should_route(&self, route: u32, min_interval_ms: u64) -> bool {
        self.should_route_at(route, min_interval_ms, now_millis())
    }

    pub fn should_route_at(&self, route: u32, min_interval_ms: u64, now: u64) -> bool {
        match self.routes.entry(route) {
            Entry::Vacant(slot) => {
                slot.insert(RouteCount {
                    last_ms: now,
                    suppressed: 0,
                });
                true
            }
            Entry::Occupied(mut slot) => {
                let count = slot.get_mut();
                if now.saturating_sub(count.last_ms) >= min_interval_ms {
                    count.last_ms = now;
                    count.suppressed = 0;
                    true
                } else {
                    count.suppressed += 1;
                    false
                }
            }
        }
    }

    pub fn get(&self, route: u32) -> Option<RouteCount> {
        self.routes.get(&route).map(|r| *r)
    }

    pub fn suppressed(&self, route: u32) -> u64 {
        self.get(route).map(|r| r.suppressed).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_request_routes() {
        let stats = RouteStats::new();
        assert!(stats.should_route_at(7, 1_000, 50_000));
        assert_eq!(stats.get(7).map(|r| r.last_ms), Some(50_000));
    }

    #[test]
    fn test_throttled_request_keeps_stamp() {
        let stats = RouteStats::new();
        assert!(stats.should_route_at(7, 1_000, 50_000));
        assert!(!stats.should_route_at(7, 1_000, 50_500));
        assert!(!stats.should_route_at(7, 1_000, 50_999));
        assert_eq!(stats.get(7).map(|r| r.last_ms), Some(50_000));
        assert_eq!(stats.suppressed(7), 2);

        assert!(stats.should_route_at(7, 1_000, 51_000));
        assert_eq!(stats.suppressed(7), 0);
    }

    #[test]
    fn test_routes_are_independent() {
        let stats = RouteStats::new();
        assert!(stats.should_route_at(1, 1_000, 10_000));
        assert!(stats.should_route_at(2, 1_000, 10_001));
        assert!(!stats.should_route_at(1, 1_000, 10_002));
        assert_eq!(stats.suppressed(2), 0);
    }
}
