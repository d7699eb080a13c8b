//! Prometheus collectors for one node registry
//!
//! Each `NodeMgr` owns its own `Registry`, so several registries (tests,
//! embedded nodes) never collide on collector names.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct NodeMgrMetrics {
    registry: Registry,
    pub temp_nodes: IntGauge,
    pub inbound_nodes: IntGauge,
    pub outbound_nodes: IntGauge,
    pub active_nodes: IntGauge,
    pub promotions: IntCounter,
    /// Close requests by kind ("timeout", "full", "self", "duplicate", "drop", "shutdown")
    pub closes: IntCounterVec,
}

impl NodeMgrMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let temp_nodes = IntGauge::new("nodemgr_temp_nodes", "Discovered peers waiting to be dialed")?;
        let inbound_nodes = IntGauge::new("nodemgr_inbound_nodes", "Inbound peers mid-handshake")?;
        let outbound_nodes =
            IntGauge::new("nodemgr_outbound_nodes", "Outbound peers mid-handshake")?;
        let active_nodes = IntGauge::new("nodemgr_active_nodes", "Handshaked peers")?;
        let promotions = IntCounter::new(
            "nodemgr_promotions_total",
            "Peers promoted to the active set",
        )?;
        let closes = IntCounterVec::new(
            Opts::new("nodemgr_closes_total", "Connection close requests by kind"),
            &["kind"],
        )?;

        registry.register(Box::new(temp_nodes.clone()))?;
        registry.register(Box::new(inbound_nodes.clone()))?;
        registry.register(Box::new(outbound_nodes.clone()))?;
        registry.register(Box::new(active_nodes.clone()))?;
        registry.register(Box::new(promotions.clone()))?;
        registry.register(Box::new(closes.clone()))?;

        Ok(Self {
            registry,
            temp_nodes,
            inbound_nodes,
            outbound_nodes,
            active_nodes,
            promotions,
            closes,
        })
    }

    pub fn record_close(&self, kind: &str) {
        self.closes.with_label_values(&[kind]).inc();
    }

    pub fn close_count(&self, kind: &str) -> u64 {
        self.closes.with_label_values(&[kind]).get()
    }

    /// Text exposition of every collector in this registry
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
