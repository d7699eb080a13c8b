//! Close request tracking for P2P debugging
//!
//! Keeps the most recent connection-close requests the registry issued, with
//! reasons, timestamps, and the operation that triggered them, to help
//! diagnose why peers keep dropping.

use std::collections::VecDeque;

/// Maximum number of close events to keep in memory
pub const MAX_CLOSE_EVENTS: usize = 100;

/// A single close request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub addr: String,
    pub reason: String,
    pub timestamp_ms: u64,
    pub source: String, // "timeout", "full", "self", "duplicate", "drop", "shutdown"
    /// Whether the transport accepted the request
    pub delivered: bool,
}

#[derive(Debug)]
pub struct CloseTracker {
    events: VecDeque<CloseEvent>,
}

impl Default for CloseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CloseTracker {
    pub fn new() -> Self {
        Self {
            events: VecDeque::with_capacity(MAX_CLOSE_EVENTS),
        }
    }

    pub fn record(&mut self, event: CloseEvent) {
        self.events.push_back(event);

        // Keep only the most recent events
        if self.events.len() > MAX_CLOSE_EVENTS {
            self.events.pop_front();
        }
    }

    /// All recorded events (most recent first)
    pub fn recent(&self) -> Vec<CloseEvent> {
        self.events.iter().rev().cloned().collect()
    }
}
