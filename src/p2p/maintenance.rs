//! Background tasks driving the registry
//!
//! - Timeout sweep: evicts stale pending and active peers
//! - Status reporter: logs the active-set table
//!
//! Both stop once `running` is cleared; the flag is checked every tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::p2p::node_mgr::NodeMgr;
use crate::p2p::now_millis;

/// Run [`NodeMgr::timeout_check`] every `period` until `running` is cleared.
pub fn spawn_timeout_sweeper(
    mgr: Arc<NodeMgr>,
    period: Duration,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("[NODE_MGR] Timeout sweeper started ({:?})", period);

        loop {
            ticker.tick().await;
            if !running.load(Ordering::Relaxed) {
                break;
            }
            mgr.timeout_check(now_millis());
        }

        debug!("[NODE_MGR] Timeout sweeper stopped");
    })
}

/// Log [`NodeMgr::dump_status`] every `period` until `running` is cleared.
pub fn spawn_status_reporter(
    mgr: Arc<NodeMgr>,
    period: Duration,
    complete: bool,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if !running.load(Ordering::Relaxed) {
                break;
            }
            mgr.refresh_gauges();
            info!("{}", mgr.dump_status(mgr.self_short_id(), complete));
        }
    })
}
