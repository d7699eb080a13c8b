//! p2p-nodemgr: run the peer registry standalone, or inspect its inputs.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use p2p_nodemgr::p2p::maintenance::{spawn_status_reporter, spawn_timeout_sweeper};
use p2p_nodemgr::p2p::{
    load_config, Channel, Node, NodeMgr, NodeMgrConfig, Transport, TransportError,
};

#[derive(Parser, Debug)]
#[command(name = "p2p-nodemgr", version, about = "P2P peer registry")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the registry with its sweep and status tasks until ctrl-c
    Run {
        /// Path to the TOML config
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the prometheus metrics on exit
        #[arg(long)]
        metrics: bool,
    },

    /// Parse a `p2p://{id}@{ip}:{port}` boot-list entry
    ParseUri {
        uri: String,
    },

    /// Load and validate a config file, then print it as JSON
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

/// Transport stand-in for running without a wire layer: close requests are
/// only logged.
struct LoggingTransport {
    self_id_hash: u64,
}

impl Transport for LoggingTransport {
    fn close_connection(
        &self,
        channel: &Arc<dyn Channel>,
        reason: &str,
    ) -> Result<(), TransportError> {
        if !channel.is_connected() {
            return Err(TransportError::AlreadyClosed(channel.channel_id()));
        }
        info!(channel = channel.channel_id(), reason, "close requested");
        Ok(())
    }

    fn is_self(&self, node: &Node) -> bool {
        node.id_hash() == self.self_id_hash
    }
}

fn init_tracing() {
    // init tracing from env NODEMGR_LOG or RUST_LOG
    let filter = std::env::var("NODEMGR_LOG")
        .unwrap_or_else(|_| std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

fn config_path_str(path: &std::path::Path) -> Result<&str> {
    path.to_str()
        .with_context(|| format!("config path is not valid UTF-8: {}", path.display()))
}

async fn run(config: Option<PathBuf>, print_metrics: bool) -> Result<()> {
    let config = match config {
        Some(path) => load_config(config_path_str(&path)?)
            .with_context(|| format!("loading {}", path.display()))?,
        None => {
            warn!("No --config given, using defaults");
            NodeMgrConfig::default()
        }
    };

    let transport = Arc::new(LoggingTransport {
        self_id_hash: config.self_node().id_hash(),
    });
    let mgr = Arc::new(NodeMgr::new(&config, transport).context("creating node registry")?);
    let running = Arc::new(AtomicBool::new(true));

    let mut tasks = vec![spawn_timeout_sweeper(
        mgr.clone(),
        Duration::from_millis(config.timeout_check_interval_ms),
        running.clone(),
    )];
    if config.status_interval_secs > 0 {
        tasks.push(spawn_status_reporter(
            mgr.clone(),
            Duration::from_secs(config.status_interval_secs),
            config.status_complete,
            running.clone(),
        ));
    }

    info!(
        self_id = %mgr.self_short_id(),
        temp = mgr.temp_nodes_size(),
        "Node registry running, ctrl-c to stop"
    );
    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;

    running.store(false, Ordering::Relaxed);
    for task in tasks {
        if let Err(e) = task.await {
            warn!("background task ended abnormally: {}", e);
        }
    }
    mgr.shutdown();

    if print_metrics {
        println!("{}", mgr.metrics().render());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Run { config, metrics } => run(config, metrics).await,
        Commands::ParseUri { uri } => {
            let node = Node::parse_uri(&uri)
                .with_context(|| format!("not a valid boot-list entry: {}", uri))?;
            println!("{}", serde_json::to_string_pretty(&node.summary())?);
            Ok(())
        }
        Commands::CheckConfig { config } => {
            let cfg = load_config(config_path_str(&config)?)
                .with_context(|| format!("loading {}", config.display()))?;
            println!("{}", serde_json::to_string_pretty(&cfg)?);
            Ok(())
        }
    }
}
