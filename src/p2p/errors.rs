//! Error types for the node registry and its collaborators.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeMgrError {
    #[error("node {ip}:{port} has no channel attached")]
    MissingChannel { ip: String, port: u16 },
    #[error("node {ip}:{port} has no id yet")]
    MissingId { ip: String, port: u16 },
    #[error("node {0} is already active")]
    AlreadyActive(String),
    #[error("metrics registry: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Failure reported by the transport layer when closing a connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("channel {0} already closed")]
    AlreadyClosed(u64),
    #[error("close failed on channel {channel}: {message}")]
    CloseFailed { channel: u64, message: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
