//! Server configuration.
//!
//! Loads and validates configuration from a YAML file, environment variables,
//! or the launcher's positional arguments (`<port> <id> <peer>...`).

use kestrel_raft::{NodeId, RaftConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

/// Server configuration.
///
/// Example YAML:
/// ```yaml
/// node_id: "0001"
/// peers: ["0000", "0002", "0003", "0004"]
/// simulator_port: 40123
/// bind_addr: "127.0.0.1:0"
/// raft:
///   heartbeat_ms: 75
///   election_timeout_min_ms: 150
///   election_timeout_max_ms: 300
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// This replica's id
    pub node_id: String,

    /// Ids of every other replica
    #[serde(default)]
    pub peers: Vec<String>,

    /// Local UDP port every outbound datagram is sent to
    pub simulator_port: u16,

    /// Local socket address to bind
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// How often to log a status line (0 disables)
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,

    #[serde(default)]
    pub raft: RaftTimings,
}

/// Raft tuning, in milliseconds where it is a duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftTimings {
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,

    #[serde(default = "default_election_timeout_min_ms")]
    pub election_timeout_min_ms: u64,

    #[serde(default = "default_election_timeout_max_ms")]
    pub election_timeout_max_ms: u64,

    #[serde(default = "default_max_entries_per_append")]
    pub max_entries_per_append: usize,

    #[serde(default = "default_max_uncommitted_entries")]
    pub max_uncommitted_entries: usize,
}

impl Default for RaftTimings {
    fn default() -> Self {
        Self {
            heartbeat_ms: default_heartbeat_ms(),
            election_timeout_min_ms: default_election_timeout_min_ms(),
            election_timeout_max_ms: default_election_timeout_max_ms(),
            max_entries_per_append: default_max_entries_per_append(),
            max_uncommitted_entries: default_max_uncommitted_entries(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:0".to_string()
}

fn default_status_interval_ms() -> u64 {
    5_000
}

fn default_heartbeat_ms() -> u64 {
    75
}

fn default_election_timeout_min_ms() -> u64 {
    150
}

fn default_election_timeout_max_ms() -> u64 {
    300
}

fn default_max_entries_per_append() -> usize {
    64
}

fn default_max_uncommitted_entries() -> usize {
    10_000
}

impl ServerConfig {
    /// Build from the launcher's positional arguments.
    pub fn from_args(
        simulator_port: u16,
        node_id: impl Into<String>,
        peers: impl IntoIterator<Item = String>,
    ) -> Result<Self, ConfigError> {
        let config = ServerConfig {
            node_id: node_id.into(),
            peers: peers.into_iter().collect(),
            simulator_port,
            bind_addr: default_bind_addr(),
            status_interval_ms: default_status_interval_ms(),
            raft: RaftTimings::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::ParseError(format!("Failed to parse YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    ///
    /// Supported variables:
    /// - KESTREL_NODE_ID
    /// - KESTREL_PEERS (comma-separated)
    /// - KESTREL_PORT
    /// - KESTREL_BIND_ADDR
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let node_id = std::env::var("KESTREL_NODE_ID")
            .map_err(|_| ConfigError::MissingField("KESTREL_NODE_ID".to_string()))?;

        let simulator_port = std::env::var("KESTREL_PORT")
            .map_err(|_| ConfigError::MissingField("KESTREL_PORT".to_string()))?
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidField(format!("Invalid KESTREL_PORT: {}", e)))?;

        let peers = std::env::var("KESTREL_PEERS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let bind_addr = std::env::var("KESTREL_BIND_ADDR").unwrap_or_else(|_| default_bind_addr());

        let config = ServerConfig {
            node_id,
            peers,
            simulator_port,
            bind_addr,
            status_interval_ms: default_status_interval_ms(),
            raft: RaftTimings::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.is_empty() {
            return Err(ConfigError::InvalidField(
                "node_id cannot be empty".to_string(),
            ));
        }

        if self.node_id == NodeId::BROADCAST_ID {
            return Err(ConfigError::InvalidField(format!(
                "node_id {} is reserved for broadcast",
                NodeId::BROADCAST_ID
            )));
        }

        let mut seen = HashSet::new();
        for peer in &self.peers {
            if peer.is_empty() || peer == NodeId::BROADCAST_ID {
                return Err(ConfigError::InvalidField(format!(
                    "Invalid peer id: {:?}",
                    peer
                )));
            }
            if peer == &self.node_id {
                return Err(ConfigError::InvalidField(format!(
                    "Node {} lists itself as a peer",
                    peer
                )));
            }
            if !seen.insert(peer) {
                return Err(ConfigError::InvalidField(format!("Duplicate peer: {}", peer)));
            }
        }

        if self.simulator_port == 0 {
            return Err(ConfigError::InvalidField(
                "simulator_port must be > 0".to_string(),
            ));
        }

        self.bind_addr
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidField(format!("Invalid bind_addr: {}", e)))?;

        self.raft_config()
            .validate()
            .map_err(|e| ConfigError::InvalidField(e.to_string()))?;

        Ok(())
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::new(&self.node_id)
    }

    pub fn peer_ids(&self) -> Vec<NodeId> {
        self.peers.iter().map(NodeId::new).collect()
    }

    /// Where outbound datagrams go.
    pub fn simulator_addr(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], self.simulator_port))
    }

    pub fn raft_config(&self) -> RaftConfig {
        RaftConfig {
            heartbeat_interval: Duration::from_millis(self.raft.heartbeat_ms),
            election_timeout_min: Duration::from_millis(self.raft.election_timeout_min_ms),
            election_timeout_max: Duration::from_millis(self.raft.election_timeout_max_ms),
            max_entries_per_append: self.raft.max_entries_per_append,
            max_uncommitted_entries: self.raft.max_uncommitted_entries,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),
}
