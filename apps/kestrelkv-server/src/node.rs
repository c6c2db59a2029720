//! Server node composition.
//!
//! Wires together the UDP transport, the replica and its driver, and owns
//! their lifecycle.

use crate::config::{ConfigError, ServerConfig};
use crate::transport::UdpTransport;
use kestrel_raft::{NodeStatus, RaftError, RaftNode, Replica};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Server node - main composition root.
pub struct Node {
    /// Node configuration
    config: ServerConfig,

    /// Address the UDP socket is bound to
    local_addr: SocketAddr,

    /// Running replica
    raft: RaftNode,

    /// Shutdown signal for the receive and status tasks
    shutdown_tx: broadcast::Sender<()>,

    /// UDP receive loop
    recv_task: JoinHandle<()>,

    /// Periodic status log (if enabled)
    status_task: Option<JoinHandle<()>>,
}

impl Node {
    /// Bind the socket, build the replica and start serving.
    pub async fn start(config: ServerConfig) -> Result<Self, NodeError> {
        config.validate()?;
        tracing::info!(
            node = %config.node_id,
            peers = ?config.peers,
            simulator = %config.simulator_addr(),
            "Initializing node"
        );

        let transport = UdpTransport::bind(&config.bind_addr, config.simulator_addr()).await?;
        let local_addr = transport.local_addr()?;

        let (shutdown_tx, _) = broadcast::channel(4);
        let (inbox, recv_task) = transport.spawn_receiver(shutdown_tx.subscribe());

        let replica = Replica::new(
            config.node_id(),
            config.peer_ids(),
            config.raft_config(),
            Arc::new(transport),
        )?;
        let raft = RaftNode::spawn(replica, inbox);

        let mut node = Self {
            config,
            local_addr,
            raft,
            shutdown_tx,
            recv_task,
            status_task: None,
        };
        node.status_task = node.spawn_status_logger();

        tracing::info!(node = %node.config.node_id, addr = %local_addr, "Node started");
        Ok(node)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn status(&self) -> NodeStatus {
        self.raft.status()
    }

    fn spawn_status_logger(&self) -> Option<JoinHandle<()>> {
        if self.config.status_interval_ms == 0 {
            return None;
        }
        let status = self.raft.status_handle();
        let period = Duration::from_millis(self.config.status_interval_ms);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let s = status.status();
                        tracing::info!(
                            node = %s.id,
                            role = ?s.role,
                            term = %s.term,
                            leader = %s.leader,
                            commit_index = %s.commit_index,
                            last_log_index = %s.last_log_index,
                            "Status"
                        );
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        }))
    }

    /// Stop the replica and background tasks.
    pub async fn shutdown(self) -> Result<(), NodeError> {
        tracing::info!(node = %self.config.node_id, "Shutting down node");
        let _ = self.shutdown_tx.send(());

        self.raft.shutdown().await?;
        let _ = self.recv_task.await;
        if let Some(task) = self.status_task {
            let _ = task.await;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Raft error: {0}")]
    Raft(#[from] RaftError),
}
