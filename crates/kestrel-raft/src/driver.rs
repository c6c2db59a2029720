//! Async event loop that owns a replica.
//!
//! The replica itself is synchronous. `RaftNode::spawn` moves it behind a lock
//! and runs one task that waits on whichever comes first: an inbound datagram,
//! the replica's timer deadline, or shutdown. Each event is handled to
//! completion with the lock held; the lock is never held across an `.await`.
//!
//! The driver sleeps on real time, so the replica must use `SystemClock`
//! (the default).

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{RaftError, Result};
use crate::replica::Replica;
use crate::transport::DatagramReceiver;
use crate::types::{LogIndex, NodeId, RoleKind, Term};

/// Point-in-time view of a running replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub id: NodeId,
    pub role: Option<RoleKind>,
    pub term: Term,
    pub leader: NodeId,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
    pub last_log_index: LogIndex,
}

impl NodeStatus {
    pub fn of(r: &Replica) -> Self {
        Self {
            id: r.id().clone(),
            role: r.role_kind(),
            term: r.current_term(),
            leader: r.leader_hint(),
            commit_index: r.commit_index(),
            last_applied: r.last_applied(),
            last_log_index: r.log().last_index(),
        }
    }
}

#[derive(Clone)]
pub struct StatusHandle {
    replica: Arc<Mutex<Replica>>,
}

impl StatusHandle {
    pub fn status(&self) -> NodeStatus {
        NodeStatus::of(&self.replica.lock())
    }
}

/// Handle to a replica running on the tokio runtime.
pub struct RaftNode {
    replica: Arc<Mutex<Replica>>,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl RaftNode {
    /// Start `replica` (hello + Follower) and drive it from `inbox`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(mut replica: Replica, inbox: DatagramReceiver) -> Self {
        replica.start();

        let replica = Arc::new(Mutex::new(replica));
        let (shutdown_tx, _) = broadcast::channel(1);
        let shutdown_rx = shutdown_tx.subscribe();

        let task = tokio::spawn(event_loop(replica.clone(), inbox, shutdown_rx));

        Self {
            replica,
            shutdown_tx,
            task,
        }
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus::of(&self.replica.lock())
    }

    /// A cloneable handle for polling status from another task.
    pub fn status_handle(&self) -> StatusHandle {
        StatusHandle {
            replica: self.replica.clone(),
        }
    }

    /// Run `f` against the replica under its lock.
    pub fn with_replica<T>(&self, f: impl FnOnce(&Replica) -> T) -> T {
        f(&self.replica.lock())
    }

    /// Stop the event loop and wait for it to exit.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        self.task.await.map_err(|e| RaftError::Internal {
            reason: format!("event loop panicked: {e}"),
        })
    }
}

async fn event_loop(
    replica: Arc<Mutex<Replica>>,
    mut inbox: DatagramReceiver,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let id = replica.lock().id().clone();

    loop {
        let deadline = replica.lock().next_deadline().map(Instant::from_std);
        let timer = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            payload = inbox.recv() => {
                match payload {
                    Some(payload) => replica.lock().on_datagram(&payload),
                    None => {
                        tracing::debug!(node = %id, "Inbox closed, exiting event loop");
                        break;
                    }
                }
            }
            _ = timer => {
                replica.lock().poll_timer();
            }
            _ = shutdown_rx.recv() => {
                tracing::info!(node = %id, "Event loop shutting down");
                break;
            }
        }
    }
}
