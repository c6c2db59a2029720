//! UDP datagram transport.
//!
//! Each replica owns one socket. Every outbound datagram goes to the same
//! local address (the simulator), which routes it by the envelope's `dst`.
//! Inbound datagrams are forwarded unparsed to the replica's inbox.

use bytes::Bytes;
use kestrel_raft::transport::{DatagramReceiver, DatagramSender, Transport};
use kestrel_raft::{NodeId, RaftError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Largest datagram we accept.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Pause after a failed receive, doubled per consecutive failure.
const RECV_BACKOFF_MIN: Duration = Duration::from_millis(10);
const RECV_BACKOFF_MAX: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
}

impl UdpTransport {
    /// Bind `bind_addr` and send everything to `target`.
    ///
    /// Returns once the socket is registered as writable, so the first
    /// non-blocking send (the replica's `hello`) is not refused.
    pub async fn bind(bind_addr: &str, target: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.writable().await?;
        Ok(Self {
            socket: Arc::new(socket),
            target,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Spawn the receive loop. Datagrams flow into the returned inbox until
    /// shutdown or until the inbox is dropped.
    pub fn spawn_receiver(
        &self,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> (DatagramReceiver, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let socket = self.socket.clone();

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = recv_loop(socket, tx) => {}
                _ = shutdown_rx.recv() => {
                    tracing::debug!("UDP receive loop shutting down");
                }
            }
        });

        (rx, task)
    }
}

async fn recv_loop(socket: Arc<UdpSocket>, inbox: DatagramSender) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut failures = 0u32;
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, _from)) => {
                if failures > 0 {
                    tracing::debug!(failures, "UDP receive recovered");
                    failures = 0;
                }
                if inbox.send(Bytes::copy_from_slice(&buf[..len])).is_err() {
                    tracing::debug!("Inbox closed, exiting receive loop");
                    return;
                }
            }
            // ICMP port-unreachable from a previous send surfaces here on
            // some platforms; it says nothing about this socket.
            Err(e) => {
                failures = failures.saturating_add(1);
                if failures == 1 {
                    tracing::warn!(error = %e, "UDP receive failed");
                } else {
                    tracing::trace!(error = %e, failures, "UDP receive still failing");
                }
                tokio::time::sleep(recv_backoff(failures)).await;
            }
        }
    }
}

/// Delay before retrying after `failures` consecutive receive errors.
fn recv_backoff(failures: u32) -> Duration {
    let shift = failures.saturating_sub(1).min(16);
    RECV_BACKOFF_MIN
        .saturating_mul(1 << shift)
        .min(RECV_BACKOFF_MAX)
}

impl Transport for UdpTransport {
    fn send(&self, dst: &NodeId, payload: Bytes) -> Result<()> {
        match self.socket.try_send_to(&payload, self.target) {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::trace!(dst = %dst, error = %e, "UDP send failed");
                Err(RaftError::Io { source: e })
            }
        }
    }
}
