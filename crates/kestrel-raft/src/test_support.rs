//! Single-replica harness for unit tests: every peer and client is an inbox
//! the test can drain, time is a `ManualClock`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::clock::ManualClock;
use crate::config::RaftConfig;
use crate::message::{self, Body, Message};
use crate::replica::Replica;
use crate::transport::{DatagramReceiver, InMemoryTransport};
use crate::types::NodeId;

pub(crate) struct Harness {
    pub(crate) replica: Replica,
    pub(crate) clock: ManualClock,
    inboxes: HashMap<NodeId, DatagramReceiver>,
}

impl Harness {
    /// Replica `id` with the given peers. `client` gets an inbox too.
    pub(crate) fn new(id: &str, peers: &[&str]) -> Self {
        let transport = InMemoryTransport::new(HashMap::new());
        let mut inboxes = HashMap::new();
        for endpoint in peers.iter().chain(std::iter::once(&"client")) {
            let (tx, rx) = mpsc::unbounded_channel();
            transport.add_peer(NodeId::new(*endpoint), tx);
            inboxes.insert(NodeId::new(*endpoint), rx);
        }

        let clock = ManualClock::new();
        let replica = Replica::new(
            NodeId::new(id),
            peers.iter().map(|p| NodeId::new(*p)),
            RaftConfig::default(),
            Arc::new(transport),
        )
        .unwrap()
        .with_clock(Arc::new(clock.clone()));

        Self {
            replica,
            clock,
            inboxes,
        }
    }

    /// Start the replica and discard the hello broadcast.
    pub(crate) fn started(id: &str, peers: &[&str]) -> Self {
        let mut h = Self::new(id, peers);
        h.replica.start();
        h.drain_all();
        h
    }

    /// Everything delivered to `endpoint` so far.
    pub(crate) fn drain(&mut self, endpoint: &str) -> Vec<Message> {
        let rx = self
            .inboxes
            .get_mut(&NodeId::new(endpoint))
            .expect("unknown endpoint");
        let mut out = Vec::new();
        while let Ok(payload) = rx.try_recv() {
            out.push(message::decode(&payload).unwrap());
        }
        out
    }

    pub(crate) fn drain_all(&mut self) {
        let ids: Vec<NodeId> = self.inboxes.keys().cloned().collect();
        for id in ids {
            self.drain(id.as_str());
        }
    }

    /// Deliver `body` from `src` to the replica.
    pub(crate) fn deliver(&mut self, src: &str, body: Body) {
        let msg = Message::new(
            NodeId::new(src),
            self.replica.id().clone(),
            NodeId::broadcast(),
            body,
        );
        self.replica.on_message(msg);
    }

    /// Advance past the longest election timeout and fire the timer.
    pub(crate) fn expire_election(&mut self) -> bool {
        self.clock.advance(Duration::from_millis(300));
        self.replica.poll_timer()
    }

    pub(crate) fn expire_heartbeat(&mut self) -> bool {
        self.clock.advance(Duration::from_millis(75));
        self.replica.poll_timer()
    }
}
