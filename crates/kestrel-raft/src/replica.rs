//! The replica: Raft state plus the single active role.
//!
//! # Persistent state (kept in memory only)
//!
//! - `current_term`: latest term this replica has seen
//! - `voted_for`: candidate that received our vote in `current_term`
//! - `log`: log entries
//!
//! # Volatile state
//!
//! - `commit_index`: highest log index known to be committed
//! - `last_applied`: highest log index applied to the state machine
//!
//! Leader-only state (`next_index[]`, `match_index[]`) lives in the Leader role
//! and is rebuilt on every election.
//!
//! All mutation happens on one of three events: an inbound message, a timer
//! expiry, or an explicit transition. Each event runs to completion before the
//! next one, so there is no locking inside the replica.

use bytes::Bytes;
use kestrel_observe::{obs_count, obs_gauge, Meter, NoopMeter, RaftEvt, RaftKind, VizEvent};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Instant;

use crate::clock::{Clock, SystemClock};
use crate::config::RaftConfig;
use crate::error::Result;
use crate::log::RaftLog;
use crate::message::{self, Body, Message};
use crate::role::{Role, Transition};
use crate::state_machine::{KvStateMachine, StateMachine};
use crate::timer::{Timer, TimerKind};
use crate::transport::Transport;
use crate::types::*;

/// One member of the cluster.
pub struct Replica {
    core: Core,
    role: Option<Role>,
}

/// Everything a role may read or mutate. Owned by the replica and lent to the
/// active role for the duration of one event.
pub(crate) struct Core {
    pub(crate) id: NodeId,
    pub(crate) peers: Vec<NodeId>,
    pub(crate) config: RaftConfig,

    pub(crate) current_term: Term,
    pub(crate) voted_for: Option<NodeId>,
    pub(crate) log: RaftLog,

    pub(crate) commit_index: LogIndex,
    pub(crate) last_applied: LogIndex,
    pub(crate) state_machine: Box<dyn StateMachine>,

    pub(crate) timer: Timer,
    /// Source of election jitter.
    rng: StdRng,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    meter: Arc<dyn Meter>,
}

impl Replica {
    /// Create a replica in no role. Call `start()` to announce it and begin
    /// following.
    ///
    /// `peers` are the other replicas; the replica's own id and the broadcast
    /// id are filtered out, duplicates are removed.
    pub fn new(
        id: NodeId,
        peers: impl IntoIterator<Item = NodeId>,
        config: RaftConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;

        let mut peers: Vec<NodeId> = peers
            .into_iter()
            .filter(|p| p != &id && !p.is_broadcast())
            .collect();
        peers.sort();
        peers.dedup();

        Ok(Self {
            core: Core {
                id,
                peers,
                config,
                current_term: Term::ZERO,
                voted_for: None,
                log: RaftLog::new(),
                commit_index: LogIndex::ZERO,
                last_applied: LogIndex::ZERO,
                state_machine: Box::new(KvStateMachine::new()),
                timer: Timer::new(),
                rng: StdRng::from_entropy(),
                transport,
                clock: Arc::new(SystemClock),
                meter: Arc::new(NoopMeter),
            },
            role: None,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.core.clock = clock;
        self
    }

    pub fn with_meter(mut self, meter: Arc<dyn Meter>) -> Self {
        self.core.meter = meter;
        self
    }

    /// Draw election timeouts from `rng`. A seeded rng makes runs repeatable.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.core.rng = rng;
        self
    }

    /// Announce this replica to the cluster and become a Follower.
    pub fn start(&mut self) {
        tracing::info!(
            node = %self.core.id,
            peers = self.core.peers.len(),
            "Replica starting"
        );
        self.core
            .send(NodeId::broadcast(), NodeId::broadcast(), Body::Hello);
        self.transition_to(RoleKind::Follower);
    }

    /// Discard the current role (cancelling its timer) and enter a fresh one.
    pub fn transition_to(&mut self, kind: RoleKind) {
        self.run_transitions(Some(Transition::to(kind)));
    }

    /// Parse and dispatch a raw datagram. Malformed payloads are dropped.
    pub fn on_datagram(&mut self, payload: &[u8]) {
        match message::decode(payload) {
            Ok(msg) if msg.body == Body::Unknown => self.on_unknown(msg, payload),
            Ok(msg) => self.on_message(msg),
            Err(e) => {
                obs_count!(self.core.meter, "raft_messages_dropped", &[], 1);
                tracing::warn!(
                    node = %self.core.id,
                    error = %e,
                    bytes = payload.len(),
                    "Dropping malformed message"
                );
            }
        }
    }

    /// Dispatch a message to the active role.
    pub fn on_message(&mut self, msg: Message) {
        if msg.dst != self.core.id && !msg.dst.is_broadcast() {
            tracing::debug!(node = %self.core.id, dst = %msg.dst, "Ignoring misaddressed message");
            return;
        }
        let next = self.dispatch(msg);
        self.run_transitions(next);
    }

    /// A client request of a type we do not serve gets a best-effort redirect.
    /// Anything else unknown is ignored.
    fn on_unknown(&mut self, msg: Message, payload: &[u8]) {
        let from_client = !self.core.peers.contains(&msg.src);
        let addressed = msg.dst == self.core.id;
        match message::request_id_of(payload) {
            Some(mid) if from_client && addressed => {
                let leader = self.leader_hint();
                self.core.send(msg.src, leader, Body::Redirect { mid });
            }
            _ => {
                tracing::debug!(node = %self.core.id, src = %msg.src, "Ignoring unknown message type");
            }
        }
    }

    /// Fire the role timer if its deadline has passed. Returns true if it fired.
    pub fn poll_timer(&mut self) -> bool {
        let now = self.core.clock.now();
        let Some(kind) = self.core.timer.fire_if_due(now) else {
            return false;
        };
        let Some(role) = self.role.as_mut() else {
            return false;
        };
        tracing::trace!(node = %self.core.id, ?kind, "Timer fired");
        let next = role.on_timeout(&mut self.core);
        self.run_transitions(next);
        true
    }

    /// When the pending timer is due, if one is armed.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.core.timer.deadline()
    }

    fn dispatch(&mut self, msg: Message) -> Option<Transition> {
        match self.role.as_mut() {
            Some(role) => {
                tracing::trace!(
                    node = %self.core.id,
                    role = %role.kind(),
                    src = %msg.src,
                    kind = msg.kind(),
                    "Handling message"
                );
                role.on_message(&mut self.core, msg)
            }
            None => {
                tracing::debug!(node = %self.core.id, kind = msg.kind(), "No active role, dropping message");
                None
            }
        }
    }

    fn run_transitions(&mut self, mut next: Option<Transition>) {
        while let Some(Transition { to, replay }) = next.take() {
            next = self.enter(to);
            if next.is_none() {
                if let Some(msg) = replay {
                    next = self.dispatch(msg);
                }
            }
        }
    }

    /// Tear down the old role, then construct and enter the new one.
    fn enter(&mut self, kind: RoleKind) -> Option<Transition> {
        self.core.timer.cancel();
        let previous = self.role.take().map(|r| r.kind());

        if previous == Some(RoleKind::Leader) {
            self.core.emit(RaftKind::StepDown);
        }
        tracing::info!(
            node = %self.core.id,
            term = %self.core.current_term,
            from = ?previous,
            to = %kind,
            "Role transition"
        );

        let role = self.role.insert(Role::new(kind, &self.core));
        role.on_entry(&mut self.core)
    }

    pub fn id(&self) -> &NodeId {
        &self.core.id
    }

    pub fn peers(&self) -> &[NodeId] {
        &self.core.peers
    }

    pub fn role_kind(&self) -> Option<RoleKind> {
        self.role.as_ref().map(|r| r.kind())
    }

    pub fn is_leader(&self) -> bool {
        self.role_kind() == Some(RoleKind::Leader)
    }

    pub fn current_term(&self) -> Term {
        self.core.current_term
    }

    pub fn voted_for(&self) -> Option<&NodeId> {
        self.core.voted_for.as_ref()
    }

    pub fn log(&self) -> &RaftLog {
        &self.core.log
    }

    pub fn commit_index(&self) -> LogIndex {
        self.core.commit_index
    }

    pub fn last_applied(&self) -> LogIndex {
        self.core.last_applied
    }

    pub fn state_machine(&self) -> &dyn StateMachine {
        self.core.state_machine.as_ref()
    }

    /// Who this replica would redirect clients to (`FFFF` if unknown).
    pub fn leader_hint(&self) -> NodeId {
        match self.role.as_ref() {
            Some(role) => role.leader_hint(&self.core),
            None => NodeId::broadcast(),
        }
    }

    /// Leader only: next index to send to `peer`.
    pub fn next_index(&self, peer: &NodeId) -> Option<LogIndex> {
        match self.role.as_ref() {
            Some(Role::Leader(l)) => l.next_index(peer),
            _ => None,
        }
    }

    /// Leader only: highest index known replicated on `peer`.
    pub fn match_index(&self, peer: &NodeId) -> Option<LogIndex> {
        match self.role.as_ref() {
            Some(Role::Leader(l)) => l.match_index(peer),
            _ => None,
        }
    }
}

impl Core {
    /// Serialize and send a message. Broadcast fans out to every peer.
    /// Failures are logged and otherwise ignored.
    pub(crate) fn send(&self, dst: NodeId, leader: NodeId, body: Body) {
        if dst.is_broadcast() {
            for peer in &self.peers {
                self.send_one(Message::new(
                    self.id.clone(),
                    peer.clone(),
                    leader.clone(),
                    body.clone(),
                ));
            }
        } else {
            self.send_one(Message::new(self.id.clone(), dst, leader, body));
        }
    }

    fn send_one(&self, msg: Message) {
        let payload: Bytes = match message::encode(&msg) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(node = %self.id, error = %e, kind = msg.kind(), "Failed to encode message");
                return;
            }
        };
        if let Err(e) = self.transport.send(&msg.dst, payload) {
            tracing::debug!(node = %self.id, dst = %msg.dst, error = %e, "Send failed");
        }
    }

    /// Adopt `term` if it is newer than ours. A new term clears our vote.
    /// Returns true if the term advanced.
    pub(crate) fn observe_term(&mut self, term: Term) -> bool {
        if term > self.current_term {
            tracing::debug!(
                node = %self.id,
                from = %self.current_term,
                to = %term,
                "Adopting newer term"
            );
            self.current_term = term;
            self.voted_for = None;
            true
        } else {
            false
        }
    }

    pub(crate) fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    pub(crate) fn quorum(&self) -> usize {
        quorum(self.cluster_size())
    }

    pub(crate) fn arm_election_timer(&mut self) {
        let deadline = self.clock.now() + self.config.random_election_timeout(&mut self.rng);
        self.timer.arm(deadline, TimerKind::Election);
    }

    pub(crate) fn arm_heartbeat_timer(&mut self) {
        let deadline = self.clock.now() + self.config.heartbeat_interval;
        self.timer.arm(deadline, TimerKind::Heartbeat);
    }

    /// Raise the commit index. Never lowers it, never past the end of the log.
    pub(crate) fn advance_commit_index(&mut self, to: LogIndex) {
        let to = to.min(self.log.last_index());
        if to > self.commit_index {
            self.commit_index = to;
            obs_gauge!(self.meter, "raft_commit_index", &[], to.as_u64());
            self.emit(RaftKind::Committed { index: to.as_u64() });
        }
    }

    /// Apply entries in (last_applied, commit_index] in order.
    /// Returns the applied entries so the leader can answer their clients.
    pub(crate) fn apply_committed(&mut self) -> Vec<Entry> {
        let applied: Vec<Entry> = self
            .log
            .range(self.last_applied, self.commit_index)
            .to_vec();
        for entry in &applied {
            self.state_machine.apply(entry);
        }
        if !applied.is_empty() {
            self.last_applied = self.commit_index;
            obs_count!(self.meter, "raft_entries_applied", &[], applied.len());
            tracing::debug!(
                node = %self.id,
                last_applied = %self.last_applied,
                count = applied.len(),
                "Applied committed entries"
            );
        }
        applied
    }

    pub(crate) fn emit(&self, kind: RaftKind) {
        self.meter.emit(VizEvent::Raft(RaftEvt {
            node: self.id.to_string(),
            term: self.current_term.as_u64(),
            kind,
        }));
    }
}
