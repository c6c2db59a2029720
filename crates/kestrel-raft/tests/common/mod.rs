//! Deterministic in-process cluster for protocol tests.
//!
//! Every replica shares one `ManualClock`. Datagrams land in per-replica
//! inboxes and are only delivered when the simulation ticks, after being
//! shuffled, delayed, dropped or cut by a partition according to the seeded
//! RNG. The same seed always produces the same run.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use kestrel_observe::RecordingMeter;
use kestrel_raft::clock::ManualClock;
use kestrel_raft::message::{self, Body, Message};
use kestrel_raft::transport::{DatagramReceiver, InMemoryTransport, Transport};
use kestrel_raft::{Entry, LogIndex, NodeId, RaftConfig, Replica, Term};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

pub const CLIENT: &str = "client";
pub const TICK: Duration = Duration::from_millis(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Election jitter seed for replica `i` of a run seeded with `seed`.
fn replica_seed(seed: u64, i: usize) -> u64 {
    seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(i as u64 + 1)
}

pub struct Sim {
    pub ids: Vec<NodeId>,
    pub replicas: Vec<Replica>,
    pub clock: ManualClock,
    pub meter: RecordingMeter,
    inboxes: Vec<DatagramReceiver>,
    client_inbox: DatagramReceiver,
    client: InMemoryTransport,
    rng: StdRng,
    /// Messages held back for a later tick: (destination replica, payload).
    delayed: Vec<(usize, Bytes)>,
    /// Partition group per replica. Replicas in different groups cannot talk.
    groups: Vec<usize>,
    pub drop_rate: f64,
    pub delay_rate: f64,
    pub checker: Checker,
    next_mid: u64,
    /// Client replies received: MID → body.
    pub replies: HashMap<String, Body>,
}

impl Sim {
    pub fn new(size: usize, seed: u64) -> Self {
        let ids: Vec<NodeId> = (0..size).map(|i| NodeId::new(format!("{i:04}"))).collect();

        let mut senders = HashMap::new();
        let mut inboxes = Vec::new();
        for id in &ids {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(id.clone(), tx);
            inboxes.push(rx);
        }
        let (client_tx, client_inbox) = mpsc::unbounded_channel();
        senders.insert(NodeId::new(CLIENT), client_tx);

        let clock = ManualClock::new();
        let meter = RecordingMeter::new();
        let replicas = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let transport = InMemoryTransport::new(senders.clone());
                Replica::new(
                    id.clone(),
                    ids.iter().cloned(),
                    RaftConfig::default(),
                    Arc::new(transport),
                )
                .unwrap()
                .with_clock(Arc::new(clock.clone()))
                .with_meter(Arc::new(meter.clone()))
                .with_rng(StdRng::seed_from_u64(replica_seed(seed, i)))
            })
            .collect();

        let client = InMemoryTransport::new(senders);

        Self {
            ids,
            replicas,
            clock,
            meter,
            inboxes,
            client_inbox,
            client,
            rng: StdRng::seed_from_u64(seed),
            delayed: Vec::new(),
            groups: vec![0; size],
            drop_rate: 0.0,
            delay_rate: 0.0,
            checker: Checker::default(),
            next_mid: 0,
            replies: HashMap::new(),
        }
    }

    pub fn start(&mut self) {
        for r in &mut self.replicas {
            r.start();
        }
    }

    /// Advance time one tick, fire due timers, deliver one round of traffic,
    /// then check every safety property.
    pub fn tick(&mut self) {
        self.clock.advance(TICK);
        for r in &mut self.replicas {
            r.poll_timer();
        }
        self.deliver_round();
        self.collect_client_replies();
        self.checker.observe(&self.replicas);
    }

    pub fn run(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    /// Tick until `pred` holds, up to `max_ticks`. Returns whether it held.
    pub fn run_until(&mut self, max_ticks: usize, mut pred: impl FnMut(&Sim) -> bool) -> bool {
        for _ in 0..max_ticks {
            if pred(self) {
                return true;
            }
            self.tick();
        }
        pred(self)
    }

    fn deliver_round(&mut self) {
        let mut in_flight = std::mem::take(&mut self.delayed);
        for (i, inbox) in self.inboxes.iter_mut().enumerate() {
            while let Ok(payload) = inbox.try_recv() {
                in_flight.push((i, payload));
            }
        }
        in_flight.shuffle(&mut self.rng);

        for (dst, payload) in in_flight {
            if self.rng.gen_bool(self.drop_rate) {
                continue;
            }
            if self.rng.gen_bool(self.delay_rate) {
                self.delayed.push((dst, payload));
                continue;
            }
            if self.is_cut(&payload, dst) {
                continue;
            }
            self.replicas[dst].on_datagram(&payload);
        }
    }

    fn is_cut(&self, payload: &[u8], dst: usize) -> bool {
        let Ok(msg) = message::decode(payload) else {
            return false;
        };
        match self.index_of(&msg.src) {
            Some(src) => self.groups[src] != self.groups[dst],
            None => false,
        }
    }

    fn collect_client_replies(&mut self) {
        while let Ok(payload) = self.client_inbox.try_recv() {
            let Ok(msg) = message::decode(&payload) else {
                continue;
            };
            match &msg.body {
                Body::Ok { mid, .. } | Body::Fail { mid } | Body::Redirect { mid } => {
                    self.replies.insert(mid.clone(), msg.body.clone());
                }
                _ => {}
            }
        }
    }

    pub fn index_of(&self, id: &NodeId) -> Option<usize> {
        self.ids.iter().position(|i| i == id)
    }

    /// Split the cluster: the listed replicas form one side, the rest the other.
    pub fn partition(&mut self, side: &[usize]) {
        for (i, g) in self.groups.iter_mut().enumerate() {
            *g = usize::from(side.contains(&i));
        }
    }

    pub fn heal(&mut self) {
        self.groups.iter_mut().for_each(|g| *g = 0);
    }

    /// Index of the leader with the highest term, if any.
    pub fn leader(&self) -> Option<usize> {
        self.replicas
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_leader())
            .max_by_key(|(_, r)| r.current_term())
            .map(|(i, _)| i)
    }

    /// Leader reachable from `side` (replicas in the same partition group).
    pub fn leader_in(&self, members: &[usize]) -> Option<usize> {
        members
            .iter()
            .copied()
            .filter(|i| self.replicas[*i].is_leader())
            .max_by_key(|i| self.replicas[*i].current_term())
    }

    /// Send a put from the client to replica `to`. Returns the MID used.
    pub fn put(&mut self, to: usize, key: &str, value: &str) -> String {
        self.next_mid += 1;
        let mid = format!("m{}", self.next_mid);
        self.client_send(
            to,
            Body::Put {
                mid: mid.clone(),
                key: key.to_string(),
                value: value.to_string(),
            },
        );
        mid
    }

    pub fn get(&mut self, to: usize, key: &str) -> String {
        self.next_mid += 1;
        let mid = format!("g{}", self.next_mid);
        self.client_send(
            to,
            Body::Get {
                mid: mid.clone(),
                key: key.to_string(),
            },
        );
        mid
    }

    fn client_send(&mut self, to: usize, body: Body) {
        let msg = Message::new(
            NodeId::new(CLIENT),
            self.ids[to].clone(),
            NodeId::broadcast(),
            body,
        );
        let payload = message::encode(&msg).unwrap();
        self.client.send(&self.ids[to], payload).unwrap();
    }

    pub fn acked(&self, mid: &str) -> bool {
        matches!(self.replies.get(mid), Some(Body::Ok { .. }))
    }
}

/// Checks the Raft safety properties after every tick.
#[derive(Default)]
pub struct Checker {
    /// Election safety: term → the one replica that led it.
    leaders: HashMap<Term, NodeId>,
    /// Vote exclusivity: (voter, term) → candidate.
    votes: HashMap<(NodeId, Term), NodeId>,
    /// Commit and apply monotonicity.
    commits: HashMap<NodeId, LogIndex>,
    applied: HashMap<NodeId, LogIndex>,
    /// Leader append-only: log each leader held last tick, per term.
    leader_logs: HashMap<(NodeId, Term), Vec<Entry>>,
    /// State machine determinism: applied index → state.
    states: HashMap<LogIndex, BTreeMap<String, String>>,
    /// Entries known committed somewhere, by index.
    committed: BTreeMap<LogIndex, Entry>,
    ticks: u64,
}

impl Checker {
    pub fn observe(&mut self, replicas: &[Replica]) {
        self.ticks += 1;
        for r in replicas {
            self.check_election_safety(r);
            self.check_votes(r);
            self.check_commit(r);
            self.check_leader_append_only(r);
            self.check_state(r);
        }
        // Whole-prefix comparison is quadratic; sample it.
        if self.ticks % 10 == 0 {
            for (i, a) in replicas.iter().enumerate() {
                for b in &replicas[i + 1..] {
                    check_log_matching(a, b);
                }
            }
        }
    }

    fn check_election_safety(&mut self, r: &Replica) {
        if !r.is_leader() {
            return;
        }
        let leader = self
            .leaders
            .entry(r.current_term())
            .or_insert_with(|| r.id().clone());
        assert_eq!(
            leader,
            r.id(),
            "two leaders in term {}",
            r.current_term()
        );
    }

    fn check_votes(&mut self, r: &Replica) {
        let Some(candidate) = r.voted_for() else {
            return;
        };
        let prior = self
            .votes
            .entry((r.id().clone(), r.current_term()))
            .or_insert_with(|| candidate.clone());
        assert_eq!(
            prior,
            candidate,
            "{} voted twice in term {}",
            r.id(),
            r.current_term()
        );
    }

    fn check_commit(&mut self, r: &Replica) {
        let commit = r.commit_index();
        let prev = self
            .commits
            .insert(r.id().clone(), commit)
            .unwrap_or(LogIndex::ZERO);
        assert!(commit >= prev, "{} commit index went backwards", r.id());
        assert!(r.last_applied() <= commit);
        let applied = self
            .applied
            .insert(r.id().clone(), r.last_applied())
            .unwrap_or(LogIndex::ZERO);
        assert!(r.last_applied() >= applied, "{} last applied went backwards", r.id());

        // A newly committed entry must match what any other replica committed
        // at that index.
        for index in prev.as_u64() + 1..=commit.as_u64() {
            let index = LogIndex(index);
            let entry = r.log().get(index).unwrap().clone();
            let known = self.committed.entry(index).or_insert_with(|| entry.clone());
            assert_eq!(*known, entry, "{} committed a different entry at {index}", r.id());
        }
    }

    fn check_leader_append_only(&mut self, r: &Replica) {
        if !r.is_leader() {
            return;
        }
        let log: Vec<Entry> = r.log().iter().map(|(_, e)| e.clone()).collect();
        let key = (r.id().clone(), r.current_term());
        if let Some(previous) = self.leader_logs.get(&key) {
            assert!(
                log.starts_with(previous),
                "leader {} rewrote its log in term {}",
                r.id(),
                r.current_term()
            );
        }
        self.leader_logs.insert(key, log);
    }

    fn check_state(&mut self, r: &Replica) {
        let state = r.state_machine().dump();
        let known = self
            .states
            .entry(r.last_applied())
            .or_insert_with(|| state.clone());
        assert_eq!(
            *known,
            state,
            "{} diverged at applied index {}",
            r.id(),
            r.last_applied()
        );
    }
}

/// If two logs agree on the term at some index, they agree on every entry up
/// to it.
fn check_log_matching(a: &Replica, b: &Replica) {
    let shared = a.log().last_index().min(b.log().last_index());
    let mut index = shared;
    while index > LogIndex::ZERO {
        if a.log().term_at(index) == b.log().term_at(index) {
            for i in 1..=index.as_u64() {
                assert_eq!(
                    a.log().get(LogIndex(i)),
                    b.log().get(LogIndex(i)),
                    "logs of {} and {} disagree at {i} below matching index {index}",
                    a.id(),
                    b.id()
                );
            }
            return;
        }
        index = LogIndex(index.as_u64() - 1);
    }
}
