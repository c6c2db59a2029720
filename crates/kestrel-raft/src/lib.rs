//! kestrel-raft: Raft consensus for a replicated key-value store.
//!
//! A replica is a synchronous, event-driven state machine:
//! - Leader election with randomized timeouts
//! - Log replication with follower-hinted backtracking
//! - Quorum commit restricted to current-term entries
//! - Deterministic apply into a pluggable `StateMachine`
//! - VizEvent observability integration
//!
//! Replicas talk over an unreliable datagram `Transport` using a JSON
//! envelope shared with clients (`get`/`put` → `ok`/`fail`/`redirect`).
//! `driver::RaftNode` runs a replica on tokio; tests can instead feed it
//! messages and advance a `ManualClock` by hand.
//!
//! Based on the Raft paper (Ongaro & Ousterhout, 2014). State is kept in
//! memory only.

pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod log;
pub mod message;
pub mod replica;
mod role;
pub mod state_machine;
pub mod timer;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::RaftConfig;
pub use driver::{NodeStatus, RaftNode, StatusHandle};
pub use error::{RaftError, Result};
pub use message::{Body, Message};
pub use replica::Replica;
pub use state_machine::{KvStateMachine, StateMachine};
pub use types::*;
