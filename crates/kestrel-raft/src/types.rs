//! Core Raft types: Term, Index, Node ids, log entries, role kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raft term number (monotonically increasing).
///
/// Terms establish logical clocks in Raft. Each term has at most one leader.
/// When a server starts an election, it increments its term.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Term(pub u64);

impl Term {
    pub const ZERO: Term = Term(0);

    pub fn next(self) -> Term {
        Term(self.0 + 1)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Log index (1-indexed, 0 is sentinel for "no entry").
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LogIndex(pub u64);

impl LogIndex {
    pub const ZERO: LogIndex = LogIndex(0);

    pub fn next(self) -> LogIndex {
        LogIndex(self.0 + 1)
    }

    pub fn prev(self) -> Option<LogIndex> {
        if self.0 > 0 {
            Some(LogIndex(self.0 - 1))
        } else {
            None
        }
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I{}", self.0)
    }
}

/// Node identifier (unique across cluster).
///
/// Replicas and clients are both addressed by opaque strings. The reserved id
/// `FFFF` is the broadcast destination and doubles as the "leader unknown" marker.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub const BROADCAST_ID: &'static str = "FFFF";

    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    /// The broadcast destination / unknown-leader sentinel.
    pub fn broadcast() -> Self {
        NodeId(Self::BROADCAST_ID.to_string())
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == Self::BROADCAST_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId::new(s)
    }
}

/// Log entry: a `put` command plus the data needed to answer the client once
/// the entry commits.
///
/// - `term`: term in which the leader received the command
/// - `requester`: client id that issued the `put`
/// - `request_id`: the client's message id (`MID`), echoed in the `ok` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub term: Term,
    pub key: String,
    pub value: String,
    #[serde(rename = "src")]
    pub requester: NodeId,
    #[serde(rename = "MID")]
    pub request_id: String,
}

impl Entry {
    pub fn new(
        term: Term,
        key: impl Into<String>,
        value: impl Into<String>,
        requester: NodeId,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            term,
            key: key.into(),
            value: value.into(),
            requester,
            request_id: request_id.into(),
        }
    }
}

/// Raft role (Follower, Candidate, or Leader).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleKind {
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleKind::Follower => write!(f, "Follower"),
            RoleKind::Candidate => write!(f, "Candidate"),
            RoleKind::Leader => write!(f, "Leader"),
        }
    }
}

/// Strict majority of a cluster with `cluster_size` members.
pub fn quorum(cluster_size: usize) -> usize {
    cluster_size / 2 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_ordering() {
        assert!(Term(2) > Term(1));
        assert_eq!(Term(5).next(), Term(6));
    }

    #[test]
    fn test_log_index_ordering() {
        assert!(LogIndex(10) > LogIndex(5));
        assert_eq!(LogIndex(5).next(), LogIndex(6));
        assert_eq!(LogIndex(5).prev(), Some(LogIndex(4)));
        assert_eq!(LogIndex(0).prev(), None);
    }

    #[test]
    fn test_broadcast_id() {
        assert!(NodeId::broadcast().is_broadcast());
        assert!(!NodeId::new("0001").is_broadcast());
        assert_eq!(NodeId::broadcast().as_str(), "FFFF");
    }

    #[test]
    fn test_quorum() {
        assert_eq!(quorum(1), 1);
        assert_eq!(quorum(3), 2);
        assert_eq!(quorum(4), 3);
        assert_eq!(quorum(5), 3);
    }

    #[test]
    fn test_entry_wire_names() {
        let entry = Entry::new(Term(2), "a", "1", NodeId::new("c1"), "m1");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["term"], 2);
        assert_eq!(json["src"], "c1");
        assert_eq!(json["MID"], "m1");
    }
}
