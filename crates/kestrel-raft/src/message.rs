//! Wire messages and their JSON codec.
//!
//! Every datagram is one JSON object carrying the envelope
//! `{src, dst, leader, type}` plus the fields of its `type`:
//!
//! ```text
//! {"src":"0000","dst":"0001","leader":"FFFF","type":"put","MID":"m1","key":"a","value":"1"}
//! {"src":"0001","dst":"0002","leader":"0001","type":"AppendEntries","term":3,"leaderId":"0001",
//!  "prevLogIndex":4,"prevLogTerm":2,"entries":[...],"leaderCommit":4}
//! ```
//!
//! Client traffic (`get`/`put`/`ok`/`fail`/`redirect`) and Raft RPCs share the
//! same envelope so a replica can serve both on one socket.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Entry, LogIndex, NodeId, Term};

/// A message envelope with its typed body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub src: NodeId,
    pub dst: NodeId,
    /// Sender's belief about the current leader (`FFFF` when unknown).
    pub leader: NodeId,
    #[serde(flatten)]
    pub body: Body,
}

impl Message {
    pub fn new(src: NodeId, dst: NodeId, leader: NodeId, body: Body) -> Self {
        Self {
            src,
            dst,
            leader,
            body,
        }
    }

    /// Wire name of the message type, for logging.
    pub fn kind(&self) -> &'static str {
        self.body.kind()
    }
}

/// Message body, tagged on the wire by the `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Body {
    /// Startup announcement.
    #[serde(rename = "hello")]
    Hello,

    #[serde(rename = "get")]
    Get {
        #[serde(rename = "MID")]
        mid: String,
        key: String,
    },

    #[serde(rename = "put")]
    Put {
        #[serde(rename = "MID")]
        mid: String,
        key: String,
        value: String,
    },

    /// Success reply. `value` is present only for `get`.
    #[serde(rename = "ok")]
    Ok {
        #[serde(rename = "MID")]
        mid: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },

    #[serde(rename = "fail")]
    Fail {
        #[serde(rename = "MID")]
        mid: String,
    },

    /// "Not the leader": retry against the envelope's `leader`.
    #[serde(rename = "redirect")]
    Redirect {
        #[serde(rename = "MID")]
        mid: String,
    },

    RequestVote(RequestVoteRequest),

    RequestVoteResponse(RequestVoteResponse),

    AppendEntries(AppendEntriesRequest),

    AppendEntryResponse(AppendEntriesResponse),

    /// Any `type` this build does not know.
    #[serde(other)]
    Unknown,
}

impl Body {
    pub fn kind(&self) -> &'static str {
        match self {
            Body::Hello => "hello",
            Body::Get { .. } => "get",
            Body::Put { .. } => "put",
            Body::Ok { .. } => "ok",
            Body::Fail { .. } => "fail",
            Body::Redirect { .. } => "redirect",
            Body::RequestVote(_) => "RequestVote",
            Body::RequestVoteResponse(_) => "RequestVoteResponse",
            Body::AppendEntries(_) => "AppendEntries",
            Body::AppendEntryResponse(_) => "AppendEntryResponse",
            Body::Unknown => "unknown",
        }
    }

    /// Message id of a client request (`get`/`put`), if this is one.
    pub fn client_request_id(&self) -> Option<&str> {
        match self {
            Body::Get { mid, .. } | Body::Put { mid, .. } => Some(mid),
            _ => None,
        }
    }
}

/// RequestVote RPC request.
///
/// Sent by candidate to all peers during election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestVoteRequest {
    /// Candidate's term
    pub term: Term,

    /// Candidate requesting vote
    #[serde(rename = "candidateID")]
    pub candidate_id: NodeId,

    /// Index of candidate's last log entry
    pub last_log_index: LogIndex,

    /// Term of candidate's last log entry
    pub last_log_term: Term,
}

/// RequestVote RPC response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestVoteResponse {
    /// Current term, for candidate to update itself
    pub term: Term,

    /// True if candidate received vote
    pub vote_granted: bool,
}

/// AppendEntries RPC request.
///
/// Sent by leader to replicate log entries and/or send heartbeats.
/// Empty entries list = heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendEntriesRequest {
    /// Leader's term
    pub term: Term,

    /// Leader's ID (so follower can redirect clients)
    pub leader_id: NodeId,

    /// Index of log entry immediately preceding new ones
    pub prev_log_index: LogIndex,

    /// Term of prev_log_index entry
    pub prev_log_term: Term,

    /// Log entries to store (empty for heartbeat)
    #[serde(default)]
    pub entries: Vec<Entry>,

    /// Leader's commit index
    pub leader_commit: LogIndex,
}

/// AppendEntries RPC response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendEntriesResponse {
    /// Current term, for leader to update itself
    pub term: Term,

    /// True if follower contained entry matching prev_log_index/term
    pub success: bool,

    /// On success: last index known identical to the leader's log.
    /// On failure: the follower's last log index.
    #[serde(default)]
    pub match_index: LogIndex,
}

/// Serialize a message for the transport.
pub fn encode(message: &Message) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(message)?))
}

/// Parse a datagram payload.
pub fn decode(payload: &[u8]) -> Result<Message> {
    Ok(serde_json::from_slice(payload)?)
}

/// The `MID` of a payload whose `type` we could not interpret, if it has one.
pub fn request_id_of(payload: &[u8]) -> Option<String> {
    #[derive(Deserialize)]
    struct WithMid {
        #[serde(rename = "MID")]
        mid: Option<String>,
    }

    serde_json::from_slice::<WithMid>(payload).ok()?.mid
}
