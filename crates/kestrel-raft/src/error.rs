//! Raft error types.

use thiserror::Error;

use crate::types::NodeId;

/// Raft errors.
///
/// None of these are fatal to a running replica: message and timer handlers
/// log them and carry on.
#[derive(Error, Debug)]
pub enum RaftError {
    /// Configuration error (invalid Raft config).
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    /// Malformed or unparseable message payload.
    #[error("Codec error: {source}")]
    Codec {
        #[from]
        source: serde_json::Error,
    },

    /// I/O error (socket send/recv).
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Destination is not reachable through this transport.
    #[error("Peer not found: {peer}")]
    PeerNotFound { peer: NodeId },

    /// Internal error (bug).
    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

/// Raft result type.
pub type Result<T> = std::result::Result<T, RaftError>;
