//! Raft configuration (timeouts, limits, tuning parameters).

use std::time::Duration;

use rand::Rng;

use crate::error::{RaftError, Result};

/// Raft configuration.
///
/// Controls election timeouts, the heartbeat interval and replication limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaftConfig {
    /// Heartbeat interval (leader → followers).
    ///
    /// Leader sends AppendEntries (heartbeat or real entries) at this interval.
    /// Must be < election_timeout_min so followers never time out under a live leader.
    ///
    /// Default: 75ms
    pub heartbeat_interval: Duration,

    /// Minimum election timeout (follower → candidate).
    ///
    /// Default: 150ms
    pub election_timeout_min: Duration,

    /// Maximum election timeout (exclusive).
    ///
    /// Each timeout is drawn uniformly from [min, max) to prevent split votes.
    ///
    /// Default: 300ms
    pub election_timeout_max: Duration,

    /// Maximum number of entries per AppendEntries message.
    ///
    /// At least one entry is sent per heartbeat when a follower is behind.
    ///
    /// Default: 64 entries
    pub max_entries_per_append: usize,

    /// Maximum appended-but-uncommitted entries a leader accepts.
    ///
    /// Further `put`s are answered with `fail` until the backlog commits.
    ///
    /// Default: 10,000
    pub max_uncommitted_entries: usize,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(75),
            election_timeout_min: Duration::from_millis(150),
            election_timeout_max: Duration::from_millis(300),
            max_entries_per_append: 64,
            max_uncommitted_entries: 10_000,
        }
    }
}

impl RaftConfig {
    /// Validate configuration (ensure invariants hold).
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(config_error("heartbeat_interval must be > 0"));
        }

        // Heartbeat must be less than election timeout min
        if self.heartbeat_interval >= self.election_timeout_min {
            return Err(config_error(format!(
                "heartbeat_interval ({:?}) must be < election_timeout_min ({:?})",
                self.heartbeat_interval, self.election_timeout_min
            )));
        }

        if self.election_timeout_min >= self.election_timeout_max {
            return Err(config_error(format!(
                "election_timeout_min ({:?}) must be < election_timeout_max ({:?})",
                self.election_timeout_min, self.election_timeout_max
            )));
        }

        if self.max_entries_per_append == 0 {
            return Err(config_error("max_entries_per_append must be > 0"));
        }

        if self.max_uncommitted_entries == 0 {
            return Err(config_error("max_uncommitted_entries must be > 0"));
        }

        Ok(())
    }

    /// Get randomized election timeout.
    ///
    /// Returns a random duration in [election_timeout_min, election_timeout_max),
    /// drawn from `rng`.
    pub fn random_election_timeout<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let min_ms = self.election_timeout_min.as_millis() as u64;
        let max_ms = self.election_timeout_max.as_millis() as u64;
        if max_ms <= min_ms {
            return self.election_timeout_min;
        }
        let random_ms = rng.gen_range(min_ms..max_ms);
        Duration::from_millis(random_ms)
    }
}

fn config_error(reason: impl Into<String>) -> RaftError {
    RaftError::Config {
        reason: reason.into(),
    }
}
