//! In-memory Raft log.
//!
//! Provides:
//! - Index-based access (get entry by log index)
//! - Range queries for replication batches
//! - Conflict-aware merging of leader entries (truncate on term mismatch)
//! - Up-to-date comparison for vote arbitration
//!
//! The log is 1-indexed. Index 0 is a sentinel with term 0 so that
//! `prevLogIndex = 0` always matches. Nothing is persisted; a restarted replica
//! starts with an empty log.

use crate::types::{Entry, LogIndex, Term};

/// Ordered sequence of log entries, indexed from 1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RaftLog {
    /// `entries[i]` holds log index `i + 1`.
    entries: Vec<Entry>,
}

impl RaftLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the last entry (0 when empty).
    pub fn last_index(&self) -> LogIndex {
        LogIndex(self.entries.len() as u64)
    }

    /// Term of the last entry (0 when empty).
    pub fn last_term(&self) -> Term {
        self.entries.last().map(|e| e.term).unwrap_or(Term::ZERO)
    }

    /// Number of real entries (the sentinel is not counted).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `index`. `None` for the sentinel and for indices past the end.
    pub fn get(&self, index: LogIndex) -> Option<&Entry> {
        let pos = index.as_u64().checked_sub(1)?;
        self.entries.get(pos as usize)
    }

    /// Term at `index`, with the sentinel at index 0 reporting term 0.
    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        if index == LogIndex::ZERO {
            return Some(Term::ZERO);
        }
        self.get(index).map(|e| e.term)
    }

    /// True if the log holds an entry at `index` whose term is `term`.
    pub fn matches(&self, index: LogIndex, term: Term) -> bool {
        self.term_at(index) == Some(term)
    }

    /// Up to `max` entries starting at `from` (inclusive).
    pub fn entries_from(&self, from: LogIndex, max: usize) -> Vec<Entry> {
        let start = from.as_u64().max(1) as usize - 1;
        if start >= self.entries.len() {
            return Vec::new();
        }
        let end = start.saturating_add(max).min(self.entries.len());
        self.entries[start..end].to_vec()
    }

    /// Entries in `(after, up_to]`, used when applying committed entries.
    pub fn range(&self, after: LogIndex, up_to: LogIndex) -> &[Entry] {
        let start = (after.as_u64() as usize).min(self.entries.len());
        let end = (up_to.as_u64() as usize).min(self.entries.len());
        if start >= end {
            return &[];
        }
        &self.entries[start..end]
    }

    /// Append a single entry, returning its index.
    pub fn append(&mut self, entry: Entry) -> LogIndex {
        self.entries.push(entry);
        self.last_index()
    }

    /// Delete the entry at `from` and everything after it.
    pub fn truncate_from(&mut self, from: LogIndex) {
        let keep = from.as_u64().saturating_sub(1) as usize;
        self.entries.truncate(keep);
    }

    /// Merge entries that follow `prev_index` into the log.
    ///
    /// An existing entry is kept when its term matches the incoming one. The
    /// first conflicting entry (same index, different term) and all that follow
    /// it are deleted, then the remaining new entries are appended. Entries
    /// already present are never truncated just because a shorter (reordered)
    /// request arrives.
    ///
    /// The caller must have checked `matches(prev_index, prev_term)`.
    /// Returns the index of the last entry covered by `entries`.
    pub fn merge(&mut self, prev_index: LogIndex, entries: Vec<Entry>) -> LogIndex {
        let mut index = prev_index;
        let mut incoming = entries.into_iter();

        for entry in incoming.by_ref() {
            index = index.next();
            match self.term_at(index) {
                Some(existing) if existing == entry.term => continue,
                Some(_) => {
                    self.truncate_from(index);
                    self.entries.push(entry);
                    break;
                }
                None => {
                    self.entries.push(entry);
                    break;
                }
            }
        }
        for entry in incoming {
            index = index.next();
            self.entries.push(entry);
        }
        index
    }

    /// Raft §5.4.1: is a log ending at (`last_index`, `last_term`) at least as
    /// up-to-date as this one? Higher last term wins; equal terms compare length.
    pub fn is_up_to_date(&self, last_index: LogIndex, last_term: Term) -> bool {
        let my_term = self.last_term();
        last_term > my_term || (last_term == my_term && last_index >= self.last_index())
    }

    pub fn iter(&self) -> impl Iterator<Item = (LogIndex, &Entry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (LogIndex(i as u64 + 1), e))
    }
}
