//! Leader: accept client writes, replicate them, commit by quorum.
//!
//! Per-follower replication state:
//!
//! - `next_index[peer]`: next log index to send (starts at last_index + 1)
//! - `match_index[peer]`: highest index known replicated (starts at 0)
//!
//! Each heartbeat tick sends every follower an AppendEntries starting at its
//! `next_index`, capped at `max_entries_per_append`. An empty batch is the
//! heartbeat. Failed responses move `next_index` back toward the follower's
//! log, guided by the `matchIndex` hint it returns.

use std::collections::HashMap;

use kestrel_observe::RaftKind;

use super::{reject_append, RoleHandler, Transition};
use crate::message::{
    AppendEntriesRequest, AppendEntriesResponse, Body, Message, RequestVoteResponse,
};
use crate::replica::Core;
use crate::types::{Entry, LogIndex, NodeId, RoleKind, Term};

pub(crate) struct Leader {
    next_index: HashMap<NodeId, LogIndex>,
    match_index: HashMap<NodeId, LogIndex>,
}

impl Leader {
    pub(crate) fn new(core: &Core) -> Self {
        let next = core.log.last_index().next();
        Self {
            next_index: core.peers.iter().map(|p| (p.clone(), next)).collect(),
            match_index: core
                .peers
                .iter()
                .map(|p| (p.clone(), LogIndex::ZERO))
                .collect(),
        }
    }

    pub(crate) fn next_index(&self, peer: &NodeId) -> Option<LogIndex> {
        self.next_index.get(peer).copied()
    }

    pub(crate) fn match_index(&self, peer: &NodeId) -> Option<LogIndex> {
        self.match_index.get(peer).copied()
    }

    /// Send `peer` everything from its `next_index`, or a bare heartbeat.
    fn replicate_to(&self, core: &Core, peer: &NodeId) {
        let next = self
            .next_index
            .get(peer)
            .copied()
            .unwrap_or_else(|| core.log.last_index().next());
        let prev_log_index = next.prev().unwrap_or(LogIndex::ZERO);
        let prev_log_term = core.log.term_at(prev_log_index).unwrap_or(Term::ZERO);
        let entries = core
            .log
            .entries_from(next, core.config.max_entries_per_append);

        core.send(
            peer.clone(),
            core.id.clone(),
            Body::AppendEntries(AppendEntriesRequest {
                term: core.current_term,
                leader_id: core.id.clone(),
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit: core.commit_index,
            }),
        );
    }

    fn replicate_all(&self, core: &Core) {
        for peer in &core.peers {
            self.replicate_to(core, peer);
        }
    }

    /// Highest N > commit_index replicated on a quorum whose entry is from the
    /// current term. Entries from earlier terms commit only indirectly.
    fn quorum_commit_index(&self, core: &Core) -> LogIndex {
        let quorum = core.quorum();
        let mut commit = core.commit_index;
        let mut n = core.commit_index.next();

        while n <= core.log.last_index() {
            let replicated = 1 + self.match_index.values().filter(|m| **m >= n).count();
            if replicated < quorum {
                break;
            }
            if core.log.term_at(n) == Some(core.current_term) {
                commit = n;
            }
            n = n.next();
        }
        commit
    }

    /// Commit what a quorum holds, apply it, and acknowledge each write.
    fn commit_and_reply(&self, core: &mut Core) {
        let commit = self.quorum_commit_index(core);
        core.advance_commit_index(commit);
        for entry in core.apply_committed() {
            let Entry {
                requester,
                request_id,
                ..
            } = entry;
            core.send(
                requester,
                core.id.clone(),
                Body::Ok {
                    mid: request_id,
                    value: None,
                },
            );
        }
    }

    fn handle_append_response(
        &mut self,
        core: &mut Core,
        src: NodeId,
        resp: AppendEntriesResponse,
    ) -> Option<Transition> {
        if core.observe_term(resp.term) {
            tracing::info!(
                node = %core.id,
                term = %core.current_term,
                from = %src,
                "Follower has newer term, stepping down"
            );
            return Some(Transition::to(RoleKind::Follower));
        }
        if resp.term < core.current_term {
            return None;
        }
        let (Some(next), Some(matched)) = (
            self.next_index.get(&src).copied(),
            self.match_index.get(&src).copied(),
        ) else {
            tracing::debug!(node = %core.id, from = %src, "Response from unknown peer");
            return None;
        };

        if resp.success {
            let acked = resp.match_index.min(core.log.last_index());
            let matched = matched.max(acked);
            self.match_index.insert(src.clone(), matched);
            self.next_index.insert(src, matched.next());
            self.commit_and_reply(core);
        } else {
            // Back up one step, or jump straight past the follower's log end,
            // but never below what we know it holds.
            let hinted = resp.match_index.next();
            let backed_up = next.prev().unwrap_or(LogIndex(1)).min(hinted);
            let next = backed_up.max(matched.next()).max(LogIndex(1));
            tracing::debug!(
                node = %core.id,
                peer = %src,
                next_index = %next,
                "Follower rejected append, backing up"
            );
            self.next_index.insert(src.clone(), next);
            self.replicate_to(core, &src);
        }
        None
    }

    fn handle_put(&mut self, core: &mut Core, src: NodeId, mid: String, key: String, value: String) {
        let uncommitted = core.log.last_index().as_u64() - core.commit_index.as_u64();
        if uncommitted >= core.config.max_uncommitted_entries as u64 {
            tracing::warn!(
                node = %core.id,
                uncommitted,
                "Too many uncommitted entries, rejecting put"
            );
            core.send(src, core.id.clone(), Body::Fail { mid });
            return;
        }

        let index = core
            .log
            .append(Entry::new(core.current_term, key, value, src, mid));
        tracing::debug!(node = %core.id, index = %index, "Appended client put");
        // Answered once committed.
    }
}

impl RoleHandler for Leader {
    fn on_entry(&mut self, core: &mut Core) -> Option<Transition> {
        core.emit(RaftKind::LeaderElected);
        tracing::info!(
            node = %core.id,
            term = %core.current_term,
            last_log_index = %core.log.last_index(),
            "Became leader"
        );
        self.replicate_all(core);
        core.arm_heartbeat_timer();
        None
    }

    fn on_timeout(&mut self, core: &mut Core) -> Option<Transition> {
        self.commit_and_reply(core);
        self.replicate_all(core);
        core.arm_heartbeat_timer();
        None
    }

    fn on_message(&mut self, core: &mut Core, msg: Message) -> Option<Transition> {
        let Message {
            src,
            dst,
            leader,
            body,
        } = msg;
        match body {
            Body::AppendEntries(req) if req.term > core.current_term => {
                core.observe_term(req.term);
                let msg = Message::new(src, dst, leader, Body::AppendEntries(req));
                Some(Transition::replay(RoleKind::Follower, msg))
            }
            Body::AppendEntries(req) if req.term < core.current_term => {
                reject_append(core, src, core.id.clone());
                None
            }
            Body::AppendEntries(req) => {
                tracing::warn!(
                    node = %core.id,
                    term = %core.current_term,
                    other = %req.leader_id,
                    "Another leader claims the current term, ignoring"
                );
                None
            }
            Body::RequestVote(req) if req.term > core.current_term => {
                core.observe_term(req.term);
                let msg = Message::new(src, dst, leader, Body::RequestVote(req));
                Some(Transition::replay(RoleKind::Follower, msg))
            }
            Body::RequestVote(_) => {
                core.send(
                    src,
                    core.id.clone(),
                    Body::RequestVoteResponse(RequestVoteResponse {
                        term: core.current_term,
                        vote_granted: false,
                    }),
                );
                None
            }
            Body::AppendEntryResponse(resp) => self.handle_append_response(core, src, resp),
            // Late votes from our own election.
            Body::RequestVoteResponse(resp) => {
                if core.observe_term(resp.term) {
                    Some(Transition::to(RoleKind::Follower))
                } else {
                    None
                }
            }
            Body::Put { mid, key, value } => {
                self.handle_put(core, src, mid, key, value);
                None
            }
            Body::Get { mid, key } => {
                // Served from local state without a quorum round, so a deposed
                // leader that has not yet heard of its successor can return
                // stale data.
                let value = core.state_machine.get(&key).unwrap_or_default().to_string();
                core.send(
                    src,
                    core.id.clone(),
                    Body::Ok {
                        mid,
                        value: Some(value),
                    },
                );
                None
            }
            other => {
                tracing::debug!(node = %core.id, kind = other.kind(), "Leader ignoring message");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::message::{AppendEntriesRequest, AppendEntriesResponse, Body, RequestVoteResponse};
    use crate::test_support::Harness;
    use crate::types::{Entry, LogIndex, NodeId, RoleKind, Term};

    fn leader(id: &str, peers: &[&str]) -> Harness {
        let mut h = Harness::started(id, peers);
        assert!(h.expire_election());
        for peer in peers.iter().take(peers.len() / 2) {
            h.deliver(
                peer,
                Body::RequestVoteResponse(RequestVoteResponse {
                    term: Term(1),
                    vote_granted: true,
                }),
            );
        }
        assert_eq!(h.replica.role_kind(), Some(RoleKind::Leader));
        h.drain_all();
        h
    }

    fn put(mid: &str, key: &str, value: &str) -> Body {
        Body::Put {
            mid: mid.into(),
            key: key.into(),
            value: value.into(),
        }
    }

    fn ack(term: u64, success: bool, match_index: u64) -> Body {
        Body::AppendEntryResponse(AppendEntriesResponse {
            term: Term(term),
            success,
            match_index: LogIndex(match_index),
        })
    }

    fn sent_append(h: &mut Harness, peer: &str) -> AppendEntriesRequest {
        h.drain(peer)
            .into_iter()
            .find_map(|m| match m.body {
                Body::AppendEntries(req) => Some(req),
                _ => None,
            })
            .expect("no AppendEntries sent")
    }

    #[test]
    fn test_initial_replication_state() {
        let h = leader("A", &["B", "C"]);
        let b = NodeId::new("B");
        assert_eq!(h.replica.next_index(&b), Some(LogIndex(1)));
        assert_eq!(h.replica.match_index(&b), Some(LogIndex(0)));
        assert_eq!(h.replica.leader_hint(), NodeId::new("A"));
    }

    #[test]
    fn test_put_commits_on_quorum_and_acknowledges() {
        let mut h = leader("A", &["B", "C"]);
        h.deliver("client", put("m1", "a", "1"));

        assert_eq!(h.replica.log().last_index(), LogIndex(1));
        assert!(h.drain("client").is_empty());

        assert!(h.expire_heartbeat());
        let req = sent_append(&mut h, "B");
        assert_eq!(req.entries.len(), 1);
        assert_eq!(req.prev_log_index, LogIndex(0));
        assert_eq!(req.leader_commit, LogIndex(0));

        h.deliver("B", ack(1, true, 1));

        assert_eq!(h.replica.commit_index(), LogIndex(1));
        assert_eq!(h.replica.state_machine().get("a"), Some("1"));
        let replies = h.drain("client");
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].leader, NodeId::new("A"));
        assert_eq!(
            replies[0].body,
            Body::Ok {
                mid: "m1".into(),
                value: None
            }
        );
        assert_eq!(h.replica.next_index(&NodeId::new("B")), Some(LogIndex(2)));
    }

    #[test]
    fn test_get_reads_local_state() {
        let mut h = leader("A", &["B", "C"]);
        h.deliver(
            "client",
            Body::Get {
                mid: "g1".into(),
                key: "missing".into(),
            },
        );
        assert_eq!(
            h.drain("client")[0].body,
            Body::Ok {
                mid: "g1".into(),
                value: Some(String::new())
            }
        );
    }

    /// Leader of term 2 whose log holds three entries from term 1.
    fn leader_with_old_log() -> Harness {
        let mut h = Harness::started("A", &["B", "C"]);
        let entries = (1..=3)
            .map(|i| Entry::new(Term(1), "k", format!("v{i}"), NodeId::new("client"), format!("m{i}")))
            .collect();
        h.deliver(
            "B",
            Body::AppendEntries(AppendEntriesRequest {
                term: Term(1),
                leader_id: NodeId::new("B"),
                prev_log_index: LogIndex(0),
                prev_log_term: Term(0),
                entries,
                leader_commit: LogIndex(0),
            }),
        );
        assert!(h.expire_election());
        h.deliver(
            "C",
            Body::RequestVoteResponse(RequestVoteResponse {
                term: Term(2),
                vote_granted: true,
            }),
        );
        assert!(h.replica.is_leader());
        h.drain_all();
        h
    }

    #[test]
    fn test_rejection_backs_up_next_index() {
        let mut h = leader_with_old_log();
        let (b, c) = (NodeId::new("B"), NodeId::new("C"));
        assert_eq!(h.replica.next_index(&c), Some(LogIndex(4)));

        // C's log is empty: jump straight to the start.
        h.deliver("C", ack(2, false, 0));
        assert_eq!(h.replica.next_index(&c), Some(LogIndex(1)));
        let retry = sent_append(&mut h, "C");
        assert_eq!(retry.prev_log_index, LogIndex(0));
        assert_eq!(retry.entries.len(), 3);

        // B holds two entries: back up by one.
        h.deliver("B", ack(2, false, 2));
        assert_eq!(h.replica.next_index(&b), Some(LogIndex(3)));
        let retry = sent_append(&mut h, "B");
        assert_eq!(retry.prev_log_index, LogIndex(2));
        assert_eq!(retry.prev_log_term, Term(1));
    }

    #[test]
    fn test_commit_waits_for_quorum() {
        let mut h = leader("A", &["B", "C"]);
        h.deliver("client", put("m1", "a", "1"));
        // Only the leader holds index 1.
        h.deliver("B", ack(1, true, 0));
        assert_eq!(h.replica.commit_index(), LogIndex(0));

        h.deliver("C", ack(1, true, 1));
        assert_eq!(h.replica.commit_index(), LogIndex(1));
    }

    #[test]
    fn test_old_term_entries_commit_only_indirectly() {
        let mut h = leader_with_old_log();
        h.deliver("C", ack(2, true, 3));
        assert_eq!(h.replica.commit_index(), LogIndex(0));

        h.deliver("client", put("m4", "k", "v4"));
        h.deliver("C", ack(2, true, 4));
        assert_eq!(h.replica.commit_index(), LogIndex(4));
        assert_eq!(h.replica.state_machine().get("k"), Some("v4"));

        let acked: Vec<Body> = h.drain("client").into_iter().map(|m| m.body).collect();
        assert_eq!(acked.len(), 4);
        assert_eq!(
            acked[3],
            Body::Ok {
                mid: "m4".into(),
                value: None
            }
        );
    }

    #[test]
    fn test_back_pressure_fails_put() {
        let mut h = leader("A", &["B", "C"]);
        let limit = crate::config::RaftConfig::default().max_uncommitted_entries;
        for i in 0..limit {
            h.deliver("client", put(&format!("m{i}"), "k", "v"));
        }
        h.deliver("client", put("over", "k", "v"));

        assert_eq!(h.replica.log().len(), limit);
        let replies = h.drain("client");
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].body, Body::Fail { mid: "over".into() });
    }

    #[test]
    fn test_higher_term_append_steps_down_and_follows() {
        let mut h = leader("A", &["B", "C"]);
        h.deliver(
            "B",
            Body::AppendEntries(AppendEntriesRequest {
                term: Term(4),
                leader_id: NodeId::new("B"),
                prev_log_index: LogIndex(0),
                prev_log_term: Term(0),
                entries: vec![],
                leader_commit: LogIndex(0),
            }),
        );
        assert_eq!(h.replica.role_kind(), Some(RoleKind::Follower));
        assert_eq!(h.replica.current_term(), Term(4));
        assert_eq!(h.replica.leader_hint(), NodeId::new("B"));
    }

    #[test]
    fn test_higher_term_response_steps_down() {
        let mut h = leader("A", &["B", "C"]);
        h.deliver("C", ack(7, false, 0));
        assert_eq!(h.replica.role_kind(), Some(RoleKind::Follower));
        assert_eq!(h.replica.current_term(), Term(7));
    }

    #[test]
    fn test_heartbeat_keeps_leadership() {
        let mut h = leader("A", &["B", "C"]);
        for _ in 0..5 {
            assert!(h.expire_heartbeat());
            let hb = sent_append(&mut h, "C");
            assert!(hb.entries.is_empty());
            assert_eq!(hb.term, Term(1));
        }
        assert!(h.replica.is_leader());
    }
}
