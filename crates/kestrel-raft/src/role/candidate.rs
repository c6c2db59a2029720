//! Candidate: campaign for leadership of a new term.

use std::collections::HashSet;

use kestrel_observe::RaftKind;

use super::{redirect, reject_append, RoleHandler, Transition};
use crate::message::{
    AppendEntriesResponse, Body, Message, RequestVoteRequest, RequestVoteResponse,
};
use crate::replica::Core;
use crate::types::{NodeId, RoleKind};

pub(crate) struct Candidate {
    /// Peers that granted their vote this term. Our own vote is implicit.
    voters: HashSet<NodeId>,
}

impl Candidate {
    pub(crate) fn new() -> Self {
        Self {
            voters: HashSet::new(),
        }
    }

    fn tally(&self) -> usize {
        self.voters.len() + 1
    }

    /// Start a new election: bump the term, vote for ourselves, ask everyone.
    fn campaign(&mut self, core: &mut Core) -> Option<Transition> {
        core.current_term = core.current_term.next();
        core.voted_for = Some(core.id.clone());
        self.voters.clear();
        core.emit(RaftKind::VoteReq);

        tracing::info!(
            node = %core.id,
            term = %core.current_term,
            last_log_index = %core.log.last_index(),
            "Starting election"
        );

        core.send(
            NodeId::broadcast(),
            NodeId::broadcast(),
            Body::RequestVote(RequestVoteRequest {
                term: core.current_term,
                candidate_id: core.id.clone(),
                last_log_index: core.log.last_index(),
                last_log_term: core.log.last_term(),
            }),
        );
        core.arm_election_timer();

        // A cluster of one elects itself.
        self.check_won(core)
    }

    fn check_won(&self, core: &Core) -> Option<Transition> {
        if self.tally() >= core.quorum() {
            tracing::info!(
                node = %core.id,
                term = %core.current_term,
                votes = self.tally(),
                "Won election"
            );
            Some(Transition::to(RoleKind::Leader))
        } else {
            None
        }
    }

    fn handle_vote_response(
        &mut self,
        core: &mut Core,
        src: NodeId,
        resp: RequestVoteResponse,
    ) -> Option<Transition> {
        if core.observe_term(resp.term) {
            return Some(Transition::to(RoleKind::Follower));
        }
        if resp.term != core.current_term || !resp.vote_granted {
            return None;
        }
        // A repeated grant from the same voter counts once.
        if self.voters.insert(src) {
            tracing::debug!(
                node = %core.id,
                term = %core.current_term,
                votes = self.tally(),
                quorum = core.quorum(),
                "Vote received"
            );
        }
        self.check_won(core)
    }
}

impl RoleHandler for Candidate {
    fn on_entry(&mut self, core: &mut Core) -> Option<Transition> {
        self.campaign(core)
    }

    fn on_timeout(&mut self, core: &mut Core) -> Option<Transition> {
        tracing::info!(
            node = %core.id,
            term = %core.current_term,
            votes = self.tally(),
            "Election timed out, retrying"
        );
        self.campaign(core)
    }

    fn on_message(&mut self, core: &mut Core, msg: Message) -> Option<Transition> {
        let Message {
            src,
            dst,
            leader,
            body,
        } = msg;
        match body {
            // Someone already won this term (or a later one).
            Body::AppendEntries(req) if req.term >= core.current_term => {
                core.observe_term(req.term);
                let msg = Message::new(src, dst, leader, Body::AppendEntries(req));
                Some(Transition::replay(RoleKind::Follower, msg))
            }
            Body::AppendEntries(_) => {
                reject_append(core, src, NodeId::broadcast());
                None
            }
            Body::RequestVote(req) if req.term > core.current_term => {
                core.observe_term(req.term);
                let msg = Message::new(src, dst, leader, Body::RequestVote(req));
                Some(Transition::replay(RoleKind::Follower, msg))
            }
            // We already voted for ourselves this term.
            Body::RequestVote(_) => {
                core.send(
                    src,
                    NodeId::broadcast(),
                    Body::RequestVoteResponse(RequestVoteResponse {
                        term: core.current_term,
                        vote_granted: false,
                    }),
                );
                None
            }
            Body::RequestVoteResponse(resp) => self.handle_vote_response(core, src, resp),
            Body::AppendEntryResponse(AppendEntriesResponse { term, .. }) => {
                if core.observe_term(term) {
                    Some(Transition::to(RoleKind::Follower))
                } else {
                    None
                }
            }
            Body::Get { mid, .. } | Body::Put { mid, .. } => {
                redirect(core, src, NodeId::broadcast(), mid);
                None
            }
            other => {
                tracing::debug!(node = %core.id, kind = other.kind(), "Candidate ignoring message");
                None
            }
        }
    }
}
