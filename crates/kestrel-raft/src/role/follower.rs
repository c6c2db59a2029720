//! Follower: replicate the leader's log, vote, redirect clients.

use kestrel_observe::RaftKind;

use super::{redirect, reject_append, RoleHandler, Transition};
use crate::message::{
    AppendEntriesRequest, AppendEntriesResponse, Body, Message, RequestVoteRequest,
    RequestVoteResponse,
};
use crate::replica::Core;
use crate::types::{NodeId, RoleKind};

pub(crate) struct Follower {
    /// Last leader that proved itself with a current-term AppendEntries.
    leader_hint: NodeId,
}

impl Follower {
    pub(crate) fn new() -> Self {
        Self {
            leader_hint: NodeId::broadcast(),
        }
    }

    pub(crate) fn leader_hint(&self) -> &NodeId {
        &self.leader_hint
    }

    fn handle_append_entries(&mut self, core: &mut Core, src: NodeId, req: AppendEntriesRequest) {
        core.observe_term(req.term);

        // Stale leader: reject, and do not let it hold off our election.
        if req.term < core.current_term {
            tracing::debug!(
                node = %core.id,
                term = %core.current_term,
                stale = %req.term,
                "Rejecting AppendEntries from stale leader"
            );
            reject_append(core, src, self.leader_hint.clone());
            return;
        }

        self.leader_hint = req.leader_id.clone();

        if !core.log.matches(req.prev_log_index, req.prev_log_term) {
            tracing::debug!(
                node = %core.id,
                prev_log_index = %req.prev_log_index,
                prev_log_term = %req.prev_log_term,
                last_index = %core.log.last_index(),
                "Log inconsistency, asking leader to back up"
            );
            core.arm_election_timer();
            reject_append(core, src, self.leader_hint.clone());
            return;
        }

        let carried_entries = !req.entries.is_empty();
        let last_new_index = core.log.merge(req.prev_log_index, req.entries);

        if req.leader_commit > core.commit_index {
            core.advance_commit_index(req.leader_commit.min(last_new_index));
        }
        core.apply_committed();

        // Successful heartbeats go unanswered.
        if carried_entries {
            core.send(
                src,
                self.leader_hint.clone(),
                Body::AppendEntryResponse(AppendEntriesResponse {
                    term: core.current_term,
                    success: true,
                    match_index: last_new_index,
                }),
            );
        }

        core.arm_election_timer();
    }

    fn handle_request_vote(&mut self, core: &mut Core, src: NodeId, req: RequestVoteRequest) {
        core.observe_term(req.term);

        let vote_granted = if req.term < core.current_term {
            false
        } else {
            let free_to_vote = core
                .voted_for
                .as_ref()
                .map_or(true, |id| id == &req.candidate_id);
            free_to_vote && core.log.is_up_to_date(req.last_log_index, req.last_log_term)
        };

        if vote_granted {
            core.voted_for = Some(req.candidate_id.clone());
            core.arm_election_timer();
            core.emit(RaftKind::VoteGranted {
                to: req.candidate_id.to_string(),
            });
        }

        tracing::debug!(
            node = %core.id,
            term = %core.current_term,
            candidate = %req.candidate_id,
            granted = vote_granted,
            "RequestVote handled"
        );

        core.send(
            src,
            self.leader_hint.clone(),
            Body::RequestVoteResponse(RequestVoteResponse {
                term: core.current_term,
                vote_granted,
            }),
        );
    }
}

impl RoleHandler for Follower {
    fn on_entry(&mut self, core: &mut Core) -> Option<Transition> {
        core.arm_election_timer();
        None
    }

    fn on_timeout(&mut self, core: &mut Core) -> Option<Transition> {
        tracing::info!(
            node = %core.id,
            term = %core.current_term,
            "Election timeout, becoming candidate"
        );
        Some(Transition::to(RoleKind::Candidate))
    }

    fn on_message(&mut self, core: &mut Core, msg: Message) -> Option<Transition> {
        let Message { src, body, .. } = msg;
        match body {
            Body::AppendEntries(req) => self.handle_append_entries(core, src, req),
            Body::RequestVote(req) => self.handle_request_vote(core, src, req),
            Body::Get { mid, .. } | Body::Put { mid, .. } => {
                redirect(core, src, self.leader_hint.clone(), mid)
            }
            // Late responses from an earlier candidacy or leadership.
            Body::RequestVoteResponse(RequestVoteResponse { term, .. })
            | Body::AppendEntryResponse(AppendEntriesResponse { term, .. }) => {
                core.observe_term(term);
            }
            other => {
                tracing::debug!(node = %core.id, kind = other.kind(), "Follower ignoring message");
            }
        }
        None
    }
}
