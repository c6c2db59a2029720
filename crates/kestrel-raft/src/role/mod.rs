//! Raft roles (Follower, Candidate, Leader) and transitions between them.
//!
//! A role is a fresh value created on every transition and dropped on the
//! next one; it is never mutated across a transition. Each role reacts to
//! three events:
//!
//! - `on_entry`: arm the role's timer, perform its entry action
//! - `on_timeout`: the role timer fired
//! - `on_message`: an inbound message addressed to this replica
//!
//! Any of them may ask the replica to move to another role by returning a
//! `Transition`. The replica cancels the old timer before the new role exists,
//! so a superseded role can never observe a timeout.

mod candidate;
mod follower;
mod leader;

pub(crate) use candidate::Candidate;
pub(crate) use follower::Follower;
pub(crate) use leader::Leader;

use crate::message::{AppendEntriesResponse, Body, Message};
use crate::replica::Core;
use crate::types::{NodeId, RoleKind};

/// A request to switch roles, optionally re-delivering the message that
/// caused it to the new role.
#[derive(Debug)]
pub(crate) struct Transition {
    pub(crate) to: RoleKind,
    pub(crate) replay: Option<Message>,
}

impl Transition {
    pub(crate) fn to(to: RoleKind) -> Self {
        Self { to, replay: None }
    }

    pub(crate) fn replay(to: RoleKind, msg: Message) -> Self {
        Self {
            to,
            replay: Some(msg),
        }
    }
}

/// The capability every role implements.
pub(crate) trait RoleHandler {
    fn on_entry(&mut self, core: &mut Core) -> Option<Transition>;
    fn on_timeout(&mut self, core: &mut Core) -> Option<Transition>;
    fn on_message(&mut self, core: &mut Core, msg: Message) -> Option<Transition>;
}

pub(crate) enum Role {
    Follower(Follower),
    Candidate(Candidate),
    Leader(Leader),
}

impl Role {
    pub(crate) fn new(kind: RoleKind, core: &Core) -> Self {
        match kind {
            RoleKind::Follower => Role::Follower(Follower::new()),
            RoleKind::Candidate => Role::Candidate(Candidate::new()),
            RoleKind::Leader => Role::Leader(Leader::new(core)),
        }
    }

    pub(crate) fn kind(&self) -> RoleKind {
        match self {
            Role::Follower(_) => RoleKind::Follower,
            Role::Candidate(_) => RoleKind::Candidate,
            Role::Leader(_) => RoleKind::Leader,
        }
    }

    pub(crate) fn leader_hint(&self, core: &Core) -> NodeId {
        match self {
            Role::Follower(f) => f.leader_hint().clone(),
            Role::Candidate(_) => NodeId::broadcast(),
            Role::Leader(_) => core.id.clone(),
        }
    }

    fn handler(&mut self) -> &mut dyn RoleHandler {
        match self {
            Role::Follower(r) => r,
            Role::Candidate(r) => r,
            Role::Leader(r) => r,
        }
    }

    pub(crate) fn on_entry(&mut self, core: &mut Core) -> Option<Transition> {
        self.handler().on_entry(core)
    }

    pub(crate) fn on_timeout(&mut self, core: &mut Core) -> Option<Transition> {
        self.handler().on_timeout(core)
    }

    pub(crate) fn on_message(&mut self, core: &mut Core, msg: Message) -> Option<Transition> {
        self.handler().on_message(core, msg)
    }
}

/// Answer a stale or inconsistent AppendEntries.
pub(crate) fn reject_append(core: &Core, to: NodeId, leader: NodeId) {
    core.send(
        to,
        leader,
        Body::AppendEntryResponse(AppendEntriesResponse {
            term: core.current_term,
            success: false,
            match_index: core.log.last_index(),
        }),
    );
}

/// Tell a client to retry elsewhere.
pub(crate) fn redirect(core: &Core, to: NodeId, leader: NodeId, mid: String) {
    core.send(to, leader, Body::Redirect { mid });
}
