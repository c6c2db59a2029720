//! Single-slot role timer.
//!
//! Each replica has at most one pending timer: the election timeout while
//! following or campaigning, the heartbeat interval while leading. Arming
//! replaces whatever was pending; cancelling clears it.

use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Election,
    Heartbeat,
}

/// An armed deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pending {
    deadline: Instant,
    kind: TimerKind,
}

#[derive(Debug, Default)]
pub struct Timer {
    slot: Option<Pending>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer, replacing any pending deadline.
    pub fn arm(&mut self, deadline: Instant, kind: TimerKind) {
        self.slot = Some(Pending { deadline, kind });
    }

    /// Drop the pending deadline, if any.
    pub fn cancel(&mut self) {
        self.slot = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.slot.map(|p| p.deadline)
    }

    /// Take the pending timer if its deadline has passed.
    pub fn fire_if_due(&mut self, now: Instant) -> Option<TimerKind> {
        match self.slot {
            Some(p) if p.deadline <= now => {
                self.slot = None;
                Some(p.kind)
            }
            _ => None,
        }
    }
}
