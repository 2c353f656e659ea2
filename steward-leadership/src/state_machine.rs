//! Pure leadership transitions.
//!
//! [`transition`] maps `(state, event)` to the next state plus the effects the
//! controller must run before the new state is published. Nothing here touches
//! the coordination service, so every edge can be tested in isolation.

use serde::Serialize;
use std::fmt;
use steward_core::coordination::ConnectionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadershipState {
    Standby,
    Leading,
    Suspended,
    Reinitializing,
}

impl LeadershipState {
    pub fn is_leading(&self) -> bool {
        matches!(self, LeadershipState::Leading)
    }
}

impl fmt::Display for LeadershipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LeadershipState::Standby => "standby",
            LeadershipState::Leading => "leading",
            LeadershipState::Suspended => "suspended",
            LeadershipState::Reinitializing => "reinitializing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipEvent {
    /// The contender node holds the lowest live sequence number.
    Granted,
    /// A predecessor exists and a deletion watch is armed on it.
    Behind,
    /// The watched predecessor was deleted.
    PredecessorGone,
    Connection(ConnectionState),
    /// Standing could not be established within the retry budget.
    EvaluationFailed,
    /// The contender node no longer exists.
    NodeVanished,
    /// The duties-start callback failed.
    DutiesFailed,
    /// Graceful shutdown.
    Relinquish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    StartDuties,
    StopDuties,
    /// Re-evaluate standing and arm a watch on the predecessor.
    InstallWatch,
    /// Recreate the contender node if it is gone, then install the watch.
    Reregister,
    /// Replace the contender node with a fresh one at the back of the queue.
    Requeue,
    /// Delete the contender node and close the session.
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: LeadershipState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: LeadershipState, effects: &[Effect]) -> Self {
        Self {
            next,
            effects: effects.to_vec(),
        }
    }
}

pub fn transition(state: LeadershipState, event: LeadershipEvent) -> Transition {
    use crate::state_machine::{Effect::*, LeadershipEvent as E, LeadershipState::*};
    use steward_core::coordination::ConnectionState as C;

    match (state, event) {
        (_, E::Relinquish) if state.is_leading() => Transition::to(Standby, &[StopDuties, Close]),
        (_, E::Relinquish) => Transition::to(Standby, &[Close]),

        (Standby, E::Granted) => Transition::to(Leading, &[StartDuties]),
        (Standby, E::PredecessorGone) => Transition::to(Standby, &[InstallWatch]),
        (Standby, E::Connection(C::Connected)) => Transition::to(Standby, &[InstallWatch]),
        (Standby, E::Connection(C::Reconnected)) => Transition::to(Reinitializing, &[Reregister]),
        (Standby, E::NodeVanished) => Transition::to(Standby, &[Reregister]),
        (Standby, _) => Transition::to(Standby, &[]),

        (Leading, E::Connection(C::Suspended)) => Transition::to(Suspended, &[StopDuties]),
        (Leading, E::Connection(C::Lost)) => Transition::to(Standby, &[StopDuties]),
        (Leading, E::Connection(C::Reconnected)) => {
            Transition::to(Reinitializing, &[StopDuties, Reregister])
        }
        (Leading, E::Behind) | (Leading, E::EvaluationFailed) => {
            Transition::to(Standby, &[StopDuties])
        }
        (Leading, E::NodeVanished) => Transition::to(Standby, &[StopDuties, Reregister]),
        (Leading, E::DutiesFailed) => Transition::to(Standby, &[Requeue]),
        (Leading, _) => Transition::to(Leading, &[]),

        // duties were stopped on the way in; stale evaluations are ignored until reconnect
        (Suspended, E::Connection(C::Reconnected)) | (Suspended, E::Connection(C::Connected)) => {
            Transition::to(Reinitializing, &[Reregister])
        }
        (Suspended, E::Connection(C::Lost)) => Transition::to(Standby, &[]),
        (Suspended, _) => Transition::to(Suspended, &[]),

        (Reinitializing, E::Granted) => Transition::to(Leading, &[StartDuties]),
        (Reinitializing, E::Behind) | (Reinitializing, E::EvaluationFailed) => {
            Transition::to(Standby, &[])
        }
        (Reinitializing, E::Connection(C::Suspended)) => Transition::to(Suspended, &[]),
        (Reinitializing, E::Connection(C::Lost)) => Transition::to(Standby, &[]),
        (Reinitializing, E::Connection(C::Reconnected))
        | (Reinitializing, E::Connection(C::Connected))
        | (Reinitializing, E::NodeVanished) => Transition::to(Reinitializing, &[Reregister]),
        (Reinitializing, _) => Transition::to(Reinitializing, &[]),
    }
}
