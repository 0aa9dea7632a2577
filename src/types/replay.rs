//! Replay operations read from an operations CSV

use super::balance::UserId;
use super::ledger::MutationRequest;

/// One parsed row of a replay input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOperation {
    /// Register a user so later mutations on it are accepted
    Register { user_id: UserId },

    /// Apply a balance mutation
    Mutate(MutationRequest),
}

impl ReplayOperation {
    /// User the operation belongs to, used to partition concurrent replay
    pub fn user_id(&self) -> UserId {
        match self {
            ReplayOperation::Register { user_id } => *user_id,
            ReplayOperation::Mutate(request) => request.user_id,
        }
    }
}
