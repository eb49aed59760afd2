//! Transition table for a script unit.
//!
//! The controller never assigns a state directly; it fires a [`Trigger`] and
//! takes whatever [`next_state`] returns. Pairs missing from the table are
//! programming errors in the controller.

use std::fmt;

use crate::core::types::UnitState;

/// Event observed by the controller while driving a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Processing of the unit starts.
    Begin,
    /// The run finished with an empty stderr.
    CleanRun,
    /// The run wrote to stderr or timed out.
    ErrorOutput,
    /// The oracle call failed (transport, protocol, deadline, cancellation).
    OracleFailed,
    /// The oracle replied but the reply held no usable patch.
    NoPatch,
    /// The current script content could not be read for the repair request.
    SourceUnreadable,
    /// The configured repair bound was reached.
    AttemptsExhausted,
    /// A patch was recovered from the oracle reply.
    PatchExtracted,
    /// Backup (if needed) and patch write both succeeded.
    Persisted,
    /// Backup or patch write failed.
    PersistFailed,
}

/// A `(state, trigger)` pair that is not part of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: UnitState,
    pub trigger: Trigger,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid transition from {} on {:?}", self.from, self.trigger)
    }
}

impl std::error::Error for InvalidTransition {}

/// Look up the state reached from `from` when `trigger` fires.
pub fn next_state(from: UnitState, trigger: Trigger) -> Result<UnitState, InvalidTransition> {
    use Trigger as T;
    use UnitState as S;

    let to = match (from, trigger) {
        (S::Ready, T::Begin) => S::Running,
        (S::Running, T::CleanRun) => S::Succeeded,
        (S::Running, T::ErrorOutput) => S::Repairing,
        (
            S::Repairing,
            T::OracleFailed | T::NoPatch | T::SourceUnreadable | T::AttemptsExhausted,
        ) => S::Failed,
        (S::Repairing, T::PatchExtracted) => S::Updating,
        (S::Updating, T::Persisted) => S::Running,
        (S::Updating, T::PersistFailed) => S::Failed,
        _ => return Err(InvalidTransition { from, trigger }),
    };
    Ok(to)
}
