//! Shared deterministic types for the repair loop.
//!
//! These types define stable contracts between the controller, the batch
//! driver and the CLI report. They do not depend on external state or I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a script unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    Ready,
    Running,
    Repairing,
    Updating,
    Succeeded,
    Failed,
}

impl UnitState {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitState::Ready => "ready",
            UnitState::Running => "running",
            UnitState::Repairing => "repairing",
            UnitState::Updating => "updating",
            UnitState::Succeeded => "succeeded",
            UnitState::Failed => "failed",
        }
    }

    /// `Succeeded` and `Failed` end the loop for a unit.
    pub fn is_terminal(self) -> bool {
        matches!(self, UnitState::Succeeded | UnitState::Failed)
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of error text produced by a failing run. Both kinds are repairable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The script completed and wrote to stderr.
    Runtime,
    /// The script exceeded the wall-clock timeout and was killed.
    Timeout,
}

/// Why a unit ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The repair oracle could not be reached or returned an unusable envelope.
    OracleCommunication { message: String },
    /// The oracle replied but no code payload could be recovered.
    PatchExtraction { message: String },
    /// Reading the script, writing the backup or writing the patch failed.
    Persistence { message: String },
    /// The optional `max_attempts` bound was reached.
    AttemptsExhausted { attempts: u32 },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::OracleCommunication { message } => {
                write!(f, "failed to communicate with repair oracle: {message}")
            }
            FailureReason::PatchExtraction { message } => {
                write!(f, "failed to extract code from oracle response: {message}")
            }
            FailureReason::Persistence { message } => {
                write!(f, "failed to update the script: {message}")
            }
            FailureReason::AttemptsExhausted { attempts } => {
                write!(f, "gave up after {attempts} repair attempts")
            }
        }
    }
}
