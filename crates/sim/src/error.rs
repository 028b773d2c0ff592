//! Simulation error types.

use protocol::ProtocolError;
use thiserror::Error;

/// Errors surfaced at the simulation API boundary.
///
/// Recoverable in-tick failures (unreachable paths, failed guards) never
/// escape as errors; they become `Failed` task states instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error("Operation not allowed in the current state: {0}")]
    InvalidState(&'static str),

    #[error("Player {player} does not own unit {unit}")]
    InvalidOwner { player: i32, unit: i32 },

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Position ({row}, {col}) at weight {weight} is outside the map")]
    OutOfRange { row: i32, col: i32, weight: i32 },

    #[error("No path for unit {0}")]
    Unreachable(i32),

    #[error("Serialization failure: {0}")]
    SerializationFailure(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for SimError {
    fn from(e: std::io::Error) -> Self {
        SimError::Io(e.to_string())
    }
}

pub type SimResult<T> = Result<T, SimError>;
