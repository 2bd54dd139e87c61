use thiserror::Error;

use crate::types::RoomId;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlantError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("room {0} not found")]
    UnknownRoom(RoomId),

    #[error("cannot {operation} room {room} while it is {status}")]
    InvalidStatus {
        room: RoomId,
        status: &'static str,
        operation: &'static str,
    },

    #[error("{what} {value} is outside the allowed range ({low}, {high})")]
    OutOfRange {
        what: &'static str,
        value: f64,
        low: f64,
        high: f64,
    },

    #[error("unknown fan speed {0:?}")]
    UnknownSpeed(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("plant parameters have not been set")]
    NotInitialized,

    #[error("plant is not running")]
    NotRunning,

    #[error("room {room} has no {field} yet")]
    UnsetField { room: RoomId, field: &'static str },
}

pub type PlantResult<T> = Result<T, PlantError>;
