//! Error taxonomy for room operations.
//!
//! `NotFound` and `Validation` are client mistakes, `Unauthorized` is a
//! policy rejection, `Unavailable` means durable storage could not be
//! reached and `Internal` marks a broken invariant.

use thiserror::Error;

use crate::model::RoomId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RoomError {
    pub fn room_not_found(room_id: RoomId) -> Self {
        RoomError::NotFound(format!("Room {room_id}"))
    }

    /// Stable machine-readable tag used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            RoomError::NotFound(_) => "not_found",
            RoomError::Validation(_) => "validation",
            RoomError::Unauthorized(_) => "unauthorized",
            RoomError::Unavailable(_) => "unavailable",
            RoomError::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, RoomError>;
