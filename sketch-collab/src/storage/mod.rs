//! Durable storage behind the room cache.
//!
//! Architecture:
//! ```text
//! ┌─────────────┐   write-through    ┌──────────────────┐
//! │ RoomService │ ─────────────────► │ dyn DurableStore │
//! │             │                    ├──────────────────┤
//! │  RoomStore  │ ◄───────────────── │ RocksStore       │  CF rooms, strokes, points,
//! │  (cache)    │   load_all at boot │ MemoryStore      │     owners, tokens, token_index
//! └─────────────┘                    └──────────────────┘
//! ```
//!
//! Every identity (room, stroke, point, token) is assigned here, strictly
//! increasing from 1. The cache never invents ids.

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig};

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use sketch_core::{NewStroke, PersistedRoom, RoomError, RoomId, RoomInfo, StrokeRecord, TokenId};
use thiserror::Error;
use uuid::Uuid;

/// Storage errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// RocksDB internal error
    #[error("Database error: {0}")]
    DatabaseError(String),
    /// Store deliberately offline or unreachable
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    /// Referenced row does not exist
    #[error("{0} not found")]
    NotFound(String),
    /// Serialization failed
    #[error("Serialization error: {0}")]
    SerializationError(String),
    /// Deserialization failed
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

impl From<StoreError> for RoomError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DatabaseError(msg) | StoreError::Unavailable(msg) => {
                RoomError::Unavailable(msg)
            }
            StoreError::NotFound(what) => RoomError::NotFound(what),
            StoreError::SerializationError(msg) | StoreError::DeserializationError(msg) => {
                RoomError::Internal(msg)
            }
        }
    }
}

/// An issued client token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: TokenId,
    /// Opaque secret presented by the client.
    pub token: String,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
}

/// Row-level persistence of rooms, strokes, points, owners and tokens.
///
/// Implementations must be safe to call from many connection tasks at once.
pub trait DurableStore: Send + Sync {
    /// Every room with its owner and committed strokes (points included).
    fn load_all(&self) -> Result<Vec<PersistedRoom>, StoreError>;

    /// Persist a room and its owner mapping; returns the stored row.
    fn create_room(
        &self,
        name: &str,
        canvas_width: u32,
        canvas_height: u32,
        owner_id: TokenId,
    ) -> Result<RoomInfo, StoreError>;

    /// Persist a stroke and all of its points atomically.
    fn create_stroke(&self, room_id: RoomId, stroke: &NewStroke)
        -> Result<StrokeRecord, StoreError>;

    fn issue_token(&self) -> Result<Token, StoreError>;

    fn find_token(&self, token: &str) -> Result<Option<Token>, StoreError>;
}

/// Seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// 64 hex characters of randomness.
pub(crate) fn generate_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}
