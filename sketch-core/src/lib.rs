//! # sketch-core: Authoritative in-memory room cache for Sketchboard
//!
//! Holds the live state of every drawing room (strokes, presence and a
//! derived SVG rendering) and serves it to concurrent readers and writers
//! without touching durable storage on the hot path.
//!
//! ## Architecture
//!
//! ```text
//!                  ┌──────────────────────────────┐
//!                  │          RoomStore           │
//!                  │  RwLock<HashMap<id, Arc<_>>> │  ◄── index lock: map ops only
//!                  └──────────────┬───────────────┘
//!                                 │ Arc<RoomState>
//!          ┌──────────────────────┼──────────────────────┐
//!          ▼                      ▼                      ▼
//!   ┌─────────────┐        ┌─────────────┐        ┌─────────────┐
//!   │  RoomState  │        │  RoomState  │        │  RoomState  │
//!   │  Mutex<…>   │        │  Mutex<…>   │        │  Mutex<…>   │  ◄── per-room lock
//!   ├─────────────┤        └─────────────┘        └─────────────┘
//!   │ strokes     │  append-only, sorted by id (resume cursor)
//!   │ presence    │  watcher → last seen, lazy 3s expiry
//!   │ render      │  lazy SVG buffer + lz4, extended per append
//!   └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`model`] - Points, strokes, room metadata and client-facing views
//! - [`render`] - SVG markup and the incrementally extended rendering cache
//! - [`presence`] - TTL-based watcher tracking
//! - [`room`] - Per-room state behind its own lock
//! - [`store`] - Process-wide room registry
//! - [`error`] - Error taxonomy shared with the service layer

pub mod error;
pub mod model;
pub mod presence;
pub mod render;
pub mod room;
pub mod store;

pub use error::{Result, RoomError};
pub use model::{
    NewPoint, NewStroke, PersistedRoom, Point, PointId, RoomId, RoomInfo, RoomSnapshot,
    RoomSummary, Stroke, StrokeId, StrokeRecord, TokenId,
};
pub use presence::{PresenceTracker, PRESENCE_TTL};
pub use render::{RenderCache, RenderedImage};
pub use room::RoomState;
pub use store::RoomStore;
