//! # sketch-collab: Network service around the Sketchboard room cache
//!
//! Persists rooms, strokes and tokens, keeps the in-memory cache in step
//! with storage, and serves clients over WebSocket.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     WebSocket     ┌──────────────┐
//! │ SketchClient │ ◄───────────────► │ SketchServer │
//! │ WatchClient  │    JSON frames    │ (task/conn)  │
//! └──────────────┘                   └──────┬───────┘
//!                                           │
//!                                    ┌──────┴───────┐
//!                                    │ RoomService  │
//!                                    └──┬────────┬──┘
//!                      write-through    │        │   reads, watch
//!                                       ▼        ▼
//!                            ┌──────────────┐ ┌───────────┐
//!                            │ DurableStore │ │ RoomStore │
//!                            │ (RocksDB)    │ │ (cache)   │
//!                            └──────────────┘ └───────────┘
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Server, stream and storage settings
//! - [`storage`] - Durable store trait, RocksDB and in-memory implementations
//! - [`service`] - Validation, authorization and write-through
//! - [`stream`] - Bounded polling watch windows
//! - [`protocol`] - JSON request/response frames
//! - [`server`] - WebSocket server
//! - [`client`] - WebSocket client with resumable watching

pub mod client;
pub mod config;
pub mod protocol;
pub mod server;
pub mod service;
pub mod storage;
pub mod stream;

// Re-exports for convenience
pub use client::{SketchClient, WatchClient, WatchEvent};
pub use config::{ServerConfig, StreamConfig};
pub use protocol::{ProtocolError, Request, Response};
pub use server::SketchServer;
pub use service::RoomService;
pub use storage::{DurableStore, MemoryStore, RocksStore, StoreConfig, StoreError, Token};
pub use stream::{watch_room, StreamEvent};
