//! Request handling on top of the durable store and the room cache.
//!
//! Writes are validated, authorized and persisted before the cache sees
//! them; reads are served from the cache alone.
//!
//! ```text
//! add_stroke ─► token ─► room ─► validate ─► owner? ─► DurableStore ─► RoomStore
//!                 │        │         │          │            │
//!                 ▼        ▼         ▼          ▼            ▼ (failure: cache untouched)
//!            Validation NotFound Validation Unauthorized Unavailable
//! ```

use std::sync::Arc;

use sketch_core::{
    NewStroke, Result, RenderedImage, RoomError, RoomId, RoomSnapshot, RoomStore, RoomSummary,
    Stroke, StrokeId,
};
use tokio::sync::mpsc;

use crate::config::ServerConfig;
use crate::storage::{now_secs, DurableStore, Token};
use crate::stream::{self, StreamEvent};

pub struct RoomService {
    store: Arc<dyn DurableStore>,
    rooms: Arc<RoomStore>,
    config: ServerConfig,
}

impl RoomService {
    /// Load every persisted room into a fresh cache.
    ///
    /// Fails with `Unavailable` when storage cannot be read; the server
    /// must not start in that case.
    pub fn open(store: Arc<dyn DurableStore>, config: ServerConfig) -> Result<Self> {
        let persisted = store.load_all().map_err(|e| {
            log::error!("Failed to load rooms from storage: {e}");
            RoomError::from(e)
        })?;

        let rooms = Arc::new(RoomStore::with_presence_ttl(config.presence_ttl));
        rooms.initialize(persisted)?;

        Ok(Self { store, rooms, config })
    }

    pub fn rooms(&self) -> &Arc<RoomStore> {
        &self.rooms
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn issue_token(&self) -> Result<Token> {
        let token = self.store.issue_token()?;
        log::debug!("Issued token {}", token.id);
        Ok(token)
    }

    /// Resolve a presented token; missing, unknown and expired tokens are
    /// all reported the same way.
    pub fn authenticate(&self, token: &str) -> Result<Token> {
        if token.is_empty() {
            return Err(invalid_token());
        }
        let Some(found) = self.store.find_token(token)? else {
            log::warn!("Rejected unknown token");
            return Err(invalid_token());
        };

        let age = now_secs().saturating_sub(found.created_at);
        if age >= self.config.token_ttl.as_secs() {
            log::warn!("Rejected expired token {} ({age}s old)", found.id);
            return Err(invalid_token());
        }
        Ok(found)
    }

    pub fn create_room(
        &self,
        token: &str,
        name: &str,
        canvas_width: u32,
        canvas_height: u32,
    ) -> Result<RoomSnapshot> {
        let owner = self.authenticate(token)?;
        if name.trim().is_empty() {
            return Err(RoomError::Validation("room name must not be empty".into()));
        }
        if canvas_width == 0 || canvas_height == 0 {
            return Err(RoomError::Validation(format!(
                "canvas {canvas_width}x{canvas_height} must be positive"
            )));
        }

        let info = self
            .store
            .create_room(name, canvas_width, canvas_height, owner.id)
            .map_err(|e| {
                log::error!("Failed to persist room {name:?}: {e}");
                RoomError::from(e)
            })?;
        let room = self.rooms.add_room(info, owner.id)?;
        log::info!(
            "Created room {} {:?} ({canvas_width}x{canvas_height}) for token {}",
            room.id(),
            name,
            owner.id
        );

        self.rooms.snapshot(room.id())
    }

    /// Most recently drawn rooms first, without point detail.
    pub fn list_rooms(&self) -> Vec<RoomSummary> {
        self.rooms.recent_rooms(self.config.list_limit)
    }

    pub fn get_room(&self, room_id: RoomId) -> Result<RoomSnapshot> {
        self.rooms.snapshot(room_id)
    }

    /// Persist a stroke, then make it visible in the cache.
    ///
    /// Only the room's owner may draw its first stroke.
    pub fn add_stroke(&self, token: &str, room_id: RoomId, stroke: &NewStroke) -> Result<Arc<Stroke>> {
        let author = self.authenticate(token)?;
        let room = self.rooms.get(room_id)?;
        stroke.validate()?;

        if room.stroke_count() == 0 && author.id != room.owner_id() {
            log::warn!("Token {} tried to open room {room_id} it does not own", author.id);
            return Err(RoomError::Unauthorized(format!(
                "only the owner may draw the first stroke in room {room_id}"
            )));
        }

        let record = self.store.create_stroke(room_id, stroke).map_err(|e| {
            log::error!("Failed to persist stroke for room {room_id}: {e}");
            RoomError::from(e)
        })?;
        let stroke = Stroke::new(record)?;
        let stroke = self.rooms.append_stroke(room_id, stroke)?;
        log::debug!(
            "Room {room_id}: stroke {} with {} points",
            stroke.id,
            stroke.points.len()
        );
        Ok(stroke)
    }

    pub fn image(&self, room_id: RoomId) -> Result<RenderedImage> {
        self.rooms.render(room_id)
    }

    /// Run one watch window for `token` on `room_id`, streaming into `tx`.
    /// Returns the cursor to resume from.
    pub async fn watch(
        &self,
        token: &str,
        room_id: RoomId,
        cursor: StrokeId,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<StrokeId> {
        let watcher = self.authenticate(token)?;
        stream::watch_room(&self.rooms, room_id, watcher.id, cursor, &self.config.stream, tx).await
    }
}

fn invalid_token() -> RoomError {
    RoomError::Validation("invalid token".into())
}
