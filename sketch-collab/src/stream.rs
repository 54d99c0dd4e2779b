//! Bounded polling delivery of a room's strokes to one watcher.
//!
//! A watch window is short-lived by construction:
//!
//! ```text
//! retry(500) ─ watcher_count(n) ─┬─ sleep ─ poll ─┬─ … × iterations ─ return cursor
//!                                │                │
//!                                │  strokes > cursor (advance cursor)
//!                                │  watcher_count  (only when changed)
//! ```
//!
//! The client reconnects with the returned cursor. Every poll reads the
//! in-memory room only; durable storage is never touched here.

use std::sync::Arc;
use std::time::Instant;

use sketch_core::{Result, RoomId, RoomStore, Stroke, StrokeId, TokenId};
use tokio::sync::mpsc;

use crate::config::StreamConfig;

/// One event of a watch window.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Suggested reconnect delay
    Retry { millis: u64 },
    /// Watchers currently present in the room
    WatcherCount { count: usize },
    /// A stroke newer than the watcher's cursor
    Stroke(Arc<Stroke>),
}

/// Run one watch window of `room_id` for `watcher`, resuming after `cursor`.
///
/// Returns the id of the last stroke delivered (or `cursor` if none). A
/// dropped receiver ends the window early without error.
pub async fn watch_room(
    rooms: &RoomStore,
    room_id: RoomId,
    watcher: TokenId,
    mut cursor: StrokeId,
    config: &StreamConfig,
    tx: mpsc::Sender<StreamEvent>,
) -> Result<StrokeId> {
    let room = rooms.get(room_id)?;
    log::debug!("Watcher {watcher} joined room {room_id} at cursor {cursor}");

    let mut watchers = room.heartbeat(watcher, Instant::now());
    let opening = [
        StreamEvent::Retry { millis: config.retry_hint_ms },
        StreamEvent::WatcherCount { count: watchers },
    ];
    for event in opening {
        if tx.send(event).await.is_err() {
            return Ok(cursor);
        }
    }

    for poll in 0..config.iterations {
        tokio::select! {
            _ = tokio::time::sleep(config.poll_interval) => {}
            _ = tx.closed() => {
                log::debug!("Watcher {watcher} left room {room_id} after {poll} polls");
                return Ok(cursor);
            }
        }

        let fresh = room.strokes_since(cursor);
        log::trace!("Room {room_id} poll {poll}: {} new strokes", fresh.len());
        for stroke in fresh {
            let id = stroke.id;
            if tx.send(StreamEvent::Stroke(stroke)).await.is_err() {
                return Ok(cursor);
            }
            cursor = id;
        }

        let count = room.heartbeat(watcher, Instant::now());
        if count != watchers {
            watchers = count;
            if tx.send(StreamEvent::WatcherCount { count }).await.is_err() {
                return Ok(cursor);
            }
        }
    }

    Ok(cursor)
}
