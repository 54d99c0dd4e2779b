//! Live state of a single room behind its own lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{Result, RoomError};
use crate::model::{RoomId, RoomInfo, RoomSnapshot, RoomSummary, Stroke, StrokeId, TokenId};
use crate::presence::{PresenceTracker, PRESENCE_TTL};
use crate::render::{RenderCache, RenderedImage};

#[derive(Debug)]
struct RoomInner {
    /// Ascending by stroke id, no duplicates.
    strokes: Vec<Arc<Stroke>>,
    presence: PresenceTracker,
    render: RenderCache,
}

/// One room: immutable metadata plus mutable state under a per-room mutex.
///
/// Operations on different rooms never contend with each other.
#[derive(Debug)]
pub struct RoomState {
    info: RoomInfo,
    owner_id: TokenId,
    inner: Mutex<RoomInner>,
}

impl RoomState {
    pub fn new(info: RoomInfo, owner_id: TokenId) -> Self {
        Self::with_strokes(info, owner_id, Vec::new(), PRESENCE_TTL)
    }

    /// Build a room from already committed strokes, in any order.
    pub fn with_strokes(
        info: RoomInfo,
        owner_id: TokenId,
        mut strokes: Vec<Arc<Stroke>>,
        presence_ttl: Duration,
    ) -> Self {
        strokes.sort_by_key(|s| s.id);
        strokes.dedup_by_key(|s| s.id);
        Self {
            info,
            owner_id,
            inner: Mutex::new(RoomInner {
                strokes,
                presence: PresenceTracker::with_ttl(presence_ttl),
                render: RenderCache::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RoomInner> {
        // Every critical section leaves the state consistent; ignore poison.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> RoomId {
        self.info.id
    }

    pub fn info(&self) -> &RoomInfo {
        &self.info
    }

    pub fn owner_id(&self) -> TokenId {
        self.owner_id
    }

    /// Insert a committed stroke at its sorted position and fold it into
    /// the rendering if one has been built.
    ///
    /// Strokes normally arrive in id order and land at the end. A stroke
    /// committed earlier but appended later is still placed by id; if that
    /// position is inside the rendered prefix the rendering is rebuilt.
    pub fn append(&self, stroke: Arc<Stroke>) -> Result<()> {
        if stroke.room_id != self.info.id {
            return Err(RoomError::Internal(format!(
                "stroke {} belongs to room {}, not {}",
                stroke.id, stroke.room_id, self.info.id
            )));
        }

        let mut guard = self.lock();
        let RoomInner { strokes, render, .. } = &mut *guard;

        let pos = strokes.partition_point(|s| s.id < stroke.id);
        if strokes.get(pos).is_some_and(|s| s.id == stroke.id) {
            return Err(RoomError::Internal(format!(
                "stroke {} already in room {}",
                stroke.id, self.info.id
            )));
        }

        let inside_rendered = pos < render.rendered();
        if pos < strokes.len() {
            log::warn!(
                "Stroke {} arrived out of order in room {} (position {} of {})",
                stroke.id,
                self.info.id,
                pos,
                strokes.len()
            );
        }
        strokes.insert(pos, stroke);

        let folded = if inside_rendered {
            render.rebuild(&self.info, strokes)
        } else {
            render.extend(strokes).map(|_| ())
        };
        // The stroke is committed either way; a stale rendering is dropped
        // and rebuilt by the next read.
        if let Err(e) = folded {
            log::error!("Room {}: dropping rendering after {e}", self.info.id);
            render.clear();
        }
        Ok(())
    }

    /// Every stroke with id > `cursor`, ascending.
    pub fn strokes_since(&self, cursor: StrokeId) -> Vec<Arc<Stroke>> {
        let inner = self.lock();
        let start = inner.strokes.partition_point(|s| s.id <= cursor);
        inner.strokes[start..].to_vec()
    }

    pub fn stroke_count(&self) -> usize {
        self.lock().strokes.len()
    }

    pub fn last_stroke_id(&self) -> Option<StrokeId> {
        self.lock().strokes.last().map(|s| s.id)
    }

    /// Presence heartbeat; returns the fresh watcher count.
    pub fn heartbeat(&self, watcher: TokenId, now: Instant) -> usize {
        self.lock().presence.heartbeat(watcher, now)
    }

    /// Expire silent watchers and count the rest, refreshing nobody.
    pub fn watcher_count(&self, now: Instant) -> usize {
        self.lock().presence.expire(now)
    }

    /// Current rendering, built on first use.
    pub fn render(&self) -> Result<RenderedImage> {
        let mut guard = self.lock();
        let RoomInner { strokes, render, .. } = &mut *guard;
        render.materialize(&self.info, strokes)
    }

    pub fn snapshot(&self, now: Instant) -> RoomSnapshot {
        let mut inner = self.lock();
        let watcher_count = inner.presence.expire(now);
        RoomSnapshot {
            info: self.info.clone(),
            strokes: inner.strokes.iter().map(|s| s.record().clone()).collect(),
            stroke_count: inner.strokes.len(),
            watcher_count,
        }
    }

    pub fn summary(&self, now: Instant) -> RoomSummary {
        let mut inner = self.lock();
        RoomSummary {
            info: self.info.clone(),
            stroke_count: inner.strokes.len(),
            watcher_count: inner.presence.expire(now),
            last_stroke_id: inner.strokes.last().map(|s| s.id),
        }
    }
}
