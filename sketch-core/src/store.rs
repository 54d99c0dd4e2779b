//! Process-wide registry of rooms.
//!
//! The index lock only guards map lookups and inserts; it is always dropped
//! before a room's own lock is taken, so a slow room never blocks lookups
//! of other rooms.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use crate::error::{Result, RoomError};
use crate::model::{
    PersistedRoom, RoomId, RoomInfo, RoomSnapshot, RoomSummary, Stroke, StrokeId, TokenId,
};
use crate::presence::PRESENCE_TTL;
use crate::render::RenderedImage;
use crate::room::RoomState;

type RoomIndex = HashMap<RoomId, Arc<RoomState>>;

/// Authoritative in-memory copy of every room.
#[derive(Debug)]
pub struct RoomStore {
    rooms: RwLock<RoomIndex>,
    presence_ttl: Duration,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::with_presence_ttl(PRESENCE_TTL)
    }

    pub fn with_presence_ttl(presence_ttl: Duration) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            presence_ttl,
        }
    }

    /// Register every room loaded from durable storage. Strokes are encoded
    /// here, before any lock is taken. Returns the number of rooms loaded.
    pub fn initialize(&self, rooms: Vec<PersistedRoom>) -> Result<usize> {
        let mut loaded = HashMap::with_capacity(rooms.len());
        let mut stroke_total = 0;

        for room in rooms {
            let strokes = room
                .strokes
                .into_iter()
                .map(|record| Stroke::new(record).map(Arc::new))
                .collect::<Result<Vec<_>>>()?;
            stroke_total += strokes.len();
            let id = room.info.id;
            let state = RoomState::with_strokes(room.info, room.owner_id, strokes, self.presence_ttl);
            loaded.insert(id, Arc::new(state));
        }

        let count = loaded.len();
        self.write_index().extend(loaded);
        log::info!("Loaded {count} rooms ({stroke_total} strokes) into cache");
        Ok(count)
    }

    fn read_index(&self) -> RwLockReadGuard<'_, RoomIndex> {
        self.rooms.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, RoomIndex> {
        self.rooms.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Live reference to a room. Later appends are visible through it.
    pub fn get(&self, room_id: RoomId) -> Result<Arc<RoomState>> {
        self.read_index()
            .get(&room_id)
            .cloned()
            .ok_or_else(|| RoomError::room_not_found(room_id))
    }

    /// Detached copy of a room.
    pub fn snapshot(&self, room_id: RoomId) -> Result<RoomSnapshot> {
        Ok(self.get(room_id)?.snapshot(Instant::now()))
    }

    /// Register a freshly persisted room.
    pub fn add_room(&self, info: RoomInfo, owner_id: TokenId) -> Result<Arc<RoomState>> {
        let id = info.id;
        let state = Arc::new(RoomState::with_strokes(
            info,
            owner_id,
            Vec::new(),
            self.presence_ttl,
        ));

        let mut index = self.write_index();
        if index.contains_key(&id) {
            return Err(RoomError::Internal(format!("room {id} already cached")));
        }
        index.insert(id, state.clone());
        Ok(state)
    }

    /// Add a committed stroke to its room.
    pub fn append_stroke(&self, room_id: RoomId, stroke: Stroke) -> Result<Arc<Stroke>> {
        let room = self.get(room_id)?;
        let stroke = Arc::new(stroke);
        room.append(stroke.clone())?;
        Ok(stroke)
    }

    /// Strokes with id > `cursor`, ascending.
    pub fn strokes_since(&self, room_id: RoomId, cursor: StrokeId) -> Result<Vec<Arc<Stroke>>> {
        Ok(self.get(room_id)?.strokes_since(cursor))
    }

    /// Zero for unknown rooms.
    pub fn stroke_count(&self, room_id: RoomId) -> usize {
        self.get(room_id).map_or(0, |room| room.stroke_count())
    }

    pub fn update_watcher(&self, room_id: RoomId, watcher: TokenId) -> Result<usize> {
        self.update_watcher_at(room_id, watcher, Instant::now())
    }

    pub fn update_watcher_at(
        &self,
        room_id: RoomId,
        watcher: TokenId,
        now: Instant,
    ) -> Result<usize> {
        Ok(self.get(room_id)?.heartbeat(watcher, now))
    }

    pub fn watcher_count(&self, room_id: RoomId) -> Result<usize> {
        self.watcher_count_at(room_id, Instant::now())
    }

    pub fn watcher_count_at(&self, room_id: RoomId, now: Instant) -> Result<usize> {
        Ok(self.get(room_id)?.watcher_count(now))
    }

    pub fn render(&self, room_id: RoomId) -> Result<RenderedImage> {
        self.get(room_id)?.render()
    }

    /// Rooms with at least one stroke, most recently drawn first.
    pub fn recent_rooms(&self, limit: usize) -> Vec<RoomSummary> {
        let rooms: Vec<Arc<RoomState>> = self.read_index().values().cloned().collect();
        let now = Instant::now();

        let mut summaries: Vec<RoomSummary> = rooms
            .iter()
            .map(|room| room.summary(now))
            .filter(|summary| summary.last_stroke_id.is_some())
            .collect();
        summaries.sort_by(|a, b| b.last_stroke_id.cmp(&a.last_stroke_id));
        summaries.truncate(limit);
        summaries
    }

    pub fn owner_of(&self, room_id: RoomId) -> Result<TokenId> {
        Ok(self.get(room_id)?.owner_id())
    }

    pub fn len(&self) -> usize {
        self.read_index().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_index().is_empty()
    }
}

impl Default for RoomStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Point, StrokeRecord};

    fn info(id: RoomId) -> RoomInfo {
        RoomInfo {
            id,
            name: format!("room-{id}"),
            canvas_width: 800,
            canvas_height: 600,
            created_at: 0,
        }
    }

    fn record(room_id: RoomId, id: StrokeId) -> StrokeRecord {
        StrokeRecord {
            id,
            room_id,
            width: 3,
            red: 1,
            green: 2,
            blue: 3,
            alpha: 0.8,
            created_at: 0,
            points: vec![
                Point { id: id * 2, stroke_id: id, x: 0.0, y: 0.0 },
                Point { id: id * 2 + 1, stroke_id: id, x: 1.0, y: 1.0 },
            ],
        }
    }

    fn stroke(room_id: RoomId, id: StrokeId) -> Stroke {
        Stroke::new(record(room_id, id)).unwrap()
    }

    fn ids(strokes: &[Arc<Stroke>]) -> Vec<StrokeId> {
        strokes.iter().map(|s| s.id).collect()
    }

    #[test]
    fn test_initialize_loads_rooms() {
        let store = RoomStore::new();
        let loaded = store
            .initialize(vec![
                PersistedRoom {
                    info: info(1),
                    owner_id: 10,
                    strokes: vec![record(1, 2), record(1, 1)],
                },
                PersistedRoom { info: info(2), owner_id: 20, strokes: vec![] },
            ])
            .unwrap();
        assert_eq!(loaded, 2);
        assert_eq!(store.len(), 2);
        assert_eq!(ids(&store.strokes_since(1, 0).unwrap()), vec![1, 2]);
        assert_eq!(store.owner_of(2).unwrap(), 20);
    }

    #[test]
    fn test_initialize_rejects_pointless_stroke() {
        let store = RoomStore::new();
        let mut bad = record(1, 1);
        bad.points.clear();
        let result = store.initialize(vec![PersistedRoom {
            info: info(1),
            owner_id: 1,
            strokes: vec![bad],
        }]);
        assert!(matches!(result, Err(RoomError::Internal(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_unknown_room_not_found() {
        let store = RoomStore::new();
        assert!(matches!(store.get(9), Err(RoomError::NotFound(_))));
        assert!(matches!(store.snapshot(9), Err(RoomError::NotFound(_))));
        assert!(matches!(store.strokes_since(9, 0), Err(RoomError::NotFound(_))));
        assert!(matches!(store.append_stroke(9, stroke(9, 1)), Err(RoomError::NotFound(_))));
        assert!(matches!(store.update_watcher(9, 1), Err(RoomError::NotFound(_))));
        assert!(matches!(store.render(9), Err(RoomError::NotFound(_))));
        assert_eq!(store.stroke_count(9), 0);
    }

    #[test]
    fn test_add_room_duplicate_is_internal() {
        let store = RoomStore::new();
        store.add_room(info(1), 1).unwrap();
        assert!(matches!(store.add_room(info(1), 2), Err(RoomError::Internal(_))));
        assert_eq!(store.owner_of(1).unwrap(), 1);
    }

    #[test]
    fn test_get_is_live_snapshot_is_not() {
        let store = RoomStore::new();
        store.add_room(info(1), 1).unwrap();
        let live = store.get(1).unwrap();
        let snap = store.snapshot(1).unwrap();
        store.append_stroke(1, stroke(1, 1)).unwrap();
        assert_eq!(live.stroke_count(), 1);
        assert_eq!(snap.stroke_count, 0);
    }

    #[test]
    fn test_cursor_scenario() {
        let store = RoomStore::new();
        store.add_room(info(1), 1).unwrap();
        for id in 1..=3 {
            store.append_stroke(1, stroke(1, id)).unwrap();
        }
        assert_eq!(ids(&store.strokes_since(1, 1).unwrap()), vec![2, 3]);
        assert_eq!(ids(&store.strokes_since(1, 0).unwrap()), vec![1, 2, 3]);
        assert_eq!(store.stroke_count(1), 3);
    }

    #[test]
    fn test_watcher_scenario() {
        let store = RoomStore::new();
        store.add_room(info(1), 1).unwrap();
        let t0 = Instant::now();
        store.update_watcher_at(1, 100, t0).unwrap();
        assert_eq!(store.update_watcher_at(1, 200, t0).unwrap(), 2);
        let count = store
            .update_watcher_at(1, 300, t0 + Duration::from_millis(3100))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(store.watcher_count_at(1, t0 + Duration::from_secs(10)).unwrap(), 0);
    }

    #[test]
    fn test_recent_rooms_order_and_limit() {
        let store = RoomStore::new();
        for room in 1..=4 {
            store.add_room(info(room), 1).unwrap();
        }
        // room 4 stays empty and is not listed
        store.append_stroke(1, stroke(1, 5)).unwrap();
        store.append_stroke(2, stroke(2, 7)).unwrap();
        store.append_stroke(3, stroke(3, 6)).unwrap();

        let listed: Vec<_> = store.recent_rooms(100).iter().map(|s| s.info.id).collect();
        assert_eq!(listed, vec![2, 3, 1]);

        let top: Vec<_> = store.recent_rooms(2).iter().map(|s| s.info.id).collect();
        assert_eq!(top, vec![2, 3]);
    }

    #[test]
    fn test_concurrent_appends_land_once() {
        let store = Arc::new(RoomStore::new());
        store.add_room(info(1), 1).unwrap();

        let threads = 8u64;
        let per_thread = 25u64;
        std::thread::scope(|scope| {
            for t in 0..threads {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..per_thread {
                        // interleaved ids so threads race on neighbouring slots
                        let id = i * threads + t + 1;
                        store.append_stroke(1, stroke(1, id)).unwrap();
                    }
                });
            }
        });

        let all = ids(&store.strokes_since(1, 0).unwrap());
        let expected: Vec<StrokeId> = (1..=threads * per_thread).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_concurrent_rooms_render_consistently() {
        let store = Arc::new(RoomStore::new());
        for room in 1..=4 {
            store.add_room(info(room), 1).unwrap();
            store.render(room).unwrap();
        }

        std::thread::scope(|scope| {
            for room in 1..=4u64 {
                let store = &store;
                scope.spawn(move || {
                    for i in 1..=20 {
                        store.append_stroke(room, stroke(room, room * 100 + i)).unwrap();
                        store.render(room).unwrap();
                    }
                });
            }
        });

        for room in 1..=4 {
            let image = store.render(room).unwrap();
            assert_eq!(image.stroke_count, 20);
            let strokes = store.strokes_since(room, 0).unwrap();
            let expected = crate::render::render_document(
                &info(room),
                strokes.iter().map(|s| s.record()),
            )
            .unwrap();
            assert_eq!(image.document.as_slice(), expected.as_slice());
        }
    }
}
