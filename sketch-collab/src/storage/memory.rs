//! In-process durable store, used when no storage path is configured and
//! in tests. Same contract as [`RocksStore`](super::RocksStore); contents
//! are lost with the process.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use sketch_core::{NewStroke, PersistedRoom, Point, RoomId, RoomInfo, StrokeRecord, TokenId};

use super::{generate_token, now_secs, DurableStore, StoreError, Token};

#[derive(Debug, Default)]
struct Tables {
    rooms: BTreeMap<RoomId, PersistedRoom>,
    tokens: HashMap<String, Token>,
    last_room: u64,
    last_stroke: u64,
    last_point: u64,
    last_token: u64,
}

#[derive(Debug)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    available: AtomicBool,
    read_only: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            available: AtomicBool::new(true),
            read_only: AtomicBool::new(false),
        }
    }

    /// Take the store offline (every call fails with `Unavailable`) or
    /// bring it back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Reject writes with `Unavailable` while reads keep working.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(self.tables.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn tables_mut(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is read-only".into()));
        }
        self.tables()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DurableStore for MemoryStore {
    fn load_all(&self) -> Result<Vec<PersistedRoom>, StoreError> {
        Ok(self.tables()?.rooms.values().cloned().collect())
    }

    fn create_room(
        &self,
        name: &str,
        canvas_width: u32,
        canvas_height: u32,
        owner_id: TokenId,
    ) -> Result<RoomInfo, StoreError> {
        let mut tables = self.tables_mut()?;
        tables.last_room += 1;
        let info = RoomInfo {
            id: tables.last_room,
            name: name.to_string(),
            canvas_width,
            canvas_height,
            created_at: now_secs(),
        };
        tables.rooms.insert(
            info.id,
            PersistedRoom { info: info.clone(), owner_id, strokes: Vec::new() },
        );
        Ok(info)
    }

    fn create_stroke(
        &self,
        room_id: RoomId,
        stroke: &NewStroke,
    ) -> Result<StrokeRecord, StoreError> {
        let mut tables = self.tables_mut()?;
        if !tables.rooms.contains_key(&room_id) {
            return Err(StoreError::NotFound(format!("Room {room_id}")));
        }

        tables.last_stroke += 1;
        let id = tables.last_stroke;
        let first_point = tables.last_point + 1;
        tables.last_point += stroke.points.len() as u64;

        let record = StrokeRecord {
            id,
            room_id,
            width: stroke.width,
            red: stroke.red,
            green: stroke.green,
            blue: stroke.blue,
            alpha: stroke.alpha,
            created_at: now_secs(),
            points: stroke
                .points
                .iter()
                .enumerate()
                .map(|(offset, p)| Point {
                    id: first_point + offset as u64,
                    stroke_id: id,
                    x: p.x,
                    y: p.y,
                })
                .collect(),
        };

        if let Some(room) = tables.rooms.get_mut(&room_id) {
            room.strokes.push(record.clone());
        }
        Ok(record)
    }

    fn issue_token(&self) -> Result<Token, StoreError> {
        let mut tables = self.tables_mut()?;
        tables.last_token += 1;
        let token = Token {
            id: tables.last_token,
            token: generate_token(),
            created_at: now_secs(),
        };
        tables.tokens.insert(token.token.clone(), token.clone());
        Ok(token)
    }

    fn find_token(&self, token: &str) -> Result<Option<Token>, StoreError> {
        Ok(self.tables()?.tokens.get(token).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sketch_core::NewPoint;

    fn new_stroke() -> NewStroke {
        NewStroke {
            width: 1,
            red: 0,
            green: 0,
            blue: 0,
            alpha: 1.0,
            points: vec![NewPoint { x: 1.0, y: 1.0 }, NewPoint { x: 2.0, y: 2.0 }],
        }
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        let token = store.issue_token().unwrap();
        let room = store.create_room("demo", 800, 600, token.id).unwrap();
        let stroke = store.create_stroke(room.id, &new_stroke()).unwrap();
        assert_eq!(stroke.points.iter().map(|p| p.id).collect::<Vec<_>>(), vec![1, 2]);

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].owner_id, token.id);
        assert_eq!(loaded[0].strokes, vec![stroke]);
        assert_eq!(store.find_token(&token.token).unwrap(), Some(token));
    }

    #[test]
    fn test_memory_store_ids_increase() {
        let store = MemoryStore::new();
        let room = store.create_room("demo", 1, 1, 1).unwrap();
        let a = store.create_stroke(room.id, &new_stroke()).unwrap();
        let b = store.create_stroke(room.id, &new_stroke()).unwrap();
        assert!(b.id > a.id);
        assert!(b.points[0].id > a.points[1].id);
    }

    #[test]
    fn test_memory_store_offline() {
        let store = MemoryStore::new();
        let room = store.create_room("demo", 1, 1, 1).unwrap();
        store.set_available(false);
        assert!(matches!(
            store.create_stroke(room.id, &new_stroke()),
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.load_all().is_err());

        store.set_available(true);
        assert!(store.load_all().unwrap()[0].strokes.is_empty());
    }

    #[test]
    fn test_memory_store_read_only() {
        let store = MemoryStore::new();
        let token = store.issue_token().unwrap();
        store.set_read_only(true);
        assert!(matches!(store.create_room("demo", 1, 1, 1), Err(StoreError::Unavailable(_))));
        assert!(matches!(store.issue_token(), Err(StoreError::Unavailable(_))));
        assert_eq!(store.find_token(&token.token).unwrap(), Some(token));
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_memory_store_missing_room() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.create_stroke(3, &new_stroke()),
            Err(StoreError::NotFound(_))
        ));
    }
}
