//! RocksDB-backed durable store.
//!
//! Column families:
//! - `rooms`       - `room_id` → room row (bincode)
//! - `owners`      - `room_id` → owning token id
//! - `strokes`     - `room_id‖stroke_id` → stroke attributes (bincode), prefix-scanned per room
//! - `points`      - `stroke_id‖point_id` → coordinates (bincode)
//! - `tokens`      - `token_id` → token row (bincode)
//! - `token_index` - token secret → token id
//!
//! All integer keys are big-endian so that iteration order is id order.
//! A stroke and its points are committed in one `WriteBatch`, so a stroke
//! is never visible without its points.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sketch_core::{
    NewStroke, PersistedRoom, Point, PointId, RoomId, RoomInfo, StrokeId, StrokeRecord, TokenId,
};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use super::{generate_token, now_secs, DurableStore, StoreError, Token};

/// Column family names.
const CF_ROOMS: &str = "rooms";
const CF_OWNERS: &str = "owners";
const CF_STROKES: &str = "strokes";
const CF_POINTS: &str = "points";
const CF_TOKENS: &str = "tokens";
const CF_TOKEN_INDEX: &str = "token_index";

/// All column family names for initialization.
const COLUMN_FAMILIES: &[&str] = &[
    CF_ROOMS,
    CF_OWNERS,
    CF_STROKES,
    CF_POINTS,
    CF_TOKENS,
    CF_TOKEN_INDEX,
];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 256MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 64MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("sketch_data"),
            block_cache_size: 256 * 1024 * 1024, // 256MB
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 64 * 1024 * 1024, // 64MB
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, temp directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024, // 8MB
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024, // 4MB
        }
    }
}

/// Stroke attributes; identity lives in the key, points in their own family.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StrokeRow {
    width: u32,
    red: u8,
    green: u8,
    blue: u8,
    alpha: f64,
    created_at: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct PointRow {
    x: f64,
    y: f64,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
    Ok(value)
}

#[derive(Debug)]
struct StrokeIds {
    stroke: StrokeId,
    point: PointId,
}

/// RocksDB-backed store.
pub struct RocksStore {
    /// RocksDB instance (column families are fixed at open, so single-threaded mode suffices)
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    next_room: AtomicU64,
    /// Stroke id and its point block are taken together, so a higher
    /// stroke id always owns higher point ids.
    next_stroke: Mutex<StrokeIds>,
    next_token: AtomicU64,
}

impl RocksStore {
    /// Open the store at the configured path.
    ///
    /// Creates the database and column families if they don't exist and
    /// recovers every identity counter from the last stored key.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.set_max_total_wal_size(128 * 1024 * 1024); // 128MB WAL limit
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        // Points are keyed stroke‖point and ids are allocated in pairs
        // (see `allocate_stroke`), so the last key recovers both counters.
        let next_room = Self::recover_sequence(&db, CF_ROOMS, 0);
        let next_stroke = Self::recover_sequence(&db, CF_POINTS, 0);
        let next_point = Self::recover_sequence(&db, CF_POINTS, 8);
        let next_token = Self::recover_sequence(&db, CF_TOKENS, 0);

        log::info!(
            "Opened store at {} (next room {next_room}, stroke {next_stroke}, token {next_token})",
            config.path.display()
        );

        Ok(Self {
            db,
            config,
            next_room: AtomicU64::new(next_room),
            next_stroke: Mutex::new(StrokeIds {
                stroke: next_stroke,
                point: next_point,
            }),
            next_token: AtomicU64::new(next_token),
        })
    }

    /// Build column-family-specific options.
    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024); // 16KB blocks
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_STROKES | CF_POINTS => {
                // Many small writes, prefix-scanned by the leading id
                opts.set_max_write_buffer_number(4);
                opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(8));
            }
            CF_ROOMS | CF_OWNERS | CF_TOKENS | CF_TOKEN_INDEX => {
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            _ => {}
        }

        opts
    }

    /// Next free id: one past the u64 at `offset` in the family's last key,
    /// or 1 for an empty family.
    fn recover_sequence(db: &DBWithThreadMode<SingleThreaded>, cf_name: &str, offset: usize) -> u64 {
        let cf = match db.cf_handle(cf_name) {
            Some(cf) => cf,
            None => return 1,
        };

        let mut iter = db.iterator_cf(cf, IteratorMode::End);
        match iter.next() {
            Some(Ok((key, _))) => read_u64(&key, offset).map_or(1, |last| last + 1),
            _ => 1,
        }
    }

    /// Reserve a stroke id and a contiguous block of `points` point ids.
    fn allocate_stroke(&self, points: u64) -> (StrokeId, PointId) {
        let mut next = self.next_stroke.lock().unwrap_or_else(PoisonError::into_inner);
        let ids = (next.stroke, next.point);
        next.stroke += 1;
        next.point += points;
        ids
    }

    fn write_opts(&self) -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        write_opts
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }

    fn room_exists(&self, room_id: RoomId) -> Result<bool, StoreError> {
        let cf = self.cf(CF_ROOMS)?;
        Ok(self.db.get_cf(cf, room_id.to_be_bytes())?.is_some())
    }

    /// Every point, grouped by stroke, in point id order.
    fn load_points(&self) -> Result<HashMap<StrokeId, Vec<Point>>, StoreError> {
        let cf = self.cf(CF_POINTS)?;
        let mut points: HashMap<StrokeId, Vec<Point>> = HashMap::new();

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let (stroke_id, point_id) = split_pair(&key)?;
            let row: PointRow = decode(&value)?;
            points.entry(stroke_id).or_default().push(Point {
                id: point_id,
                stroke_id,
                x: row.x,
                y: row.y,
            });
        }

        Ok(points)
    }
}

impl DurableStore for RocksStore {
    fn load_all(&self) -> Result<Vec<PersistedRoom>, StoreError> {
        let cf_rooms = self.cf(CF_ROOMS)?;
        let cf_owners = self.cf(CF_OWNERS)?;
        let cf_strokes = self.cf(CF_STROKES)?;

        let mut rooms: BTreeMap<RoomId, PersistedRoom> = BTreeMap::new();
        for item in self.db.iterator_cf(cf_rooms, IteratorMode::Start) {
            let (_, value) = item?;
            let info: RoomInfo = decode(&value)?;
            let owner_id = match self.db.get_cf(cf_owners, info.id.to_be_bytes())? {
                Some(bytes) => read_u64(&bytes, 0).ok_or_else(|| {
                    StoreError::DeserializationError(format!("bad owner row for room {}", info.id))
                })?,
                None => {
                    return Err(StoreError::DeserializationError(format!(
                        "room {} has no owner",
                        info.id
                    )))
                }
            };
            rooms.insert(info.id, PersistedRoom { info, owner_id, strokes: Vec::new() });
        }

        let mut points = self.load_points()?;
        let mut stroke_total = 0usize;

        for item in self.db.iterator_cf(cf_strokes, IteratorMode::Start) {
            let (key, value) = item?;
            let (room_id, stroke_id) = split_pair(&key)?;
            let row: StrokeRow = decode(&value)?;

            let Some(room) = rooms.get_mut(&room_id) else {
                log::warn!("Skipping stroke {stroke_id} of unknown room {room_id}");
                continue;
            };
            let stroke_points = points.remove(&stroke_id).unwrap_or_default();
            if stroke_points.is_empty() {
                log::warn!("Skipping stroke {stroke_id} in room {room_id}: no points");
                continue;
            }

            room.strokes.push(StrokeRecord {
                id: stroke_id,
                room_id,
                width: row.width,
                red: row.red,
                green: row.green,
                blue: row.blue,
                alpha: row.alpha,
                created_at: row.created_at,
                points: stroke_points,
            });
            stroke_total += 1;
        }

        log::info!("Loaded {} rooms and {stroke_total} strokes from storage", rooms.len());
        Ok(rooms.into_values().collect())
    }

    fn create_room(
        &self,
        name: &str,
        canvas_width: u32,
        canvas_height: u32,
        owner_id: TokenId,
    ) -> Result<RoomInfo, StoreError> {
        let cf_rooms = self.cf(CF_ROOMS)?;
        let cf_owners = self.cf(CF_OWNERS)?;

        let info = RoomInfo {
            id: self.next_room.fetch_add(1, Ordering::SeqCst),
            name: name.to_string(),
            canvas_width,
            canvas_height,
            created_at: now_secs(),
        };

        let key = info.id.to_be_bytes();
        let mut batch = WriteBatch::default();
        batch.put_cf(cf_rooms, key, encode(&info)?);
        batch.put_cf(cf_owners, key, owner_id.to_be_bytes());
        self.db.write_opt(batch, &self.write_opts())?;

        Ok(info)
    }

    fn create_stroke(
        &self,
        room_id: RoomId,
        stroke: &NewStroke,
    ) -> Result<StrokeRecord, StoreError> {
        if !self.room_exists(room_id)? {
            return Err(StoreError::NotFound(format!("Room {room_id}")));
        }
        let cf_strokes = self.cf(CF_STROKES)?;
        let cf_points = self.cf(CF_POINTS)?;

        let (id, first_point) = self.allocate_stroke(stroke.points.len() as u64);

        let row = StrokeRow {
            width: stroke.width,
            red: stroke.red,
            green: stroke.green,
            blue: stroke.blue,
            alpha: stroke.alpha,
            created_at: now_secs(),
        };

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_strokes, pair_key(room_id, id), encode(&row)?);

        let mut points = Vec::with_capacity(stroke.points.len());
        for (offset, p) in stroke.points.iter().enumerate() {
            let point = Point {
                id: first_point + offset as u64,
                stroke_id: id,
                x: p.x,
                y: p.y,
            };
            batch.put_cf(cf_points, pair_key(id, point.id), encode(&PointRow { x: p.x, y: p.y })?);
            points.push(point);
        }

        self.db.write_opt(batch, &self.write_opts())?;

        Ok(StrokeRecord {
            id,
            room_id,
            width: row.width,
            red: row.red,
            green: row.green,
            blue: row.blue,
            alpha: row.alpha,
            created_at: row.created_at,
            points,
        })
    }

    fn issue_token(&self) -> Result<Token, StoreError> {
        let cf_tokens = self.cf(CF_TOKENS)?;
        let cf_index = self.cf(CF_TOKEN_INDEX)?;

        let token = Token {
            id: self.next_token.fetch_add(1, Ordering::SeqCst),
            token: generate_token(),
            created_at: now_secs(),
        };

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_tokens, token.id.to_be_bytes(), encode(&token)?);
        batch.put_cf(cf_index, token.token.as_bytes(), token.id.to_be_bytes());
        self.db.write_opt(batch, &self.write_opts())?;

        Ok(token)
    }

    fn find_token(&self, token: &str) -> Result<Option<Token>, StoreError> {
        let cf_index = self.cf(CF_TOKEN_INDEX)?;
        let cf_tokens = self.cf(CF_TOKENS)?;

        let Some(id_bytes) = self.db.get_cf(cf_index, token.as_bytes())? else {
            return Ok(None);
        };
        match self.db.get_cf(cf_tokens, &id_bytes)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// Two ids as a 16-byte big-endian key.
fn pair_key(major: u64, minor: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&major.to_be_bytes());
    key[8..].copy_from_slice(&minor.to_be_bytes());
    key
}

fn split_pair(key: &[u8]) -> Result<(u64, u64), StoreError> {
    match (read_u64(key, 0), read_u64(key, 8)) {
        (Some(major), Some(minor)) if key.len() == 16 => Ok((major, minor)),
        _ => Err(StoreError::DeserializationError(format!(
            "invalid {}-byte key",
            key.len()
        ))),
    }
}

fn read_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    let slice = bytes.get(offset..offset + 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(slice);
    Some(u64::from_be_bytes(buf))
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
