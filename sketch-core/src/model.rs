//! Room, stroke and point data types.
//!
//! A [`StrokeRecord`] is the plain persisted row (with its points). A
//! [`Stroke`] wraps a record together with its JSON encoding, produced
//! exactly once so that every streaming read can reuse the same bytes.

use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Result, RoomError};

pub type RoomId = u64;
pub type StrokeId = u64;
pub type PointId = u64;
/// Identity of an issued client token; doubles as owner and watcher identity.
pub type TokenId = u64;

// ───────────────────────────────────────────────────────────────────
// Persisted rows
// ───────────────────────────────────────────────────────────────────

/// One vertex of a stroke's polyline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub id: PointId,
    pub stroke_id: StrokeId,
    pub x: f64,
    pub y: f64,
}

/// A committed stroke as stored by the durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeRecord {
    pub id: StrokeId,
    pub room_id: RoomId,
    pub width: u32,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    /// Opacity in `[0, 1]`.
    pub alpha: f64,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
    pub points: Vec<Point>,
}

/// Immutable room metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: RoomId,
    pub name: String,
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
}

/// Everything the durable store knows about one room, as loaded at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedRoom {
    pub info: RoomInfo,
    pub owner_id: TokenId,
    pub strokes: Vec<StrokeRecord>,
}

// ───────────────────────────────────────────────────────────────────
// Client submissions
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NewPoint {
    pub x: f64,
    pub y: f64,
}

/// A stroke as submitted by a client, before it has an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStroke {
    pub width: u32,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: f64,
    pub points: Vec<NewPoint>,
}

impl NewStroke {
    /// Reject strokes that could never be drawn.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 {
            return Err(RoomError::Validation("stroke width must be positive".into()));
        }
        if self.points.is_empty() {
            return Err(RoomError::Validation("stroke has no points".into()));
        }
        if !self.alpha.is_finite() || !(0.0..=1.0).contains(&self.alpha) {
            return Err(RoomError::Validation(format!(
                "alpha {} outside [0, 1]",
                self.alpha
            )));
        }
        if self.points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(RoomError::Validation("point coordinates must be finite".into()));
        }
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────────
// In-memory stroke
// ───────────────────────────────────────────────────────────────────

/// A committed stroke plus its pre-serialized JSON form.
///
/// Serializing a `Stroke` yields the same document as its cached bytes.
#[derive(Debug, Clone)]
pub struct Stroke {
    record: StrokeRecord,
    encoded: Arc<[u8]>,
}

impl Stroke {
    /// Encode the record once. Fails only if the record cannot be drawn
    /// (no points) or serialization breaks.
    pub fn new(record: StrokeRecord) -> Result<Self> {
        if record.points.is_empty() {
            return Err(RoomError::Internal(format!(
                "stroke {} has no points",
                record.id
            )));
        }
        let encoded = serde_json::to_vec(&record)
            .map_err(|e| RoomError::Internal(format!("encode stroke {}: {e}", record.id)))?;
        Ok(Self {
            record,
            encoded: encoded.into(),
        })
    }

    pub fn record(&self) -> &StrokeRecord {
        &self.record
    }

    /// JSON bytes of the record, shared between all readers.
    pub fn encoded(&self) -> &Arc<[u8]> {
        &self.encoded
    }
}

impl Deref for Stroke {
    type Target = StrokeRecord;

    fn deref(&self) -> &StrokeRecord {
        &self.record
    }
}

impl Serialize for Stroke {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.record.serialize(serializer)
    }
}

// ───────────────────────────────────────────────────────────────────
// Read views
// ───────────────────────────────────────────────────────────────────

/// Detached copy of a room, unaffected by later appends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    #[serde(flatten)]
    pub info: RoomInfo,
    pub strokes: Vec<StrokeRecord>,
    pub stroke_count: usize,
    pub watcher_count: usize,
}

/// Listing entry: room metadata without stroke or point detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    #[serde(flatten)]
    pub info: RoomInfo,
    pub stroke_count: usize,
    pub watcher_count: usize,
    pub last_stroke_id: Option<StrokeId>,
}
