//! JSON wire protocol spoken over WebSocket text frames.
//!
//! ```text
//! client                               server
//!   │  {"type":"add_stroke",…}   ──►     │
//!   │  ◄──  {"type":"stroke","stroke":{…}}
//!   │                                    │
//!   │  {"type":"watch",…}        ──►     │
//!   │  ◄──  {"type":"retry","millis":500}
//!   │  ◄──  {"type":"watcher_count","count":2}
//!   │  ◄──  {"type":"stroke","stroke":{…}}   (pre-encoded bytes, spliced)
//!   │  ◄──  {"type":"end","last_stroke_id":42}
//!   │                                    │
//!   │  {"type":"image",…}        ──►     │
//!   │  ◄──  binary frame (SVG or LZ4)    │
//! ```
//!
//! Failures are reported as `{"type":"error","kind":…,"message":…}`.

use serde::{Deserialize, Serialize};
use sketch_core::{
    NewStroke, RoomError, RoomId, RoomSnapshot, RoomSummary, Stroke, StrokeId, StrokeRecord,
};
use thiserror::Error;

use crate::storage::Token;

/// Client → server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    IssueToken,
    CreateRoom {
        token: String,
        name: String,
        canvas_width: u32,
        canvas_height: u32,
    },
    ListRooms,
    GetRoom {
        room_id: RoomId,
    },
    AddStroke {
        token: String,
        room_id: RoomId,
        stroke: NewStroke,
    },
    /// Open one watch window, resuming after `last_stroke_id`
    Watch {
        token: String,
        room_id: RoomId,
        #[serde(default)]
        last_stroke_id: Option<StrokeId>,
    },
    /// Answered with a binary frame
    Image {
        room_id: RoomId,
        #[serde(default)]
        compressed: bool,
    },
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Token { token: Token },
    Room { room: RoomSnapshot },
    Rooms { rooms: Vec<RoomSummary> },
    Stroke { stroke: StrokeRecord },
    Retry { millis: u64 },
    WatcherCount { count: usize },
    /// Closes a watch window; reconnect with this cursor
    End { last_stroke_id: StrokeId },
    Error { kind: String, message: String },
}

impl Request {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

impl Response {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

impl From<&RoomError> for Response {
    fn from(err: &RoomError) -> Self {
        Response::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// `{"type":"stroke","stroke":…}` around the stroke's cached encoding,
/// without serializing it again.
pub fn stroke_frame(stroke: &Stroke) -> Result<String, ProtocolError> {
    let encoded = std::str::from_utf8(stroke.encoded())
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))?;
    let mut frame = String::with_capacity(encoded.len() + 32);
    frame.push_str(r#"{"type":"stroke","stroke":"#);
    frame.push_str(encoded);
    frame.push('}');
    Ok(frame)
}

/// Protocol errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Unexpected frame: {0}")]
    UnexpectedFrame(String),
    /// The server answered with an error frame
    #[error("Rejected ({kind}): {message}")]
    Rejected { kind: String, message: String },
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Connection error: {0}")]
    Connection(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ProtocolError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ProtocolError::Connection(e.to_string())
    }
}
