//! WebSocket client for the sketch server.
//!
//! Provides:
//! - Request/response calls for every server operation
//! - Watch windows that resume from the last observed stroke id

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use sketch_core::{NewStroke, RoomId, RoomSnapshot, RoomSummary, StrokeId, StrokeRecord};

use crate::protocol::{ProtocolError, Request, Response};
use crate::storage::Token;

/// Events observed during one watch window.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Retry(u64),
    WatcherCount(usize),
    Stroke(StrokeRecord),
}

/// One connection to the server.
pub struct SketchClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl SketchClient {
    /// Connect to `url` (e.g. `ws://127.0.0.1:9090`).
    pub async fn connect(url: &str) -> Result<Self, ProtocolError> {
        let (ws, _) = tokio_tungstenite::connect_async(url).await?;
        log::debug!("Connected to {url}");
        Ok(Self { ws })
    }

    async fn send(&mut self, request: &Request) -> Result<(), ProtocolError> {
        self.ws.send(Message::text(request.encode()?)).await?;
        Ok(())
    }

    /// Next frame from the server, skipping control frames.
    async fn next_frame(&mut self) -> Result<Message, ProtocolError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Err(ProtocolError::ConnectionClosed),
                Some(Ok(msg)) => return Ok(msg),
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Next text frame as a response; error frames become `Rejected`.
    async fn next_response(&mut self) -> Result<Response, ProtocolError> {
        match self.next_frame().await? {
            Message::Text(text) => match Response::decode(text.as_str())? {
                Response::Error { kind, message } => Err(ProtocolError::Rejected { kind, message }),
                response => Ok(response),
            },
            other => Err(ProtocolError::UnexpectedFrame(format!("{other:?}"))),
        }
    }

    /// Send a request and wait for its single response.
    pub async fn request(&mut self, request: &Request) -> Result<Response, ProtocolError> {
        self.send(request).await?;
        self.next_response().await
    }

    pub async fn issue_token(&mut self) -> Result<Token, ProtocolError> {
        match self.request(&Request::IssueToken).await? {
            Response::Token { token } => Ok(token),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn create_room(
        &mut self,
        token: &str,
        name: &str,
        canvas_width: u32,
        canvas_height: u32,
    ) -> Result<RoomSnapshot, ProtocolError> {
        let request = Request::CreateRoom {
            token: token.to_string(),
            name: name.to_string(),
            canvas_width,
            canvas_height,
        };
        match self.request(&request).await? {
            Response::Room { room } => Ok(room),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn list_rooms(&mut self) -> Result<Vec<RoomSummary>, ProtocolError> {
        match self.request(&Request::ListRooms).await? {
            Response::Rooms { rooms } => Ok(rooms),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn get_room(&mut self, room_id: RoomId) -> Result<RoomSnapshot, ProtocolError> {
        match self.request(&Request::GetRoom { room_id }).await? {
            Response::Room { room } => Ok(room),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn add_stroke(
        &mut self,
        token: &str,
        room_id: RoomId,
        stroke: NewStroke,
    ) -> Result<StrokeRecord, ProtocolError> {
        let request = Request::AddStroke {
            token: token.to_string(),
            room_id,
            stroke,
        };
        match self.request(&request).await? {
            Response::Stroke { stroke } => Ok(stroke),
            other => Err(unexpected(&other)),
        }
    }

    /// Rendered SVG, or its LZ4 encoding when `compressed`.
    pub async fn image(&mut self, room_id: RoomId, compressed: bool) -> Result<Vec<u8>, ProtocolError> {
        self.send(&Request::Image { room_id, compressed }).await?;
        match self.next_frame().await? {
            Message::Binary(data) => Ok(data.into()),
            Message::Text(text) => match Response::decode(text.as_str())? {
                Response::Error { kind, message } => Err(ProtocolError::Rejected { kind, message }),
                other => Err(unexpected(&other)),
            },
            other => Err(ProtocolError::UnexpectedFrame(format!("{other:?}"))),
        }
    }

    /// Run one watch window; returns its events and the cursor to resume from.
    pub async fn watch_once(
        &mut self,
        token: &str,
        room_id: RoomId,
        last_stroke_id: Option<StrokeId>,
    ) -> Result<(Vec<WatchEvent>, StrokeId), ProtocolError> {
        let request = Request::Watch {
            token: token.to_string(),
            room_id,
            last_stroke_id,
        };
        self.send(&request).await?;

        let mut events = Vec::new();
        loop {
            match self.next_response().await? {
                Response::Retry { millis } => events.push(WatchEvent::Retry(millis)),
                Response::WatcherCount { count } => events.push(WatchEvent::WatcherCount(count)),
                Response::Stroke { stroke } => events.push(WatchEvent::Stroke(stroke)),
                Response::End { last_stroke_id } => return Ok((events, last_stroke_id)),
                other => return Err(unexpected(&other)),
            }
        }
    }
}

fn unexpected(response: &Response) -> ProtocolError {
    ProtocolError::UnexpectedFrame(format!("{response:?}"))
}

/// Follows one room across watch windows, resuming from the last stroke
/// it has seen.
pub struct WatchClient {
    client: SketchClient,
    token: String,
    room_id: RoomId,
    cursor: Option<StrokeId>,
}

impl WatchClient {
    pub fn new(client: SketchClient, token: impl Into<String>, room_id: RoomId) -> Self {
        Self {
            client,
            token: token.into(),
            room_id,
            cursor: None,
        }
    }

    /// Start after `cursor` instead of from the beginning.
    pub fn resume_from(mut self, cursor: StrokeId) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn cursor(&self) -> Option<StrokeId> {
        self.cursor
    }

    /// Run the next window and advance the cursor.
    pub async fn next_window(&mut self) -> Result<Vec<WatchEvent>, ProtocolError> {
        let (events, last) = self
            .client
            .watch_once(&self.token, self.room_id, self.cursor)
            .await?;
        self.cursor = Some(last);
        log::trace!(
            "Watch window on room {} ended at stroke {last} ({} events)",
            self.room_id,
            events.len()
        );
        Ok(events)
    }

    /// Keep opening windows until `count` strokes have arrived or
    /// `max_windows` windows have passed.
    pub async fn collect_strokes(
        &mut self,
        count: usize,
        max_windows: usize,
    ) -> Result<Vec<StrokeRecord>, ProtocolError> {
        let mut strokes = Vec::new();
        for _ in 0..max_windows {
            for event in self.next_window().await? {
                if let WatchEvent::Stroke(stroke) = event {
                    strokes.push(stroke);
                }
            }
            if strokes.len() >= count {
                break;
            }
        }
        Ok(strokes)
    }

    pub fn into_inner(self) -> SketchClient {
        self.client
    }
}
