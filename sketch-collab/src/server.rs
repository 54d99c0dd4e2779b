//! WebSocket front end for the room service.
//!
//! Architecture:
//! ```text
//! Client A ──┐                      ┌── DurableStore (RocksDB / memory)
//!            ├── task per socket ── RoomService
//! Client B ──┘        │             └── RoomStore (cache)
//!                     │
//!                     └── watch ─► stream::watch_room ─► mpsc ─► socket
//! ```
//!
//! Requests on one socket are handled in order. A watch occupies its socket
//! until the window ends; requests sent meanwhile are answered with a
//! `validation` error. The client then sends the next watch with the
//! cursor from the `end` frame.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use sketch_core::RoomError;

use crate::config::ServerConfig;
use crate::protocol::{stroke_frame, Request, Response};
use crate::service::RoomService;
use crate::storage::{DurableStore, MemoryStore, RocksStore, StoreConfig};
use crate::stream::StreamEvent;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Reason given for requests sent while a watch window is open.
pub const WATCH_BUSY: &str = "busy: watch in progress";

/// What a single request is answered with.
#[derive(Debug)]
enum Reply {
    Text(String),
    Binary(Vec<u8>),
}

/// The drawing server.
pub struct SketchServer {
    config: ServerConfig,
    service: Arc<RoomService>,
}

impl SketchServer {
    /// Open the configured store, load every room and get ready to serve.
    pub fn new(config: ServerConfig) -> Result<Self, RoomError> {
        let store: Arc<dyn DurableStore> = match &config.storage_path {
            Some(path) => {
                let store_config = StoreConfig {
                    path: path.clone(),
                    ..StoreConfig::default()
                };
                Arc::new(RocksStore::open(store_config)?)
            }
            None => {
                log::info!("No storage path configured, rooms live in memory only");
                Arc::new(MemoryStore::new())
            }
        };
        Self::with_store(config, store)
    }

    /// Serve on top of an already opened store.
    pub fn with_store(config: ServerConfig, store: Arc<dyn DurableStore>) -> Result<Self, RoomError> {
        let service = RoomService::open(store, config.clone())?;
        Ok(Self {
            config,
            service: Arc::new(service),
        })
    }

    pub fn service(&self) -> &Arc<RoomService> {
        &self.service
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!(
            "Sketch server listening on {} ({} rooms cached)",
            self.config.bind_addr,
            self.service.rooms().len()
        );
        self.serve(listener).await
    }

    /// Accept connections from `listener`, one task per connection.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let service = self.service.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, service).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    service: Arc<RoomService>,
) -> Result<(), BoxError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    log::debug!("WebSocket connection established from {addr}");

    while let Some(msg) = ws_receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(data)) => {
                ws_sender.send(Message::Pong(data)).await?;
                continue;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {
                log::warn!("Ignoring non-text frame from {addr}");
                continue;
            }
            Err(e) => {
                log::error!("WebSocket error from {addr}: {e}");
                break;
            }
        };

        let request = match Request::decode(text.as_str()) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("Failed to decode request from {addr}: {e}");
                let error = RoomError::Validation(e.to_string());
                ws_sender.send(Message::text(Response::from(&error).encode()?)).await?;
                continue;
            }
        };

        if let Request::Watch { token, room_id, last_stroke_id } = request {
            let (tx, mut rx) = mpsc::channel(64);
            let watcher = {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .watch(&token, room_id, last_stroke_id.unwrap_or(0), tx)
                        .await
                })
            };

            loop {
                tokio::select! {
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        ws_sender.send(Message::text(event_frame(&event)?)).await?;
                    }
                    incoming = ws_receiver.next() => match incoming {
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                            log::debug!("Client {addr} left during watch of room {room_id}");
                            return Ok(());
                        }
                        Some(Ok(Message::Ping(data))) => ws_sender.send(Message::Pong(data)).await?,
                        Some(Ok(Message::Text(_))) => {
                            log::warn!("Rejecting request from {addr} during watch of room {room_id}");
                            let busy = Response::from(&RoomError::Validation(WATCH_BUSY.into()));
                            ws_sender.send(Message::text(busy.encode()?)).await?;
                        }
                        Some(Ok(_)) => log::warn!("Ignoring frame from {addr} during watch"),
                    }
                }
            }

            let closing = match watcher.await {
                Ok(Ok(cursor)) => Response::End { last_stroke_id: cursor },
                Ok(Err(e)) => {
                    log::warn!("Watch of room {room_id} from {addr} rejected: {e}");
                    Response::from(&e)
                }
                Err(e) => {
                    log::error!("Watch task for room {room_id} failed: {e}");
                    Response::from(&RoomError::Internal(e.to_string()))
                }
            };
            ws_sender.send(Message::text(closing.encode()?)).await?;
            continue;
        }

        match respond(&service, request) {
            Reply::Text(text) => ws_sender.send(Message::text(text)).await?,
            Reply::Binary(bytes) => ws_sender.send(Message::binary(bytes)).await?,
        }
    }

    log::debug!("Connection closed from {addr}");
    Ok(())
}

fn event_frame(event: &StreamEvent) -> Result<String, BoxError> {
    let frame = match event {
        StreamEvent::Retry { millis } => Response::Retry { millis: *millis }.encode()?,
        StreamEvent::WatcherCount { count } => Response::WatcherCount { count: *count }.encode()?,
        StreamEvent::Stroke(stroke) => stroke_frame(stroke)?,
    };
    Ok(frame)
}

/// Answer every request except `watch`.
fn respond(service: &RoomService, request: Request) -> Reply {
    let result = match request {
        Request::IssueToken => service
            .issue_token()
            .and_then(|token| encode(&Response::Token { token })),
        Request::CreateRoom { token, name, canvas_width, canvas_height } => service
            .create_room(&token, &name, canvas_width, canvas_height)
            .and_then(|room| encode(&Response::Room { room })),
        Request::ListRooms => encode(&Response::Rooms { rooms: service.list_rooms() }),
        Request::GetRoom { room_id } => service
            .get_room(room_id)
            .and_then(|room| encode(&Response::Room { room })),
        Request::AddStroke { token, room_id, stroke } => service
            .add_stroke(&token, room_id, &stroke)
            .and_then(|stroke| {
                stroke_frame(&stroke).map_err(|e| RoomError::Internal(e.to_string()))
            }),
        Request::Image { room_id, compressed } => {
            return match service.image(room_id) {
                Ok(image) if compressed => Reply::Binary(image.compressed.as_ref().clone()),
                Ok(image) => Reply::Binary(image.document.as_ref().clone()),
                Err(e) => error_reply(&e),
            };
        }
        Request::Watch { .. } => Err(RoomError::Internal("watch handled by the connection".into())),
    };

    match result {
        Ok(text) => Reply::Text(text),
        Err(e) => error_reply(&e),
    }
}

fn encode(response: &Response) -> Result<String, RoomError> {
    response.encode().map_err(|e| RoomError::Internal(e.to_string()))
}

fn error_reply(err: &RoomError) -> Reply {
    match err {
        RoomError::Internal(_) | RoomError::Unavailable(_) => log::error!("Request failed: {err}"),
        _ => log::warn!("Request rejected: {err}"),
    }
    let text = Response::from(err)
        .encode()
        .unwrap_or_else(|_| r#"{"type":"error","kind":"internal","message":""}"#.to_string());
    Reply::Text(text)
}
