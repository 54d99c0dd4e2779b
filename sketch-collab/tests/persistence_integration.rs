//! Integration tests for durable storage across server restarts.
//!
//! Rooms and strokes written through one server instance must be loaded
//! into the cache of the next instance opened on the same directory.

use std::sync::Arc;

use sketch_collab::client::{SketchClient, WatchClient};
use sketch_collab::config::{ServerConfig, StreamConfig};
use sketch_collab::server::SketchServer;
use sketch_collab::storage::{DurableStore, RocksStore, StoreConfig};
use sketch_core::{NewPoint, NewStroke};
use tokio::time::Duration;

async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn config_for(dir: &std::path::Path, port: u16) -> ServerConfig {
    ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        storage_path: Some(dir.to_path_buf()),
        stream: StreamConfig {
            poll_interval: Duration::from_millis(10),
            iterations: 2,
            retry_hint_ms: 500,
        },
        ..ServerConfig::default()
    }
}

fn stroke(offset: f64) -> NewStroke {
    NewStroke {
        width: 3,
        red: 200,
        green: 100,
        blue: 0,
        alpha: 0.75,
        points: vec![
            NewPoint { x: offset, y: offset },
            NewPoint { x: offset + 10.0, y: offset + 5.0 },
            NewPoint { x: offset + 20.0, y: offset },
        ],
    }
}

#[test]
fn test_rooms_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    let (room_id, token, first_ids, image_before) = {
        let server = SketchServer::new(config_for(dir.path(), 0)).unwrap();
        let service = server.service();
        let token = service.issue_token().unwrap();
        let room = service.create_room(&token.token, "persisted", 640, 480).unwrap();
        let a = service.add_stroke(&token.token, room.info.id, &stroke(0.0)).unwrap();
        let b = service.add_stroke(&token.token, room.info.id, &stroke(50.0)).unwrap();
        let image = service.image(room.info.id).unwrap();
        (room.info.id, token, vec![a.id, b.id], image.document.as_ref().clone())
    };

    let server = SketchServer::new(config_for(dir.path(), 0)).unwrap();
    let service = server.service();

    let snapshot = service.get_room(room_id).unwrap();
    assert_eq!(snapshot.info.name, "persisted");
    assert_eq!(snapshot.info.canvas_width, 640);
    assert_eq!(snapshot.stroke_count, 2);
    let ids: Vec<_> = snapshot.strokes.iter().map(|s| s.id).collect();
    assert_eq!(ids, first_ids);
    assert_eq!(snapshot.strokes[0].points.len(), 3);
    assert_eq!(snapshot.strokes[1].points[1].x, 60.0);
    assert_eq!(snapshot.strokes[0].alpha, 0.75);

    // Rebuilt from the loaded strokes, the image is byte-identical
    let image_after = service.image(room_id).unwrap();
    assert_eq!(image_after.document.as_ref(), &image_before);

    // Tokens survive too, and ids keep increasing
    let c = service.add_stroke(&token.token, room_id, &stroke(100.0)).unwrap();
    assert!(c.id > first_ids[1]);
    let point_ids: Vec<_> = c.points.iter().map(|p| p.id).collect();
    let last_old_point = snapshot.strokes[1].points.last().unwrap().id;
    assert!(point_ids.iter().all(|&id| id > last_old_point));
}

#[test]
fn test_owner_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let (room_id, guest) = {
        let server = SketchServer::new(config_for(dir.path(), 0)).unwrap();
        let service = server.service();
        let owner = service.issue_token().unwrap();
        let guest = service.issue_token().unwrap();
        let room = service.create_room(&owner.token, "owned", 10, 10).unwrap();
        (room.info.id, guest)
    };

    let server = SketchServer::new(config_for(dir.path(), 0)).unwrap();
    let err = server
        .service()
        .add_stroke(&guest.token, room_id, &stroke(1.0))
        .unwrap_err();
    assert_eq!(err.kind(), "unauthorized");
}

#[test]
fn test_store_reopen_directly() {
    let dir = tempfile::tempdir().unwrap();
    let room_id = {
        let store = RocksStore::open(StoreConfig::for_testing(dir.path())).unwrap();
        let token = store.issue_token().unwrap();
        let room = store.create_room("direct", 32, 32, token.id).unwrap();
        store.create_stroke(room.id, &stroke(2.0)).unwrap();
        room.id
    };

    let store: Arc<dyn DurableStore> =
        Arc::new(RocksStore::open(StoreConfig::for_testing(dir.path())).unwrap());
    let server = SketchServer::with_store(ServerConfig::default(), store).unwrap();
    assert_eq!(server.service().rooms().stroke_count(room_id), 1);
}

#[tokio::test]
async fn test_restarted_server_serves_loaded_strokes() {
    let dir = tempfile::tempdir().unwrap();

    let (room_id, token) = {
        let server = SketchServer::new(config_for(dir.path(), 0)).unwrap();
        let service = server.service();
        let token = service.issue_token().unwrap();
        let room = service.create_room(&token.token, "served", 200, 200).unwrap();
        for i in 0..3 {
            service.add_stroke(&token.token, room.info.id, &stroke(i as f64)).unwrap();
        }
        (room.info.id, token)
    };

    let port = free_port().await;
    let server = SketchServer::new(config_for(dir.path(), port)).unwrap();
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let url = format!("ws://127.0.0.1:{port}");
    let mut client = SketchClient::connect(&url).await.unwrap();
    let listed = client.list_rooms().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].stroke_count, 3);

    let mut watcher = WatchClient::new(client, token.token.clone(), room_id);
    let strokes = watcher.collect_strokes(3, 5).await.unwrap();
    assert_eq!(strokes.len(), 3);
    assert_eq!(watcher.cursor(), Some(strokes[2].id));
}
