// ===========================
// crates/backend-lib/tests/websocket.rs
// ===========================
//! End-to-end: real sockets against a served router backed by flat files.
use std::net::SocketAddr;
use std::time::Duration;

use backend_lib::{
    config::{Settings, StorageBackend},
    ws_router, AppState,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use whiteboard_common::{ServerMessage, Shape, ShapeKind};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(data_dir: &TempDir) -> (SocketAddr, AppState) {
    let settings = Settings {
        data_dir: data_dir.path().to_path_buf(),
        storage_backend: StorageBackend::FlatFile,
        ..Settings::default()
    };
    let state = AppState::from_settings(settings).unwrap();
    let app = ws_router::create_router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

async fn connect(addr: SocketAddr, path: &str) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}{path}")).await.unwrap();
    client
}

async fn send(client: &mut Client, frame: serde_json::Value) {
    client.send(Message::Text(frame.to_string().into())).await.unwrap();
}

async fn recv(client: &mut Client) -> ServerMessage {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn join(client: &mut Client, room_id: &str, username: &str) -> ServerMessage {
    send(
        client,
        json!({ "type": "join_room", "payload": { "roomId": room_id, "username": username } }),
    )
    .await;
    recv(client).await
}

/// Wait for the server side to notice closed sockets
async fn wait_for_rooms_to_close(state: &AppState) {
    for _ in 0..50 {
        if state.registry.room_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state.registry.room_count(), 0);
}

fn triangle(x: f64) -> Shape {
    Shape {
        kind: ShapeKind::Triangle,
        x,
        y: 4.0,
        width: 20.0,
        height: 15.0,
        color: "blue".to_string(),
        stroke_width: 1.5,
    }
}

#[tokio::test]
async fn test_two_clients_share_a_canvas() {
    let dir = TempDir::new().unwrap();
    let (addr, _state) = serve(&dir).await;
    let mut alice = connect(addr, "/ws").await;
    let mut bob = connect(addr, "/").await;

    assert_eq!(
        join(&mut alice, "sketch", "alice").await,
        ServerMessage::InitialShapes { shapes: vec![] }
    );
    join(&mut bob, "sketch", "bob").await;

    send(&mut bob, json!({ "type": "draw_shape", "payload": { "shape": triangle(1.0) } })).await;
    let expected = ServerMessage::UpdateShapes {
        shapes: vec![triangle(1.0)],
    };
    assert_eq!(recv(&mut alice).await, expected);
    assert_eq!(recv(&mut bob).await, expected);

    send(&mut alice, json!({ "type": "clear_canvas" })).await;
    let cleared = ServerMessage::UpdateShapes { shapes: vec![] };
    assert_eq!(recv(&mut alice).await, cleared);
    assert_eq!(recv(&mut bob).await, cleared);
}

#[tokio::test]
async fn test_errors_are_reported_on_the_socket() {
    let dir = TempDir::new().unwrap();
    let (addr, _state) = serve(&dir).await;
    let mut client = connect(addr, "/ws").await;

    send(&mut client, json!({ "type": "clear_canvas" })).await;
    assert_eq!(recv(&mut client).await, ServerMessage::error("You are not in a room."));

    client.send(Message::Text("{".into())).await.unwrap();
    assert_eq!(recv(&mut client).await, ServerMessage::error("Invalid message format."));

    // the connection survives and can still join
    assert_eq!(
        join(&mut client, "after-errors", "u").await,
        ServerMessage::InitialShapes { shapes: vec![] }
    );
}

#[tokio::test]
async fn test_canvas_survives_everyone_leaving() {
    let dir = TempDir::new().unwrap();
    let (addr, state) = serve(&dir).await;

    let mut first = connect(addr, "/ws").await;
    join(&mut first, "durable/room #1", "first").await;
    send(&mut first, json!({ "type": "draw_shape", "payload": { "shape": triangle(1.0) } })).await;
    recv(&mut first).await;
    send(&mut first, json!({ "type": "draw_shape", "payload": { "shape": triangle(2.0) } })).await;
    recv(&mut first).await;
    first.close(None).await.unwrap();

    wait_for_rooms_to_close(&state).await;
    state.registry.flush_all().await;

    let mut second = connect(addr, "/ws").await;
    assert_eq!(
        join(&mut second, "durable/room #1", "second").await,
        ServerMessage::InitialShapes {
            shapes: vec![triangle(1.0), triangle(2.0)]
        }
    );

    let stored = state.gateway.load_shapes("durable/room #1").await.unwrap();
    assert_eq!(stored, vec![triangle(1.0), triangle(2.0)]);
}

#[tokio::test]
async fn test_rest_and_socket_share_storage() {
    let dir = TempDir::new().unwrap();
    let (addr, state) = serve(&dir).await;
    state
        .gateway
        .replace_with("seeded", &[triangle(7.0)])
        .await
        .unwrap();

    let mut client = connect(addr, "/ws").await;
    assert_eq!(
        join(&mut client, "seeded", "u").await,
        ServerMessage::InitialShapes {
            shapes: vec![triangle(7.0)]
        }
    );
}

#[tokio::test]
async fn test_shutdown_closes_open_sessions_before_flush() {
    let dir = TempDir::new().unwrap();
    let (addr, state) = serve(&dir).await;

    let mut client = connect(addr, "/ws").await;
    join(&mut client, "closing", "late").await;
    send(&mut client, json!({ "type": "draw_shape", "payload": { "shape": triangle(3.0) } })).await;
    recv(&mut client).await;

    state.request_shutdown();
    wait_for_rooms_to_close(&state).await;
    state.registry.flush_all().await;

    assert_eq!(
        state.gateway.load_shapes("closing").await.unwrap(),
        vec![triangle(3.0)]
    );
    let after = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("socket should be dropped by the server");
    assert!(matches!(after, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
}
