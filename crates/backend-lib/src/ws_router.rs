// ============================
// whiteboard-backend-lib/src/ws_router.rs
// ============================
//! Router and WebSocket connection handling.
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderValue, Method},
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{self, shapes};
use crate::metrics::{WS_ACTIVE, WS_CONNECTION};
use crate::session::SessionCoordinator;
use crate::transport::Outbox;
use crate::AppState;

/// Create the application router: realtime endpoint, REST shapes API and
/// health check
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.cors_origins);

    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(handlers::health))
        .route(
            "/shapes/{room_id}",
            get(shapes::get_shapes)
                .post(shapes::update_shapes)
                .delete(shapes::delete_shapes),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            },
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Handler for WebSocket connections
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut tx, mut rx) = socket.split();
    let (outbox, mut frames) = Outbox::channel(state.settings.outbox_capacity);
    let connection = outbox.id();

    counter!(WS_CONNECTION).increment(1);
    gauge!(WS_ACTIVE).increment(1.0);
    tracing::info!(%connection, "client connected");

    // Forward queued frames to the socket
    let send_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if tx.send(Message::Text(frame.as_ref().into())).await.is_err() {
                break;
            }
        }
    });

    let mut coordinator = SessionCoordinator::new(state.registry.clone(), outbox);

    let mut shutdown = state.shutdown_requested();
    loop {
        let message = tokio::select! {
            message = rx.next() => message,
            _ = shutdown.wait_for(|stop| *stop) => {
                tracing::info!(%connection, "closing session for shutdown");
                break;
            },
        };
        match message {
            Some(Ok(Message::Text(text))) => coordinator.handle_frame(text.as_str()).await,
            Some(Ok(Message::Binary(bytes))) => {
                coordinator
                    .handle_frame(&String::from_utf8_lossy(&bytes))
                    .await
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}, // ping/pong are answered by axum
            Some(Err(e)) => {
                tracing::warn!(%connection, error = %e, "websocket error");
                break;
            },
        }
    }

    // Transport errors end up here too and are handled like a clean close
    if let Some(closed) = coordinator.close() {
        tracing::debug!(room = %closed.room_id, "last client left");
    }
    tracing::info!(%connection, "client disconnected");
    gauge!(WS_ACTIVE).decrement(1.0);

    send_task.abort();
}
