//! Stream Server: accepts client connections, speaks the streaming
//! transport's keepalive/control protocol, and forwards registration and
//! disconnect events to the Dispatcher.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::dispatcher::DispatcherHandle;
use crate::middleware::request_logging;
use crate::models::wire::{parse_control_message, ControlAction};

#[derive(Clone)]
pub struct StreamState {
    pub dispatcher: DispatcherHandle,
    pub settings: Arc<Settings>,
}

pub fn build_router(state: StreamState) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(health_handler))
        .layer(axum::middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn websocket_handler(
    State(state): State<StreamState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

/// Per-connection task. Each connection is independent; per-connection
/// I/O never blocks other connections.
async fn handle_socket(mut socket: WebSocket, state: StreamState, addr: SocketAddr) {
    let client_id = Uuid::new_v4();
    let (outbox_tx, mut outbox_rx) = tokio::sync::mpsc::channel(1);

    state.dispatcher.connect(client_id, addr.to_string(), outbox_tx).await;
    info!(client_id = %client_id, remote = %addr, "client connected");

    let mut ping_interval = tokio::time::interval(state.settings.ws_ping_interval());
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            maybe_message = socket.recv() => {
                match maybe_message {
                    Some(Ok(Message::Text(text))) => {
                        awaiting_pong = false;
                        match parse_control_message(&text) {
                            ControlAction::Ping => {
                                if socket.send(Message::Text("pong".to_string())).await.is_err() {
                                    break;
                                }
                            }
                            ControlAction::GetLatest => {
                                state.dispatcher.get_latest(client_id).await;
                            }
                            ControlAction::Register { page, requested_interval } => {
                                state.dispatcher.register(client_id, page, requested_interval).await;
                            }
                            ControlAction::Unrecognized => {
                                debug!(client_id = %client_id, "ignoring malformed control message");
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(client_id = %client_id, "transport error: {e}");
                        break;
                    }
                }
            }
            Some(message) = outbox_rx.recv() => {
                let text = message.to_string();
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if awaiting_pong {
                    warn!(client_id = %client_id, "pong timeout, closing connection");
                    break;
                }
                awaiting_pong = true;
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.dispatcher.disconnect(client_id).await;
    info!(client_id = %client_id, "client disconnected");
}
