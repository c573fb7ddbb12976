//! WebSocket transport for the signaling socket (spec.md §6 `/ws`).
//!
//! An axum upgrade handler spawns one task per connection, which drains
//! its `OutboundHandle` receiver into the socket sink while reading
//! inbound text frames into the `Connection` dispatcher. Frames carry
//! JSON text rather than a length-prefixed binary encoding, so there's no
//! framing adaptation to do here — `ws.rs` stays thin because
//! `dispatcher.rs` owns message interpretation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{Message as WsMsg, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

use huddle_core::{OutboundHandle, RoomRegistry};

use crate::dispatcher::Connection;
use crate::http::{config_handler, create_room_handler, health_handler};
use crate::rate_limit::RateLimiter;
use crate::AppState;

/// Maximum inbound frame size (spec.md doesn't bound this explicitly;
/// a transport-level ceiling rather than leaving it unbounded).
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

pub fn build_router(state: Arc<AppState>) -> Router {
    // `/ws` and `/api/rooms` are not blanket-permissive: only `/health`
    // and `/config` are safe to expose to any origin (SPEC_FULL.md §4.7).
    let open_cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let open = Router::new()
        .route("/health", get(health_handler))
        .route("/config", get(config_handler))
        .layer(open_cors)
        .with_state(state.clone());

    let mut guarded = Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/rooms", axum::routing::post(create_room_handler));

    if let Some(guarded_cors) = allow_listed_origins_layer(&state.config.allowed_origins) {
        guarded = guarded.layer(guarded_cors);
    }

    open.merge(guarded.with_state(state))
}

/// Builds a `CorsLayer` that only ever reflects an explicitly-configured
/// origin allow-list. Returns `None` when the list is empty so the route
/// carries no `Access-Control-Allow-Origin` header at all, which browsers
/// treat as same-origin-only.
fn allow_listed_origins_layer(allowed_origins: &[String]) -> Option<CorsLayer> {
    if allowed_origins.is_empty() {
        return None;
    }
    let origins: Vec<axum::http::HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    Some(CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    if !state.rate_limiter.check(addr.ip()) {
        return axum::http::StatusCode::TOO_MANY_REQUESTS.into_response();
    }
    ws.max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (outbound, mut rx, close) = OutboundHandle::new();
    let mut conn = Connection::new(Arc::clone(&state.registry), outbound, state.config.max_participants);

    loop {
        tokio::select! {
            biased;

            _ = close.notified() => {
                break;
            }
            outgoing = rx.recv() => {
                match outgoing {
                    Some(frame) => {
                        if sink.send(WsMsg::Text(frame.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMsg::Text(text))) => conn.handle_frame(&text),
                    Some(Ok(WsMsg::Ping(_))) | Some(Ok(WsMsg::Pong(_))) => continue,
                    Some(Ok(WsMsg::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("websocket transport error: {e}");
                        break;
                    }
                }
            }
        }
    }

    conn.disconnect();
    persist_latent_rooms(&state).await;
}

async fn persist_latent_rooms(state: &AppState) {
    state.latent_store.persist(state.registry.latent_rooms()).await;
}
