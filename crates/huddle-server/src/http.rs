//! Plain HTTP surface: health, ICE config, and pre-created-room minting
//! (spec.md §6).

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    total_rooms: usize,
    total_participants: usize,
    peak_participants: usize,
    /// Seconds since process start, serialized as `uptime` per spec.md §6.
    uptime: u64,
    version: &'static str,
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        total_rooms: state.registry.room_count(),
        total_participants: state.registry.total_participants(),
        peak_participants: state.registry.peak_participants(),
        uptime: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn config_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.config.ice_config())
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    room_id: Option<String>,
    max_participants: Option<usize>,
    password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomResponse {
    room_id: String,
    creator_token: String,
}

pub async fn create_room_handler(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CreateRoomRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let max_participants = Some(req.max_participants.unwrap_or(state.config.max_participants));
    match state.registry.pre_create_room(req.room_id, max_participants, req.password) {
        Ok(created) => {
            state.latent_store.persist(state.registry.latent_rooms()).await;
            (
                StatusCode::CREATED,
                Json(CreateRoomResponse {
                    room_id: created.room_id,
                    creator_token: created.creator_token,
                }),
            )
                .into_response()
        }
        Err(huddle_core::RoomError::RoomIdTaken) => StatusCode::CONFLICT.into_response(),
        Err(huddle_core::RoomError::LatentCapacityReached) => StatusCode::TOO_MANY_REQUESTS.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
