use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use std::collections::HashMap;
use tracing::{info, instrument};

use super::{
    models::{MembershipModel, RoomModel, RoomStatus},
    repository::RoomFilter,
    types::{
        CreateRoomRequest, EndGameRequest, JoinRoomRequest, LeaveRoomResponse, ListRoomsQuery,
        ReadyRequest, RoomDetailsResponse,
    },
};
use crate::auth::AuthUser;
use crate::shared::{AppError, AppState};

/// POST /rooms
#[instrument(name = "create_room", skip(state, request), fields(user_id = user.user_id))]
pub async fn create_room(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<CreateRoomRequest>,
) -> Result<Json<RoomModel>, AppError> {
    info!(name = %request.name, "Creating new room");
    let room = state.room_service.create_room(user.user_id, request).await?;
    Ok(Json(room))
}

/// POST /rooms/join
#[instrument(name = "join_room", skip(state, request), fields(user_id = user.user_id))]
pub async fn join_room(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<JoinRoomRequest>,
) -> Result<Json<RoomModel>, AppError> {
    let room = state
        .room_service
        .join_room(user.user_id, &request.room_code)
        .await?;
    Ok(Json(room))
}

/// GET /rooms?status=waiting&limit=20&offset=0
#[instrument(name = "list_rooms", skip(state))]
pub async fn list_rooms(
    State(state): State<AppState>,
    Query(query): Query<ListRoomsQuery>,
) -> Result<Json<Vec<RoomModel>>, AppError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            RoomStatus::parse(raw)
                .ok_or_else(|| AppError::InvalidInput(format!("Unknown room status {}", raw)))?,
        ),
        None => None,
    };
    let filter = RoomFilter {
        status,
        limit: query.limit,
        offset: query.offset,
    };

    let rooms = state.room_service.list_rooms(&filter).await?;
    info!(room_count = rooms.len(), "Rooms listed successfully");
    Ok(Json(rooms))
}

/// GET /rooms/:id
#[instrument(name = "get_room", skip(state))]
pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<u64>,
) -> Result<Json<RoomDetailsResponse>, AppError> {
    Ok(Json(state.room_service.get_room_details(room_id).await?))
}

/// POST /rooms/:id/leave
#[instrument(name = "leave_room", skip(state), fields(user_id = user.user_id))]
pub async fn leave_room(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(room_id): Path<u64>,
) -> Result<Json<LeaveRoomResponse>, AppError> {
    let outcome = state.room_service.leave_room(user.user_id, room_id).await?;
    Ok(Json(outcome))
}

/// DELETE /rooms/:id - owner cancels a Waiting room
#[instrument(name = "cancel_room", skip(state), fields(user_id = user.user_id))]
pub async fn cancel_room(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(room_id): Path<u64>,
) -> Result<Json<RoomModel>, AppError> {
    let room = state
        .room_service
        .cancel_room(room_id, Some(user.user_id))
        .await?;
    Ok(Json(room))
}

/// POST /rooms/:id/start - owner only
#[instrument(name = "start_game", skip(state), fields(user_id = user.user_id))]
pub async fn start_game(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(room_id): Path<u64>,
) -> Result<Json<RoomModel>, AppError> {
    let room = state
        .room_service
        .start_game(room_id, Some(user.user_id))
        .await?;
    Ok(Json(room))
}

/// POST /rooms/:id/end - owner only
#[instrument(name = "end_game", skip(state, request), fields(user_id = user.user_id))]
pub async fn end_game(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(room_id): Path<u64>,
    Json(request): Json<EndGameRequest>,
) -> Result<Json<RoomModel>, AppError> {
    let room = state
        .room_service
        .end_game(room_id, request.results, Some(user.user_id))
        .await?;
    Ok(Json(room))
}

/// POST /rooms/:id/ready
#[instrument(name = "set_ready", skip(state), fields(user_id = user.user_id))]
pub async fn set_ready(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(room_id): Path<u64>,
    Json(request): Json<ReadyRequest>,
) -> Result<Json<MembershipModel>, AppError> {
    let membership = state
        .room_service
        .set_ready(user.user_id, room_id, request.ready)
        .await?;
    Ok(Json(membership))
}

/// GET /rooms/:id/state - cached hash, may lag the store
#[instrument(name = "get_game_state", skip(state))]
pub async fn get_game_state(
    State(state): State<AppState>,
    Path(room_id): Path<u64>,
) -> Result<Json<HashMap<String, String>>, AppError> {
    Ok(Json(state.room_service.get_game_state(room_id).await?))
}

/// PUT /rooms/:id/state - members only
#[instrument(name = "update_game_state", skip(state, patch), fields(user_id = user.user_id))]
pub async fn update_game_state(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(room_id): Path<u64>,
    Json(patch): Json<serde_json::Map<String, serde_json::Value>>,
) -> Result<Json<HashMap<String, String>>, AppError> {
    let members = state.room_service.get_room_members(room_id).await?;
    if !members.iter().any(|m| m.user_id == user.user_id) {
        return Err(AppError::Forbidden(
            "Only room members can update game state".to_string(),
        ));
    }

    state
        .room_service
        .update_game_state(room_id, Some(user.user_id), patch)
        .await?;
    Ok(Json(state.room_service.get_game_state(room_id).await?))
}
