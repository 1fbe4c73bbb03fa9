use serde::{Deserialize, Serialize};

use super::models::{GameResults, MembershipModel, RoomModel};

/// Request payload for creating a new room
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
    #[serde(default)]
    pub game_type: String,
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
    /// Capacity for this room, up to the configured maximum
    #[serde(default)]
    pub max_players: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinRoomRequest {
    pub room_code: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndGameRequest {
    #[serde(default)]
    pub results: GameResults,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadyRequest {
    pub ready: bool,
}

/// Query string for GET /rooms
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListRoomsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Room snapshot with its active roster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomDetailsResponse {
    pub room: RoomModel,
    pub members: Vec<MembershipModel>,
}

/// Result of leaving a room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveRoomResponse {
    pub room_id: u64,
    /// True when the last member left and the room was deleted
    pub room_closed: bool,
    pub room: Option<RoomModel>,
}
