use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Room lifecycle status. Transitions only move forward:
/// Waiting -> Playing -> Finished, or Waiting -> Cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Waiting,
    Playing,
    Finished,
    Cancelled,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Waiting => "waiting",
            RoomStatus::Playing => "playing",
            RoomStatus::Finished => "finished",
            RoomStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(RoomStatus::Waiting),
            "playing" => Some(RoomStatus::Playing),
            "finished" => Some(RoomStatus::Finished),
            "cancelled" => Some(RoomStatus::Cancelled),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: RoomStatus) -> bool {
        matches!(
            (self, next),
            (RoomStatus::Waiting, RoomStatus::Playing)
                | (RoomStatus::Waiting, RoomStatus::Cancelled)
                | (RoomStatus::Playing, RoomStatus::Finished)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RoomStatus::Finished | RoomStatus::Cancelled)
    }
}

/// Per-user results reported at game end, keyed by user id
pub type GameResults = BTreeMap<u64, serde_json::Value>;

/// Authoritative room record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomModel {
    pub id: u64, // assigned by the store on insert
    pub room_code: String,
    pub name: String,
    pub owner_id: u64,
    pub status: RoomStatus,
    pub max_players: i32,
    pub current_players: i32,
    pub game_type: String,
    pub settings: serde_json::Value, // opaque, passed through
    pub results: Option<GameResults>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RoomModel {
    /// New Waiting room with no occupants yet; the store assigns the id
    pub fn new(
        room_code: String,
        name: String,
        owner_id: u64,
        max_players: i32,
        game_type: String,
        settings: serde_json::Value,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            room_code,
            name,
            owner_id,
            status: RoomStatus::Waiting,
            max_players,
            current_players: 0,
            game_type,
            settings,
            results: None,
            started_at: None,
            ended_at: None,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_full(&self) -> bool {
        self.current_players >= self.max_players
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Room membership. Closed on leave by setting `left_at`, never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipModel {
    pub id: u64,
    pub room_id: u64,
    pub user_id: u64,
    pub is_ready: bool,
    pub position: i32,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

impl MembershipModel {
    pub fn new(room_id: u64, user_id: u64, position: i32) -> Self {
        Self {
            id: 0,
            room_id,
            user_id,
            is_ready: false,
            position,
            joined_at: Utc::now(),
            left_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
}

/// Random 8-char hex share code
pub fn generate_room_code() -> String {
    let bytes: [u8; 4] = rand::random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
