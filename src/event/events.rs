use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle event kinds carried in the envelope's `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    RoomCreated,
    PlayerJoined,
    PlayerLeft,
    PlayerReady,
    GameStart,
    GameEnd,
    GameState,
    RoomClosed,
    RoomCancelled,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::RoomCreated => "room_created",
            EventType::PlayerJoined => "player_joined",
            EventType::PlayerLeft => "player_left",
            EventType::PlayerReady => "player_ready",
            EventType::GameStart => "game_start",
            EventType::GameEnd => "game_end",
            EventType::GameState => "game_state",
            EventType::RoomClosed => "room_closed",
            EventType::RoomCancelled => "room_cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "room_created" => EventType::RoomCreated,
            "player_joined" => EventType::PlayerJoined,
            "player_left" => EventType::PlayerLeft,
            "player_ready" => EventType::PlayerReady,
            "game_start" => EventType::GameStart,
            "game_end" => EventType::GameEnd,
            "game_state" => EventType::GameState,
            "room_closed" => EventType::RoomClosed,
            "room_cancelled" => EventType::RoomCancelled,
            _ => return None,
        })
    }
}

/// Wire envelope for lifecycle events.
///
/// Events describe things that already happened. They are transient: nothing
/// stores them, and a subscriber that is not listening never sees them.
///
/// ```json
/// {"type": "game_start", "room_id": 7, "user_id": null, "data": {...}, "timestamp": 1700000000}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub room_id: u64,
    #[serde(default)]
    pub user_id: Option<u64>,
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Unix seconds
    pub timestamp: i64,
}

impl GameEvent {
    pub fn new(event_type: EventType, room_id: u64) -> Self {
        Self {
            event_type: event_type.as_str().to_string(),
            room_id,
            user_id: None,
            data: Map::new(),
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn with_user(mut self, user_id: u64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_data(mut self, key: &str, value: impl Serialize) -> Self {
        // Value conversion only fails for maps with non-string keys
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.data.insert(key.to_string(), value);
        self
    }

    /// Known kind, `None` for types this build does not know about
    pub fn kind(&self) -> Option<EventType> {
        EventType::parse(&self.event_type)
    }
}
