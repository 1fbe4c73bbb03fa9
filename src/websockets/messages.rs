use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Frame types a client may send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientFrameType {
    Ping,
    Heartbeat,
}

impl ClientFrameType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ping" => Some(Self::Ping),
            "heartbeat" => Some(Self::Heartbeat),
            _ => None,
        }
    }
}

/// Inbound frame: `{"type": "...", "data": {...}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl ClientFrame {
    pub fn kind(&self) -> Option<ClientFrameType> {
        ClientFrameType::parse(&self.frame_type)
    }
}

/// Outbound control frame. Lifecycle events are forwarded as their own
/// envelope and do not go through this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    pub timestamp: i64,
}

impl ServerFrame {
    fn new(frame_type: &str) -> Self {
        Self {
            frame_type: frame_type.to_string(),
            data: Map::new(),
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn pong() -> Self {
        Self::new("pong")
    }

    /// Sent once after the upgrade
    pub fn connected(user_id: u64, heartbeat_interval_secs: u64) -> Self {
        let mut frame = Self::new("connected");
        frame.data.insert("user_id".to_string(), Value::from(user_id));
        frame.data.insert(
            "heartbeat_interval".to_string(),
            Value::from(heartbeat_interval_secs),
        );
        frame
    }

    pub fn to_json(&self) -> String {
        // a map of plain values always serializes
        serde_json::to_string(self).unwrap_or_default()
    }
}
