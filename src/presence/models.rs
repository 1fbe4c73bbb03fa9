use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const STATUS_ONLINE: &str = "online";

/// Session blob stored at `session:{user_id}` while the user is online
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: u64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// Unix seconds
    pub last_activity: i64,
    pub status: String,
}

impl PresenceRecord {
    pub fn new(user_id: u64, client: ClientInfo, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            ip_address: client.ip_address,
            user_agent: client.user_agent,
            last_activity: now.timestamp(),
            status: STATUS_ONLINE.to_string(),
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now.timestamp();
        self.status = STATUS_ONLINE.to_string();
    }
}

/// Connection metadata captured when a session starts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Response body for presence lookups
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceResponse {
    pub user_id: u64,
    pub online: bool,
    pub timed_out: bool,
    pub session: Option<PresenceRecord>,
}
