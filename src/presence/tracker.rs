use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::models::{ClientInfo, PresenceRecord};
use crate::cache::CacheBackend;
use crate::shared::AppError;

pub const ONLINE_SET_KEY: &str = "user:online";

pub fn session_key(user_id: u64) -> String {
    format!("session:{}", user_id)
}

/// Tracks which users are online and when they were last active.
///
/// Presence lives only in the cache. Each session blob carries a TTL equal
/// to the timeout window, and the online set is re-expired on every add, so
/// a user who stops sending activity drops out on their own.
pub struct PresenceTracker {
    cache: Arc<dyn CacheBackend>,
    timeout: Duration,
}

impl PresenceTracker {
    pub fn new(cache: Arc<dyn CacheBackend>, timeout: Duration) -> Self {
        Self { cache, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[instrument(skip(self, client))]
    pub async fn create_session(
        &self,
        user_id: u64,
        client: ClientInfo,
    ) -> Result<PresenceRecord, AppError> {
        let record = PresenceRecord::new(user_id, client, Utc::now());
        self.store(&record).await?;
        debug!(user_id = user_id, "Presence session created");
        Ok(record)
    }

    /// Bumps last activity. A missing session is re-created without
    /// client metadata.
    #[instrument(skip(self))]
    pub async fn refresh(&self, user_id: u64) -> Result<PresenceRecord, AppError> {
        let record = match self.get_session(user_id).await? {
            Some(mut record) => {
                record.touch(Utc::now());
                record
            }
            None => {
                debug!(user_id = user_id, "No session to refresh, re-creating");
                PresenceRecord::new(user_id, ClientInfo::default(), Utc::now())
            }
        };
        self.store(&record).await?;
        Ok(record)
    }

    /// Removes the user from the online set and deletes the session blob.
    /// Both steps are attempted even if the first fails.
    #[instrument(skip(self))]
    pub async fn delete_session(&self, user_id: u64) -> Result<(), AppError> {
        let member = user_id.to_string();
        let removed = self.cache.srem(ONLINE_SET_KEY, &member).await;
        let deleted = self.cache.del(&[&session_key(user_id)]).await;

        if let Err(e) = &removed {
            warn!(user_id = user_id, error = %e, "Failed to remove user from online set");
        }
        if let Err(e) = &deleted {
            warn!(user_id = user_id, error = %e, "Failed to delete session blob");
        }
        removed?;
        deleted?;
        Ok(())
    }

    pub async fn is_online(&self, user_id: u64) -> Result<bool, AppError> {
        Ok(self
            .cache
            .sismember(ONLINE_SET_KEY, &user_id.to_string())
            .await?)
    }

    pub async fn online_users(&self) -> Result<Vec<u64>, AppError> {
        let mut users: Vec<u64> = self
            .cache
            .smembers(ONLINE_SET_KEY)
            .await?
            .iter()
            .filter_map(|m| m.parse().ok())
            .collect();
        users.sort_unstable();
        Ok(users)
    }

    pub async fn get_session(&self, user_id: u64) -> Result<Option<PresenceRecord>, AppError> {
        let Some(raw) = self.cache.get(&session_key(user_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(user_id = user_id, error = %e, "Discarding unreadable session blob");
                Ok(None)
            }
        }
    }

    /// Lazy timeout check against the last recorded activity
    pub fn is_timed_out(&self, record: &PresenceRecord, now: DateTime<Utc>) -> bool {
        now.timestamp() > record.last_activity + self.timeout.as_secs() as i64
    }

    async fn store(&self, record: &PresenceRecord) -> Result<(), AppError> {
        let blob = serde_json::to_string(record).map_err(|e| AppError::internal(e.to_string()))?;
        self.cache
            .set(&session_key(record.user_id), &blob, Some(self.timeout))
            .await?;
        self.cache
            .sadd(ONLINE_SET_KEY, &record.user_id.to_string())
            .await?;
        self.cache.expire(ONLINE_SET_KEY, self.timeout).await?;
        Ok(())
    }
}
