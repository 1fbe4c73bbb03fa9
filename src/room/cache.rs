use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use super::models::{MembershipModel, RoomModel};
use crate::cache::{CacheBackend, CacheResult};

/// Hash fields written from the room record. Game state updates may not
/// overwrite these.
pub const ROOM_FIELDS: &[&str] = &[
    "id",
    "room_code",
    "name",
    "owner_id",
    "status",
    "max_players",
    "current_players",
    "game_type",
    "settings",
    "expires_at",
    "started_at",
    "ended_at",
    "results",
];

pub const READY_FIELD_PREFIX: &str = "ready:";

fn ready_field(user_id: u64) -> String {
    format!("{}{}", READY_FIELD_PREFIX, user_id)
}

pub fn room_key(room_id: u64) -> String {
    format!("room:{}", room_id)
}

pub fn room_players_key(room_id: u64) -> String {
    format!("room:players:{}", room_id)
}

/// Derived view of rooms in the cache: a hash per room and a set of member
/// ids. Never authoritative; everything here can be rebuilt from the store.
#[derive(Clone)]
pub struct RoomCacheMirror {
    cache: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl RoomCacheMirror {
    pub fn new(cache: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    #[instrument(skip(self, room), fields(room_id = room.id))]
    pub async fn mirror_room(&self, room: &RoomModel) -> CacheResult<()> {
        let mut fields = vec![
            ("id".to_string(), room.id.to_string()),
            ("room_code".to_string(), room.room_code.clone()),
            ("name".to_string(), room.name.clone()),
            ("owner_id".to_string(), room.owner_id.to_string()),
            ("status".to_string(), room.status.as_str().to_string()),
            ("max_players".to_string(), room.max_players.to_string()),
            ("current_players".to_string(), room.current_players.to_string()),
            ("game_type".to_string(), room.game_type.clone()),
            ("settings".to_string(), room.settings.to_string()),
        ];
        for (field, at) in [
            ("expires_at", room.expires_at),
            ("started_at", room.started_at),
            ("ended_at", room.ended_at),
        ] {
            if let Some(at) = at {
                fields.push((field.to_string(), at.timestamp().to_string()));
            }
        }
        if let Some(results) = &room.results {
            fields.push(("results".to_string(), serde_json::to_string(results)?));
        }

        let key = room_key(room.id);
        self.cache.hset(&key, &fields).await?;
        self.cache.expire(&key, self.ttl).await?;
        debug!("Room mirrored to cache");
        Ok(())
    }

    pub async fn add_player(&self, room_id: u64, user_id: u64) -> CacheResult<()> {
        let key = room_players_key(room_id);
        self.cache.sadd(&key, &user_id.to_string()).await?;
        self.cache.expire(&key, self.ttl).await
    }

    /// Drops the user from the member set along with their ready flag
    pub async fn remove_player(&self, room_id: u64, user_id: u64) -> CacheResult<()> {
        let players = room_players_key(room_id);
        self.cache.srem(&players, &user_id.to_string()).await?;
        self.cache.expire(&players, self.ttl).await?;

        let key = room_key(room_id);
        self.cache.hdel(&key, &[ready_field(user_id)]).await?;
        self.cache.expire(&key, self.ttl).await
    }

    pub async fn players(&self, room_id: u64) -> CacheResult<Vec<u64>> {
        let members = self.cache.smembers(&room_players_key(room_id)).await?;
        let mut ids: Vec<u64> = members.iter().filter_map(|m| m.parse().ok()).collect();
        ids.sort_unstable();
        Ok(ids)
    }

    pub async fn is_player(&self, room_id: u64, user_id: u64) -> CacheResult<bool> {
        self.cache
            .sismember(&room_players_key(room_id), &user_id.to_string())
            .await
    }

    pub async fn set_ready(&self, room_id: u64, user_id: u64, ready: bool) -> CacheResult<()> {
        let key = room_key(room_id);
        self.cache
            .hset(&key, &[(ready_field(user_id), ready.to_string())])
            .await?;
        self.cache.expire(&key, self.ttl).await
    }

    /// Merge-patch auxiliary fields into the room hash. Strings are stored
    /// as-is, any other value as its JSON text. Returns false, writing
    /// nothing, when the room has no hash.
    #[instrument(skip(self, patch))]
    pub async fn merge_state(
        &self,
        room_id: u64,
        patch: &serde_json::Map<String, serde_json::Value>,
    ) -> CacheResult<bool> {
        let fields: Vec<(String, String)> = patch
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect();

        let key = room_key(room_id);
        if !self.cache.hset_existing(&key, &fields).await? {
            return Ok(false);
        }
        self.cache.expire(&key, self.ttl).await?;
        Ok(true)
    }

    pub async fn state(&self, room_id: u64) -> CacheResult<HashMap<String, String>> {
        self.cache.hgetall(&room_key(room_id)).await
    }

    pub async fn delete_room(&self, room_id: u64) -> CacheResult<()> {
        let key = room_key(room_id);
        let players = room_players_key(room_id);
        self.cache.del(&[key.as_str(), players.as_str()]).await
    }

    /// Re-derives the hash and member set from store state. Game state
    /// fields already in the hash are kept; ready flags of users who are no
    /// longer members are not.
    #[instrument(skip(self, room, members))]
    pub async fn rebuild(
        &self,
        room_id: u64,
        room: Option<&RoomModel>,
        members: &[MembershipModel],
    ) -> CacheResult<()> {
        let Some(room) = room else {
            return self.delete_room(room_id).await;
        };

        let stale_ready: Vec<String> = self
            .state(room_id)
            .await?
            .into_keys()
            .filter(|field| match field.strip_prefix(READY_FIELD_PREFIX) {
                Some(id) => !members.iter().any(|m| m.user_id.to_string() == id),
                None => false,
            })
            .collect();
        self.cache.hdel(&room_key(room_id), &stale_ready).await?;

        let players = room_players_key(room_id);
        self.cache.del(&[players.as_str()]).await?;
        self.mirror_room(room).await?;
        for member in members {
            self.add_player(room_id, member.user_id).await?;
            self.set_ready(room_id, member.user_id, member.is_ready).await?;
        }
        debug!(room_id = room_id, members = members.len(), "Room cache rebuilt");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::room::models::RoomStatus;
    use serde_json::json;

    fn mirror() -> (Arc<InMemoryCache>, RoomCacheMirror) {
        let cache = Arc::new(InMemoryCache::new());
        (
            cache.clone(),
            RoomCacheMirror::new(cache, Duration::from_secs(300)),
        )
    }

    fn room() -> RoomModel {
        let mut room = RoomModel::new(
            "abcd1234".into(),
            "table".into(),
            1,
            4,
            "cards".into(),
            json!({"rounds": 3}),
            None,
        );
        room.id = 9;
        room.current_players = 1;
        room
    }

    #[tokio::test]
    async fn test_mirror_room_writes_hash_with_ttl() {
        let (cache, mirror) = mirror();
        mirror.mirror_room(&room()).await.unwrap();

        let hash = mirror.state(9).await.unwrap();
        assert_eq!(hash["room_code"], "abcd1234");
        assert_eq!(hash["status"], "waiting");
        assert_eq!(hash["current_players"], "1");
        assert_eq!(hash["settings"], r#"{"rounds":3}"#);
        assert!(!hash.contains_key("started_at"));
        assert!(cache.ttl("room:9").is_some());
    }

    #[tokio::test]
    async fn test_player_set() {
        let (_, mirror) = mirror();
        mirror.add_player(9, 1).await.unwrap();
        mirror.add_player(9, 2).await.unwrap();
        mirror.remove_player(9, 1).await.unwrap();

        assert_eq!(mirror.players(9).await.unwrap(), vec![2]);
        assert!(mirror.is_player(9, 2).await.unwrap());
        assert!(!mirror.is_player(9, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_merge_state_keeps_room_fields() {
        let (_, mirror) = mirror();
        mirror.mirror_room(&room()).await.unwrap();

        let patch = json!({"turn": "2", "scores": {"1": 10}});
        mirror
            .merge_state(9, patch.as_object().unwrap())
            .await
            .unwrap();

        let hash = mirror.state(9).await.unwrap();
        assert_eq!(hash["turn"], "2");
        assert_eq!(hash["scores"], r#"{"1":10}"#);
        assert_eq!(hash["name"], "table");
    }

    #[tokio::test]
    async fn test_mirror_room_writes_results_once_finished() {
        let (_, mirror) = mirror();
        let mut room = room();
        room.status = RoomStatus::Finished;
        room.results = Some([(1, json!("win"))].into_iter().collect());

        mirror.mirror_room(&room).await.unwrap();
        let hash = mirror.state(9).await.unwrap();
        assert_eq!(hash["status"], "finished");
        assert_eq!(hash["results"], r#"{"1":"win"}"#);
    }

    #[tokio::test]
    async fn test_merge_state_needs_existing_hash() {
        let (_, mirror) = mirror();
        let patch = json!({"turn": 1});

        assert!(!mirror.merge_state(9, patch.as_object().unwrap()).await.unwrap());
        assert!(mirror.state(9).await.unwrap().is_empty());

        mirror.mirror_room(&room()).await.unwrap();
        assert!(mirror.merge_state(9, patch.as_object().unwrap()).await.unwrap());
        assert_eq!(mirror.state(9).await.unwrap()["turn"], "1");
    }

    #[tokio::test]
    async fn test_ready_and_leave_refresh_ttl() {
        let (cache, mirror) = mirror();
        cache
            .hset("room:9", &[("status".into(), "playing".into())])
            .await
            .unwrap();
        cache.sadd("room:players:9", "1").await.unwrap();
        cache.sadd("room:players:9", "2").await.unwrap();
        assert!(cache.ttl("room:9").is_none());

        mirror.set_ready(9, 2, true).await.unwrap();
        assert!(cache.ttl("room:9").is_some());

        mirror.remove_player(9, 2).await.unwrap();
        assert!(cache.ttl("room:players:9").is_some());
        let hash = mirror.state(9).await.unwrap();
        assert!(!hash.contains_key("ready:2"));
        assert_eq!(hash["status"], "playing");
    }

    #[tokio::test]
    async fn test_delete_room_removes_both_keys() {
        let (_, mirror) = mirror();
        mirror.mirror_room(&room()).await.unwrap();
        mirror.add_player(9, 1).await.unwrap();

        mirror.delete_room(9).await.unwrap();
        assert!(mirror.state(9).await.unwrap().is_empty());
        assert!(mirror.players(9).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_from_store_state() {
        let (_, mirror) = mirror();
        mirror.add_player(9, 99).await.unwrap(); // stale
        mirror.set_ready(9, 99, true).await.unwrap();
        mirror
            .merge_state(9, json!({"turn": "3"}).as_object().unwrap())
            .await
            .unwrap();

        let mut room = room();
        room.status = RoomStatus::Playing;
        let mut member = MembershipModel::new(9, 1, 0);
        member.is_ready = true;

        mirror.rebuild(9, Some(&room), &[member]).await.unwrap();

        let hash = mirror.state(9).await.unwrap();
        assert_eq!(hash["status"], "playing");
        assert_eq!(hash["ready:1"], "true");
        assert!(!hash.contains_key("ready:99"));
        assert_eq!(hash["turn"], "3");
        assert_eq!(mirror.players(9).await.unwrap(), vec![1]);

        mirror.rebuild(9, None, &[]).await.unwrap();
        assert!(mirror.state(9).await.unwrap().is_empty());
    }
}
