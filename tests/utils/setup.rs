use serde_json::json;
use std::sync::Arc;

use gameroom::config::RoomConfig;
use gameroom::event::EventStream;
use gameroom::room::types::CreateRoomRequest;
use gameroom::{
    CacheLockManager, EventBus, InMemoryCache, RoomCacheMirror, RoomModel, RoomService,
};

use super::mocks::FaultyRoomRepository;

pub const CHANNEL: &str = "game:events";

// ============================================================================
// Test Setup Infrastructure
// ============================================================================

pub struct TestSetup {
    pub repo: Arc<FaultyRoomRepository>,
    /// backs the room mirror only, so it can fail on its own
    pub mirror_cache: Arc<InMemoryCache>,
    /// backs locks and events
    pub shared_cache: Arc<InMemoryCache>,
    pub event_bus: EventBus,
    pub service: Arc<RoomService>,
}

#[allow(dead_code)]
impl TestSetup {
    pub async fn subscribe(&self) -> EventStream {
        self.event_bus.subscribe(CHANNEL).await.unwrap()
    }

    pub async fn create_room(&self, owner_id: u64, max_players: i32) -> RoomModel {
        self.service
            .create_room(
                owner_id,
                CreateRoomRequest {
                    name: format!("room of {}", owner_id),
                    game_type: "cards".to_string(),
                    settings: Some(json!({"rounds": 1})),
                    max_players: Some(max_players),
                },
            )
            .await
            .unwrap()
    }
}

pub struct TestSetupBuilder {
    config: RoomConfig,
}

#[allow(dead_code)]
impl TestSetupBuilder {
    pub fn new() -> Self {
        Self {
            config: RoomConfig::default(),
        }
    }

    pub fn with_max_players(mut self, max_players: i32) -> Self {
        self.config.max_players = max_players;
        self
    }

    pub fn build(self) -> TestSetup {
        let repo = Arc::new(FaultyRoomRepository::new());
        let mirror_cache = Arc::new(InMemoryCache::new());
        let shared_cache = Arc::new(InMemoryCache::new());
        let event_bus = EventBus::new(shared_cache.clone());

        let service = Arc::new(RoomService::new(
            repo.clone(),
            RoomCacheMirror::new(mirror_cache.clone(), self.config.default_timeout),
            Arc::new(CacheLockManager::new(shared_cache.clone())),
            event_bus.clone(),
            self.config,
            CHANNEL.to_string(),
        ));

        TestSetup {
            repo,
            mirror_cache,
            shared_cache,
            event_bus,
            service,
        }
    }
}
