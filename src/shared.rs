use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

use crate::auth::TokenValidator;
use crate::config::AppConfig;
use crate::event::EventBus;
use crate::presence::PresenceTracker;
use crate::room::service::RoomService;
use crate::websockets::ConnectionHub;

/// Shared application state containing all dependencies
#[derive(Clone)]
pub struct AppState {
    pub room_service: Arc<RoomService>,
    pub presence: Arc<PresenceTracker>,
    pub hub: ConnectionHub,
    pub event_bus: EventBus,
    pub token_validator: Arc<dyn TokenValidator>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        room_service: Arc<RoomService>,
        presence: Arc<PresenceTracker>,
        hub: ConnectionHub,
        event_bus: EventBus,
        token_validator: Arc<dyn TokenValidator>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            room_service,
            presence,
            hub,
            event_bus,
            token_validator,
            config,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl AppError {
    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Internal(detail) => {
                error!(error = %detail, "Request failed with internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::*;
    use crate::auth::JwtTokenValidator;
    use crate::cache::{CacheBackend, InMemoryCache};
    use crate::lock::CacheLockManager;
    use crate::room::repository::{InMemoryRoomRepository, RoomRepository};
    use crate::room::RoomCacheMirror;

    pub const TEST_SECRET: &str = "test-secret";

    /// Builder for creating AppState with in-memory backends for testing
    pub struct AppStateBuilder {
        config: AppConfig,
        room_repository: Option<Arc<dyn RoomRepository>>,
        cache: Option<Arc<dyn CacheBackend>>,
    }

    impl AppStateBuilder {
        pub fn new() -> Self {
            let mut config = AppConfig::default();
            config.auth.jwt_secret = TEST_SECRET.to_string();
            Self {
                config,
                room_repository: None,
                cache: None,
            }
        }

        pub fn with_room_repository(mut self, repo: Arc<dyn RoomRepository>) -> Self {
            self.room_repository = Some(repo);
            self
        }

        pub fn with_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
            self.cache = Some(cache);
            self
        }

        pub fn with_max_players(mut self, max_players: i32) -> Self {
            self.config.room.max_players = max_players;
            self
        }

        pub fn build(self) -> AppState {
            let config = Arc::new(self.config);
            let cache = self
                .cache
                .unwrap_or_else(|| Arc::new(InMemoryCache::new()) as Arc<dyn CacheBackend>);
            let room_repository = self
                .room_repository
                .unwrap_or_else(|| Arc::new(InMemoryRoomRepository::new()));
            let event_bus = EventBus::new(cache.clone());

            let room_service = Arc::new(RoomService::new(
                room_repository,
                RoomCacheMirror::new(cache.clone(), config.room.default_timeout),
                Arc::new(CacheLockManager::new(cache.clone())),
                event_bus.clone(),
                config.room.clone(),
                config.events.channel.clone(),
            ));
            let presence = Arc::new(PresenceTracker::new(cache, config.session.timeout));
            let hub = ConnectionHub::spawn(config.hub.outbound_capacity);
            let token_validator = Arc::new(JwtTokenValidator::new(&config.auth));

            AppState::new(
                room_service,
                presence,
                hub,
                event_bus,
                token_validator,
                config,
            )
        }
    }

    impl Default for AppStateBuilder {
        fn default() -> Self {
            Self::new()
        }
    }
}
