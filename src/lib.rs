// Library crate for the game-room server
// This file exposes the public API for integration tests

pub mod auth;
pub mod cache;
pub mod config;
pub mod event;
pub mod lock;
pub mod presence;
pub mod room;
pub mod routes;
pub mod shared;
pub mod websockets;

// Re-export commonly used types for easier access in tests
pub use cache::{CacheBackend, InMemoryCache};
pub use config::AppConfig;
pub use event::{EventBus, EventDispatcher, EventType, GameEvent};
pub use lock::{CacheLockManager, LockGuard, LockManager, LockToken};
pub use presence::PresenceTracker;
pub use room::{
    models::{MembershipModel, RoomModel, RoomStatus},
    repository::{InMemoryRoomRepository, RoomRepository},
    service::RoomService,
    RoomCacheMirror,
};
pub use routes::build_router;
pub use shared::{AppError, AppState};
pub use websockets::{ConnectionHub, ConnectionManager, HubEventForwarder};
