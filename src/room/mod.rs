// Public API - what other modules can use
pub use cache::RoomCacheMirror;
pub use handlers::{
    cancel_room, create_room, end_game, get_game_state, get_room, join_room, leave_room,
    list_rooms, set_ready, start_game, update_game_state,
};

// Internal modules
pub mod cache;
pub mod cleanup_task;
mod handlers;
pub mod models;
pub mod postgres;
pub mod repository;
pub mod service;
pub mod types;
