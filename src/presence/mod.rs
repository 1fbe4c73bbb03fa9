// Public API - what other modules can use
pub use handlers::{client_info, get_presence, heartbeat, logout};
pub use models::{ClientInfo, PresenceRecord, PresenceResponse};
pub use tracker::PresenceTracker;

// Internal modules
mod handlers;
pub mod models;
pub mod tracker;
