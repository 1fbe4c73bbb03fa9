// Advisory locks with TTL over the cache backend.
// Acquire is a single non-blocking attempt; release is fenced by the token
// handed out on acquire.

// Public API - what other modules can use
pub use guard::LockGuard;
pub use manager::{CacheLockManager, LockManager, LockToken};

// Internal modules
mod guard;
mod manager;

/// Lock key for a room id
pub fn room_lock_key(room_id: u64) -> String {
    format!("room:{}", room_id)
}

/// Lock key for a room code, held while a room with that code is created
pub fn room_code_lock_key(room_code: &str) -> String {
    format!("room-code:{}", room_code)
}
