// Cache backend abstraction
//
// Key/value, hash, set and pub/sub primitives with per-key TTL. The room
// mirror, presence tracker, lock manager and event bus are all built on this.

// Public API - what other modules can use
pub use backend::{CacheBackend, CacheError, CacheResult, MessageStream};
pub use memory::InMemoryCache;
pub use redis_cache::RedisCache;

// Internal modules
mod backend;
mod memory;
mod redis_cache;
