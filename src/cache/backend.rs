use async_trait::async_trait;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

use crate::shared::AppError;

/// Errors raised by a cache backend
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Wrong value type for key {0}")]
    WrongType(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<::redis::RedisError> for CacheError {
    fn from(e: ::redis::RedisError) -> Self {
        CacheError::Backend(e.to_string())
    }
}

impl From<CacheError> for AppError {
    fn from(e: CacheError) -> Self {
        AppError::Internal(e.to_string())
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Raw payloads received on a subscribed channel. Ends on transport error.
pub type MessageStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Trait for cache backend operations
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Sets a string value. `None` clears any TTL on the key.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;

    /// Atomically sets the value only if the key is absent
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool>;

    async fn del(&self, keys: &[&str]) -> CacheResult<()>;

    /// Deletes the key only if it currently holds `expected`
    async fn del_if_eq(&self, key: &str, expected: &str) -> CacheResult<bool>;

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<()>;

    /// Merges the given fields into the hash, creating it if needed
    async fn hset(&self, key: &str, fields: &[(String, String)]) -> CacheResult<()>;

    /// Like `hset`, but leaves a missing key missing. Returns whether the
    /// fields were written.
    async fn hset_existing(&self, key: &str, fields: &[(String, String)]) -> CacheResult<bool>;

    async fn hdel(&self, key: &str, fields: &[String]) -> CacheResult<()>;

    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>>;

    async fn sadd(&self, key: &str, member: &str) -> CacheResult<()>;

    async fn srem(&self, key: &str, member: &str) -> CacheResult<()>;

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>>;

    async fn sismember(&self, key: &str, member: &str) -> CacheResult<bool>;

    /// Fire-and-forget publish; subscribers that are not listening miss it
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> CacheResult<()>;

    async fn subscribe(&self, channel: &str) -> CacheResult<MessageStream>;
}
