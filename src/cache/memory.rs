use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::backend::{CacheBackend, CacheError, CacheResult, MessageStream};

enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-memory implementation of CacheBackend for development and testing
///
/// TTLs are enforced lazily: an expired key is dropped the next time it is
/// touched. Pub/sub uses one tokio broadcast channel per channel name.
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    channels: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    channel_capacity: usize,
    unavailable: AtomicBool,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::with_channel_capacity(1024)
    }

    pub fn with_channel_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            channel_capacity: capacity.max(1),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent operation fail, simulating an outage
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Remaining TTL of a key, if it exists and has one
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.lock().ok()?;
        let expires_at = entries.get(key)?.expires_at?;
        Some(expires_at.saturating_duration_since(Instant::now()))
    }

    fn check_available(&self) -> CacheResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("cache unavailable".to_string()));
        }
        Ok(())
    }

    fn entries(&self) -> CacheResult<MutexGuard<'_, HashMap<String, Entry>>> {
        self.check_available()?;
        self.entries
            .lock()
            .map_err(|_| CacheError::Backend("cache lock poisoned".to_string()))
    }

    fn sender(&self, channel: &str) -> CacheResult<broadcast::Sender<Vec<u8>>> {
        self.check_available()?;
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| CacheError::Backend("channel lock poisoned".to_string()))?;
        Ok(channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .clone())
    }
}

/// Returns the live entry for `key`, dropping it first if it has expired
fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|e| e.is_expired(Instant::now())) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut entries = self.entries()?;
        match live(&mut entries, key) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let mut entries = self.entries()?;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let mut entries = self.entries()?;
        if live(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn del(&self, keys: &[&str]) -> CacheResult<()> {
        let mut entries = self.entries()?;
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> CacheResult<bool> {
        let mut entries = self.entries()?;
        let matches = matches!(
            live(&mut entries, key),
            Some(Entry { value: Value::Str(s), .. }) if s.as_str() == expected
        );
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<()> {
        let mut entries = self.entries()?;
        if let Some(entry) = live(&mut entries, key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> CacheResult<()> {
        let mut entries = self.entries()?;
        if live(&mut entries, key).is_none() {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Hash(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        match entries.get_mut(key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => {
                for (field, value) in fields {
                    hash.insert(field.clone(), value.clone());
                }
                Ok(())
            }
            _ => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn hset_existing(&self, key: &str, fields: &[(String, String)]) -> CacheResult<bool> {
        let mut entries = self.entries()?;
        match live(&mut entries, key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => {
                for (field, value) in fields {
                    hash.insert(field.clone(), value.clone());
                }
                Ok(true)
            }
            Some(_) => Err(CacheError::WrongType(key.to_string())),
            None => Ok(false),
        }
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> CacheResult<()> {
        let mut entries = self.entries()?;
        let now_empty = match live(&mut entries, key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => {
                for field in fields {
                    hash.remove(field);
                }
                hash.is_empty()
            }
            Some(_) => return Err(CacheError::WrongType(key.to_string())),
            None => false,
        };
        if now_empty {
            entries.remove(key);
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        let mut entries = self.entries()?;
        match live(&mut entries, key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.clone()),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
            None => Ok(HashMap::new()),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> CacheResult<()> {
        let mut entries = self.entries()?;
        if live(&mut entries, key).is_none() {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Set(HashSet::new()),
                    expires_at: None,
                },
            );
        }
        match entries.get_mut(key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => {
                set.insert(member.to_string());
                Ok(())
            }
            _ => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn srem(&self, key: &str, member: &str) -> CacheResult<()> {
        let mut entries = self.entries()?;
        let now_empty = match live(&mut entries, key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => {
                set.remove(member);
                set.is_empty()
            }
            Some(_) => return Err(CacheError::WrongType(key.to_string())),
            None => false,
        };
        // Redis drops empty sets
        if now_empty {
            entries.remove(key);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>> {
        let mut entries = self.entries()?;
        match live(&mut entries, key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
            None => Ok(Vec::new()),
        }
    }

    async fn sismember(&self, key: &str, member: &str) -> CacheResult<bool> {
        let mut entries = self.entries()?;
        match live(&mut entries, key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.contains(member)),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
            None => Ok(false),
        }
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> CacheResult<()> {
        let sender = self.sender(channel)?;
        match sender.send(payload) {
            Ok(receivers) => debug!(channel = %channel, receivers, "Message published"),
            Err(_) => debug!(channel = %channel, "Message published with no subscribers"),
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> CacheResult<MessageStream> {
        let receiver = self.sender(channel)?.subscribe();
        let channel = channel.to_string();

        let stream = futures::stream::unfold(
            (receiver, channel),
            |(mut receiver, channel)| async move {
                loop {
                    match receiver.recv().await {
                        Ok(payload) => return Some((payload, (receiver, channel))),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(channel = %channel, skipped, "Subscriber lagged, messages dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}
