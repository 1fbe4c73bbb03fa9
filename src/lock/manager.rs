use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::cache::CacheBackend;
use crate::shared::AppError;

const LOCK_PREFIX: &str = "lock:";

/// Opaque proof of holding a lock. Release only succeeds with the token
/// that is currently stored for the key.
#[derive(Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    pub fn generate() -> Self {
        LockToken(format!("{:032x}", rand::random::<u128>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // first 8 chars are enough to correlate log lines
        write!(f, "LockToken({}..)", &self.0[..8.min(self.0.len())])
    }
}

/// Trait for named advisory locks
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Non-blocking set-if-absent with expiry. `None` when the key is held.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>, AppError>;

    /// Deletes the lock only if `token` is the current holder.
    /// Returns whether anything was released.
    async fn release(&self, key: &str, token: &LockToken) -> Result<bool, AppError>;
}

/// LockManager backed by the shared cache (`SET NX PX` / compare-and-delete)
pub struct CacheLockManager {
    cache: Arc<dyn CacheBackend>,
}

impl CacheLockManager {
    pub fn new(cache: Arc<dyn CacheBackend>) -> Self {
        Self { cache }
    }

    fn full_key(key: &str) -> String {
        format!("{}{}", LOCK_PREFIX, key)
    }
}

#[async_trait]
impl LockManager for CacheLockManager {
    #[instrument(skip(self))]
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>, AppError> {
        let token = LockToken::generate();
        let acquired = self
            .cache
            .set_nx(&Self::full_key(key), token.as_str(), ttl)
            .await
            .map_err(|e| {
                warn!(key = %key, error = %e, "Lock backend unavailable on acquire");
                AppError::from(e)
            })?;

        if acquired {
            debug!(key = %key, "Lock acquired");
            Ok(Some(token))
        } else {
            debug!(key = %key, "Lock already held");
            Ok(None)
        }
    }

    #[instrument(skip(self, token))]
    async fn release(&self, key: &str, token: &LockToken) -> Result<bool, AppError> {
        let released = self
            .cache
            .del_if_eq(&Self::full_key(key), token.as_str())
            .await?;

        if released {
            debug!(key = %key, "Lock released");
        } else {
            // expired and possibly taken by someone else; leave it alone
            warn!(key = %key, "Lock release skipped, token no longer holds the key");
        }
        Ok(released)
    }
}
