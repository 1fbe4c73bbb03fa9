use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::manager::{LockManager, LockToken};
use crate::shared::AppError;

/// Scoped lock. Call `release` on the normal path; if the guard is dropped
/// while still holding (early return, cancelled future, panic) the release
/// is spawned onto the runtime instead.
pub struct LockGuard {
    manager: Arc<dyn LockManager>,
    key: String,
    token: Option<LockToken>,
}

impl LockGuard {
    /// Single attempt. Contention is `Conflict`, backend failure is `Internal`.
    pub async fn acquire(
        manager: Arc<dyn LockManager>,
        key: impl Into<String>,
        ttl: Duration,
    ) -> Result<Self, AppError> {
        let key = key.into();
        match manager.acquire(&key, ttl).await? {
            Some(token) => Ok(Self {
                manager,
                key,
                token: Some(token),
            }),
            None => {
                debug!(key = %key, "Lock contention");
                Err(AppError::conflict("Room is busy, retry later"))
            }
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Releases the lock. Failures are logged; the TTL cleans up after us.
    pub async fn release(mut self) {
        if let Some(token) = self.token.take() {
            if let Err(e) = self.manager.release(&self.key, &token).await {
                warn!(key = %self.key, error = %e, "Failed to release lock, waiting for TTL");
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };

        let manager = Arc::clone(&self.manager);
        let key = std::mem::take(&mut self.key);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(key = %key, "Lock guard dropped while held, releasing in background");
                handle.spawn(async move {
                    if let Err(e) = manager.release(&key, &token).await {
                        warn!(key = %key, error = %e, "Background lock release failed");
                    }
                });
            }
            Err(_) => {
                warn!(key = %key, "No runtime to release lock, waiting for TTL");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::lock::CacheLockManager;

    fn locks() -> Arc<dyn LockManager> {
        Arc::new(CacheLockManager::new(Arc::new(InMemoryCache::new())))
    }

    async fn is_free(manager: &Arc<dyn LockManager>, key: &str) -> bool {
        match manager.acquire(key, Duration::from_secs(5)).await.unwrap() {
            Some(token) => {
                manager.release(key, &token).await.unwrap();
                true
            }
            None => false,
        }
    }

    #[tokio::test]
    async fn test_contention_is_conflict() {
        let manager = locks();
        let _guard = LockGuard::acquire(manager.clone(), "room:1", Duration::from_secs(5))
            .await
            .unwrap();

        let second = LockGuard::acquire(manager.clone(), "room:1", Duration::from_secs(5)).await;
        assert!(matches!(second, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_explicit_release() {
        let manager = locks();
        let guard = LockGuard::acquire(manager.clone(), "room:1", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(guard.key(), "room:1");

        guard.release().await;
        assert!(is_free(&manager, "room:1").await);
    }

    #[tokio::test]
    async fn test_drop_releases_in_background() {
        let manager = locks();
        {
            let _guard = LockGuard::acquire(manager.clone(), "room:1", Duration::from_secs(5))
                .await
                .unwrap();
        }

        // let the spawned release run
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(is_free(&manager, "room:1").await);
    }

    #[tokio::test]
    async fn test_cancelled_holder_releases() {
        let manager = locks();
        let holder = {
            let manager = manager.clone();
            tokio::spawn(async move {
                let _guard = LockGuard::acquire(manager, "room:1", Duration::from_secs(5))
                    .await
                    .unwrap();
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!is_free(&manager, "room:1").await);

        holder.abort();
        let _ = holder.await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(is_free(&manager, "room:1").await);
    }
}
