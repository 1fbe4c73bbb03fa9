use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::events::GameEvent;
use crate::cache::{CacheBackend, MessageStream};
use crate::shared::AppError;

/// Event bus over the cache backend's pub/sub channels.
///
/// Publishing is fire-and-forget; only subscribers listening at that moment
/// receive the event.
#[derive(Clone)]
pub struct EventBus {
    cache: Arc<dyn CacheBackend>,
}

impl EventBus {
    pub fn new(cache: Arc<dyn CacheBackend>) -> Self {
        Self { cache }
    }

    pub async fn publish(&self, channel: &str, event: &GameEvent) -> Result<(), AppError> {
        let payload = serde_json::to_vec(event).map_err(|e| AppError::internal(e.to_string()))?;
        self.cache.publish(channel, payload).await?;

        debug!(
            channel = %channel,
            event_type = %event.event_type,
            room_id = event.room_id,
            "Event published"
        );
        Ok(())
    }

    /// Subscribes before returning, so events published after this call
    /// completes are delivered
    pub async fn subscribe(&self, channel: &str) -> Result<EventStream, AppError> {
        let inner = self.cache.subscribe(channel).await?;
        Ok(EventStream {
            channel: channel.to_string(),
            inner,
        })
    }
}

/// Decoded events from one channel
pub struct EventStream {
    channel: String,
    inner: MessageStream,
}

impl EventStream {
    /// Next well-formed event. Malformed payloads are logged and skipped;
    /// `None` once the transport ends.
    pub async fn next(&mut self) -> Option<GameEvent> {
        loop {
            let payload = self.inner.next().await?;
            match serde_json::from_slice::<GameEvent>(&payload) {
                Ok(event) => return Some(event),
                Err(e) => {
                    warn!(
                        channel = %self.channel,
                        error = %e,
                        bytes = payload.len(),
                        "Skipping malformed event"
                    );
                }
            }
        }
    }
}
