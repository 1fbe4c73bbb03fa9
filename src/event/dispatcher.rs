use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{
    bus::EventBus,
    events::GameEvent,
    handler::{EventError, EventHandler},
};
use crate::shared::AppError;

/// Subscribes to one bus channel and routes every event to its handlers.
///
/// Handlers run concurrently for a given event, each with its own timeout
/// and retry budget, and the next event is taken only once all of them have
/// finished. A failing handler never affects the others.
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
    event_bus: EventBus,
    channel: String,
    handler_timeout: Duration,
    max_retries: u32,
}

impl EventDispatcher {
    pub fn new(event_bus: EventBus, channel: impl Into<String>) -> Self {
        Self {
            handlers: Vec::new(),
            event_bus,
            channel: channel.into(),
            handler_timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn add_handler(&mut self, handler: Arc<dyn EventHandler>) {
        info!(handler_name = handler.name(), "Registering event handler");
        self.handlers.push(handler);
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Subscribes, then spawns the dispatch loop. The subscription is live
    /// when this returns. The task ends when the channel's transport ends.
    pub async fn start_listening(self) -> Result<JoinHandle<()>, AppError> {
        let mut stream = self.event_bus.subscribe(&self.channel).await?;
        let handlers = self.handlers;
        let channel = self.channel;
        let handler_timeout = self.handler_timeout;
        let max_retries = self.max_retries;

        info!(
            channel = %channel,
            handler_count = handlers.len(),
            timeout_ms = handler_timeout.as_millis() as u64,
            max_retries = max_retries,
            "Starting event dispatcher"
        );

        Ok(tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                debug!(
                    event_type = %event.event_type,
                    room_id = event.room_id,
                    "Dispatching event to {} handlers",
                    handlers.len()
                );

                join_all(handlers.iter().map(|handler| {
                    Self::handle_with_retry(handler.as_ref(), &event, handler_timeout, max_retries)
                }))
                .await;
            }

            warn!(channel = %channel, "Event dispatcher stopped, subscription ended");
        }))
    }

    async fn handle_with_retry(
        handler: &dyn EventHandler,
        event: &GameEvent,
        handler_timeout: Duration,
        max_retries: u32,
    ) -> Result<(), EventError> {
        let handler_name = handler.name();
        let mut attempt = 0;

        loop {
            let outcome = match timeout(handler_timeout, handler.handle(event)).await {
                Ok(result) => result,
                Err(_) => Err(EventError::Timeout),
            };

            match outcome {
                Ok(()) => {
                    if attempt > 0 {
                        info!(
                            handler = handler_name,
                            event_type = %event.event_type,
                            attempt = attempt + 1,
                            "Handler succeeded after retry"
                        );
                    }
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    warn!(
                        handler = handler_name,
                        event_type = %event.event_type,
                        room_id = event.room_id,
                        attempt = attempt + 1,
                        error = %e,
                        "Handler failed, will retry"
                    );
                    // exponential backoff
                    tokio::time::sleep(Duration::from_millis(100 * 2_u64.pow(attempt))).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        handler = handler_name,
                        event_type = %event.event_type,
                        room_id = event.room_id,
                        attempt = attempt + 1,
                        error = %e,
                        "Handler failed permanently"
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::event::EventType;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::sleep;

    const CHANNEL: &str = "game:events";

    struct CountingHandler {
        name: &'static str,
        call_count: AtomicU32,
    }

    impl CountingHandler {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                call_count: AtomicU32::new(0),
            })
        }

        fn call_count(&self) -> u32 {
            self.call_count.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: &GameEvent) -> Result<(), EventError> {
            self.call_count.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn name(&self) -> &'static str {
            self.name
        }
    }

    struct FailingHandler {
        fail_count: AtomicU32,
        max_failures: u32,
        retryable: bool,
    }

    impl FailingHandler {
        fn new(max_failures: u32, retryable: bool) -> Arc<Self> {
            Arc::new(Self {
                fail_count: AtomicU32::new(0),
                max_failures,
                retryable,
            })
        }
    }

    #[async_trait]
    impl EventHandler for FailingHandler {
        async fn handle(&self, _event: &GameEvent) -> Result<(), EventError> {
            let current = self.fail_count.fetch_add(1, Ordering::Relaxed);
            if current < self.max_failures {
                if self.retryable {
                    Err(EventError::retryable("Simulated failure"))
                } else {
                    Err(EventError::non_retryable("Simulated failure"))
                }
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &'static str {
            "FailingHandler"
        }
    }

    fn bus() -> EventBus {
        EventBus::new(Arc::new(InMemoryCache::new()))
    }

    #[tokio::test]
    async fn test_dispatcher_basic_functionality() {
        let event_bus = bus();
        let mut dispatcher = EventDispatcher::new(event_bus.clone(), CHANNEL);

        let handler1 = CountingHandler::new("handler1");
        let handler2 = CountingHandler::new("handler2");
        dispatcher.add_handler(handler1.clone());
        dispatcher.add_handler(handler2.clone());

        dispatcher.start_listening().await.unwrap();

        event_bus
            .publish(CHANNEL, &GameEvent::new(EventType::RoomCreated, 1))
            .await
            .unwrap();
        sleep(Duration::from_millis(50)).await;

        assert_eq!(handler1.call_count(), 1);
        assert_eq!(handler2.call_count(), 1);
    }

    #[tokio::test]
    async fn test_dispatcher_retry_logic() {
        let event_bus = bus();
        let mut dispatcher = EventDispatcher::new(event_bus.clone(), CHANNEL)
            .with_max_retries(3)
            .with_handler_timeout(Duration::from_millis(100));

        // fails twice then succeeds
        let handler = FailingHandler::new(2, true);
        dispatcher.add_handler(handler.clone());
        dispatcher.start_listening().await.unwrap();

        event_bus
            .publish(CHANNEL, &GameEvent::new(EventType::GameStart, 1))
            .await
            .unwrap();
        sleep(Duration::from_millis(1000)).await;

        assert_eq!(handler.fail_count.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_is_not_retried() {
        let event_bus = bus();
        let mut dispatcher = EventDispatcher::new(event_bus.clone(), CHANNEL);

        let failing = FailingHandler::new(5, false);
        let counting = CountingHandler::new("counting");
        dispatcher.add_handler(failing.clone());
        dispatcher.add_handler(counting.clone());
        dispatcher.start_listening().await.unwrap();

        event_bus
            .publish(CHANNEL, &GameEvent::new(EventType::GameEnd, 1))
            .await
            .unwrap();
        event_bus
            .publish(CHANNEL, &GameEvent::new(EventType::GameEnd, 2))
            .await
            .unwrap();
        sleep(Duration::from_millis(100)).await;

        assert_eq!(failing.fail_count.load(Ordering::Relaxed), 2);
        assert_eq!(counting.call_count(), 2);
    }
}
