use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use super::connection_manager::ConnectionManager;
use crate::event::{EventError, EventHandler, GameEvent};
use crate::room::service::RoomService;
use crate::shared::AppError;

/// Pushes each lifecycle event to the live connections of the room's
/// active members, plus the user the event is about. Recipients are
/// resolved from the store at delivery time.
pub struct HubEventForwarder {
    room_service: Arc<RoomService>,
    connections: Arc<dyn ConnectionManager>,
}

impl HubEventForwarder {
    pub fn new(room_service: Arc<RoomService>, connections: Arc<dyn ConnectionManager>) -> Self {
        Self {
            room_service,
            connections,
        }
    }

    async fn recipients(&self, event: &GameEvent) -> Result<Vec<u64>, EventError> {
        let mut recipients = BTreeSet::new();
        match self.room_service.get_room_members(event.room_id).await {
            Ok(members) => recipients.extend(members.iter().map(|m| m.user_id)),
            // closed rooms only reach the acting user
            Err(AppError::NotFound(_)) => {}
            Err(e) => return Err(EventError::retryable(e.to_string())),
        }
        recipients.extend(event.user_id);
        Ok(recipients.into_iter().collect())
    }
}

#[async_trait]
impl EventHandler for HubEventForwarder {
    async fn handle(&self, event: &GameEvent) -> Result<(), EventError> {
        let recipients = self.recipients(event).await?;
        if recipients.is_empty() {
            return Ok(());
        }

        let payload =
            serde_json::to_string(event).map_err(|e| EventError::non_retryable(e.to_string()))?;
        let delivered = self.connections.send_to_users(&recipients, &payload).await;
        debug!(
            event_type = %event.event_type,
            room_id = event.room_id,
            recipients = recipients.len(),
            delivered = delivered,
            "Event forwarded to live connections"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "hub_event_forwarder"
    }
}
