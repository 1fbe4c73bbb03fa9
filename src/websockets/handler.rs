use async_trait::async_trait;
use axum::{
    extract::{ws::WebSocket, Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::messages::{ClientFrame, ClientFrameType, ServerFrame};
use super::socket::{Connection, MessageHandler};
use crate::auth::AuthUser;
use crate::presence::{client_info, ClientInfo, PresenceTracker};
use crate::shared::{AppError, AppState};

/// Inbound frame handler: every valid frame counts as activity
pub struct FrameHandler {
    presence: Arc<PresenceTracker>,
}

impl FrameHandler {
    pub fn new(presence: Arc<PresenceTracker>) -> Self {
        Self { presence }
    }
}

#[async_trait]
impl MessageHandler for FrameHandler {
    async fn handle_message(&self, user_id: u64, message: String) -> Option<String> {
        let frame = match serde_json::from_str::<ClientFrame>(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(user_id = user_id, error = %e, "Failed to parse client frame");
                return None;
            }
        };

        if let Err(e) = self.presence.refresh(user_id).await {
            warn!(user_id = user_id, error = %e, "Failed to refresh presence");
        }

        match frame.kind() {
            Some(ClientFrameType::Ping) => Some(ServerFrame::pong().to_json()),
            Some(ClientFrameType::Heartbeat) => None,
            None => {
                debug!(
                    user_id = user_id,
                    frame_type = %frame.frame_type,
                    "Ignoring unknown frame type"
                );
                None
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    token: Option<String>,
}

/// GET /ws?token=... (a bearer Authorization header is accepted too)
#[instrument(name = "websocket_upgrade", skip_all)]
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let token = params
        .token
        .or_else(|| {
            headers
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.strip_prefix("Bearer "))
                .map(str::to_string)
        })
        .ok_or_else(|| {
            warn!("WebSocket upgrade without credentials");
            AppError::Unauthorized("Missing authentication token".to_string())
        })?;

    let user = state.token_validator.validate(&token).await?;
    info!(user_id = user.user_id, "WebSocket authentication successful");

    let client = client_info(&headers);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user, client, state)))
}

async fn handle_socket(socket: WebSocket, user: AuthUser, client: ClientInfo, state: AppState) {
    let user_id = user.user_id;
    let (handle, outbound) = state.hub.new_client(user_id, user.username.clone());
    let connection_id = handle.connection_id;
    let replies = handle.reply_sender();

    if let Err(e) = state.presence.create_session(user_id, client).await {
        warn!(user_id = user_id, error = %e, "Failed to register presence");
    }

    let greeting = ServerFrame::connected(
        user_id,
        state.config.session.heartbeat_interval.as_secs(),
    );
    // queued before registration so it is the first frame out
    if let Err(e) = handle.sender.try_send(greeting.to_json()) {
        warn!(user_id = user_id, error = %e, "Failed to queue greeting");
    }
    state.hub.register(handle).await;
    info!(user_id = user_id, connection_id = %connection_id, "WebSocket connection established");

    let (sink, stream) = socket.split();
    let connection = Connection::new(
        user_id,
        Box::new(stream),
        Box::new(sink),
        outbound,
        replies,
        Arc::new(FrameHandler::new(Arc::clone(&state.presence))),
    );

    match connection.run().await {
        Ok(()) => info!(user_id = user_id, "WebSocket connection closed"),
        Err(e) => warn!(user_id = user_id, error = %e, "WebSocket connection error"),
    }

    // a replaced connection leaves presence to its successor
    if state.hub.unregister(user_id, connection_id).await {
        if let Err(e) = state.presence.delete_session(user_id).await {
            warn!(user_id = user_id, error = %e, "Failed to clear presence");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use std::time::Duration;

    fn handler() -> (Arc<PresenceTracker>, FrameHandler) {
        let presence = Arc::new(PresenceTracker::new(
            Arc::new(InMemoryCache::new()),
            Duration::from_secs(60),
        ));
        (presence.clone(), FrameHandler::new(presence))
    }

    #[tokio::test]
    async fn test_ping_gets_pong_and_refreshes_presence() {
        let (presence, handler) = handler();

        let reply = handler
            .handle_message(5, r#"{"type":"ping"}"#.to_string())
            .await
            .unwrap();

        let frame: ServerFrame = serde_json::from_str(&reply).unwrap();
        assert_eq!(frame.frame_type, "pong");
        assert!(presence.is_online(5).await.unwrap());
    }

    #[tokio::test]
    async fn test_heartbeat_and_unknown_frames_have_no_reply() {
        let (presence, handler) = handler();

        assert!(handler
            .handle_message(5, r#"{"type":"heartbeat"}"#.to_string())
            .await
            .is_none());
        assert!(handler
            .handle_message(6, r#"{"type":"shuffle","data":{}}"#.to_string())
            .await
            .is_none());
        assert!(presence.is_online(5).await.unwrap());
        assert!(presence.is_online(6).await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let (presence, handler) = handler();

        assert!(handler.handle_message(8, "not json".to_string()).await.is_none());
        assert!(!presence.is_online(8).await.unwrap());
    }
}
