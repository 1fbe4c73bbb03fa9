use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method,
    },
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use std::any::Any;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any as AnyOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::error;

use crate::auth::bearer_auth;
use crate::presence;
use crate::room;
use crate::shared::{AppError, AppState};
use crate::websockets::websocket_handler;

/// Builds the HTTP/WebSocket surface
pub fn build_router(state: AppState) -> Router {
    let game = Router::new()
        .route("/rooms", post(room::create_room).get(room::list_rooms))
        .route("/rooms/join", post(room::join_room))
        .route("/rooms/:id", get(room::get_room).delete(room::cancel_room))
        .route("/rooms/:id/leave", post(room::leave_room))
        .route("/rooms/:id/start", post(room::start_game))
        .route("/rooms/:id/end", post(room::end_game))
        .route("/rooms/:id/ready", post(room::set_ready))
        .route(
            "/rooms/:id/state",
            get(room::get_game_state).put(room::update_game_state),
        );

    let presence = Router::new()
        .route("/heartbeat", post(presence::heartbeat))
        .route("/", delete(presence::logout))
        .route("/:user_id", get(presence::get_presence));

    let authenticated = Router::new()
        .nest("/game", game)
        .nest("/presence", presence)
        .layer(middleware::from_fn_with_state(state.clone(), bearer_auth));

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_origin(AnyOrigin)
        .allow_headers([CONTENT_TYPE, AUTHORIZATION]);

    Router::new()
        .nest("/api/v1", authenticated)
        .route("/ws", get(websocket_handler))
        .route("/health", get(health))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = %detail, "Request handler panicked");
    AppError::internal(detail).into_response()
}
