use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use chrono::Utc;
use tracing::{info, instrument};

use super::models::{ClientInfo, PresenceRecord, PresenceResponse};
use crate::auth::AuthUser;
use crate::shared::{AppError, AppState};

/// Client metadata from proxy and user-agent headers
pub fn client_info(headers: &HeaderMap) -> ClientInfo {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    ClientInfo {
        ip_address: header("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string())),
        user_agent: header("user-agent"),
    }
}

/// POST /presence/heartbeat
#[instrument(name = "presence_heartbeat", skip(state, headers), fields(user_id = user.user_id))]
pub async fn heartbeat(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
) -> Result<Json<PresenceRecord>, AppError> {
    let record = match state.presence.get_session(user.user_id).await? {
        Some(_) => state.presence.refresh(user.user_id).await?,
        None => {
            info!("Starting presence session");
            state
                .presence
                .create_session(user.user_id, client_info(&headers))
                .await?
        }
    };
    Ok(Json(record))
}

/// DELETE /presence
#[instrument(name = "presence_logout", skip(state), fields(user_id = user.user_id))]
pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<StatusCode, AppError> {
    state.presence.delete_session(user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /presence/:user_id
#[instrument(name = "get_presence", skip(state))]
pub async fn get_presence(
    State(state): State<AppState>,
    Path(user_id): Path<u64>,
) -> Result<Json<PresenceResponse>, AppError> {
    let online = state.presence.is_online(user_id).await?;
    let session = state.presence.get_session(user_id).await?;
    let timed_out = session
        .as_ref()
        .map(|record| state.presence.is_timed_out(record, Utc::now()))
        .unwrap_or(true);

    Ok(Json(PresenceResponse {
        user_id,
        online,
        timed_out,
        session,
    }))
}
