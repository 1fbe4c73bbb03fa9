use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument, warn};

use super::models::{GameResults, MembershipModel, RoomModel, RoomStatus};
use super::repository::{RoomFilter, RoomRepository};
use crate::shared::AppError;

const ROOM_COLUMNS: &str = "id, room_code, name, owner_id, status, max_players, current_players, \
     game_type, settings, results, started_at, ended_at, expires_at, created_at, updated_at";

const MEMBERSHIP_COLUMNS: &str = "id, room_id, user_id, is_ready, position, joined_at, left_at";

/// PostgreSQL implementation of the room store.
///
/// Expects two tables:
/// - `rooms`: `id BIGSERIAL`, `room_code TEXT UNIQUE`, `name`, `owner_id BIGINT`,
///   `status TEXT`, `max_players INT`, `current_players INT`, `game_type TEXT`,
///   `settings TEXT`, `results TEXT NULL` and `TIMESTAMPTZ` columns
///   `started_at`, `ended_at`, `expires_at`, `created_at`, `updated_at`
/// - `room_players`: `id BIGSERIAL`, `room_id BIGINT`, `user_id BIGINT`,
///   `is_ready BOOL`, `position INT`, `joined_at TIMESTAMPTZ`, `left_at TIMESTAMPTZ NULL`,
///   with a partial unique index on `(room_id, user_id) WHERE left_at IS NULL`
pub struct PostgresRoomRepository {
    pool: PgPool,
}

impl PostgresRoomRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_error(e: sqlx::Error) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            warn!(error = %e, "Unique constraint violated");
            AppError::conflict("Already exists")
        }
        _ => {
            warn!(error = %e, "Room store query failed");
            AppError::internal(e.to_string())
        }
    }
}

fn room_from_row(row: &PgRow) -> Result<RoomModel, AppError> {
    let status: String = row.try_get("status").map_err(db_error)?;
    let status = RoomStatus::parse(&status)
        .ok_or_else(|| AppError::internal(format!("Unknown room status {}", status)))?;

    let settings: String = row.try_get("settings").map_err(db_error)?;
    let settings = serde_json::from_str(&settings)
        .map_err(|e| AppError::internal(format!("Corrupt room settings: {}", e)))?;

    let results: Option<String> = row.try_get("results").map_err(db_error)?;
    let results = results
        .map(|raw| serde_json::from_str::<GameResults>(&raw))
        .transpose()
        .map_err(|e| AppError::internal(format!("Corrupt room results: {}", e)))?;

    Ok(RoomModel {
        id: row.try_get::<i64, _>("id").map_err(db_error)? as u64,
        room_code: row.try_get("room_code").map_err(db_error)?,
        name: row.try_get("name").map_err(db_error)?,
        owner_id: row.try_get::<i64, _>("owner_id").map_err(db_error)? as u64,
        status,
        max_players: row.try_get("max_players").map_err(db_error)?,
        current_players: row.try_get("current_players").map_err(db_error)?,
        game_type: row.try_get("game_type").map_err(db_error)?,
        settings,
        results,
        started_at: row.try_get("started_at").map_err(db_error)?,
        ended_at: row.try_get("ended_at").map_err(db_error)?,
        expires_at: row.try_get("expires_at").map_err(db_error)?,
        created_at: row.try_get("created_at").map_err(db_error)?,
        updated_at: row.try_get("updated_at").map_err(db_error)?,
    })
}

fn membership_from_row(row: &PgRow) -> Result<MembershipModel, AppError> {
    Ok(MembershipModel {
        id: row.try_get::<i64, _>("id").map_err(db_error)? as u64,
        room_id: row.try_get::<i64, _>("room_id").map_err(db_error)? as u64,
        user_id: row.try_get::<i64, _>("user_id").map_err(db_error)? as u64,
        is_ready: row.try_get("is_ready").map_err(db_error)?,
        position: row.try_get("position").map_err(db_error)?,
        joined_at: row.try_get("joined_at").map_err(db_error)?,
        left_at: row.try_get("left_at").map_err(db_error)?,
    })
}

fn encode_results(results: &Option<GameResults>) -> Result<Option<String>, AppError> {
    results
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| AppError::internal(e.to_string()))
}

#[async_trait]
impl RoomRepository for PostgresRoomRepository {
    #[instrument(skip(self, room))]
    async fn create_room(&self, room: &RoomModel) -> Result<RoomModel, AppError> {
        debug!(room_code = %room.room_code, "Creating room in database");

        let row = sqlx::query(&format!(
            "INSERT INTO rooms (room_code, name, owner_id, status, max_players, current_players, \
             game_type, settings, results, started_at, ended_at, expires_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             RETURNING {}",
            ROOM_COLUMNS
        ))
        .bind(&room.room_code)
        .bind(&room.name)
        .bind(room.owner_id as i64)
        .bind(room.status.as_str())
        .bind(room.max_players)
        .bind(room.current_players)
        .bind(&room.game_type)
        .bind(room.settings.to_string())
        .bind(encode_results(&room.results)?)
        .bind(room.started_at)
        .bind(room.ended_at)
        .bind(room.expires_at)
        .bind(room.created_at)
        .bind(room.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        room_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn get_room(&self, room_id: u64) -> Result<Option<RoomModel>, AppError> {
        let row = sqlx::query(&format!("SELECT {} FROM rooms WHERE id = $1", ROOM_COLUMNS))
            .bind(room_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(room_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn get_room_by_code(&self, room_code: &str) -> Result<Option<RoomModel>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM rooms WHERE room_code = $1",
            ROOM_COLUMNS
        ))
        .bind(room_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref().map(room_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn list_rooms(&self, filter: &RoomFilter) -> Result<Vec<RoomModel>, AppError> {
        let (limit, offset) = filter.page();

        let rows = sqlx::query(&format!(
            "SELECT {} FROM rooms WHERE ($1::TEXT IS NULL OR status = $1) \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
            ROOM_COLUMNS
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(room_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn list_expired_rooms(&self, now: DateTime<Utc>) -> Result<Vec<RoomModel>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM rooms WHERE status = $1 AND expires_at IS NOT NULL AND expires_at <= $2",
            ROOM_COLUMNS
        ))
        .bind(RoomStatus::Waiting.as_str())
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(room_from_row).collect()
    }

    #[instrument(skip(self, room))]
    async fn update_room(&self, room: &RoomModel) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE rooms SET name = $2, owner_id = $3, status = $4, max_players = $5, \
             current_players = $6, game_type = $7, settings = $8, results = $9, started_at = $10, \
             ended_at = $11, expires_at = $12, updated_at = $13 WHERE id = $1",
        )
        .bind(room.id as i64)
        .bind(&room.name)
        .bind(room.owner_id as i64)
        .bind(room.status.as_str())
        .bind(room.max_players)
        .bind(room.current_players)
        .bind(&room.game_type)
        .bind(room.settings.to_string())
        .bind(encode_results(&room.results)?)
        .bind(room.started_at)
        .bind(room.ended_at)
        .bind(room.expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            warn!(room_id = room.id, "Room not found for update");
            return Err(AppError::not_found("Room not found"));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_room(&self, room_id: u64) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM rooms WHERE id = $1")
            .bind(room_id as i64)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            warn!(room_id = room_id, "Room not found for deletion");
            return Err(AppError::not_found("Room not found"));
        }
        Ok(())
    }

    #[instrument(skip(self, membership))]
    async fn create_membership(
        &self,
        membership: &MembershipModel,
    ) -> Result<MembershipModel, AppError> {
        let row = sqlx::query(&format!(
            "INSERT INTO room_players (room_id, user_id, is_ready, position, joined_at, left_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            MEMBERSHIP_COLUMNS
        ))
        .bind(membership.room_id as i64)
        .bind(membership.user_id as i64)
        .bind(membership.is_ready)
        .bind(membership.position)
        .bind(membership.joined_at)
        .bind(membership.left_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match db_error(e) {
            AppError::Conflict(_) => AppError::conflict("Already in room"),
            other => other,
        })?;

        membership_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn get_active_membership(
        &self,
        room_id: u64,
        user_id: u64,
    ) -> Result<Option<MembershipModel>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM room_players WHERE room_id = $1 AND user_id = $2 AND left_at IS NULL",
            MEMBERSHIP_COLUMNS
        ))
        .bind(room_id as i64)
        .bind(user_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref().map(membership_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn list_active_memberships(
        &self,
        room_id: u64,
    ) -> Result<Vec<MembershipModel>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM room_players WHERE room_id = $1 AND left_at IS NULL ORDER BY position",
            MEMBERSHIP_COLUMNS
        ))
        .bind(room_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(membership_from_row).collect()
    }

    #[instrument(skip(self, membership))]
    async fn update_membership(&self, membership: &MembershipModel) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE room_players SET is_ready = $2, position = $3, left_at = $4 WHERE id = $1",
        )
        .bind(membership.id as i64)
        .bind(membership.is_ready)
        .bind(membership.position)
        .bind(membership.left_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("Membership not found"));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn close_membership(
        &self,
        room_id: u64,
        user_id: u64,
        left_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE room_players SET left_at = $3 \
             WHERE room_id = $1 AND user_id = $2 AND left_at IS NULL",
        )
        .bind(room_id as i64)
        .bind(user_id as i64)
        .bind(left_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }
}
