use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::{
    cache::{RoomCacheMirror, READY_FIELD_PREFIX, ROOM_FIELDS},
    models::{generate_room_code, GameResults, MembershipModel, RoomModel, RoomStatus},
    repository::{RoomFilter, RoomRepository},
    types::{CreateRoomRequest, LeaveRoomResponse, RoomDetailsResponse},
};
use crate::cache::CacheResult;
use crate::config::RoomConfig;
use crate::event::{EventBus, EventType, GameEvent};
use crate::lock::{room_code_lock_key, room_lock_key, LockGuard, LockManager};
use crate::shared::AppError;

const CODE_ATTEMPTS: usize = 5;
const MAX_NAME_LEN: usize = 100;
const MAX_GAME_TYPE_LEN: usize = 50;

/// Room lifecycle orchestrator.
///
/// Every mutation runs under the room's lock and follows the same order:
/// store write, cache mirror, unlock, publish. The store is the only source
/// of truth; mirror failures after a successful store write are logged and
/// left for the next mutation (or `rebuild_cache`) to heal. Lock contention
/// is returned as `Conflict` and never retried here.
pub struct RoomService {
    repository: Arc<dyn RoomRepository>,
    mirror: RoomCacheMirror,
    locks: Arc<dyn LockManager>,
    event_bus: EventBus,
    config: RoomConfig,
    channel: String,
}

impl RoomService {
    pub fn new(
        repository: Arc<dyn RoomRepository>,
        mirror: RoomCacheMirror,
        locks: Arc<dyn LockManager>,
        event_bus: EventBus,
        config: RoomConfig,
        channel: String,
    ) -> Self {
        Self {
            repository,
            mirror,
            locks,
            event_bus,
            config,
            channel,
        }
    }

    async fn lock(&self, key: String) -> Result<LockGuard, AppError> {
        LockGuard::acquire(Arc::clone(&self.locks), key, self.config.lock_ttl).await
    }

    fn log_mirror(room_id: u64, step: &'static str, result: CacheResult<()>) {
        if let Err(e) = result {
            warn!(room_id = room_id, step = step, error = %e, "Cache mirror update failed");
        }
    }

    async fn publish(&self, event: GameEvent) {
        if let Err(e) = self.event_bus.publish(&self.channel, &event).await {
            warn!(
                event_type = %event.event_type,
                room_id = event.room_id,
                error = %e,
                "Failed to publish event"
            );
        }
    }

    async fn require_room(&self, room_id: u64) -> Result<RoomModel, AppError> {
        self.repository
            .get_room(room_id)
            .await?
            .ok_or_else(|| AppError::not_found("Room not found"))
    }

    /// Creates a Waiting room with the owner seated at position 0.
    /// Either the room, the owner membership and the mirror all exist
    /// afterwards, or none of them do.
    #[instrument(skip(self, request))]
    pub async fn create_room(
        &self,
        owner_id: u64,
        request: CreateRoomRequest,
    ) -> Result<RoomModel, AppError> {
        let name = request.name.trim().to_string();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(AppError::InvalidInput(format!(
                "Room name must be 1 to {} characters",
                MAX_NAME_LEN
            )));
        }
        if request.game_type.chars().count() > MAX_GAME_TYPE_LEN {
            return Err(AppError::InvalidInput(format!(
                "Game type must be at most {} characters",
                MAX_GAME_TYPE_LEN
            )));
        }
        let max_players = request.max_players.unwrap_or(self.config.max_players);
        if max_players < 1 || max_players > self.config.max_players {
            return Err(AppError::InvalidInput(format!(
                "max_players must be between 1 and {}",
                self.config.max_players
            )));
        }
        let settings = request
            .settings
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
        let timeout = chrono::Duration::from_std(self.config.default_timeout)
            .map_err(|e| AppError::internal(e.to_string()))?;

        for attempt in 1..=CODE_ATTEMPTS {
            let room_code = generate_room_code();
            let guard = match self.lock(room_code_lock_key(&room_code)).await {
                Ok(guard) => guard,
                Err(AppError::Conflict(_)) => {
                    debug!(attempt = attempt, "Room code busy, trying another");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let mut room = RoomModel::new(
                room_code,
                name.clone(),
                owner_id,
                max_players,
                request.game_type.clone(),
                settings.clone(),
                Some(Utc::now() + timeout),
            );

            let result = self.create_locked(room).await;
            guard.release().await;

            match result {
                Ok(room) => {
                    info!(
                        room_id = room.id,
                        room_code = %room.room_code,
                        owner_id = owner_id,
                        "Room created successfully"
                    );
                    self.publish(
                        GameEvent::new(EventType::RoomCreated, room.id)
                            .with_user(owner_id)
                            .with_data("room", &room),
                    )
                    .await;
                    return Ok(room);
                }
                Err(AppError::Conflict(_)) => {
                    debug!(attempt = attempt, "Room code collision, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        error!("Could not allocate a unique room code");
        Err(AppError::internal("Could not allocate a unique room code"))
    }

    /// Inserts the room empty, seats the owner, then counts them
    async fn create_locked(&self, room: RoomModel) -> Result<RoomModel, AppError> {
        let mut room = self.repository.create_room(&room).await?;

        let owner = MembershipModel::new(room.id, room.owner_id, 0);
        if let Err(e) = self.repository.create_membership(&owner).await {
            warn!(room_id = room.id, error = %e, "Owner membership insert failed, rolling back room");
            self.rollback_create(&room, false).await;
            return Err(AppError::internal(format!("Failed to seat room owner: {}", e)));
        }

        room.current_players = 1;
        if let Err(e) = self.repository.update_room(&room).await {
            warn!(room_id = room.id, error = %e, "Owner occupancy update failed, rolling back room");
            self.rollback_create(&room, true).await;
            return Err(e);
        }

        if let Err(e) = self.mirror_new_room(&room).await {
            warn!(room_id = room.id, error = %e, "Cache mirror failed on create, rolling back room");
            self.rollback_create(&room, true).await;
            return Err(e.into());
        }

        Ok(room)
    }

    async fn mirror_new_room(&self, room: &RoomModel) -> CacheResult<()> {
        self.mirror.mirror_room(room).await?;
        self.mirror.add_player(room.id, room.owner_id).await
    }

    async fn rollback_create(&self, room: &RoomModel, membership_created: bool) {
        if membership_created {
            if let Err(e) = self
                .repository
                .close_membership(room.id, room.owner_id, Utc::now())
                .await
            {
                error!(room_id = room.id, error = %e, "Rollback failed to close owner membership");
            }
        }
        if let Err(e) = self.repository.delete_room(room.id).await {
            error!(room_id = room.id, error = %e, "Rollback failed to delete room");
        }
        Self::log_mirror(room.id, "rollback", self.mirror.delete_room(room.id).await);
    }

    /// Joins a Waiting room by share code, taking the lowest free seat
    #[instrument(skip(self))]
    pub async fn join_room(&self, user_id: u64, room_code: &str) -> Result<RoomModel, AppError> {
        let room_code = room_code.trim();
        if room_code.is_empty() {
            return Err(AppError::InvalidInput("Room code is required".to_string()));
        }

        let room = self
            .repository
            .get_room_by_code(room_code)
            .await?
            .ok_or_else(|| AppError::not_found("Room not found"))?;

        let guard = self.lock(room_lock_key(room.id)).await?;
        let result = self.join_locked(user_id, room.id).await;
        guard.release().await;
        let (room, membership) = result?;

        info!(
            room_id = room.id,
            user_id = user_id,
            position = membership.position,
            current_players = room.current_players,
            "Player joined room"
        );
        self.publish(
            GameEvent::new(EventType::PlayerJoined, room.id)
                .with_user(user_id)
                .with_data("position", membership.position)
                .with_data("room", &room),
        )
        .await;

        Ok(room)
    }

    async fn join_locked(
        &self,
        user_id: u64,
        room_id: u64,
    ) -> Result<(RoomModel, MembershipModel), AppError> {
        // re-read under the lock; the code lookup may be stale
        let mut room = self.require_room(room_id).await?;
        if room.status != RoomStatus::Waiting {
            return Err(AppError::conflict("Room has already started or ended"));
        }

        let members = self.repository.list_active_memberships(room_id).await?;
        if members.len() as i32 >= room.max_players {
            return Err(AppError::conflict("Room is full"));
        }
        if members.iter().any(|m| m.user_id == user_id) {
            return Err(AppError::conflict("Already in room"));
        }

        let position = first_free_seat(&members);
        let membership = self
            .repository
            .create_membership(&MembershipModel::new(room_id, user_id, position))
            .await?;

        room.current_players = members.len() as i32 + 1;
        if let Err(e) = self.repository.update_room(&room).await {
            warn!(room_id = room_id, error = %e, "Occupancy update failed, closing new membership");
            if let Err(close_err) = self
                .repository
                .close_membership(room_id, user_id, Utc::now())
                .await
            {
                error!(room_id = room_id, error = %close_err, "Failed to close membership after join failure");
            }
            return Err(e);
        }

        Self::log_mirror(room_id, "room", self.mirror.mirror_room(&room).await);
        Self::log_mirror(
            room_id,
            "add_player",
            self.mirror.add_player(room_id, user_id).await,
        );

        Ok((room, membership))
    }

    /// Closes the user's membership. The last member leaving deletes the
    /// room; an owner leaving hands ownership to the lowest remaining seat.
    #[instrument(skip(self))]
    pub async fn leave_room(&self, user_id: u64, room_id: u64) -> Result<LeaveRoomResponse, AppError> {
        let guard = self.lock(room_lock_key(room_id)).await?;
        let result = self.leave_locked(user_id, room_id).await;
        guard.release().await;
        let outcome = result?;

        let mut left = GameEvent::new(EventType::PlayerLeft, room_id).with_user(user_id);
        if let Some(room) = &outcome.room {
            left = left.with_data("room", room);
        }
        self.publish(left).await;

        if outcome.room_closed {
            info!(room_id = room_id, "Last player left, room closed");
            self.publish(GameEvent::new(EventType::RoomClosed, room_id).with_user(user_id))
                .await;
        }

        Ok(outcome)
    }

    async fn leave_locked(&self, user_id: u64, room_id: u64) -> Result<LeaveRoomResponse, AppError> {
        let mut room = self.require_room(room_id).await?;
        let mut membership = self
            .repository
            .get_active_membership(room_id, user_id)
            .await?
            .ok_or_else(|| AppError::not_found("Not a member of this room"))?;

        membership.left_at = Some(Utc::now());
        self.repository.update_membership(&membership).await?;

        let remaining = self.repository.list_active_memberships(room_id).await?;
        room.current_players = remaining.len() as i32;

        let store_result = if remaining.is_empty() {
            self.repository.delete_room(room_id).await
        } else {
            if room.owner_id == user_id {
                if let Some(next) = remaining.first() {
                    info!(
                        room_id = room_id,
                        old_owner = user_id,
                        new_owner = next.user_id,
                        "Owner left, assigning new owner"
                    );
                    room.owner_id = next.user_id;
                }
            }
            self.repository.update_room(&room).await
        };

        if let Err(e) = store_result {
            // reopen so occupancy and active memberships stay in agreement
            warn!(room_id = room_id, error = %e, "Room update failed on leave, reopening membership");
            membership.left_at = None;
            if let Err(reopen_err) = self.repository.update_membership(&membership).await {
                error!(room_id = room_id, error = %reopen_err, "Failed to reopen membership");
            }
            return Err(e);
        }

        if remaining.is_empty() {
            Self::log_mirror(room_id, "delete", self.mirror.delete_room(room_id).await);
            return Ok(LeaveRoomResponse {
                room_id,
                room_closed: true,
                room: None,
            });
        }

        Self::log_mirror(room_id, "room", self.mirror.mirror_room(&room).await);
        Self::log_mirror(
            room_id,
            "remove_player",
            self.mirror.remove_player(room_id, user_id).await,
        );

        Ok(LeaveRoomResponse {
            room_id,
            room_closed: false,
            room: Some(room),
        })
    }

    /// Waiting -> Playing. `requested_by`, when given, must be the owner.
    #[instrument(skip(self))]
    pub async fn start_game(
        &self,
        room_id: u64,
        requested_by: Option<u64>,
    ) -> Result<RoomModel, AppError> {
        let guard = self.lock(room_lock_key(room_id)).await?;
        let result = self
            .transition_locked(room_id, requested_by, RoomStatus::Playing, None)
            .await;
        guard.release().await;
        let room = result?;

        info!(room_id = room_id, players = room.current_players, "Game started");
        self.publish(GameEvent::new(EventType::GameStart, room_id).with_data("room", &room))
            .await;
        Ok(room)
    }

    /// Playing -> Finished, recording the results
    #[instrument(skip(self, results))]
    pub async fn end_game(
        &self,
        room_id: u64,
        results: GameResults,
        requested_by: Option<u64>,
    ) -> Result<RoomModel, AppError> {
        let guard = self.lock(room_lock_key(room_id)).await?;
        let result = self
            .transition_locked(room_id, requested_by, RoomStatus::Finished, Some(results))
            .await;
        guard.release().await;
        let room = result?;

        info!(room_id = room_id, "Game ended");
        self.publish(
            GameEvent::new(EventType::GameEnd, room_id)
                .with_data("results", &room.results)
                .with_data("room", &room),
        )
        .await;
        Ok(room)
    }

    /// Waiting -> Cancelled
    #[instrument(skip(self))]
    pub async fn cancel_room(
        &self,
        room_id: u64,
        requested_by: Option<u64>,
    ) -> Result<RoomModel, AppError> {
        let guard = self.lock(room_lock_key(room_id)).await?;
        let result = self
            .transition_locked(room_id, requested_by, RoomStatus::Cancelled, None)
            .await;
        guard.release().await;
        let room = result?;

        info!(room_id = room_id, "Room cancelled");
        self.publish(
            GameEvent::new(EventType::RoomCancelled, room_id)
                .with_data("reason", "cancelled")
                .with_data("room", &room),
        )
        .await;
        Ok(room)
    }

    async fn transition_locked(
        &self,
        room_id: u64,
        requested_by: Option<u64>,
        next: RoomStatus,
        results: Option<GameResults>,
    ) -> Result<RoomModel, AppError> {
        let mut room = self.require_room(room_id).await?;

        if let Some(user_id) = requested_by {
            if room.owner_id != user_id {
                return Err(AppError::Forbidden(
                    "Only the room owner can do this".to_string(),
                ));
            }
        }
        if !room.status.can_transition_to(next) {
            return Err(AppError::Conflict(format!(
                "Room is {}, cannot become {}",
                room.status.as_str(),
                next.as_str()
            )));
        }

        let now = Utc::now();
        room.status = next;
        match next {
            RoomStatus::Playing => room.started_at = Some(now),
            RoomStatus::Finished => {
                room.ended_at = Some(now);
                room.results = results;
            }
            RoomStatus::Cancelled => room.ended_at = Some(now),
            RoomStatus::Waiting => {}
        }

        self.repository.update_room(&room).await?;
        Self::log_mirror(room_id, "room", self.mirror.mirror_room(&room).await);
        Ok(room)
    }

    /// Cancels Waiting rooms past their expiry. Rooms locked by someone else
    /// are left for the next sweep. Returns how many were cancelled.
    #[instrument(skip(self))]
    pub async fn cancel_expired_rooms(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let expired = self.repository.list_expired_rooms(now).await?;
        if expired.is_empty() {
            debug!("No expired rooms");
            return Ok(0);
        }

        let mut cancelled = 0;
        for candidate in expired {
            let guard = match self.lock(room_lock_key(candidate.id)).await {
                Ok(guard) => guard,
                Err(AppError::Conflict(_)) => {
                    debug!(room_id = candidate.id, "Room busy, skipping until next sweep");
                    continue;
                }
                Err(e) => {
                    warn!(room_id = candidate.id, error = %e, "Failed to lock expired room");
                    continue;
                }
            };
            let result = self.expire_locked(candidate.id, now).await;
            guard.release().await;

            match result {
                Ok(Some(room)) => {
                    cancelled += 1;
                    info!(room_id = room.id, "Expired room cancelled");
                    self.publish(
                        GameEvent::new(EventType::RoomCancelled, room.id)
                            .with_data("reason", "expired")
                            .with_data("room", &room),
                    )
                    .await;
                }
                Ok(None) => {}
                Err(e) => warn!(room_id = candidate.id, error = %e, "Failed to cancel expired room"),
            }
        }

        Ok(cancelled)
    }

    async fn expire_locked(
        &self,
        room_id: u64,
        now: DateTime<Utc>,
    ) -> Result<Option<RoomModel>, AppError> {
        match self.repository.get_room(room_id).await? {
            Some(room) if room.status == RoomStatus::Waiting && room.is_expired(now) => self
                .transition_locked(room_id, None, RoomStatus::Cancelled, None)
                .await
                .map(Some),
            _ => Ok(None),
        }
    }

    /// Sets the member's ready flag while the room is Waiting
    #[instrument(skip(self))]
    pub async fn set_ready(
        &self,
        user_id: u64,
        room_id: u64,
        ready: bool,
    ) -> Result<MembershipModel, AppError> {
        let guard = self.lock(room_lock_key(room_id)).await?;
        let result = self.set_ready_locked(user_id, room_id, ready).await;
        guard.release().await;
        let membership = result?;

        self.publish(
            GameEvent::new(EventType::PlayerReady, room_id)
                .with_user(user_id)
                .with_data("ready", ready),
        )
        .await;
        Ok(membership)
    }

    async fn set_ready_locked(
        &self,
        user_id: u64,
        room_id: u64,
        ready: bool,
    ) -> Result<MembershipModel, AppError> {
        let room = self.require_room(room_id).await?;
        if room.status != RoomStatus::Waiting {
            return Err(AppError::conflict(
                "Ready state can only change while waiting",
            ));
        }

        let mut membership = self
            .repository
            .get_active_membership(room_id, user_id)
            .await?
            .ok_or_else(|| AppError::not_found("Not a member of this room"))?;
        membership.is_ready = ready;
        self.repository.update_membership(&membership).await?;

        Self::log_mirror(
            room_id,
            "ready",
            self.mirror.set_ready(room_id, user_id, ready).await,
        );
        Ok(membership)
    }

    #[instrument(skip(self))]
    pub async fn get_room(&self, room_id: u64) -> Result<RoomModel, AppError> {
        self.require_room(room_id).await
    }

    /// Active memberships ordered by seat
    #[instrument(skip(self))]
    pub async fn get_room_members(&self, room_id: u64) -> Result<Vec<MembershipModel>, AppError> {
        self.require_room(room_id).await?;
        self.repository.list_active_memberships(room_id).await
    }

    #[instrument(skip(self))]
    pub async fn get_room_details(&self, room_id: u64) -> Result<RoomDetailsResponse, AppError> {
        let room = self.require_room(room_id).await?;
        let members = self.repository.list_active_memberships(room_id).await?;
        Ok(RoomDetailsResponse { room, members })
    }

    #[instrument(skip(self))]
    pub async fn list_rooms(&self, filter: &RoomFilter) -> Result<Vec<RoomModel>, AppError> {
        let rooms = self.repository.list_rooms(filter).await?;
        debug!(room_count = rooms.len(), "Rooms listed");
        Ok(rooms)
    }

    /// Merges auxiliary game fields straight into the cached room hash.
    /// Not locked and not stored; readers get eventually consistent data.
    #[instrument(skip(self, patch))]
    pub async fn update_game_state(
        &self,
        room_id: u64,
        user_id: Option<u64>,
        patch: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), AppError> {
        if patch.is_empty() {
            return Err(AppError::InvalidInput("State patch is empty".to_string()));
        }
        if let Some(key) = patch
            .keys()
            .find(|k| ROOM_FIELDS.contains(&k.as_str()) || k.starts_with(READY_FIELD_PREFIX))
        {
            return Err(AppError::InvalidInput(format!("Field {} is reserved", key)));
        }

        // a room without a hash is gone or was never mirrored
        if !self.mirror.merge_state(room_id, &patch).await? {
            return Err(AppError::not_found("No cached state for room"));
        }

        let mut event = GameEvent::new(EventType::GameState, room_id);
        if let Some(user_id) = user_id {
            event = event.with_user(user_id);
        }
        event.data = patch;
        self.publish(event).await;
        Ok(())
    }

    /// Cached room hash, bypassing the store
    #[instrument(skip(self))]
    pub async fn get_game_state(&self, room_id: u64) -> Result<HashMap<String, String>, AppError> {
        let state = self.mirror.state(room_id).await?;
        if state.is_empty() {
            return Err(AppError::not_found("No cached state for room"));
        }
        Ok(state)
    }

    /// Re-derives the room's cache entries from the store
    #[instrument(skip(self))]
    pub async fn rebuild_cache(&self, room_id: u64) -> Result<(), AppError> {
        let guard = self.lock(room_lock_key(room_id)).await?;
        let result = self.rebuild_locked(room_id).await;
        guard.release().await;
        result
    }

    async fn rebuild_locked(&self, room_id: u64) -> Result<(), AppError> {
        let room = self.repository.get_room(room_id).await?;
        let members = match &room {
            Some(_) => self.repository.list_active_memberships(room_id).await?,
            None => Vec::new(),
        };
        self.mirror.rebuild(room_id, room.as_ref(), &members).await?;
        info!(room_id = room_id, exists = room.is_some(), "Room cache rebuilt");
        Ok(())
    }
}

/// Lowest seat not held by an active member. With contiguous seats this is
/// the active member count.
fn first_free_seat(members: &[MembershipModel]) -> i32 {
    let taken: HashSet<i32> = members.iter().map(|m| m.position).collect();
    (0..).find(|p| !taken.contains(p)).unwrap_or(members.len() as i32)
}
