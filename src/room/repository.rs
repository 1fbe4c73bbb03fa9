use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

use super::models::{MembershipModel, RoomModel, RoomStatus};
use crate::shared::AppError;

pub const DEFAULT_LIST_LIMIT: i64 = 20;
pub const MAX_LIST_LIMIT: i64 = 100;

/// Filter and page for listing rooms, newest first
#[derive(Debug, Clone, Default)]
pub struct RoomFilter {
    pub status: Option<RoomStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl RoomFilter {
    /// Limit clamped to 1..=100 (default 20), offset floored at 0
    pub fn page(&self) -> (i64, i64) {
        let limit = self
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

/// Trait for the authoritative room store
#[async_trait]
pub trait RoomRepository: Send + Sync {
    /// Inserts the room and returns it with its assigned id.
    /// A duplicate room code is a `Conflict`.
    async fn create_room(&self, room: &RoomModel) -> Result<RoomModel, AppError>;
    async fn get_room(&self, room_id: u64) -> Result<Option<RoomModel>, AppError>;
    async fn get_room_by_code(&self, room_code: &str) -> Result<Option<RoomModel>, AppError>;
    async fn list_rooms(&self, filter: &RoomFilter) -> Result<Vec<RoomModel>, AppError>;

    /// Waiting rooms whose expiry is at or before `now`
    async fn list_expired_rooms(&self, now: DateTime<Utc>) -> Result<Vec<RoomModel>, AppError>;
    async fn update_room(&self, room: &RoomModel) -> Result<(), AppError>;
    async fn delete_room(&self, room_id: u64) -> Result<(), AppError>;

    /// A second active membership for the same (room, user) is a `Conflict`
    async fn create_membership(
        &self,
        membership: &MembershipModel,
    ) -> Result<MembershipModel, AppError>;
    async fn get_active_membership(
        &self,
        room_id: u64,
        user_id: u64,
    ) -> Result<Option<MembershipModel>, AppError>;

    /// Active memberships ordered by seat
    async fn list_active_memberships(&self, room_id: u64)
        -> Result<Vec<MembershipModel>, AppError>;
    async fn update_membership(&self, membership: &MembershipModel) -> Result<(), AppError>;

    /// Sets `left_at` on the active membership. False if there was none.
    async fn close_membership(
        &self,
        room_id: u64,
        user_id: u64,
        left_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;
}

#[derive(Default)]
struct StoreState {
    rooms: HashMap<u64, RoomModel>,
    memberships: Vec<MembershipModel>,
    next_room_id: u64,
    next_membership_id: u64,
}

/// In-memory implementation of RoomRepository for development and testing
pub struct InMemoryRoomRepository {
    state: Mutex<StoreState>,
}

impl Default for InMemoryRoomRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRoomRepository {
    /// Creates a new empty in-memory repository
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, StoreState>, AppError> {
        self.state
            .lock()
            .map_err(|_| AppError::internal("Room store lock poisoned"))
    }

    /// All memberships of a room including closed ones
    pub fn membership_history(&self, room_id: u64) -> Vec<MembershipModel> {
        match self.state() {
            Ok(state) => state
                .memberships
                .iter()
                .filter(|m| m.room_id == room_id)
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl RoomRepository for InMemoryRoomRepository {
    #[instrument(skip(self, room))]
    async fn create_room(&self, room: &RoomModel) -> Result<RoomModel, AppError> {
        debug!(room_code = %room.room_code, owner_id = room.owner_id, "Creating room in memory");

        let mut state = self.state()?;
        if state.rooms.values().any(|r| r.room_code == room.room_code) {
            warn!(room_code = %room.room_code, "Room code already in use");
            return Err(AppError::conflict("Room code already exists"));
        }

        state.next_room_id += 1;
        let mut created = room.clone();
        created.id = state.next_room_id;
        state.rooms.insert(created.id, created.clone());

        debug!(room_id = created.id, "Room created successfully in memory");
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn get_room(&self, room_id: u64) -> Result<Option<RoomModel>, AppError> {
        let state = self.state()?;
        let room = state.rooms.get(&room_id).cloned();

        match &room {
            Some(r) => debug!(room_id = room_id, status = r.status.as_str(), "Room found in memory"),
            None => debug!(room_id = room_id, "Room not found in memory"),
        }

        Ok(room)
    }

    #[instrument(skip(self))]
    async fn get_room_by_code(&self, room_code: &str) -> Result<Option<RoomModel>, AppError> {
        let state = self.state()?;
        Ok(state
            .rooms
            .values()
            .find(|r| r.room_code == room_code)
            .cloned())
    }

    #[instrument(skip(self))]
    async fn list_rooms(&self, filter: &RoomFilter) -> Result<Vec<RoomModel>, AppError> {
        let (limit, offset) = filter.page();
        let state = self.state()?;

        let mut rooms: Vec<RoomModel> = state
            .rooms
            .values()
            .filter(|r| filter.status.map(|s| r.status == s).unwrap_or(true))
            .cloned()
            .collect();
        rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let page: Vec<RoomModel> = rooms
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();

        debug!(count = page.len(), "Rooms listed successfully in memory");
        Ok(page)
    }

    #[instrument(skip(self))]
    async fn list_expired_rooms(&self, now: DateTime<Utc>) -> Result<Vec<RoomModel>, AppError> {
        let state = self.state()?;
        Ok(state
            .rooms
            .values()
            .filter(|r| r.status == RoomStatus::Waiting && r.is_expired(now))
            .cloned()
            .collect())
    }

    #[instrument(skip(self, room))]
    async fn update_room(&self, room: &RoomModel) -> Result<(), AppError> {
        let mut state = self.state()?;
        match state.rooms.get_mut(&room.id) {
            Some(existing) => {
                *existing = room.clone();
                existing.updated_at = Utc::now();
                Ok(())
            }
            None => {
                warn!(room_id = room.id, "Room not found for update");
                Err(AppError::not_found("Room not found"))
            }
        }
    }

    #[instrument(skip(self))]
    async fn delete_room(&self, room_id: u64) -> Result<(), AppError> {
        let mut state = self.state()?;
        if state.rooms.remove(&room_id).is_none() {
            warn!(room_id = room_id, "Room not found for deletion");
            return Err(AppError::not_found("Room not found"));
        }
        info!(room_id = room_id, "Room deleted from memory");
        Ok(())
    }

    #[instrument(skip(self, membership))]
    async fn create_membership(
        &self,
        membership: &MembershipModel,
    ) -> Result<MembershipModel, AppError> {
        let mut state = self.state()?;
        let duplicate = state.memberships.iter().any(|m| {
            m.room_id == membership.room_id && m.user_id == membership.user_id && m.is_active()
        });
        if duplicate {
            warn!(
                room_id = membership.room_id,
                user_id = membership.user_id,
                "Active membership already exists"
            );
            return Err(AppError::conflict("Already in room"));
        }

        state.next_membership_id += 1;
        let mut created = membership.clone();
        created.id = state.next_membership_id;
        state.memberships.push(created.clone());
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn get_active_membership(
        &self,
        room_id: u64,
        user_id: u64,
    ) -> Result<Option<MembershipModel>, AppError> {
        let state = self.state()?;
        Ok(state
            .memberships
            .iter()
            .find(|m| m.room_id == room_id && m.user_id == user_id && m.is_active())
            .cloned())
    }

    #[instrument(skip(self))]
    async fn list_active_memberships(
        &self,
        room_id: u64,
    ) -> Result<Vec<MembershipModel>, AppError> {
        let state = self.state()?;
        let mut members: Vec<MembershipModel> = state
            .memberships
            .iter()
            .filter(|m| m.room_id == room_id && m.is_active())
            .cloned()
            .collect();
        members.sort_by_key(|m| m.position);
        Ok(members)
    }

    #[instrument(skip(self, membership))]
    async fn update_membership(&self, membership: &MembershipModel) -> Result<(), AppError> {
        let mut state = self.state()?;
        match state.memberships.iter_mut().find(|m| m.id == membership.id) {
            Some(existing) => {
                *existing = membership.clone();
                Ok(())
            }
            None => Err(AppError::not_found("Membership not found")),
        }
    }

    #[instrument(skip(self))]
    async fn close_membership(
        &self,
        room_id: u64,
        user_id: u64,
        left_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut state = self.state()?;
        match state
            .memberships
            .iter_mut()
            .find(|m| m.room_id == room_id && m.user_id == user_id && m.is_active())
        {
            Some(membership) => {
                membership.left_at = Some(left_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
