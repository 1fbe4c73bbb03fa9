use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use gameroom::room::repository::{InMemoryRoomRepository, RoomFilter, RoomRepository};
use gameroom::websockets::ConnectionManager;
use gameroom::{AppError, MembershipModel, RoomModel};

// ============================================================================
// Mock Infrastructure
// ============================================================================

#[derive(Clone, Default)]
pub struct MockConnectionManager {
    sent_messages: Arc<RwLock<HashMap<u64, Vec<String>>>>,
}

#[allow(dead_code)]
impl MockConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_messages_for(&self, user_id: u64) -> Vec<String> {
        self.sent_messages
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn clear_messages(&self) {
        self.sent_messages.write().await.clear();
    }
}

#[async_trait]
impl ConnectionManager for MockConnectionManager {
    async fn send_to_user(&self, user_id: u64, message: &str) -> bool {
        self.sent_messages
            .write()
            .await
            .entry(user_id)
            .or_default()
            .push(message.to_string());
        true
    }

    async fn broadcast(&self, message: &str) -> usize {
        let mut sent = self.sent_messages.write().await;
        for messages in sent.values_mut() {
            messages.push(message.to_string());
        }
        sent.len()
    }
}

/// In-memory store whose writes can be made to fail on demand
#[derive(Default)]
pub struct FaultyRoomRepository {
    pub inner: InMemoryRoomRepository,
    fail_room_updates: AtomicBool,
    fail_membership_creates: AtomicBool,
}

#[allow(dead_code)]
impl FaultyRoomRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_room_updates(&self, fail: bool) {
        self.fail_room_updates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_membership_creates(&self, fail: bool) {
        self.fail_membership_creates.store(fail, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool) -> Result<(), AppError> {
        if flag.load(Ordering::SeqCst) {
            return Err(AppError::internal("injected store failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl RoomRepository for FaultyRoomRepository {
    async fn create_room(&self, room: &RoomModel) -> Result<RoomModel, AppError> {
        self.inner.create_room(room).await
    }

    async fn get_room(&self, room_id: u64) -> Result<Option<RoomModel>, AppError> {
        self.inner.get_room(room_id).await
    }

    async fn get_room_by_code(&self, room_code: &str) -> Result<Option<RoomModel>, AppError> {
        self.inner.get_room_by_code(room_code).await
    }

    async fn list_rooms(&self, filter: &RoomFilter) -> Result<Vec<RoomModel>, AppError> {
        self.inner.list_rooms(filter).await
    }

    async fn list_expired_rooms(&self, now: DateTime<Utc>) -> Result<Vec<RoomModel>, AppError> {
        self.inner.list_expired_rooms(now).await
    }

    async fn update_room(&self, room: &RoomModel) -> Result<(), AppError> {
        Self::check(&self.fail_room_updates)?;
        self.inner.update_room(room).await
    }

    async fn delete_room(&self, room_id: u64) -> Result<(), AppError> {
        self.inner.delete_room(room_id).await
    }

    async fn create_membership(
        &self,
        membership: &MembershipModel,
    ) -> Result<MembershipModel, AppError> {
        Self::check(&self.fail_membership_creates)?;
        self.inner.create_membership(membership).await
    }

    async fn get_active_membership(
        &self,
        room_id: u64,
        user_id: u64,
    ) -> Result<Option<MembershipModel>, AppError> {
        self.inner.get_active_membership(room_id, user_id).await
    }

    async fn list_active_memberships(
        &self,
        room_id: u64,
    ) -> Result<Vec<MembershipModel>, AppError> {
        self.inner.list_active_memberships(room_id).await
    }

    async fn update_membership(&self, membership: &MembershipModel) -> Result<(), AppError> {
        self.inner.update_membership(membership).await
    }

    async fn close_membership(
        &self,
        room_id: u64,
        user_id: u64,
        left_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        self.inner.close_membership(room_id, user_id, left_at).await
    }
}
