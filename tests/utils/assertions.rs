use std::time::Duration;
use tokio::time::timeout;

use gameroom::event::EventStream;
use gameroom::{EventType, GameEvent, RoomRepository};

use super::setup::TestSetup;

/// Occupancy must equal the number of open memberships
#[allow(dead_code)]
pub async fn assert_occupancy_matches(setup: &TestSetup, room_id: u64) {
    let room = setup.service.get_room(room_id).await.unwrap();
    let active = setup.repo.list_active_memberships(room_id).await.unwrap();
    assert_eq!(
        room.current_players as usize,
        active.len(),
        "occupancy drifted from active memberships"
    );
    assert!(room.current_players <= room.max_players);
}

#[allow(dead_code)]
pub async fn next_event(stream: &mut EventStream) -> GameEvent {
    timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("timed out waiting for event")
        .expect("event stream ended")
}

/// Skips events until one of the given type arrives
#[allow(dead_code)]
pub async fn next_event_of(stream: &mut EventStream, kind: EventType) -> GameEvent {
    loop {
        let event = next_event(stream).await;
        if event.kind() == Some(kind) {
            return event;
        }
    }
}
