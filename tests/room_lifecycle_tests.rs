mod utils;

use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use gameroom::{AppError, EventType, RoomRepository, RoomStatus};
use utils::{assert_occupancy_matches, next_event_of, TestSetupBuilder};

#[tokio::test]
async fn test_full_room_lifecycle() {
    let setup = TestSetupBuilder::new().build();
    let mut events = setup.subscribe().await;

    let room = setup.create_room(1, 2).await;
    let code = room.room_code.clone();

    let room = setup.service.join_room(2, &code).await.unwrap();
    assert_eq!(room.current_players, 2);

    let full = setup.service.join_room(3, &code).await;
    assert!(matches!(full, Err(AppError::Conflict(_))));

    let outcome = setup.service.leave_room(2, room.id).await.unwrap();
    assert!(!outcome.room_closed);
    assert_eq!(outcome.room.unwrap().current_players, 1);

    let started = setup.service.start_game(room.id, Some(1)).await.unwrap();
    assert_eq!(started.status, RoomStatus::Playing);
    let event = next_event_of(&mut events, EventType::GameStart).await;
    assert_eq!(event.room_id, room.id);

    let results = BTreeMap::from([(2, json!("win"))]);
    let ended = setup
        .service
        .end_game(room.id, results, Some(1))
        .await
        .unwrap();
    assert_eq!(ended.status, RoomStatus::Finished);
    assert!(ended.ended_at.is_some());
    let event = next_event_of(&mut events, EventType::GameEnd).await;
    assert_eq!(event.room_id, room.id);

    assert_occupancy_matches(&setup, room.id).await;
}

#[tokio::test]
async fn test_concurrent_joins_respect_capacity() {
    let setup = TestSetupBuilder::new().build();
    let room = setup.create_room(1, 2).await;

    let mut tasks = Vec::new();
    for user_id in 10..20 {
        let service = Arc::clone(&setup.service);
        let code = room.room_code.clone();
        tasks.push(tokio::spawn(
            async move { service.join_room(user_id, &code).await },
        ));
    }

    let mut joined = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => joined += 1,
            // busy lock or full room
            Err(AppError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(joined, 1);
    let room = setup.service.get_room(room.id).await.unwrap();
    assert_eq!(room.current_players, 2);
    assert_occupancy_matches(&setup, room.id).await;
}

#[tokio::test]
async fn test_occupancy_tracks_memberships_through_churn() {
    let setup = TestSetupBuilder::new().build();
    let room = setup.create_room(1, 5).await;

    for user_id in 2..=5 {
        setup.service.join_room(user_id, &room.room_code).await.unwrap();
        assert_occupancy_matches(&setup, room.id).await;
    }
    for user_id in [3, 5] {
        setup.service.leave_room(user_id, room.id).await.unwrap();
        assert_occupancy_matches(&setup, room.id).await;
    }
    setup.service.join_room(6, &room.room_code).await.unwrap();
    assert_occupancy_matches(&setup, room.id).await;

    let seats: Vec<i32> = setup
        .service
        .get_room_members(room.id)
        .await
        .unwrap()
        .iter()
        .map(|m| m.position)
        .collect();
    assert_eq!(seats, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_last_leave_deletes_room() {
    let setup = TestSetupBuilder::new().build();
    let mut events = setup.subscribe().await;
    let room = setup.create_room(1, 2).await;

    let outcome = setup.service.leave_room(1, room.id).await.unwrap();
    assert!(outcome.room_closed);

    let missing = setup.service.get_room(room.id).await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));
    let closed = next_event_of(&mut events, EventType::RoomClosed).await;
    assert_eq!(closed.room_id, room.id);

    // memberships are soft-closed, never removed
    assert_eq!(setup.repo.inner.membership_history(room.id).len(), 1);
}

#[tokio::test]
async fn test_start_on_started_room_is_conflict() {
    let setup = TestSetupBuilder::new().build();
    let room = setup.create_room(1, 2).await;
    setup.service.start_game(room.id, Some(1)).await.unwrap();

    let again = setup.service.start_game(room.id, Some(1)).await;
    assert!(matches!(again, Err(AppError::Conflict(_))));
    let room = setup.service.get_room(room.id).await.unwrap();
    assert_eq!(room.status, RoomStatus::Playing);
}

#[tokio::test]
async fn test_cache_outage_does_not_fail_mutations() {
    let setup = TestSetupBuilder::new().build();
    let room = setup.create_room(1, 3).await;

    setup.mirror_cache.set_unavailable(true);
    let joined = setup.service.join_room(2, &room.room_code).await.unwrap();
    assert_eq!(joined.current_players, 2);
    assert_occupancy_matches(&setup, room.id).await;

    // the mirror is stale until it is rebuilt from the store
    setup.mirror_cache.set_unavailable(false);
    setup.service.rebuild_cache(room.id).await.unwrap();
    let cached = setup.service.get_game_state(room.id).await.unwrap();
    assert_eq!(cached["current_players"], "2");
}

#[tokio::test]
async fn test_failed_occupancy_update_rolls_back_join() {
    let setup = TestSetupBuilder::new().build();
    let room = setup.create_room(1, 3).await;

    setup.repo.fail_room_updates(true);
    let result = setup.service.join_room(2, &room.room_code).await;
    assert!(matches!(result, Err(AppError::Internal(_))));
    setup.repo.fail_room_updates(false);

    assert_occupancy_matches(&setup, room.id).await;
    assert!(setup
        .repo
        .get_active_membership(room.id, 2)
        .await
        .unwrap()
        .is_none());

    // the lock was released on the failure path
    let joined = setup.service.join_room(2, &room.room_code).await.unwrap();
    assert_eq!(joined.current_players, 2);
}

#[tokio::test]
async fn test_failed_store_write_on_leave_keeps_membership() {
    let setup = TestSetupBuilder::new().build();
    let room = setup.create_room(1, 3).await;
    setup.service.join_room(2, &room.room_code).await.unwrap();

    setup.repo.fail_room_updates(true);
    let result = setup.service.leave_room(2, room.id).await;
    assert!(matches!(result, Err(AppError::Internal(_))));
    setup.repo.fail_room_updates(false);

    assert!(setup
        .repo
        .get_active_membership(room.id, 2)
        .await
        .unwrap()
        .is_some());
    assert_occupancy_matches(&setup, room.id).await;
}

#[tokio::test]
async fn test_failed_owner_seat_rolls_back_create() {
    let setup = TestSetupBuilder::new().build();

    setup.repo.fail_membership_creates(true);
    let result = setup
        .service
        .create_room(
            1,
            gameroom::room::types::CreateRoomRequest {
                name: "doomed".to_string(),
                game_type: "cards".to_string(),
                settings: None,
                max_players: Some(2),
            },
        )
        .await;
    assert!(matches!(result, Err(AppError::Internal(_))));

    let rooms = setup
        .service
        .list_rooms(&Default::default())
        .await
        .unwrap();
    assert!(rooms.is_empty());
}

#[tokio::test]
async fn test_failed_owner_occupancy_rolls_back_create() {
    let setup = TestSetupBuilder::new().build();

    setup.repo.fail_room_updates(true);
    let result = setup
        .service
        .create_room(
            1,
            gameroom::room::types::CreateRoomRequest {
                name: "half built".to_string(),
                game_type: "cards".to_string(),
                settings: None,
                max_players: Some(2),
            },
        )
        .await;
    assert!(matches!(result, Err(AppError::Internal(_))));
    setup.repo.fail_room_updates(false);

    let rooms = setup
        .service
        .list_rooms(&Default::default())
        .await
        .unwrap();
    assert!(rooms.is_empty());

    // the owner is free to create again
    let room = setup.create_room(1, 2).await;
    assert_eq!(room.current_players, 1);
    assert_occupancy_matches(&setup, room.id).await;
}
