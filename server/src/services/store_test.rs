use super::*;
use crate::state::test_helpers;
use tokio::time::{Duration, timeout};
use wire::model::default_weeks;

// =============================================================================
// WEEKS PATH
// =============================================================================

#[tokio::test]
async fn set_weeks_label_rewrite_succeeds() {
    let state = test_helpers::test_app_state();
    let mut weeks = default_weeks();
    weeks[0].label = "Jan 16-22".into();

    set_weeks(&state, weeks.clone()).await.unwrap();

    let store = state.store.read().await;
    assert_eq!(store.weeks, weeks);
    assert_eq!(store.weeks[1].label, "Jan 22-28"); // untouched
    assert!(store.weeks_dirty);
}

#[tokio::test]
async fn set_weeks_rejects_structural_change() {
    let state = test_helpers::test_app_state();

    let mut truncated = default_weeks();
    truncated.pop();
    let result = set_weeks(&state, truncated).await;
    assert!(matches!(result.unwrap_err(), StoreError::WeeksShape));

    // State and dirty flag untouched by the rejected write.
    let store = state.store.read().await;
    assert_eq!(store.weeks, default_weeks());
    assert!(!store.weeks_dirty);
}

// =============================================================================
// PARTICIPANTS PATH
// =============================================================================

#[tokio::test]
async fn put_participant_succeeds_and_marks_dirty() {
    let state = test_helpers::test_app_state();
    let participant = Participant::new("Alex", 4);
    let id = participant.id;

    put_participant(&state, participant).await.unwrap();

    let store = state.store.read().await;
    assert_eq!(store.participants[&id].name, "Alex");
    assert_eq!(store.participants[&id].availability, vec![false; 4]);
    assert!(store.dirty.contains(&id));
}

#[tokio::test]
async fn put_participant_rejects_blank_name() {
    let state = test_helpers::test_app_state();
    let participant = Participant::new("   ", 4);

    let result = put_participant(&state, participant).await;
    assert!(matches!(result.unwrap_err(), StoreError::EmptyName));

    let store = state.store.read().await;
    assert!(store.participants.is_empty());
    assert!(store.dirty.is_empty());
}

#[tokio::test]
async fn put_participant_rejects_availability_mismatch() {
    let state = test_helpers::test_app_state();
    let participant = Participant::new("Alex", 3);

    let result = put_participant(&state, participant).await;
    assert!(matches!(
        result.unwrap_err(),
        StoreError::AvailabilityShape { expected: 4, actual: 3 }
    ));
}

#[tokio::test]
async fn put_participant_last_write_wins() {
    let state = test_helpers::test_app_state();
    let mut participant = Participant::new("Alex", 4);
    let id = participant.id;
    put_participant(&state, participant.clone()).await.unwrap();

    participant.availability[2] = true;
    put_participant(&state, participant).await.unwrap();

    let store = state.store.read().await;
    assert_eq!(store.participants.len(), 1);
    assert_eq!(
        store.participants[&id].availability,
        vec![false, false, true, false]
    );
}

#[tokio::test]
async fn remove_participant_removes_exactly_one() {
    let state = test_helpers::test_app_state();
    let keep = test_helpers::seed_participant(&state, "keep").await;
    let gone = test_helpers::seed_participant(&state, "gone").await;

    remove_participant(&state, gone).await.unwrap();

    let store = state.store.read().await;
    assert_eq!(store.participants.len(), 1);
    assert!(store.participants.contains_key(&keep));
    assert!(store.removed.contains(&gone));
    assert!(!store.dirty.contains(&gone));
}

#[tokio::test]
async fn remove_participant_not_found() {
    let state = test_helpers::test_app_state();
    let result = remove_participant(&state, Uuid::new_v4()).await;
    assert!(matches!(result.unwrap_err(), StoreError::NotFound(_)));
}

#[tokio::test]
async fn clear_participants_empties_map_and_records_deletions() {
    let state = test_helpers::test_app_state();
    let a = test_helpers::seed_participant(&state, "a").await;
    let b = test_helpers::seed_participant(&state, "b").await;

    clear_participants(&state).await;

    let store = state.store.read().await;
    assert!(store.participants.is_empty());
    assert!(store.removed.contains(&a));
    assert!(store.removed.contains(&b));
}

// =============================================================================
// SUBSCRIPTIONS + PUSHES
// =============================================================================

#[tokio::test]
async fn broadcast_reaches_all_subscribers_including_originator() {
    let state = test_helpers::test_app_state();
    let originator = Uuid::new_v4();
    let peer = Uuid::new_v4();
    let (tx_a, mut rx_a) = mpsc::channel::<Frame>(8);
    let (tx_b, mut rx_b) = mpsc::channel::<Frame>(8);
    subscribe(&state, originator, tx_a).await;
    subscribe(&state, peer, tx_b).await;

    let push = participants_value_frame(&state).await;
    broadcast(&state, &push).await;

    for rx in [&mut rx_a, &mut rx_b] {
        let frame = timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("push timed out")
            .expect("push channel closed");
        assert_eq!(frame.syscall, "participants:value");
    }
}

#[tokio::test]
async fn unsubscribed_client_receives_nothing() {
    let state = test_helpers::test_app_state();
    let client = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<Frame>(8);
    subscribe(&state, client, tx).await;
    unsubscribe(&state, client).await;

    let push = weeks_value_frame(&state).await;
    broadcast(&state, &push).await;

    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "expected no push after unsubscribe"
    );
}

#[tokio::test]
async fn weeks_value_frame_carries_current_sequence() {
    let state = test_helpers::test_app_state();
    let frame = weeks_value_frame(&state).await;

    assert_eq!(frame.syscall, "weeks:value");
    let weeks: Vec<Week> =
        serde_json::from_value(frame.data.get("weeks").cloned().unwrap()).unwrap();
    assert_eq!(weeks, default_weeks());
}

#[tokio::test]
async fn participants_value_frame_is_display_ordered() {
    let state = test_helpers::test_app_state();
    let mut first = Participant::new("first", 4);
    let mut second = Participant::new("second", 4);
    first.created_ms = 100;
    second.created_ms = 200;
    // Insert in reverse to prove the frame sorts, not the map.
    put_participant(&state, second.clone()).await.unwrap();
    put_participant(&state, first.clone()).await.unwrap();

    let frame = participants_value_frame(&state).await;
    let listed: Vec<Participant> =
        serde_json::from_value(frame.data.get("participants").cloned().unwrap()).unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, first.id);
    assert_eq!(listed[1].id, second.id);
}
