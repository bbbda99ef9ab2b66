//! Store service — mutations on the authoritative poll value.
//!
//! DESIGN
//! ======
//! Mutations update in-memory state immediately, mark the touched path
//! dirty for the debounced persistence flush, and leave all outbound
//! concerns (replies, value pushes) to the dispatch layer. Concurrent
//! writes to the same record resolve by arrival order: last write wins.
//!
//! The weeks sequence has a fixed shape — `set_weeks` only accepts a
//! replacement carrying the same ids in the same order, so a positional
//! availability vector can never silently misalign with the weeks list.

use uuid::Uuid;

use tokio::sync::mpsc;
use tracing::info;
use wire::model::{Participant, Week, same_week_shape, sort_for_display};
use wire::{Data, Frame};

use crate::state::AppState;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("weeks replacement must keep the same ids in the same order")]
    WeeksShape,
    #[error("participant name must be non-empty")]
    EmptyName,
    #[error("availability length {actual} does not match week count {expected}")]
    AvailabilityShape { expected: usize, actual: usize },
    #[error("participant not found: {0}")]
    NotFound(Uuid),
}

impl wire::ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::WeeksShape => "E_WEEKS_SHAPE",
            Self::EmptyName => "E_EMPTY_NAME",
            Self::AvailabilityShape { .. } => "E_AVAILABILITY_SHAPE",
            Self::NotFound(_) => "E_NOT_FOUND",
        }
    }
}

// =============================================================================
// WEEKS PATH
// =============================================================================

/// Replace the weeks sequence wholesale (label edits and the clear reset).
///
/// # Errors
///
/// Returns `WeeksShape` if the replacement adds, removes, reorders, or
/// renumbers weeks.
pub async fn set_weeks(state: &AppState, weeks: Vec<Week>) -> Result<(), StoreError> {
    let mut store = state.store.write().await;
    if !same_week_shape(&store.weeks, &weeks) {
        return Err(StoreError::WeeksShape);
    }

    store.weeks = weeks;
    store.weeks_dirty = true;
    info!("weeks sequence rewritten");
    Ok(())
}

// =============================================================================
// PARTICIPANTS PATH
// =============================================================================

/// Create or overwrite one participant record. Last write wins.
///
/// # Errors
///
/// Returns `EmptyName` for a blank trimmed name and `AvailabilityShape`
/// when the availability vector does not match the current week count.
pub async fn put_participant(state: &AppState, participant: Participant) -> Result<(), StoreError> {
    if participant.name.trim().is_empty() {
        return Err(StoreError::EmptyName);
    }

    let mut store = state.store.write().await;
    let expected = store.weeks.len();
    let actual = participant.availability.len();
    if actual != expected {
        return Err(StoreError::AvailabilityShape { expected, actual });
    }

    let id = participant.id;
    store.dirty.insert(id);
    store.removed.remove(&id);
    store.participants.insert(id, participant);
    info!(%id, "participant record written");
    Ok(())
}

/// Delete one participant record by id.
///
/// # Errors
///
/// Returns `NotFound` if no record exists under the id.
pub async fn remove_participant(state: &AppState, id: Uuid) -> Result<(), StoreError> {
    let mut store = state.store.write().await;
    if store.participants.remove(&id).is_none() {
        return Err(StoreError::NotFound(id));
    }
    store.dirty.remove(&id);
    store.removed.insert(id);
    info!(%id, "participant record deleted");
    Ok(())
}

/// Delete every participant record (the clear-all reset).
pub async fn clear_participants(state: &AppState) {
    let mut store = state.store.write().await;
    let ids: Vec<Uuid> = store.participants.keys().copied().collect();
    for id in &ids {
        store.dirty.remove(id);
        store.removed.insert(*id);
    }
    store.participants.clear();
    info!(count = ids.len(), "participants cleared");
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

/// Register a connection for value pushes.
pub async fn subscribe(state: &AppState, client_id: Uuid, tx: mpsc::Sender<Frame>) {
    let mut store = state.store.write().await;
    store.subscribers.insert(client_id, tx);
    info!(%client_id, subscribers = store.subscribers.len(), "client subscribed");
}

/// Deregister a connection. Idempotent; also called on socket close.
pub async fn unsubscribe(state: &AppState, client_id: Uuid) {
    let mut store = state.store.write().await;
    if store.subscribers.remove(&client_id).is_some() {
        info!(%client_id, remaining = store.subscribers.len(), "client unsubscribed");
    }
}

/// Push a frame to every subscriber. The originator of a change is never
/// excluded — its optimistic local state is confirmed or overwritten by
/// the same push everyone else receives.
pub async fn broadcast(state: &AppState, frame: &Frame) {
    let store = state.store.read().await;
    for tx in store.subscribers.values() {
        // Best-effort: if a subscriber's channel is full, skip it.
        let _ = tx.try_send(frame.clone());
    }
}

// =============================================================================
// VALUE FRAMES
// =============================================================================

/// Build the current `weeks:value` push frame.
pub async fn weeks_value_frame(state: &AppState) -> Frame {
    let store = state.store.read().await;
    let mut data = Data::new();
    data.insert("weeks".into(), serde_json::to_value(&store.weeks).unwrap_or_default());
    Frame::request("weeks:value", data)
}

/// Build the current `participants:value` push frame, display-ordered.
pub async fn participants_value_frame(state: &AppState) -> Frame {
    let store = state.store.read().await;
    let mut participants: Vec<Participant> = store.participants.values().cloned().collect();
    sort_for_display(&mut participants);

    let mut data = Data::new();
    data.insert(
        "participants".into(),
        serde_json::to_value(&participants).unwrap_or_default(),
    );
    Frame::request("participants:value", data)
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
