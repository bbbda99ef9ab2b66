//! WebSocket handler — frame dispatch and value pushes.
//!
//! DESIGN
//! ======
//! On upgrade, generates a client ID and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Value pushes from the store → forward to the client
//!
//! Handler functions are pure business logic — they validate, mutate state,
//! and return an `Outcome`. The dispatch layer owns all outbound concerns:
//! the ack to the sender and the value push to every subscriber. A push
//! never excludes the originating connection.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `client_id`
//! 2. Client sends frames → dispatch → handler returns Outcome
//! 3. Dispatch applies Outcome (ack / snapshot / push-to-all)
//! 4. Close → unsubscribe, regardless of whether the client asked to

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use wire::model::{Participant, Week};
use wire::{Data, Frame, Status};

use crate::services;
use crate::services::store::StoreError;
use crate::state::AppState;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what — handlers never send frames directly.
enum Outcome {
    /// Ack the sender, then push the weeks value to ALL subscribers.
    AckPushWeeks,
    /// Ack the sender, then push the participants value to ALL subscribers.
    AckPushParticipants,
    /// Ack the sender, then send both current values to the sender only.
    /// Used for the initial snapshot after `store:subscribe`.
    AckSnapshot,
    /// Send empty done to sender only.
    Done,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();

    // Per-connection channel for receiving value pushes.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(256);

    let welcome = Frame::request("session:connected", Data::new())
        .with_data("client_id", client_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(%client_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let sender_frames =
                            process_inbound_text(&state, client_id, &client_tx, &text).await;
                        for frame in sender_frames {
                            if send_frame(&mut socket, &frame).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    // Teardown always deregisters, whether or not the client unsubscribed.
    services::store::unsubscribe(&state, client_id).await;
    info!(%client_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the
/// sender. Kept free of socket concerns so tests can exercise dispatch and
/// push behavior end-to-end through in-process channels.
async fn process_inbound_text(
    state: &AppState,
    client_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    text: &str,
) -> Vec<Frame> {
    let req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new())
                .with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    info!(%client_id, id = %req.id, syscall = %req.syscall, status = ?req.status, "ws: recv frame");

    let result = match req.prefix() {
        "store" => handle_store(state, client_id, client_tx, &req).await,
        "weeks" => handle_weeks(state, &req).await,
        "participants" => handle_participants(state, &req).await,
        prefix => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    // Apply outcome — the dispatch layer owns all outbound logic.
    match result {
        Ok(Outcome::AckPushWeeks) => {
            let push = services::store::weeks_value_frame(state).await;
            services::store::broadcast(state, &push).await;
            vec![req.done()]
        }
        Ok(Outcome::AckPushParticipants) => {
            let push = services::store::participants_value_frame(state).await;
            services::store::broadcast(state, &push).await;
            vec![req.done()]
        }
        Ok(Outcome::AckSnapshot) => {
            vec![
                req.done(),
                services::store::weeks_value_frame(state).await,
                services::store::participants_value_frame(state).await,
            ]
        }
        Ok(Outcome::Done) => vec![req.done()],
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// STORE HANDLERS
// =============================================================================

async fn handle_store(
    state: &AppState,
    client_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    req: &Frame,
) -> Result<Outcome, Frame> {
    match req.op() {
        "subscribe" => {
            services::store::subscribe(state, client_id, client_tx.clone()).await;
            Ok(Outcome::AckSnapshot)
        }
        "unsubscribe" => {
            services::store::unsubscribe(state, client_id).await;
            Ok(Outcome::Done)
        }
        op => Err(req.error(format!("unknown store op: {op}"))),
    }
}

async fn handle_weeks(state: &AppState, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "set" => {
            let weeks: Vec<Week> = match req.data.get("weeks") {
                Some(value) => match serde_json::from_value(value.clone()) {
                    Ok(weeks) => weeks,
                    Err(e) => return Err(req.error(format!("invalid weeks payload: {e}"))),
                },
                None => return Err(req.error("weeks required")),
            };

            match services::store::set_weeks(state, weeks).await {
                Ok(()) => Ok(Outcome::AckPushWeeks),
                Err(e) => Err(req.error_from(&e)),
            }
        }
        op => Err(req.error(format!("unknown weeks op: {op}"))),
    }
}

async fn handle_participants(state: &AppState, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "put" => {
            let participant: Participant = match req.data.get("participant") {
                Some(value) => match serde_json::from_value(value.clone()) {
                    Ok(participant) => participant,
                    Err(e) => return Err(req.error(format!("invalid participant payload: {e}"))),
                },
                None => return Err(req.error("participant required")),
            };

            match services::store::put_participant(state, participant).await {
                Ok(()) => Ok(Outcome::AckPushParticipants),
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "delete" => {
            let Some(id) = req
                .data
                .get("id")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
            else {
                return Err(req.error("id required"));
            };

            match services::store::remove_participant(state, id).await {
                // EDGE: deleting an already-deleted record still pushes the
                // current value so racing removers converge.
                Ok(()) | Err(StoreError::NotFound(_)) => Ok(Outcome::AckPushParticipants),
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "clear" => {
            services::store::clear_participants(state).await;
            Ok(Outcome::AckPushParticipants)
        }
        op => Err(req.error(format!("unknown participants op: {op}"))),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };

    if frame.status == Status::Error {
        let code = frame.data.get(wire::FRAME_CODE).and_then(|v| v.as_str()).unwrap_or("-");
        let message = frame
            .data
            .get(wire::FRAME_MESSAGE)
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }

    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
