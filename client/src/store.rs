//! Store connection — websocket client for the shared document store.
//!
//! DESIGN
//! ======
//! `StoreClient::connect` opens the socket and hands it to a driver task;
//! the returned handle is a cheap clone over a command channel. Writes are
//! fire-and-forget: they enqueue a request frame and return as soon as the
//! driver accepts it — there is no retry, timeout, or cancellation for a
//! write, and the only failure a caller can observe is a closed
//! connection. `subscribe` returns a `Subscription` handle that routes
//! value pushes to the caller and unsubscribes when dropped, whatever the
//! exit path.
//!
//! `request` additionally awaits the correlated terminal reply; one-shot
//! commands use it to learn whether an operation was accepted before the
//! process exits.

use std::collections::HashMap;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::warn;
use uuid::Uuid;

use wire::model::{Participant, Week};
use wire::{Data, Frame, Status};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("websocket connect failed: {0}")]
    Connect(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("store connection closed")]
    Closed,
    #[error("store returned error for {syscall}: {message}")]
    Server { syscall: String, message: String },
}

/// A value push from the store, or the end of the subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Weeks(Vec<Week>),
    Participants(Vec<Participant>),
    Closed,
}

/// The write surface of the store. The board depends on this trait so
/// tests can record writes without a live connection.
pub trait StoreWrite: Send + Sync {
    /// Replace the weeks sequence wholesale. Fire-and-forget.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the connection is gone.
    fn set_weeks(&self, weeks: &[Week]) -> Result<(), StoreError>;

    /// Create or overwrite one participant record. Fire-and-forget.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the connection is gone.
    fn put_participant(&self, participant: &Participant) -> Result<(), StoreError>;

    /// Delete one participant record. Fire-and-forget.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the connection is gone.
    fn remove_participant(&self, id: Uuid) -> Result<(), StoreError>;

    /// Delete every participant record. Fire-and-forget.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the connection is gone.
    fn clear_participants(&self) -> Result<(), StoreError>;
}

// =============================================================================
// REQUEST FRAMES
// =============================================================================

#[must_use]
pub fn subscribe_frame() -> Frame {
    Frame::request("store:subscribe", Data::new())
}

#[must_use]
pub fn unsubscribe_frame() -> Frame {
    Frame::request("store:unsubscribe", Data::new())
}

#[must_use]
pub fn weeks_set_frame(weeks: &[Week]) -> Frame {
    let mut data = Data::new();
    data.insert("weeks".into(), serde_json::to_value(weeks).unwrap_or_default());
    Frame::request("weeks:set", data)
}

#[must_use]
pub fn participant_put_frame(participant: &Participant) -> Frame {
    let mut data = Data::new();
    data.insert(
        "participant".into(),
        serde_json::to_value(participant).unwrap_or_default(),
    );
    Frame::request("participants:put", data)
}

#[must_use]
pub fn participant_delete_frame(id: Uuid) -> Frame {
    let mut data = Data::new();
    data.insert("id".into(), serde_json::Value::String(id.to_string()));
    Frame::request("participants:delete", data)
}

#[must_use]
pub fn participants_clear_frame() -> Frame {
    Frame::request("participants:clear", Data::new())
}

// =============================================================================
// CLIENT
// =============================================================================

enum Command {
    Send(Frame),
    Request(Frame, oneshot::Sender<Result<Frame, StoreError>>),
    Subscribe(mpsc::Sender<StoreEvent>, Frame),
    Unsubscribe(Frame),
}

/// Handle to a live store connection. Cloning shares the connection.
#[derive(Clone)]
pub struct StoreClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl StoreClient {
    /// Connect to the store and spawn the connection driver.
    ///
    /// # Errors
    ///
    /// Returns `Connect` if the websocket handshake fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let (socket, _) = connect_async(url)
            .await
            .map_err(|e| StoreError::Connect(Box::new(e)))?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(socket, cmd_rx));
        Ok(Self { cmd_tx })
    }

    /// Register for value pushes. The store replies with a snapshot of both
    /// paths, then pushes every subsequent change. Dropping the returned
    /// handle unsubscribes.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the connection is gone.
    pub fn subscribe(&self) -> Result<Subscription, StoreError> {
        let (events_tx, events_rx) = mpsc::channel(64);
        self.cmd_tx
            .send(Command::Subscribe(events_tx, subscribe_frame()))
            .map_err(|_| StoreError::Closed)?;
        Ok(Subscription { events: events_rx, cmd_tx: self.cmd_tx.clone() })
    }

    /// Send a request and await its terminal reply.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the connection dies before the reply arrives,
    /// or `Server` if the store answers with an error frame.
    pub async fn request(&self, frame: Frame) -> Result<Frame, StoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Request(frame, reply_tx))
            .map_err(|_| StoreError::Closed)?;
        reply_rx.await.map_err(|_| StoreError::Closed)?
    }

    fn send(&self, frame: Frame) -> Result<(), StoreError> {
        self.cmd_tx
            .send(Command::Send(frame))
            .map_err(|_| StoreError::Closed)
    }
}

impl StoreWrite for StoreClient {
    fn set_weeks(&self, weeks: &[Week]) -> Result<(), StoreError> {
        self.send(weeks_set_frame(weeks))
    }

    fn put_participant(&self, participant: &Participant) -> Result<(), StoreError> {
        self.send(participant_put_frame(participant))
    }

    fn remove_participant(&self, id: Uuid) -> Result<(), StoreError> {
        self.send(participant_delete_frame(id))
    }

    fn clear_participants(&self) -> Result<(), StoreError> {
        self.send(participants_clear_frame())
    }
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Cancellation handle for a store subscription. Receives value pushes;
/// unsubscribes on drop regardless of exit path.
pub struct Subscription {
    events: mpsc::Receiver<StoreEvent>,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    /// Await the next value push. `None` after `StoreEvent::Closed` has
    /// been delivered and the channel drained.
    pub async fn next_event(&mut self) -> Option<StoreEvent> {
        self.events.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Unsubscribe(unsubscribe_frame()));
    }
}

// =============================================================================
// DRIVER
// =============================================================================

async fn drive(mut socket: WsStream, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
    let mut pending: HashMap<Uuid, oneshot::Sender<Result<Frame, StoreError>>> = HashMap::new();
    let mut events: Option<mpsc::Sender<StoreEvent>> = None;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    Command::Send(frame) => {
                        if send_text(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                    Command::Request(frame, reply) => {
                        let id = frame.id;
                        if send_text(&mut socket, &frame).await.is_err() {
                            let _ = reply.send(Err(StoreError::Closed));
                            break;
                        }
                        pending.insert(id, reply);
                    }
                    Command::Subscribe(tx, frame) => {
                        events = Some(tx);
                        if send_text(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                    Command::Unsubscribe(frame) => {
                        events = None;
                        if send_text(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                }
            }
            msg = socket.next() => {
                let Some(Ok(msg)) = msg else { break };
                if let Message::Text(text) = msg {
                    route_inbound(&text, &mut pending, events.as_ref());
                }
            }
        }
    }

    // Connection gone: tell the subscriber and fail outstanding requests.
    if let Some(tx) = events {
        let _ = tx.try_send(StoreEvent::Closed);
    }
    for (_, reply) in pending {
        let _ = reply.send(Err(StoreError::Closed));
    }
}

async fn send_text(socket: &mut WsStream, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "store: failed to serialize frame");
            return Err(());
        }
    };
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

/// Route one inbound frame: terminal replies to their awaiting request,
/// value pushes to the subscription, everything else dropped.
fn route_inbound(
    text: &str,
    pending: &mut HashMap<Uuid, oneshot::Sender<Result<Frame, StoreError>>>,
    events: Option<&mpsc::Sender<StoreEvent>>,
) {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "store: invalid inbound frame");
            return;
        }
    };

    if let Some(parent) = frame.parent_id {
        if frame.status.is_terminal() {
            if let Some(reply) = pending.remove(&parent) {
                let result = if frame.status == Status::Error {
                    Err(StoreError::Server {
                        syscall: frame.syscall.clone(),
                        message: frame
                            .data
                            .get(wire::FRAME_MESSAGE)
                            .and_then(|v| v.as_str())
                            .unwrap_or("unknown error")
                            .to_owned(),
                    })
                } else {
                    Ok(frame)
                };
                let _ = reply.send(result);
                return;
            }
        }
    }

    match frame.syscall.as_str() {
        "weeks:value" => {
            if let Some(tx) = events {
                let weeks = frame
                    .data
                    .get("weeks")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or_default();
                let _ = tx.try_send(StoreEvent::Weeks(weeks));
            }
        }
        "participants:value" => {
            if let Some(tx) = events {
                let participants = frame
                    .data
                    .get("participants")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or_default();
                let _ = tx.try_send(StoreEvent::Participants(participants));
            }
        }
        _ => {}
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
