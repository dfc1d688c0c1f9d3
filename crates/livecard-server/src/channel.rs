//! SyncChannel: one protocol session between a live card and its peer.
//!
//! The channel owns the transport. A reader task classifies incoming
//! frames: events are queued for the session's dispatcher, responses
//! resolve pending requests. The reader never touches the card, so it can
//! never wait on the mutation lock.
//!
//! Lifecycle: `Idle -> Open -> Closed`. Closing happens exactly once,
//! either because the peer went away, the transport failed, or the server
//! shut the session down. [`SyncChannel::closed`] resolves with that outcome.

use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use livecard_core::Card;
use livecard_core::protocol::{
    EventNotification, Inbound, ProtocolError, Response, RpcError, codes, decode_inbound,
    encode_error_response, encode_push, encode_save_request, methods,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Default time the peer gets to answer a save request.
pub const DEFAULT_SAVE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Open,
    Closed,
}

/// Why an orderly session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the connection.
    PeerDisconnected,
    /// The server shut the session down.
    Shutdown,
}

/// Final result of a session: an orderly close, or the transport failure
/// that ended it.
pub type SessionOutcome = Result<CloseReason, TransportError>;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel is closed")]
    Closed,

    #[error("channel is not open yet")]
    NotOpen,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("peer rejected {method}: {error}")]
    Rejected { method: &'static str, error: RpcError },

    #[error("peer did not answer {method} within {timeout:?}")]
    Timeout {
        method: &'static str,
        timeout: Duration,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// How long to wait for the peer to acknowledge a save request.
    pub save_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            save_timeout: DEFAULT_SAVE_TIMEOUT,
        }
    }
}

/// What a card may ask of the peer it is rendered by.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Hand `card` to the peer as the durable, non-live copy to keep.
    async fn save_card(&self, card: &Card) -> Result<(), ChannelError>;
}

type PendingCalls = HashMap<u64, oneshot::Sender<Result<Value, RpcError>>>;

pub struct SyncChannel {
    id: String,
    transport: Arc<dyn Transport>,
    config: ChannelConfig,
    state: Mutex<ChannelState>,
    events: mpsc::UnboundedSender<EventNotification>,
    pending: Mutex<PendingCalls>,
    next_request_id: AtomicU64,
    outcome: watch::Sender<Option<SessionOutcome>>,
}

impl SyncChannel {
    /// Create an idle channel over `transport`.
    ///
    /// Events the peer fires come out of the returned receiver in arrival
    /// order.
    pub fn new(
        transport: Arc<dyn Transport>,
        config: ChannelConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<EventNotification>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (outcome, _) = watch::channel(None);
        let channel = Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            transport,
            config,
            state: Mutex::new(ChannelState::Idle),
            events,
            pending: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            outcome,
        });
        (channel, events_rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ChannelState {
        *self.state_lock()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Mark the transport handshake as done.
    pub fn open(&self) -> Result<(), ChannelError> {
        let mut state = self.state_lock();
        match *state {
            ChannelState::Idle => {
                *state = ChannelState::Open;
                debug!("Channel {} open", self.id);
                Ok(())
            }
            ChannelState::Open => Ok(()),
            ChannelState::Closed => Err(ChannelError::Closed),
        }
    }

    /// Send the whole card to the peer, replacing what it renders.
    pub async fn push(&self, card: &Card) -> Result<(), ChannelError> {
        self.ensure_open()?;
        let frame = encode_push(card)?;
        self.send(&frame).await?;
        debug!("Pushed card {} (v{}) on {}", card.id(), card.version(), self.id);
        Ok(())
    }

    /// Ask the peer to store `card`, waiting for its answer.
    pub async fn request_save(&self, card: &Card) -> Result<(), ChannelError> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let frame = encode_save_request(id, card)?;
        let (tx, rx) = oneshot::channel();
        self.register_call(id, tx)?;

        if let Err(e) = self.send(&frame).await {
            self.pending_lock().remove(&id);
            return Err(e);
        }

        let timeout = self.config.save_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(_))) => {
                debug!("Peer saved card {} (request {})", card.id(), id);
                Ok(())
            }
            Ok(Ok(Err(error))) => Err(ChannelError::Rejected {
                method: methods::SAVE_CARD,
                error,
            }),
            // Sender dropped: the channel closed while we waited.
            Ok(Err(_)) => Err(ChannelError::Closed),
            Err(_) => {
                self.pending_lock().remove(&id);
                Err(ChannelError::Timeout {
                    method: methods::SAVE_CARD,
                    timeout,
                })
            }
        }
    }

    /// Queue an event for the dispatcher.
    pub fn on_event(&self, event: EventNotification) -> Result<(), ChannelError> {
        self.ensure_open()?;
        self.events.send(event).map_err(|_| ChannelError::Closed)
    }

    /// Close the session from the server side.
    pub async fn shutdown(&self) {
        if self.finish(Ok(CloseReason::Shutdown)) {
            if let Err(e) = self.transport.close().await {
                debug!("Closing transport of {} failed: {}", self.id, e);
            }
        }
    }

    /// Wait until the channel is closed and return how it ended.
    ///
    /// Every caller sees the same outcome, however many times it is asked.
    pub async fn closed(&self) -> SessionOutcome {
        let mut rx = self.outcome.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(outcome) = current {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return Ok(CloseReason::Shutdown);
            }
        }
    }

    /// Read frames until the transport ends or the channel is closed.
    pub async fn run_reader(self: Arc<Self>) {
        let mut shutdown = self.outcome.subscribe();
        loop {
            if self.state() == ChannelState::Closed {
                break;
            }
            let received = tokio::select! {
                received = self.transport.recv() => received,
                _ = shutdown.changed() => break,
            };
            match received {
                Ok(Some(frame)) => self.handle_frame(&frame).await,
                Ok(None) => {
                    self.finish(Ok(CloseReason::PeerDisconnected));
                    break;
                }
                Err(e) => {
                    error!("Transport error on {}: {}", self.id, e);
                    self.finish(Err(e));
                    break;
                }
            }
        }
        let _ = self.transport.close().await;
        debug!("Reader for {} stopped", self.id);
    }

    async fn handle_frame(&self, frame: &str) {
        match decode_inbound(frame) {
            Ok(Inbound::Event(event)) => {
                debug!(
                    "Event {} on {} from {}",
                    event.hook, event.element_id, self.id
                );
                if let Err(e) = self.on_event(event) {
                    warn!("Dropping event on {}: {}", self.id, e);
                }
            }
            Ok(Inbound::Response(response)) => self.resolve(response),
            Ok(Inbound::Notification { method }) => {
                debug!("Ignoring unknown notification {} from {}", method, self.id);
            }
            Ok(Inbound::Request { id, method }) => {
                warn!("Peer {} called unsupported method {}", self.id, method);
                let error =
                    RpcError::new(codes::METHOD_NOT_FOUND, format!("method not found: {method}"));
                self.reply_error(&id, &error).await;
            }
            Err(e) => warn!("Dropping malformed frame from {}: {}", self.id, e),
        }
    }

    async fn reply_error(&self, id: &Value, error: &RpcError) {
        match encode_error_response(id, error) {
            Ok(frame) => {
                if let Err(e) = self.send(&frame).await {
                    warn!("Failed to answer peer {}: {}", self.id, e);
                }
            }
            Err(e) => warn!("Failed to encode error response: {}", e),
        }
    }

    fn resolve(&self, response: Response) {
        match self.pending_lock().remove(&response.id) {
            Some(tx) => {
                let _ = tx.send(response.outcome);
            }
            None => debug!(
                "Response {} from {} matches no pending request",
                response.id, self.id
            ),
        }
    }

    fn register_call(
        &self,
        id: u64,
        tx: oneshot::Sender<Result<Value, RpcError>>,
    ) -> Result<(), ChannelError> {
        // Held across the insert so a concurrent close cannot miss the entry.
        let state = self.state_lock();
        match *state {
            ChannelState::Open => {
                self.pending_lock().insert(id, tx);
                Ok(())
            }
            ChannelState::Idle => Err(ChannelError::NotOpen),
            ChannelState::Closed => Err(ChannelError::Closed),
        }
    }

    async fn send(&self, frame: &str) -> Result<(), ChannelError> {
        if let Err(e) = self.transport.send(frame).await {
            if self.finish(Err(e.clone())) {
                error!("Send on {} failed: {}", self.id, e);
            }
            return Err(ChannelError::Transport(e));
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        match self.state() {
            ChannelState::Open => Ok(()),
            ChannelState::Idle => Err(ChannelError::NotOpen),
            ChannelState::Closed => Err(ChannelError::Closed),
        }
    }

    /// Move to `Closed` and publish the outcome. Only the first call wins.
    fn finish(&self, outcome: SessionOutcome) -> bool {
        let mut state = self.state_lock();
        if *state == ChannelState::Closed {
            return false;
        }
        *state = ChannelState::Closed;
        match &outcome {
            Ok(reason) => info!("Channel {} closed ({:?})", self.id, reason),
            Err(e) => warn!("Channel {} failed: {}", self.id, e),
        }
        self.outcome.send_replace(Some(outcome));
        // Dropping the senders wakes every waiting request with `Closed`.
        self.pending_lock().clear();
        true
    }

    fn state_lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pending_lock(&self) -> MutexGuard<'_, PendingCalls> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PeerClient for SyncChannel {
    async fn save_card(&self, card: &Card) -> Result<(), ChannelError> {
        self.request_save(card).await
    }
}
