//! LiveSession: a card that is live for one connected peer.
//!
//! The session owns the guarded document, the dispatcher, and the channel.
//! Events flow from the channel's reader into a single worker task, which
//! handles them one at a time:
//!
//! - `activate` / `deactivate` on the root element run the card's
//!   [`CardBehavior`] lifecycle
//! - everything else goes to the registered handler
//!
//! Activation pushes the live card. Deactivation hands the snapshot to the
//! peer through [`PeerClient::save_card`] after the lock is released.

use crate::channel::{ChannelConfig, ChannelError, PeerClient, SessionOutcome, SyncChannel};
use crate::dispatcher::EventDispatcher;
use crate::lock::MutationLock;
use crate::transport::Transport;
use livecard_core::{
    Card, DocumentError, EventNotification, HandlerError, Hook, LiveDocument,
};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Behavior of a live card: what it looks like and what happens when a
/// peer starts and stops interacting with it.
pub trait CardBehavior: Send + Sync + 'static {
    /// The card served when no snapshot is configured.
    fn initial_card(&self) -> Result<Card, DocumentError>;

    /// Turn the static card into its interactive form and register handlers.
    fn activate(&self, document: &mut LiveDocument) -> Result<(), HandlerError>;

    /// Strip the interactive parts and return the snapshot to persist.
    fn deactivate(&self, document: &mut LiveDocument) -> Result<Card, HandlerError>;
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Activate the card as soon as the session starts.
    pub activate_on_start: bool,
    /// Push the card after every handled event.
    pub push_after_event: bool,
    pub channel: ChannelConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            activate_on_start: true,
            push_after_event: true,
            channel: ChannelConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("card behavior failed: {0}")]
    Behavior(#[from] HandlerError),
}

pub struct LiveSession {
    id: String,
    card_id: String,
    document: Arc<MutationLock<LiveDocument>>,
    dispatcher: EventDispatcher,
    channel: Arc<SyncChannel>,
    client: Arc<dyn PeerClient>,
    behavior: Arc<dyn CardBehavior>,
    /// Only changed while the mutation lock is held.
    live: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LiveSession {
    /// Open `channel` and start serving `card` over it.
    pub async fn start(
        card: Card,
        behavior: Arc<dyn CardBehavior>,
        channel: Arc<SyncChannel>,
        events: mpsc::UnboundedReceiver<EventNotification>,
        config: SessionConfig,
    ) -> Result<Arc<Self>, SessionError> {
        let client: Arc<dyn PeerClient> = Arc::clone(&channel) as Arc<dyn PeerClient>;
        Self::start_with_client(card, behavior, channel, client, events, config).await
    }

    /// Like [`LiveSession::start`], with saves routed to `client`.
    pub async fn start_with_client(
        card: Card,
        behavior: Arc<dyn CardBehavior>,
        channel: Arc<SyncChannel>,
        client: Arc<dyn PeerClient>,
        events: mpsc::UnboundedReceiver<EventNotification>,
        config: SessionConfig,
    ) -> Result<Arc<Self>, SessionError> {
        channel.open()?;

        let card_id = card.id().to_string();
        let document = Arc::new(MutationLock::new(LiveDocument::new(card)));
        let mut dispatcher = EventDispatcher::new(Arc::clone(&document));
        if config.push_after_event {
            dispatcher = dispatcher.with_publisher(Arc::clone(&channel));
        }

        let session = Arc::new(Self {
            id: channel.id().to_string(),
            card_id,
            document,
            dispatcher,
            channel: Arc::clone(&channel),
            client,
            behavior,
            live: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        });

        let reader = tokio::spawn(Arc::clone(&channel).run_reader());
        let worker = tokio::spawn(Self::event_loop(Arc::downgrade(&session), events));
        session.tasks_lock().extend([reader, worker]);
        info!("Session {} started for card {}", session.id, session.card_id);

        if config.activate_on_start {
            session.activate().await?;
        }
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn card_id(&self) -> &str {
        &self.card_id
    }

    pub fn channel(&self) -> &Arc<SyncChannel> {
        &self.channel
    }

    pub fn document(&self) -> Arc<MutationLock<LiveDocument>> {
        Arc::clone(&self.document)
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Copy of the card as it is right now.
    pub async fn snapshot(&self) -> Card {
        self.document.acquire().await.card().clone()
    }

    /// Make the card interactive and push it. Does nothing if already live.
    pub async fn activate(&self) -> Result<(), SessionError> {
        let mut document = self.document.acquire().await;
        if self.is_live() {
            debug!("Card {} is already live", self.card_id);
            return Ok(());
        }

        let behavior = Arc::clone(&self.behavior);
        document.transaction(|doc| behavior.activate(doc))?;
        self.live.store(true, Ordering::SeqCst);
        info!("Card {} activated (session {})", self.card_id, self.id);

        self.channel.push(document.card()).await?;
        Ok(())
    }

    /// Return the card to its static form and ask the peer to keep it.
    ///
    /// A save the peer rejects or never answers is logged; the session
    /// stays up.
    pub async fn deactivate(&self) -> Result<(), SessionError> {
        let snapshot = {
            let mut document = self.document.acquire().await;
            if !self.is_live() {
                debug!("Card {} is not live", self.card_id);
                return Ok(());
            }
            let behavior = Arc::clone(&self.behavior);
            let snapshot = document.transaction(|doc| behavior.deactivate(doc))?;
            self.live.store(false, Ordering::SeqCst);
            snapshot
        }; // Release lock before network I/O
        info!("Card {} deactivated (session {})", self.card_id, self.id);

        if let Err(e) = self.client.save_card(&snapshot).await {
            warn!("Peer did not save card {}: {}", self.card_id, e);
        }
        Ok(())
    }

    /// Resolves once the channel is closed, with how it ended.
    pub async fn closed(&self) -> SessionOutcome {
        self.channel.closed().await
    }

    pub async fn shutdown(&self) {
        self.channel.shutdown().await;
    }

    async fn event_loop(session: Weak<Self>, mut events: mpsc::UnboundedReceiver<EventNotification>) {
        while let Some(event) = events.recv().await {
            let Some(session) = session.upgrade() else {
                break;
            };
            let (element_id, hook) = (event.element_id.clone(), event.hook);
            if AssertUnwindSafe(session.handle_event(event))
                .catch_unwind()
                .await
                .is_err()
            {
                error!("{} event on {} panicked; event dropped", hook, element_id);
            }
        }
        debug!("Event worker stopped");
    }

    async fn handle_event(&self, event: EventNotification) {
        if event.hook.is_lifecycle() && event.element_id == self.card_id {
            let result = match event.hook {
                Hook::Activate => self.activate().await,
                _ => self.deactivate().await,
            };
            if let Err(e) = result {
                warn!("{} of card {} failed: {}", event.hook, self.card_id, e);
            }
            return;
        }
        // Failures are logged by the dispatcher.
        let _ = self.dispatcher.dispatch(&event).await;
    }

    fn tasks_lock(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        for task in self.tasks_lock().drain(..) {
            task.abort();
        }
    }
}

/// Serve `card` to the peer behind `transport`.
pub async fn open_session(
    card: Card,
    transport: Arc<dyn Transport>,
    behavior: Arc<dyn CardBehavior>,
    config: SessionConfig,
) -> Result<Arc<LiveSession>, SessionError> {
    let (channel, events) = SyncChannel::new(transport, config.channel.clone());
    LiveSession::start(card, behavior, channel, events, config).await
}
