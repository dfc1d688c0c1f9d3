//! Event dispatch under the mutation lock.
//!
//! Every registration and every handler run happens while the lock is
//! held, so handlers see a consistent card and never interleave. When a
//! handler changed the card, the push goes out before the lock is let go;
//! the peer therefore sees snapshots in the order the changes were made.

use crate::channel::SyncChannel;
use crate::lock::MutationLock;
use livecard_core::{
    DispatchError, DispatchOutcome, EventContext, EventNotification, EventPayload, HandlerError,
    Hook, LiveDocument,
};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct EventDispatcher {
    document: Arc<MutationLock<LiveDocument>>,
    publisher: Option<Arc<SyncChannel>>,
}

impl EventDispatcher {
    pub fn new(document: Arc<MutationLock<LiveDocument>>) -> Self {
        Self {
            document,
            publisher: None,
        }
    }

    /// Push the card over `channel` after every handled event.
    pub fn with_publisher(mut self, channel: Arc<SyncChannel>) -> Self {
        self.publisher = Some(channel);
        self
    }

    pub async fn register_handler<F>(
        &self,
        element_id: &str,
        hook: Hook,
        handler: F,
    ) -> Result<(), DispatchError>
    where
        F: Fn(&mut EventContext<'_>, &EventPayload) -> Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    {
        let mut document = self.document.acquire().await;
        document.register_handler(element_id, hook, handler)
    }

    /// Run the handler for `event`.
    ///
    /// Events for elements that no longer exist are dropped with a warning
    /// and leave the card untouched.
    pub async fn dispatch(
        &self,
        event: &EventNotification,
    ) -> Result<DispatchOutcome, DispatchError> {
        let mut document = self.document.acquire().await;
        let result = document.dispatch(&event.element_id, event.hook, &event.payload);

        match &result {
            Ok(DispatchOutcome::Handled) => {
                debug!("Handled {} on {}", event.hook, event.element_id);
                if let Some(channel) = &self.publisher {
                    if let Err(e) = channel.push(document.card()).await {
                        warn!(
                            "Push after {} on {} failed: {}",
                            event.hook, event.element_id, e
                        );
                    }
                }
            }
            Ok(DispatchOutcome::Unhandled) => {
                debug!("No handler for {} on {}", event.hook, event.element_id);
            }
            Err(DispatchError::StaleTarget(id)) => {
                warn!("Dropping {} for stale target {}", event.hook, id);
            }
            Err(e) => warn!("Dropping {} on {}: {}", event.hook, event.element_id, e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelConfig;
    use crate::transport::memory_pair;
    use livecard_core::protocol::{Outbound, decode_outbound};
    use livecard_core::{Card, Element, TextWeight};
    use std::time::Duration;

    fn document() -> Arc<MutationLock<LiveDocument>> {
        let mut card = Card::new("HelloWorld").unwrap();
        card.push(Element::text_block("Title", "Hello World")).unwrap();
        Arc::new(MutationLock::new(LiveDocument::new(card)))
    }

    fn bold(context: &mut EventContext<'_>, _: &EventPayload) -> Result<(), HandlerError> {
        context.target()?.set_weight(TextWeight::Bolder)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_handled_event_is_pushed() {
        let (transport, mut peer) = memory_pair();
        let (channel, _events) = SyncChannel::new(Arc::new(transport), ChannelConfig::default());
        channel.open().unwrap();

        let dispatcher = EventDispatcher::new(document()).with_publisher(channel);
        dispatcher.register_handler("Title", Hook::Click, bold).await.unwrap();

        let outcome = dispatcher
            .dispatch(&EventNotification::new("Title", Hook::Click))
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Handled);

        let frame = tokio::time::timeout(Duration::from_secs(1), peer.recv())
            .await
            .unwrap()
            .unwrap();
        let Outbound::SetCard(card) = decode_outbound(&frame).unwrap() else {
            panic!("Expected setCard");
        };
        assert_eq!(card.find_by_id("Title").unwrap().weight(), TextWeight::Bolder);
    }

    #[tokio::test]
    async fn test_stale_and_unhandled_do_not_push() {
        let (transport, mut peer) = memory_pair();
        let (channel, _events) = SyncChannel::new(Arc::new(transport), ChannelConfig::default());
        channel.open().unwrap();
        let document = document();
        let before = document.acquire().await.card().clone();

        let dispatcher = EventDispatcher::new(Arc::clone(&document)).with_publisher(channel);
        let err = dispatcher
            .dispatch(&EventNotification::new("Ghost", Hook::Click))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::StaleTarget(_)));

        let outcome = dispatcher
            .dispatch(&EventNotification::new("Title", Hook::MouseEnter))
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Unhandled);

        assert!(peer.try_recv().is_none());
        assert_eq!(document.acquire().await.card(), &before);
    }

    #[tokio::test]
    async fn test_dispatch_without_publisher() {
        let document = document();
        let dispatcher = EventDispatcher::new(Arc::clone(&document));
        dispatcher.register_handler("Title", Hook::Click, bold).await.unwrap();
        dispatcher
            .dispatch(&EventNotification::new("Title", Hook::Click))
            .await
            .unwrap();
        assert_eq!(
            document.acquire().await.card().find_by_id("Title").unwrap().weight(),
            TextWeight::Bolder
        );
    }
}
