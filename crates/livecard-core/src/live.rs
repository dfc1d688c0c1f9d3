//! LiveDocument: a card together with its handler table.
//!
//! This is the state a live session guards with its mutation lock. Dispatch
//! here is synchronous and lock-agnostic; the server wraps it so every call
//! happens while the lock is held.

use crate::card::{Card, DocumentError};
use crate::element::{Element, ElementKind, Hook};
use crate::handlers::{EventContext, EventPayload, HandlerError, HandlerTable, event_handler};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, trace};

/// Result of a successful dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler ran and may have changed the card.
    Handled,
    /// The element exists and supports the hook, but nothing is registered.
    Unhandled,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("stale target: element {0} is not in the card")]
    StaleTarget(String),

    #[error("{kind} element {id} does not support {hook}")]
    UnsupportedHook {
        id: String,
        kind: ElementKind,
        hook: Hook,
    },

    #[error("{hook} handler on {id} failed: {source}")]
    Handler {
        id: String,
        hook: Hook,
        #[source]
        source: HandlerError,
    },

    #[error(transparent)]
    Document(#[from] DocumentError),
}

impl From<DispatchError> for HandlerError {
    fn from(error: DispatchError) -> Self {
        HandlerError::Dispatch(Box::new(error))
    }
}

#[derive(Debug, Clone)]
pub struct LiveDocument {
    card: Card,
    handlers: HandlerTable,
}

impl LiveDocument {
    pub fn new(card: Card) -> Self {
        Self {
            card,
            handlers: HandlerTable::new(),
        }
    }

    pub fn card(&self) -> &Card {
        &self.card
    }

    pub fn card_mut(&mut self) -> &mut Card {
        &mut self.card
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    /// Register `handler` for `hook` on the element with `element_id`.
    ///
    /// The element must exist and its kind must support the hook.
    pub fn register_handler<F>(
        &mut self,
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
        let element = self
            .card
            .find_by_id(element_id)
            .ok_or_else(|| DocumentError::ElementNotFound(element_id.to_string()))?;
        if !element.kind().supports(hook) {
            return Err(DispatchError::UnsupportedHook {
                id: element_id.to_string(),
                kind: element.kind().clone(),
                hook,
            });
        }
        if self
            .handlers
            .insert(element_id, hook, event_handler(handler))
            .is_some()
        {
            trace!("Replaced {} handler on {}", hook, element_id);
        }
        Ok(())
    }

    /// Remove an element subtree from the card along with its handlers.
    pub fn remove_element(&mut self, id: &str) -> Result<Element, DocumentError> {
        let removed = self.card.remove(id)?;
        for gone in removed.subtree_ids() {
            self.handlers.remove_element(gone);
        }
        Ok(removed)
    }

    pub fn clear_handlers(&mut self) {
        self.handlers.clear();
    }

    /// Route one event to its handler.
    ///
    /// A missing element is a [`DispatchError::StaleTarget`]; the caller
    /// drops the event. If the handler fails or panics, the card is restored
    /// to what it was before the handler ran. Handlers of elements the
    /// handler removed are dropped with them.
    pub fn dispatch(
        &mut self,
        element_id: &str,
        hook: Hook,
        payload: &EventPayload,
    ) -> Result<DispatchOutcome, DispatchError> {
        let element = self
            .card
            .find_by_id(element_id)
            .ok_or_else(|| DispatchError::StaleTarget(element_id.to_string()))?;
        if !element.kind().supports(hook) {
            return Err(DispatchError::UnsupportedHook {
                id: element_id.to_string(),
                kind: element.kind().clone(),
                hook,
            });
        }
        let Some(handler) = self.handlers.get(element_id, hook) else {
            return Ok(DispatchOutcome::Unhandled);
        };

        let checkpoint = self.card.clone();
        let mut context = EventContext::new(&mut self.card, element_id, hook);
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler(&mut context, payload)))
            .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(&*panic))));
        if let Err(source) = result {
            debug!("{} handler on {} failed, rolling back", hook, element_id);
            self.card = checkpoint;
            return Err(DispatchError::Handler {
                id: element_id.to_string(),
                hook,
                source,
            });
        }

        let card = &self.card;
        self.handlers.retain_elements(|id| card.contains(id));
        Ok(DispatchOutcome::Handled)
    }

    /// Run `f` as one all-or-nothing change: on error the card and the
    /// handler table are put back the way they were.
    ///
    /// A panic inside `f` also restores them before it keeps unwinding.
    pub fn transaction<T, E>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, E>) -> Result<T, E> {
        let checkpoint = self.clone();
        let result = match panic::catch_unwind(AssertUnwindSafe(|| f(&mut *self))) {
            Ok(result) => result,
            Err(panic) => {
                debug!("Transaction on card {} panicked, rolling back", checkpoint.card.id());
                *self = checkpoint;
                panic::resume_unwind(panic);
            }
        };
        if result.is_err() {
            debug!("Transaction on card {} rolled back", checkpoint.card.id());
            *self = checkpoint;
        }
        result
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::TextWeight;
    use serde_json::json;

    fn document() -> LiveDocument {
        let mut card = Card::new("HelloWorld").unwrap();
        card.push(Element::text_block("Title", "Hello World")).unwrap();
        card.push(Element::text_block("Activation", "Deactivated")).unwrap();
        card.push(Element::text_input("Input", "type")).unwrap();
        card.push(Element::text_block("TextLabel", "Text")).unwrap();
        LiveDocument::new(card)
    }

    fn toggle_weight(context: &mut EventContext<'_>, _: &EventPayload) -> Result<(), HandlerError> {
        let title = context.target()?;
        let next = match title.weight() {
            TextWeight::Default => TextWeight::Bolder,
            _ => TextWeight::Default,
        };
        title.set_weight(next)?;
        Ok(())
    }

    #[test]
    fn test_click_toggles_weight() {
        let mut doc = document();
        doc.register_handler("Title", Hook::Click, toggle_weight).unwrap();

        let outcome = doc.dispatch("Title", Hook::Click, &EventPayload::default()).unwrap();
        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(doc.card().find_by_id("Title").unwrap().weight(), TextWeight::Bolder);

        doc.dispatch("Title", Hook::Click, &EventPayload::default()).unwrap();
        assert_eq!(doc.card().find_by_id("Title").unwrap().weight(), TextWeight::Default);
    }

    #[test]
    fn test_handler_reads_payload_and_other_elements() {
        let mut doc = document();
        doc.register_handler("Input", Hook::TextChanged, |context, payload| {
            let text = payload.text().unwrap_or_default().to_string();
            if let Some(label) = context.element_mut("TextLabel") {
                label.set_text(format!("Input.Text={text}"))?;
            }
            Ok(())
        })
        .unwrap();

        doc.dispatch("Input", Hook::TextChanged, &json!({"text": "abc"}).into())
            .unwrap();
        assert_eq!(
            doc.card().find_by_id("TextLabel").and_then(Element::text),
            Some("Input.Text=abc")
        );
    }

    #[test]
    fn test_stale_target() {
        let mut doc = document();
        let before = doc.card().clone();
        let err = doc.dispatch("Ghost", Hook::Click, &EventPayload::default()).unwrap_err();
        assert!(matches!(err, DispatchError::StaleTarget(id) if id == "Ghost"));
        assert_eq!(doc.card(), &before);
    }

    #[test]
    fn test_unsupported_hook() {
        let mut doc = document();
        let err = doc
            .register_handler("Title", Hook::Focus, |_, _| Ok(()))
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnsupportedHook { hook: Hook::Focus, .. }));
        assert!(doc.handlers().is_empty());

        let err = doc.dispatch("Title", Hook::Blur, &EventPayload::default()).unwrap_err();
        assert!(matches!(err, DispatchError::UnsupportedHook { .. }));
    }

    #[test]
    fn test_register_on_missing_element() {
        let mut doc = document();
        let err = doc
            .register_handler("Ghost", Hook::Click, |_, _| Ok(()))
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Document(DocumentError::ElementNotFound(_))
        ));
    }

    #[test]
    fn test_unhandled_is_silent() {
        let mut doc = document();
        let outcome = doc.dispatch("Title", Hook::MouseEnter, &EventPayload::default()).unwrap();
        assert_eq!(outcome, DispatchOutcome::Unhandled);
    }

    #[test]
    fn test_failed_handler_rolls_back() {
        let mut doc = document();
        doc.register_handler("Title", Hook::Click, |context, _| {
            context.target()?.set_text("half done")?;
            Err(HandlerError::Failed("boom".to_string()))
        })
        .unwrap();

        let err = doc.dispatch("Title", Hook::Click, &EventPayload::default()).unwrap_err();
        assert!(matches!(err, DispatchError::Handler { .. }));
        assert_eq!(
            doc.card().find_by_id("Title").and_then(Element::text),
            Some("Hello World")
        );
    }

    #[test]
    fn test_panicking_handler_rolls_back() {
        let mut doc = document();
        doc.register_handler("Title", Hook::Click, |context, _| {
            context.target()?.set_text("half")?;
            panic!("handler blew up");
        })
        .unwrap();
        doc.register_handler("Activation", Hook::Click, |context, _| {
            context.target()?.set_text("still here")?;
            Ok(())
        })
        .unwrap();

        let err = doc.dispatch("Title", Hook::Click, &EventPayload::default()).unwrap_err();
        match err {
            DispatchError::Handler {
                source: HandlerError::Panicked(message),
                ..
            } => assert_eq!(message, "handler blew up"),
            other => panic!("Expected a panicked handler, got {:?}", other),
        }
        assert_eq!(
            doc.card().find_by_id("Title").and_then(Element::text),
            Some("Hello World")
        );

        doc.dispatch("Activation", Hook::Click, &EventPayload::default())
            .unwrap();
        assert_eq!(
            doc.card().find_by_id("Activation").and_then(Element::text),
            Some("still here")
        );
    }

    #[test]
    fn test_handler_removing_element_drops_its_handlers() {
        let mut doc = document();
        doc.register_handler("Input", Hook::Focus, |_, _| Ok(())).unwrap();
        doc.register_handler("Title", Hook::Click, |context, _| {
            context.card_mut().remove("Input")?;
            Ok(())
        })
        .unwrap();

        doc.dispatch("Title", Hook::Click, &EventPayload::default()).unwrap();
        assert!(!doc.handlers().contains("Input", Hook::Focus));
        assert!(doc.handlers().contains("Title", Hook::Click));

        doc.card_mut().push(Element::text_input("Input", "type")).unwrap();
        let outcome = doc.dispatch("Input", Hook::Focus, &EventPayload::default()).unwrap();
        assert_eq!(outcome, DispatchOutcome::Unhandled);
    }

    #[test]
    fn test_remove_element_drops_handlers() {
        let mut doc = document();
        doc.register_handler("Input", Hook::Focus, |_, _| Ok(())).unwrap();
        doc.remove_element("Input").unwrap();
        assert!(doc.handlers().is_empty());
        assert!(matches!(
            doc.dispatch("Input", Hook::Focus, &EventPayload::default()),
            Err(DispatchError::StaleTarget(_))
        ));
    }

    #[test]
    fn test_transaction_rolls_back() {
        let mut doc = document();
        let before = doc.card().clone();
        let result: Result<(), DocumentError> = doc.transaction(|doc| {
            doc.card_mut().push(Element::text_block("Extra", "x"))?;
            doc.register_handler("Extra", Hook::Click, |_, _| Ok(()))
                .map_err(|_| DocumentError::EmptyId)?;
            doc.card_mut().push(Element::text_block("Title", "dup"))?;
            Ok(())
        });
        assert_eq!(result, Err(DocumentError::DuplicateId("Title".to_string())));
        assert_eq!(doc.card(), &before);
        assert!(doc.handlers().is_empty());
    }

    #[test]
    fn test_transaction_restores_on_panic() {
        let mut doc = document();
        let before = doc.card().clone();
        let unwound = panic::catch_unwind(AssertUnwindSafe(|| {
            doc.transaction(|doc| -> Result<(), DocumentError> {
                doc.card_mut().push(Element::text_block("Extra", "x"))?;
                panic!("lifecycle blew up");
            })
        }));
        assert!(unwound.is_err());
        assert_eq!(doc.card(), &before);
    }
}
