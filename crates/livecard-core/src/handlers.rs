//! Event handlers and the per-card handler table.
//!
//! Handlers are plain closures stored in an explicit table keyed by
//! element id and [`Hook`]. One handler per (element, hook); registering
//! again replaces the previous one.

use crate::card::{Card, DocumentError};
use crate::element::{Element, Hook};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Free-form payload attached to an event notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventPayload(Value);

impl EventPayload {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The `text` field, as sent with `textChanged`.
    pub fn text(&self) -> Option<&str> {
        self.get("text").and_then(Value::as_str)
    }
}

impl From<Value> for EventPayload {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// Registering or routing a nested handler failed.
    #[error(transparent)]
    Dispatch(Box<crate::live::DispatchError>),

    #[error("{0}")]
    Failed(String),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// What a handler sees while it runs: the whole card, mutable, and the id
/// of the element that raised the event.
pub struct EventContext<'a> {
    card: &'a mut Card,
    target: &'a str,
    hook: Hook,
}

impl<'a> EventContext<'a> {
    pub(crate) fn new(card: &'a mut Card, target: &'a str, hook: Hook) -> Self {
        Self { card, target, hook }
    }

    pub fn target_id(&self) -> &str {
        self.target
    }

    pub fn hook(&self) -> Hook {
        self.hook
    }

    pub fn card(&self) -> &Card {
        &*self.card
    }

    pub fn card_mut(&mut self) -> &mut Card {
        &mut *self.card
    }

    /// The element that raised the event.
    pub fn target(&mut self) -> Result<&mut Element, DocumentError> {
        let target = self.target;
        self.card
            .find_by_id_mut(target)
            .ok_or_else(|| DocumentError::ElementNotFound(target.to_string()))
    }

    /// Any element of the card, if present.
    pub fn element_mut(&mut self, id: &str) -> Option<&mut Element> {
        self.card.find_by_id_mut(id)
    }
}

/// A registered event handler.
pub type EventHandler =
    Arc<dyn Fn(&mut EventContext<'_>, &EventPayload) -> Result<(), HandlerError> + Send + Sync>;

/// Wrap a closure as an [`EventHandler`].
pub fn event_handler<F>(handler: F) -> EventHandler
where
    F: Fn(&mut EventContext<'_>, &EventPayload) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(handler)
}

#[derive(Clone, Default)]
pub struct HandlerTable {
    entries: HashMap<String, HashMap<Hook, EventHandler>>,
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (id, hooks) in &self.entries {
            map.entry(id, &hooks.keys().collect::<Vec<_>>());
        }
        map.finish()
    }
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handler`, returning the one it replaced.
    pub fn insert(&mut self, element_id: &str, hook: Hook, handler: EventHandler) -> Option<EventHandler> {
        self.entries
            .entry(element_id.to_string())
            .or_default()
            .insert(hook, handler)
    }

    pub fn get(&self, element_id: &str, hook: Hook) -> Option<EventHandler> {
        self.entries.get(element_id)?.get(&hook).cloned()
    }

    pub fn contains(&self, element_id: &str, hook: Hook) -> bool {
        self.entries
            .get(element_id)
            .is_some_and(|hooks| hooks.contains_key(&hook))
    }

    /// Drop every handler of one element. Returns how many were removed.
    pub fn remove_element(&mut self, element_id: &str) -> usize {
        self.entries
            .remove(element_id)
            .map(|hooks| hooks.len())
            .unwrap_or(0)
    }

    /// Keep only the handlers of elements for which `keep` returns true.
    pub fn retain_elements(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.entries.retain(|id, _| keep(id));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Total number of registered handlers.
    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
