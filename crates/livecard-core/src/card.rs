//! Card: the unit of synchronization.
//!
//! A card is a root [`Element`] whose id is the card id (a container, or a
//! kind from a newer vocabulary) plus an id registry kept in step with the
//! tree. The registry makes duplicate detection O(1); lookups still walk the
//! tree depth-first so the returned reference is always the one actually in
//! the tree.

use crate::element::{Element, ElementKind, VOCABULARY_VERSION};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("duplicate element id: {0}")]
    DuplicateId(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("element id must not be empty")]
    EmptyId,

    #[error("property {key} is not defined for {kind}")]
    UnknownProperty { kind: String, key: String },

    #[error("invalid value for {kind}.{key}: {reason}")]
    InvalidProperty {
        kind: String,
        key: String,
        reason: String,
    },

    #[error("the card root cannot be removed")]
    RootRemoval,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, DocumentError>;

/// A tree of elements synchronized as a whole.
#[derive(Debug, Clone)]
pub struct Card {
    version: u32,
    root: Element,
    registry: HashSet<String>,
}

impl PartialEq for Card {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version && self.root == other.root
    }
}

impl Card {
    /// Create an empty card.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(DocumentError::EmptyId);
        }
        let registry = HashSet::from([id.clone()]);
        Ok(Self {
            version: VOCABULARY_VERSION,
            root: Element::container(id),
            registry,
        })
    }

    /// Adopt an existing tree as a card, rejecting duplicate or empty ids.
    ///
    /// The root may be a `Container` or a kind this version does not know;
    /// known leaf kinds cannot hold the body.
    pub fn from_root(root: Element) -> Result<Self> {
        if matches!(root.kind(), ElementKind::TextBlock | ElementKind::TextInput) {
            return Err(DocumentError::InvalidProperty {
                kind: root.kind().to_string(),
                key: "kind".to_string(),
                reason: "the card root must be a container".to_string(),
            });
        }
        let registry = build_registry(&root)?;
        Ok(Self {
            version: VOCABULARY_VERSION,
            root,
            registry,
        })
    }

    pub fn id(&self) -> &str {
        self.root.id()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Top-level elements.
    pub fn body(&self) -> &[Element] {
        self.root.children()
    }

    /// Number of elements in the tree, root included.
    pub fn element_count(&self) -> usize {
        self.registry.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.registry.contains(id)
    }

    /// All ids in the tree, pre-order.
    pub fn ids(&self) -> Vec<&str> {
        self.root.subtree_ids()
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Element> {
        if !self.contains(id) {
            return None;
        }
        self.root.find(id)
    }

    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut Element> {
        if !self.contains(id) {
            return None;
        }
        self.root.find_mut(id)
    }

    /// Append `child` to the root.
    pub fn push(&mut self, child: Element) -> Result<()> {
        let root_id = self.root.id().to_string();
        self.append_child(&root_id, child)
    }

    /// Append `child` (and its subtree) under `parent_id`.
    ///
    /// Fails with [`DocumentError::DuplicateId`] if any id of the subtree is
    /// already in the card or repeated inside the subtree. The card is
    /// unchanged on failure.
    pub fn append_child(&mut self, parent_id: &str, child: Element) -> Result<()> {
        let mut incoming = HashSet::new();
        for id in child.subtree_ids() {
            if id.is_empty() {
                return Err(DocumentError::EmptyId);
            }
            if self.registry.contains(id) || !incoming.insert(id.to_string()) {
                return Err(DocumentError::DuplicateId(id.to_string()));
            }
        }

        let parent = self
            .root
            .find_mut(parent_id)
            .ok_or_else(|| DocumentError::ElementNotFound(parent_id.to_string()))?;
        parent.children_mut().push(child);
        self.registry.extend(incoming);
        Ok(())
    }

    /// Detach the element with `id` and its subtree.
    pub fn remove(&mut self, id: &str) -> Result<Element> {
        if id == self.root.id() {
            return Err(DocumentError::RootRemoval);
        }
        let removed = self
            .root
            .detach(id)
            .ok_or_else(|| DocumentError::ElementNotFound(id.to_string()))?;
        for gone in removed.subtree_ids() {
            self.registry.remove(gone);
        }
        Ok(removed)
    }

    /// Set a property on the element with `id`, returning the previous value.
    pub fn set_property(
        &mut self,
        id: &str,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<Option<Value>> {
        self.find_by_id_mut(id)
            .ok_or_else(|| DocumentError::ElementNotFound(id.to_string()))?
            .set_property(key, value)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| DocumentError::Serialization(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| DocumentError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| DocumentError::Serialization(e.to_string()))
    }
}

fn build_registry(root: &Element) -> Result<HashSet<String>> {
    let mut registry = HashSet::new();
    for id in root.subtree_ids() {
        if id.is_empty() {
            return Err(DocumentError::EmptyId);
        }
        if !registry.insert(id.to_string()) {
            return Err(DocumentError::DuplicateId(id.to_string()));
        }
    }
    Ok(registry)
}

/// Wire form of a card.
///
/// `{"id": .., "version": 1, "root": {"id", "kind", "properties", "children"}}`
#[derive(Serialize)]
struct CardRef<'a> {
    id: &'a str,
    version: u32,
    root: &'a Element,
}

#[derive(Deserialize)]
struct CardDocument {
    id: String,
    #[serde(default = "default_version")]
    version: u32,
    root: Element,
}

fn default_version() -> u32 {
    VOCABULARY_VERSION
}

impl Serialize for Card {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        CardRef {
            id: self.id(),
            version: self.version,
            root: &self.root,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Card {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let document = CardDocument::deserialize(deserializer)?;
        if document.id != document.root.id() {
            return Err(serde::de::Error::custom(format!(
                "card id {} does not match root id {}",
                document.id,
                document.root.id()
            )));
        }
        let mut card = Card::from_root(document.root).map_err(serde::de::Error::custom)?;
        card.version = document.version;
        Ok(card)
    }
}
