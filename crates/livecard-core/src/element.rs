//! Element: one typed node of a card's tree.
//!
//! Elements are a tagged variant over [`ElementKind`] carrying a JSON
//! property map. Known kinds validate their properties against a fixed,
//! versioned vocabulary. Unknown kinds are carried through untouched so a
//! newer peer can hand us elements this build does not understand.

use crate::card::DocumentError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Version of the element vocabulary written into serialized cards.
pub const VOCABULARY_VERSION: u32 = 1;

/// Property map of an element.
pub type Properties = Map<String, Value>;

/// Element kind tag.
///
/// Serialized as a plain string. Anything unrecognized decodes to
/// [`ElementKind::Other`] and round-trips unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ElementKind {
    /// Groups other elements. The card root is always a container.
    Container,
    /// Static text: `text`, `size`, `weight`, `wrap`.
    TextBlock,
    /// Single text field: `placeholder`, `value`, `isMultiline`.
    TextInput,
    /// Kind from a newer vocabulary, passed through as-is.
    Other(String),
}

impl ElementKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Container => "Container",
            Self::TextBlock => "TextBlock",
            Self::TextInput => "Input.Text",
            Self::Other(name) => name,
        }
    }

    /// Whether elements of this kind can raise `hook`.
    pub fn supports(&self, hook: Hook) -> bool {
        use Hook::*;
        match self {
            Self::Container => matches!(hook, Click | MouseEnter | MouseLeave | Activate | Deactivate),
            Self::TextBlock => matches!(hook, Click | MouseEnter | MouseLeave),
            Self::TextInput => {
                matches!(hook, Click | MouseEnter | MouseLeave | Focus | Blur | TextChanged)
            }
            Self::Other(_) => false,
        }
    }

    /// Property vocabulary of a known kind. `None` means "accept anything".
    fn vocabulary(&self) -> Option<&'static [PropertyRule]> {
        match self {
            Self::Container => Some(CONTAINER_PROPERTIES),
            Self::TextBlock => Some(TEXT_BLOCK_PROPERTIES),
            Self::TextInput => Some(TEXT_INPUT_PROPERTIES),
            Self::Other(_) => None,
        }
    }
}

impl From<String> for ElementKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "Container" => Self::Container,
            "TextBlock" => Self::TextBlock,
            "Input.Text" => Self::TextInput,
            _ => Self::Other(name),
        }
    }
}

impl From<&str> for ElementKind {
    fn from(name: &str) -> Self {
        Self::from(name.to_string())
    }
}

impl From<ElementKind> for String {
    fn from(kind: ElementKind) -> Self {
        match kind {
            ElementKind::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event hooks an element can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Hook {
    Click,
    MouseEnter,
    MouseLeave,
    Focus,
    Blur,
    TextChanged,
    /// The card went live on a peer.
    Activate,
    /// The card stopped being live.
    Deactivate,
}

impl Hook {
    pub const ALL: [Hook; 8] = [
        Hook::Click,
        Hook::MouseEnter,
        Hook::MouseLeave,
        Hook::Focus,
        Hook::Blur,
        Hook::TextChanged,
        Hook::Activate,
        Hook::Deactivate,
    ];

    /// Wire name of the hook.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::MouseEnter => "mouseEnter",
            Self::MouseLeave => "mouseLeave",
            Self::Focus => "focus",
            Self::Blur => "blur",
            Self::TextChanged => "textChanged",
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
        }
    }

    /// Activation hooks drive the session lifecycle instead of user handlers.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Activate | Self::Deactivate)
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown hook: {0}")]
pub struct UnknownHook(pub String);

impl FromStr for Hook {
    type Err = UnknownHook;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|hook| hook.as_str() == s)
            .ok_or_else(|| UnknownHook(s.to_string()))
    }
}

/// `size` of a text block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextSize {
    #[default]
    Default,
    Small,
    Medium,
    Large,
    ExtraLarge,
}

/// `weight` of a text block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextWeight {
    #[default]
    Default,
    Lighter,
    Bolder,
}

#[derive(Debug, Clone, Copy)]
enum PropertyType {
    Text,
    Flag,
    OneOf(&'static [&'static str]),
}

impl PropertyType {
    fn check(&self, value: &Value) -> Result<(), String> {
        match (self, value) {
            (Self::Text, Value::String(_)) | (Self::Flag, Value::Bool(_)) => Ok(()),
            (Self::OneOf(allowed), Value::String(s)) if allowed.contains(&s.as_str()) => Ok(()),
            (Self::Text, _) => Err("expected a string".to_string()),
            (Self::Flag, _) => Err("expected a boolean".to_string()),
            (Self::OneOf(allowed), _) => Err(format!("expected one of {}", allowed.join(", "))),
        }
    }
}

#[derive(Debug)]
struct PropertyRule {
    key: &'static str,
    ty: PropertyType,
}

const TEXT_SIZES: &[&str] = &["default", "small", "medium", "large", "extraLarge"];
const TEXT_WEIGHTS: &[&str] = &["default", "lighter", "bolder"];
const CONTAINER_STYLES: &[&str] = &["default", "emphasis"];

const CONTAINER_PROPERTIES: &[PropertyRule] = &[PropertyRule {
    key: "style",
    ty: PropertyType::OneOf(CONTAINER_STYLES),
}];

const TEXT_BLOCK_PROPERTIES: &[PropertyRule] = &[
    PropertyRule { key: "text", ty: PropertyType::Text },
    PropertyRule { key: "size", ty: PropertyType::OneOf(TEXT_SIZES) },
    PropertyRule { key: "weight", ty: PropertyType::OneOf(TEXT_WEIGHTS) },
    PropertyRule { key: "wrap", ty: PropertyType::Flag },
];

const TEXT_INPUT_PROPERTIES: &[PropertyRule] = &[
    PropertyRule { key: "placeholder", ty: PropertyType::Text },
    PropertyRule { key: "value", ty: PropertyType::Text },
    PropertyRule { key: "isMultiline", ty: PropertyType::Flag },
];

fn validate_property(kind: &ElementKind, key: &str, value: &Value) -> Result<(), DocumentError> {
    let Some(vocabulary) = kind.vocabulary() else {
        return Ok(());
    };
    let rule = vocabulary
        .iter()
        .find(|rule| rule.key == key)
        .ok_or_else(|| DocumentError::UnknownProperty {
            kind: kind.to_string(),
            key: key.to_string(),
        })?;
    rule.ty.check(value).map_err(|reason| DocumentError::InvalidProperty {
        kind: kind.to_string(),
        key: key.to_string(),
        reason,
    })
}

/// A node in a card's element tree.
///
/// The id is fixed at construction. Children can only be attached through
/// [`Element::with_child`] (before the element joins a card) or
/// [`crate::Card::append_child`], so a card's id registry never drifts from
/// its tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    id: String,
    kind: ElementKind,
    #[serde(default)]
    properties: Properties,
    #[serde(default)]
    children: Vec<Element>,
}

impl Element {
    /// Create an element, validating its id and every property.
    pub fn create(
        kind: ElementKind,
        id: impl Into<String>,
        properties: Properties,
    ) -> Result<Self, DocumentError> {
        let id = id.into();
        if id.is_empty() {
            return Err(DocumentError::EmptyId);
        }
        for (key, value) in &properties {
            validate_property(&kind, key, value)?;
        }
        Ok(Self {
            id,
            kind,
            properties,
            children: Vec::new(),
        })
    }

    fn bare(kind: ElementKind, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            properties: Properties::new(),
            children: Vec::new(),
        }
    }

    pub fn container(id: impl Into<String>) -> Self {
        Self::bare(ElementKind::Container, id)
    }

    pub fn text_block(id: impl Into<String>, text: impl Into<String>) -> Self {
        let mut element = Self::bare(ElementKind::TextBlock, id);
        element
            .properties
            .insert("text".to_string(), Value::String(text.into()));
        element
    }

    pub fn text_input(id: impl Into<String>, placeholder: impl Into<String>) -> Self {
        let mut element = Self::bare(ElementKind::TextInput, id);
        element
            .properties
            .insert("placeholder".to_string(), Value::String(placeholder.into()));
        element
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &ElementKind {
        &self.kind
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    /// Set a property, returning the previous value.
    ///
    /// Known kinds reject keys outside their vocabulary and values of the
    /// wrong type; the element is unchanged on error.
    pub fn set_property(
        &mut self,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<Option<Value>, DocumentError> {
        let value = value.into();
        validate_property(&self.kind, key, &value)?;
        Ok(self.properties.insert(key.to_string(), value))
    }

    pub fn remove_property(&mut self, key: &str) -> Option<Value> {
        self.properties.remove(key)
    }

    /// Builder-style child attachment for subtrees not yet in a card.
    pub fn with_child(mut self, child: Element) -> Result<Self, DocumentError> {
        let mut seen: HashSet<&str> = self.subtree_ids().into_iter().collect();
        for id in child.subtree_ids() {
            if !seen.insert(id) {
                return Err(DocumentError::DuplicateId(id.to_string()));
            }
        }
        self.children.push(child);
        Ok(self)
    }

    pub fn text(&self) -> Option<&str> {
        self.property("text").and_then(Value::as_str)
    }

    pub fn set_text(&mut self, text: impl Into<String>) -> Result<(), DocumentError> {
        self.set_property("text", Value::String(text.into())).map(|_| ())
    }

    pub fn size(&self) -> TextSize {
        self.typed_property("size")
    }

    pub fn set_size(&mut self, size: TextSize) -> Result<(), DocumentError> {
        self.set_typed_property("size", size)
    }

    pub fn weight(&self) -> TextWeight {
        self.typed_property("weight")
    }

    pub fn set_weight(&mut self, weight: TextWeight) -> Result<(), DocumentError> {
        self.set_typed_property("weight", weight)
    }

    pub fn placeholder(&self) -> Option<&str> {
        self.property("placeholder").and_then(Value::as_str)
    }

    pub fn value(&self) -> Option<&str> {
        self.property("value").and_then(Value::as_str)
    }

    fn typed_property<T: serde::de::DeserializeOwned + Default>(&self, key: &str) -> T {
        self.property(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default()
    }

    fn set_typed_property<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), DocumentError> {
        let value = serde_json::to_value(value)
            .map_err(|e| DocumentError::Serialization(e.to_string()))?;
        self.set_property(key, value).map(|_| ())
    }

    /// Depth-first, pre-order search. Returns the first match.
    pub fn find(&self, id: &str) -> Option<&Element> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Element> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|child| child.find_mut(id))
    }

    /// Ids of this element and all its descendants, pre-order.
    pub fn subtree_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        self.collect_ids(&mut ids);
        ids
    }

    fn collect_ids<'a>(&'a self, out: &mut Vec<&'a str>) {
        out.push(&self.id);
        for child in &self.children {
            child.collect_ids(out);
        }
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<Element> {
        &mut self.children
    }

    /// Detach the descendant with `id`, if any.
    pub(crate) fn detach(&mut self, id: &str) -> Option<Element> {
        if let Some(pos) = self.children.iter().position(|child| child.id == id) {
            return Some(self.children.remove(pos));
        }
        self.children.iter_mut().find_map(|child| child.detach(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(ElementKind::from("Input.Text"), ElementKind::TextInput);
        assert_eq!(String::from(ElementKind::TextInput), "Input.Text");
        assert_eq!(
            ElementKind::from("Image"),
            ElementKind::Other("Image".to_string())
        );
    }

    #[test]
    fn test_capabilities() {
        assert!(ElementKind::TextBlock.supports(Hook::Click));
        assert!(!ElementKind::TextBlock.supports(Hook::Focus));
        assert!(ElementKind::TextInput.supports(Hook::TextChanged));
        assert!(ElementKind::Container.supports(Hook::Activate));
        assert!(!ElementKind::Other("Image".into()).supports(Hook::Click));
    }

    #[test]
    fn test_hook_parse() {
        assert_eq!("mouseEnter".parse::<Hook>(), Ok(Hook::MouseEnter));
        assert_eq!(
            "doubleClick".parse::<Hook>(),
            Err(UnknownHook("doubleClick".to_string()))
        );
        assert_eq!(serde_json::to_value(Hook::TextChanged).unwrap(), json!("textChanged"));
    }

    #[test]
    fn test_create_validates_vocabulary() {
        let mut props = Properties::new();
        props.insert("placeholder".into(), json!("type here"));
        assert!(Element::create(ElementKind::TextBlock, "t", props.clone()).is_err());
        assert!(Element::create(ElementKind::TextInput, "i", props).is_ok());
        assert_eq!(
            Element::create(ElementKind::TextBlock, "", Properties::new()),
            Err(DocumentError::EmptyId)
        );
    }

    #[test]
    fn test_set_property_rejects_bad_values() {
        let mut title = Element::text_block("Title", "Hello");
        let err = title.set_property("weight", "heavy").unwrap_err();
        assert!(matches!(err, DocumentError::InvalidProperty { .. }));
        assert_eq!(title.weight(), TextWeight::Default);

        let err = title.set_property("color", "red").unwrap_err();
        assert!(matches!(err, DocumentError::UnknownProperty { .. }));
    }

    #[test]
    fn test_typed_accessors() {
        let mut title = Element::text_block("Title", "Hello");
        title.set_weight(TextWeight::Bolder).unwrap();
        title.set_size(TextSize::ExtraLarge).unwrap();
        assert_eq!(title.weight(), TextWeight::Bolder);
        assert_eq!(title.size(), TextSize::ExtraLarge);
        assert_eq!(title.property("size"), Some(&json!("extraLarge")));
        title.set_text("Bye").unwrap();
        assert_eq!(title.text(), Some("Bye"));
    }

    #[test]
    fn test_other_kind_accepts_anything() {
        let mut image = Element::create(ElementKind::from("Image"), "img", Properties::new()).unwrap();
        image.set_property("url", "https://example.com/a.png").unwrap();
        image.set_property("altText", 42).unwrap();
        assert_eq!(image.property("altText"), Some(&json!(42)));
    }

    #[test]
    fn test_with_child_rejects_duplicates() {
        let column = Element::container("column")
            .with_child(Element::text_block("a", "A"))
            .unwrap();
        let err = column
            .clone()
            .with_child(Element::text_block("a", "again"))
            .unwrap_err();
        assert_eq!(err, DocumentError::DuplicateId("a".to_string()));
        assert_eq!(column.subtree_ids(), vec!["column", "a"]);
    }

    #[test]
    fn test_find_is_depth_first() {
        let tree = Element::container("root")
            .with_child(
                Element::container("left")
                    .with_child(Element::text_block("leaf", "deep"))
                    .unwrap(),
            )
            .unwrap()
            .with_child(Element::text_block("right", "shallow"))
            .unwrap();
        assert_eq!(tree.find("leaf").and_then(Element::text), Some("deep"));
        assert_eq!(tree.subtree_ids(), vec!["root", "left", "leaf", "right"]);
        assert!(tree.find("missing").is_none());
    }
}
