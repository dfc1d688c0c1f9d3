//! livecard-core: document model and wire protocol for live cards.
//!
//! This crate provides:
//! - The element tree and the card that owns it (ids, typed properties)
//! - Handler registration and synchronous event dispatch
//! - The JSON-RPC wire protocol spoken with the rendering peer
//!
//! Nothing here touches the network or an async runtime; the server crate
//! adds locking and transports on top.

pub mod card;
pub mod element;
pub mod handlers;
pub mod live;
pub mod protocol;

pub use card::{Card, DocumentError};
pub use element::{Element, ElementKind, Hook, Properties, TextSize, TextWeight, VOCABULARY_VERSION};
pub use handlers::{EventContext, EventHandler, EventPayload, HandlerError, HandlerTable, event_handler};
pub use live::{DispatchError, DispatchOutcome, LiveDocument};
pub use protocol::{EventNotification, Inbound, Outbound, ProtocolError};
