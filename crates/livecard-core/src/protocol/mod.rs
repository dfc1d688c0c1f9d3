//! Wire protocol between a live card server and the peer rendering it.
//!
//! Messages are JSON-RPC 2.0 frames, one per transport message:
//! - `fireEvent` notification, peer to server, carrying a user interaction
//! - `setCard` notification, server to peer, carrying the full card
//! - `saveCard` request, server to peer, answered with a result or an error
//!
//! Only this subset of JSON-RPC is understood.

pub mod envelope;

pub use envelope::{
    EventNotification, Inbound, Outbound, ProtocolError, Response, RpcError, decode_inbound,
    decode_outbound, encode_error_response, encode_event, encode_push, encode_response,
    encode_save_request,
};

/// Protocol version string carried in every frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// WebSocket subprotocol negotiated on upgrade.
pub const SUBPROTOCOL: &str = "json-rpc";

/// Maximum frame size (8MB) accepted from a peer.
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Method names.
pub mod methods {
    pub const FIRE_EVENT: &str = "fireEvent";
    pub const SET_CARD: &str = "setCard";
    pub const SAVE_CARD: &str = "saveCard";
}

/// JSON-RPC error codes used by this protocol.
pub mod codes {
    pub const METHOD_NOT_FOUND: i64 = -32601;
}
