//! JSON-RPC envelope types.
//!
//! Frames are decoded through one loose [`RawFrame`] and then classified,
//! so unknown methods from newer peers are reported as data instead of
//! failing the parse.

use super::{JSONRPC_VERSION, methods};
use crate::card::Card;
use crate::element::Hook;
use crate::handlers::EventPayload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("unsupported jsonrpc version: {0}")]
    Version(String),

    #[error("invalid params for {method}: {reason}")]
    InvalidParams { method: String, reason: String },

    #[error("encoding failed: {0}")]
    Encode(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// A user interaction reported by the peer.
///
/// Wire format: `{"elementId":"Title","hook":"click","payload":{...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventNotification {
    pub element_id: String,
    pub hook: Hook,
    #[serde(default)]
    pub payload: EventPayload,
}

impl EventNotification {
    pub fn new(element_id: impl Into<String>, hook: Hook) -> Self {
        Self {
            element_id: element_id.into(),
            hook,
            payload: EventPayload::default(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<EventPayload>) -> Self {
        self.payload = payload.into();
        self
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message} (code {code})")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Answer to one of our requests.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    pub outcome: std::result::Result<Value, RpcError>,
}

/// Frames a server receives.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event(EventNotification),
    Response(Response),
    /// Notification with a method we do not know. Ignored.
    Notification { method: String },
    /// Request from the peer. None are served; answered with an error.
    Request { id: Value, method: String },
}

/// Frames a peer receives.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    SetCard(Card),
    SaveCard { id: u64, card: Card },
    Other { method: String },
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    jsonrpc: String,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

impl RawFrame {
    fn parse(frame: &str) -> Result<Self> {
        let raw: Self =
            serde_json::from_str(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        if raw.jsonrpc != JSONRPC_VERSION {
            return Err(ProtocolError::Version(raw.jsonrpc));
        }
        Ok(raw)
    }

    fn params<T: serde::de::DeserializeOwned>(&self, method: &str) -> Result<T> {
        serde_json::from_value(self.params.clone()).map_err(|e| ProtocolError::InvalidParams {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }
}

#[derive(Serialize)]
struct NotificationFrame<'a, P> {
    jsonrpc: &'static str,
    method: &'a str,
    params: P,
}

#[derive(Serialize)]
struct RequestFrame<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Serialize)]
struct ResponseFrame<'a, I> {
    jsonrpc: &'static str,
    id: I,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a RpcError>,
}

#[derive(Serialize)]
struct CardParams<'a> {
    card: &'a Card,
}

#[derive(Deserialize)]
struct OwnedCardParams {
    card: Card,
}

fn to_json<T: Serialize>(frame: &T) -> Result<String> {
    serde_json::to_string(frame).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// `setCard` notification carrying the whole card.
pub fn encode_push(card: &Card) -> Result<String> {
    to_json(&NotificationFrame {
        jsonrpc: JSONRPC_VERSION,
        method: methods::SET_CARD,
        params: CardParams { card },
    })
}

/// `saveCard` request with id `id`.
pub fn encode_save_request(id: u64, card: &Card) -> Result<String> {
    to_json(&RequestFrame {
        jsonrpc: JSONRPC_VERSION,
        id,
        method: methods::SAVE_CARD,
        params: CardParams { card },
    })
}

/// `fireEvent` notification, as a peer sends it.
pub fn encode_event(event: &EventNotification) -> Result<String> {
    to_json(&NotificationFrame {
        jsonrpc: JSONRPC_VERSION,
        method: methods::FIRE_EVENT,
        params: event,
    })
}

/// Response to request `id`, as a peer sends it.
pub fn encode_response(id: u64, outcome: &std::result::Result<Value, RpcError>) -> Result<String> {
    let (result, error) = match outcome {
        Ok(value) => (Some(value), None),
        Err(error) => (None, Some(error)),
    };
    to_json(&ResponseFrame {
        jsonrpc: JSONRPC_VERSION,
        id,
        result,
        error,
    })
}

/// Error response to a peer request we do not serve.
pub fn encode_error_response(id: &Value, error: &RpcError) -> Result<String> {
    to_json(&ResponseFrame {
        jsonrpc: JSONRPC_VERSION,
        id,
        result: None,
        error: Some(error),
    })
}

/// Classify a frame received by the server.
pub fn decode_inbound(frame: &str) -> Result<Inbound> {
    let raw = RawFrame::parse(frame)?;
    match (raw.id.clone(), raw.method.clone()) {
        (None, Some(method)) if method == methods::FIRE_EVENT => {
            Ok(Inbound::Event(raw.params(&method)?))
        }
        (None, Some(method)) => Ok(Inbound::Notification { method }),
        (Some(id), Some(method)) => Ok(Inbound::Request { id, method }),
        (Some(id), None) => {
            let id = id
                .as_u64()
                .ok_or_else(|| ProtocolError::Malformed(format!("unexpected response id {id}")))?;
            let outcome = match raw.error {
                Some(error) => Err(error),
                None => Ok(raw.result.unwrap_or(Value::Null)),
            };
            Ok(Inbound::Response(Response { id, outcome }))
        }
        (None, None) => Err(ProtocolError::Malformed(
            "frame has neither method nor id".to_string(),
        )),
    }
}

/// Classify a frame received by the peer.
pub fn decode_outbound(frame: &str) -> Result<Outbound> {
    let raw = RawFrame::parse(frame)?;
    let Some(method) = raw.method.clone() else {
        return Err(ProtocolError::Malformed("frame has no method".to_string()));
    };
    match (method.as_str(), &raw.id) {
        (methods::SET_CARD, None) => {
            let params: OwnedCardParams = raw.params(&method)?;
            Ok(Outbound::SetCard(params.card))
        }
        (methods::SAVE_CARD, Some(id)) => {
            let id = id
                .as_u64()
                .ok_or_else(|| ProtocolError::Malformed(format!("unexpected request id {id}")))?;
            let params: OwnedCardParams = raw.params(&method)?;
            Ok(Outbound::SaveCard { id, card: params.card })
        }
        _ => Ok(Outbound::Other { method }),
    }
}
