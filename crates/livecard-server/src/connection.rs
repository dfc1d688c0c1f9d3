//! WebSocket transport.
//!
//! Wraps a WebSocket stream, split into read and write halves so a reader
//! task and writers never contend for the same lock.

use crate::transport::{Result, Transport, TransportError};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use livecard_core::protocol::MAX_MESSAGE_SIZE;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, warn};

/// A single WebSocket connection carrying protocol frames.
pub struct WebSocketTransport<S> {
    /// Label used in logs (e.g., "conn-1")
    label: String,
    write: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    read: Mutex<SplitStream<WebSocketStream<S>>>,
}

impl<S> WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(label: impl Into<String>, ws_stream: WebSocketStream<S>) -> Self {
        let (write, read) = ws_stream.split();
        Self {
            label: label.into(),
            write: Mutex::new(write),
            read: Mutex::new(read),
        }
    }
}

#[async_trait]
impl<S> Transport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Frames go out as text messages.
    async fn send(&self, frame: &str) -> Result<()> {
        let mut write = self.write.lock().await;
        write
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| match e {
                WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
                other => TransportError::SendFailed(other.to_string()),
            })
    }

    async fn recv(&self) -> Result<Option<String>> {
        let mut read = self.read.lock().await;
        loop {
            match read.next().await {
                Some(Ok(msg)) => {
                    let frame = match msg {
                        Message::Text(text) => text.to_string(),
                        Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                            Ok(text) => text,
                            Err(_) => {
                                warn!("Dropping non-UTF-8 binary frame from {}", self.label);
                                continue;
                            }
                        },
                        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                        Message::Close(_) => {
                            debug!("Received close frame from {}", self.label);
                            return Ok(None);
                        }
                    };

                    if frame.len() > MAX_MESSAGE_SIZE {
                        warn!(
                            "Message from {} exceeds max size ({} > {}), dropping",
                            self.label,
                            frame.len(),
                            MAX_MESSAGE_SIZE
                        );
                        continue;
                    }
                    return Ok(Some(frame));
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    debug!("Connection {} closed", self.label);
                    return Ok(None);
                }
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                None => {
                    debug!("Connection {} stream ended", self.label);
                    return Ok(None);
                }
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let mut write = self.write.lock().await;
        match write.send(Message::Close(None)).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(e.to_string())),
        }
    }
}
