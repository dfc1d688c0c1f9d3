//! Transport trait for moving protocol frames to and from a peer.
//!
//! Implementations:
//! - WebSocket: one text frame per protocol message (see `connection`)
//! - Memory: an in-process pair, used by tests and embedders

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Transport closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A bidirectional, ordered stream of text frames.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one frame to the peer.
    async fn send(&self, frame: &str) -> Result<()>;

    /// Wait for the next frame.
    ///
    /// `Ok(None)` means the peer closed the connection in an orderly way.
    async fn recv(&self) -> Result<Option<String>>;

    /// Close our side. Closing twice is harmless.
    async fn close(&self) -> Result<()>;
}

/// Create a connected in-memory transport and the peer end driving it.
pub fn memory_pair() -> (MemoryTransport, MemoryPeer) {
    let (to_peer, from_server) = mpsc::unbounded_channel();
    let (to_server, from_peer) = mpsc::unbounded_channel();
    let transport = MemoryTransport {
        outbound: to_peer,
        inbound: Mutex::new(from_peer),
        closed: AtomicBool::new(false),
    };
    let peer = MemoryPeer {
        outbound: Some(to_server),
        inbound: from_server,
    };
    (transport, peer)
}

/// Server end of an in-memory connection.
pub struct MemoryTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: Mutex<mpsc::UnboundedReceiver<Result<String>>>,
    closed: AtomicBool,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, frame: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(frame.to_string())
            .map_err(|_| TransportError::SendFailed("peer went away".to_string()))
    }

    async fn recv(&self) -> Result<Option<String>> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let mut inbound = self.inbound.lock().await;
        inbound.recv().await.transpose()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Peer end of an in-memory connection.
pub struct MemoryPeer {
    outbound: Option<mpsc::UnboundedSender<Result<String>>>,
    inbound: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// Deliver a frame to the server. Returns false once disconnected.
    pub fn send(&self, frame: impl Into<String>) -> bool {
        match &self.outbound {
            Some(tx) => tx.send(Ok(frame.into())).is_ok(),
            None => false,
        }
    }

    /// Make the server's next receive fail with `error`.
    pub fn fail(&self, error: TransportError) {
        if let Some(tx) = &self.outbound {
            let _ = tx.send(Err(error));
        }
    }

    /// Close the connection in an orderly way.
    pub fn disconnect(&mut self) {
        self.outbound = None;
    }

    /// Next frame from the server, or `None` once the server end is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.inbound.try_recv().ok()
    }
}
