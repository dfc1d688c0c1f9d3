//! WebSocket server for live card sessions.
//!
//! Every accepted connection is upgraded with the `json-rpc` subprotocol
//! and gets its own session task, which lives until the channel closes.

use crate::config::ServerConfig;
use crate::connection::WebSocketTransport;
use crate::session::{CardBehavior, open_session};
use anyhow::Result;
use livecard_core::protocol::SUBPROTOCOL;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, error, info, warn};

const PROTOCOL_HEADER: &str = "Sec-WebSocket-Protocol";

pub struct CardServer {
    config: Arc<ServerConfig>,
    behavior: Arc<dyn CardBehavior>,
    /// Sessions currently open
    sessions: Arc<AtomicUsize>,
    /// Counter for generating connection IDs
    next_conn_id: AtomicU64,
}

impl CardServer {
    pub fn new(config: ServerConfig, behavior: Arc<dyn CardBehavior>) -> Self {
        Self {
            config: Arc::new(config),
            behavior,
            sessions: Arc::new(AtomicUsize::new(0)),
            next_conn_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("Card server listening on {}", listen_addr);
        Ok(listener)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Serve one TCP connection on its own task.
    pub fn accept_connection(&self, stream: TcpStream, addr: SocketAddr) -> JoinHandle<()> {
        let conn_id = format!(
            "conn-{}",
            self.next_conn_id.fetch_add(1, Ordering::Relaxed)
        );
        let config = Arc::clone(&self.config);
        let behavior = Arc::clone(&self.behavior);
        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            serve_connection(stream, addr, conn_id, config, behavior, sessions).await;
        })
    }

    /// Accept connections until the listener fails.
    pub async fn run(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            self.accept_connection(stream, addr);
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    conn_id: String,
    config: Arc<ServerConfig>,
    behavior: Arc<dyn CardBehavior>,
    sessions: Arc<AtomicUsize>,
) {
    let ws_stream = match accept_hdr_async(stream, negotiate_subprotocol).await {
        Ok(ws) => ws,
        Err(e) => {
            // Health checks connect and close without finishing the handshake.
            let err_str = e.to_string();
            if err_str.contains("Handshake not finished")
                || err_str.contains("Connection reset")
                || err_str.contains("unexpected EOF")
            {
                debug!("Connection closed before handshake from {}", addr);
            } else {
                error!("WebSocket upgrade failed for {}: {}", addr, e);
            }
            return;
        }
    };
    info!("New connection from {} (conn_id: {})", addr, conn_id);

    let card = match &config.snapshot {
        Some(card) => card.clone(),
        None => match behavior.initial_card() {
            Ok(card) => card,
            Err(e) => {
                error!("Cannot build card for {}: {}", conn_id, e);
                return;
            }
        },
    };

    let transport = Arc::new(WebSocketTransport::new(conn_id.clone(), ws_stream));
    let session = match open_session(card, transport, behavior, config.session.clone()).await {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to start session on {}: {}", conn_id, e);
            return;
        }
    };

    sessions.fetch_add(1, Ordering::SeqCst);
    let outcome = session.closed().await;
    sessions.fetch_sub(1, Ordering::SeqCst);

    match outcome {
        Ok(reason) => info!("Session {} on {} ended ({:?})", session.id(), conn_id, reason),
        Err(e) => warn!("Session {} on {} failed: {}", session.id(), conn_id, e),
    }
}

/// Accept the upgrade, echoing `json-rpc` when the client offers it.
fn negotiate_subprotocol(request: &Request, mut response: Response) -> Result<Response, ErrorResponse> {
    let offered = request
        .headers()
        .get(PROTOCOL_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.split(',').any(|p| p.trim() == SUBPROTOCOL));

    if offered {
        response
            .headers_mut()
            .insert(PROTOCOL_HEADER, HeaderValue::from_static(SUBPROTOCOL));
    } else {
        debug!("Client did not offer the {} subprotocol", SUBPROTOCOL);
    }
    Ok(response)
}
