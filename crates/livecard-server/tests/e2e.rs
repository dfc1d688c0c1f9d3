//! End-to-end tests for livecard-server.
//!
//! Runs the real server on a random port and drives it with a WebSocket
//! client speaking the JSON-RPC protocol, the way a rendering peer would.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use livecard_core::protocol::{
    Outbound, SUBPROTOCOL, decode_outbound, encode_event, encode_response,
};
use livecard_core::{Card, Element, EventNotification, Hook, TextWeight};
use livecard_server::hello_world::{self, HelloWorld};
use livecard_server::{CardServer, ServerConfig};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

const WAIT: Duration = Duration::from_secs(5);

/// Test client standing in for the rendering peer.
struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    protocol: Option<String>,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let mut request = format!("ws://{}", addr)
            .into_client_request()
            .expect("Invalid request");
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));
        let (ws, response) = connect_async(request).await.expect("Failed to connect");
        let protocol = response
            .headers()
            .get("Sec-WebSocket-Protocol")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        Self { ws, protocol }
    }

    async fn recv_frame(&mut self) -> String {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return text.to_string(),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => panic!("Connection closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {}", e),
                None => panic!("Stream ended unexpectedly"),
                _ => continue,
            }
        }
    }

    async fn recv(&mut self) -> Outbound {
        let frame = timeout(WAIT, self.recv_frame())
            .await
            .expect("Timeout waiting for message");
        decode_outbound(&frame).expect("Undecodable frame")
    }

    async fn expect_card(&mut self) -> Card {
        match self.recv().await {
            Outbound::SetCard(card) => card,
            other => panic!("Expected setCard, got {:?}", other),
        }
    }

    async fn send_text(&mut self, frame: String) {
        self.ws
            .send(Message::Text(frame.into()))
            .await
            .expect("Failed to send message");
    }

    async fn fire(&mut self, element_id: &str, hook: Hook) {
        self.fire_event(EventNotification::new(element_id, hook)).await;
    }

    async fn fire_event(&mut self, event: EventNotification) {
        self.send_text(encode_event(&event).unwrap()).await;
    }

    async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Start a server on a random port.
async fn start_server(config: ServerConfig) -> (Arc<CardServer>, SocketAddr) {
    let listener = CardServer::bind("127.0.0.1:0").await.expect("Failed to bind");
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(CardServer::new(config, Arc::new(HelloWorld)));

    let running = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = running.run(listener).await;
    });
    (server, addr)
}

async fn wait_for_sessions(server: &CardServer, expected: usize) {
    timeout(WAIT, async {
        while server.session_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "Expected {} sessions, have {}",
            expected,
            server.session_count()
        )
    });
}

fn text<'a>(card: &'a Card, id: &str) -> Option<&'a str> {
    card.find_by_id(id).and_then(Element::text)
}

#[tokio::test]
async fn test_subprotocol_negotiated() {
    let (_server, addr) = start_server(ServerConfig::default()).await;
    let client = TestClient::connect(addr).await;
    assert_eq!(client.protocol.as_deref(), Some(SUBPROTOCOL));
    client.close().await;
}

#[tokio::test]
async fn test_live_session_over_websocket() {
    let (server, addr) = start_server(ServerConfig::default()).await;
    let mut client = TestClient::connect(addr).await;

    let card = client.expect_card().await;
    assert_eq!(card.id(), hello_world::CARD_ID);
    assert_eq!(text(&card, hello_world::ACTIVATION), Some("Activated"));
    wait_for_sessions(&server, 1).await;

    client.fire(hello_world::TITLE, Hook::Click).await;
    let card = client.expect_card().await;
    assert_eq!(
        card.find_by_id(hello_world::TITLE).unwrap().weight(),
        TextWeight::Bolder
    );

    client
        .fire_event(
            EventNotification::new(hello_world::INPUT, Hook::TextChanged)
                .with_payload(json!({"text": "over the wire"})),
        )
        .await;
    let card = client.expect_card().await;
    assert_eq!(
        text(&card, hello_world::TEXT_LABEL),
        Some("Input.Text=over the wire")
    );

    client.close().await;
    wait_for_sessions(&server, 0).await;
}

#[tokio::test]
async fn test_deactivate_saves_baseline() {
    let (_server, addr) = start_server(ServerConfig::default()).await;
    let mut client = TestClient::connect(addr).await;
    client.expect_card().await;

    client.fire(hello_world::TITLE, Hook::MouseEnter).await;
    client.expect_card().await;
    client.fire(hello_world::CARD_ID, Hook::Deactivate).await;

    let (id, saved) = match client.recv().await {
        Outbound::SaveCard { id, card } => (id, card),
        other => panic!("Expected saveCard, got {:?}", other),
    };
    assert_eq!(saved, hello_world::static_card().unwrap());
    client.send_text(encode_response(id, &Ok(Value::Null)).unwrap()).await;

    // Reactivation works on the same connection.
    client.fire(hello_world::CARD_ID, Hook::Activate).await;
    let card = client.expect_card().await;
    assert_eq!(text(&card, hello_world::HOVER), Some("No mouse"));
    client.close().await;
}

#[tokio::test]
async fn test_stale_and_garbage_frames_are_ignored() {
    let (_server, addr) = start_server(ServerConfig::default()).await;
    let mut client = TestClient::connect(addr).await;
    client.expect_card().await;

    client.send_text("definitely not json".to_string()).await;
    client.fire("Ghost", Hook::Click).await;
    client
        .send_text(r#"{"jsonrpc":"2.0","method":"cursorMoved","params":{}}"#.to_string())
        .await;
    client.fire(hello_world::INPUT, Hook::Focus).await;

    let card = client.expect_card().await;
    assert_eq!(
        text(&card, hello_world::FOCUS_LABEL),
        Some("Input has focus")
    );
    client.close().await;
}

#[tokio::test]
async fn test_unknown_request_gets_error() {
    let (_server, addr) = start_server(ServerConfig::default()).await;
    let mut client = TestClient::connect(addr).await;
    client.expect_card().await;

    client
        .send_text(r#"{"jsonrpc":"2.0","id":"q1","method":"getCard"}"#.to_string())
        .await;
    let frame = timeout(WAIT, client.recv_frame()).await.unwrap();
    let frame: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(frame["id"], json!("q1"));
    assert_eq!(frame["error"]["code"], json!(-32601));
    client.close().await;
}

#[tokio::test]
async fn test_serves_configured_snapshot() {
    let mut snapshot = hello_world::static_card().unwrap();
    snapshot
        .push(Element::text_block("Note", "restored from disk"))
        .unwrap();
    let config = ServerConfig {
        snapshot: Some(snapshot),
        ..ServerConfig::default()
    };

    let (_server, addr) = start_server(config).await;
    let mut client = TestClient::connect(addr).await;
    let card = client.expect_card().await;
    assert_eq!(text(&card, "Note"), Some("restored from disk"));
    assert!(card.contains(hello_world::INPUT));
    client.close().await;
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let (server, addr) = start_server(ServerConfig::default()).await;
    let mut first = TestClient::connect(addr).await;
    let mut second = TestClient::connect(addr).await;
    first.expect_card().await;
    second.expect_card().await;
    wait_for_sessions(&server, 2).await;

    first.fire(hello_world::TITLE, Hook::Click).await;
    let card = first.expect_card().await;
    assert_eq!(
        card.find_by_id(hello_world::TITLE).unwrap().weight(),
        TextWeight::Bolder
    );

    second.fire(hello_world::TITLE, Hook::MouseEnter).await;
    let card = second.expect_card().await;
    assert_eq!(
        card.find_by_id(hello_world::TITLE).unwrap().weight(),
        TextWeight::Default
    );

    first.close().await;
    wait_for_sessions(&server, 1).await;
    second.close().await;
    wait_for_sessions(&server, 0).await;
}
