//! livecard-server: serves live cards to peers over WebSocket.
//!
//! Exposes the session machinery for embedding and testing; the binary in
//! `main.rs` wires it to a TCP listener.

pub mod channel;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod hello_world;
pub mod lock;
pub mod server;
pub mod session;
pub mod transport;

pub use channel::{ChannelConfig, ChannelError, ChannelState, CloseReason, PeerClient, SyncChannel};
pub use config::{Args, ConfigError, ServerConfig};
pub use dispatcher::EventDispatcher;
pub use lock::{MutationGuard, MutationLock};
pub use server::CardServer;
pub use session::{CardBehavior, LiveSession, SessionConfig, SessionError, open_session};
pub use transport::{MemoryPeer, MemoryTransport, Transport, TransportError, memory_pair};
