use crate::channel::ChannelConfig;
use crate::session::SessionConfig;
use clap::Parser;
use livecard_core::{Card, DocumentError};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "livecard-server")]
#[command(about = "Serve a live card to WebSocket peers")]
pub struct Args {
    /// Address to listen on for incoming connections
    #[arg(short, long, env = "LIVECARD_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// Card JSON to serve instead of the built-in Hello World card
    #[arg(long, env = "LIVECARD_SNAPSHOT")]
    pub snapshot: Option<PathBuf>,

    /// Seconds the peer gets to acknowledge a save request
    #[arg(long, env = "LIVECARD_SAVE_TIMEOUT_SECS", default_value_t = 10)]
    pub save_timeout_secs: u64,

    /// Only push the card on activation, not after every handled event
    #[arg(long)]
    pub no_push_after_event: bool,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,
}

/// Server configuration resolved from [`Args`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: String,
    /// Card every new session starts from. `None` uses the behavior's own card.
    pub snapshot: Option<Card>,
    pub session: SessionConfig,
}

impl ServerConfig {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        if args.save_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        let snapshot = args.snapshot.as_deref().map(load_snapshot).transpose()?;

        Ok(Self {
            listen: args.listen.clone(),
            snapshot,
            session: SessionConfig {
                push_after_event: !args.no_push_after_event,
                channel: ChannelConfig {
                    save_timeout: Duration::from_secs(args.save_timeout_secs),
                },
                ..SessionConfig::default()
            },
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            snapshot: None,
            session: SessionConfig::default(),
        }
    }
}

/// Read a card previously written with `Card::to_json`.
pub fn load_snapshot(path: &Path) -> Result<Card, ConfigError> {
    let json = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadSnapshot {
        path: path.to_path_buf(),
        source,
    })?;
    Card::from_json(&json).map_err(|source| ConfigError::ParseSnapshot {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("save timeout must be at least one second")]
    ZeroTimeout,

    #[error("failed to read snapshot {}: {source}", .path.display())]
    ReadSnapshot {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid snapshot {}: {source}", .path.display())]
    ParseSnapshot {
        path: PathBuf,
        source: DocumentError,
    },
}
