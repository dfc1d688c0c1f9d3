//! livecard-server: serves the Hello World card to WebSocket peers.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use livecard_server::hello_world::HelloWorld;
use livecard_server::{Args, CardServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,livecard_server=debug"
    } else {
        "info,livecard_server=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::from_args(&args)?;
    info!("Starting livecard-server");
    info!("Listen address: {}", config.listen);
    match &args.snapshot {
        Some(path) => info!("Serving snapshot {:?}", path),
        None => info!("Serving the Hello World card"),
    }

    let server = CardServer::new(config, Arc::new(HelloWorld));
    let listener = CardServer::bind(&server.config().listen).await?;

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        server.accept_connection(stream, addr);
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down ({} sessions open)", server.session_count());
    Ok(())
}
