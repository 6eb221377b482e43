//! Seikan - rendezvous mediator for end-to-end encrypted tunnels
//!
//! Pairs two endpoints under a short tunnel id, forwards their key exchange
//! and relays opaque chunks between them.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use seikan_control::MediatorConfig;
use seikan_server::{MediatorServer, ServerConfig};

/// Seikan - pair two endpoints and relay their encrypted traffic
#[derive(Parser, Debug)]
#[command(name = "seikan")]
#[command(about = "Seikan - pair two endpoints and relay their encrypted traffic")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the mediator
    #[command(long_about = r#"
Run the mediator. Endpoints connect over WebSocket to /seikan-api/ws,
clients probe /seikan-api to check the protocol version.

EXAMPLES:
  # Listen on the default port
  seikan serve

  # Short key exchange waits, for local testing
  seikan serve --bind 127.0.0.1:9087 --public-key-timeout 30

ENVIRONMENT VARIABLES:
  SEIKAN_BIND                Address to listen on
  SEIKAN_PUBLIC_KEY_TIMEOUT  Seconds to wait for the initiator's public key
  SEIKAN_IDENTIFIER_TIMEOUT  Seconds to wait for the joiner's identifier
  SEIKAN_MAX_ID_ATTEMPTS     Tunnel id draws before giving up
  SEIKAN_MAX_MESSAGE_SIZE    Largest accepted WebSocket message in bytes
  SEIKAN_OUTBOUND_CAPACITY   Messages queued per connection
    "#)]
    Serve {
        /// Address to listen on
        #[arg(long, env = "SEIKAN_BIND", default_value = "0.0.0.0:9087")]
        bind: SocketAddr,

        /// Seconds the initiator may take to hand over its public key
        #[arg(long, env = "SEIKAN_PUBLIC_KEY_TIMEOUT", default_value = "300")]
        public_key_timeout: u64,

        /// Seconds the joiner may take to return its encrypted identifier
        #[arg(long, env = "SEIKAN_IDENTIFIER_TIMEOUT", default_value = "10")]
        identifier_timeout: u64,

        /// Tunnel id draws before reporting the id space as exhausted
        #[arg(long, env = "SEIKAN_MAX_ID_ATTEMPTS", default_value = "64")]
        max_id_attempts: usize,

        /// Largest accepted WebSocket message, in bytes
        #[arg(long, env = "SEIKAN_MAX_MESSAGE_SIZE", default_value = "16777216")]
        max_message_size: usize,

        /// Messages queued per connection before relaying waits
        #[arg(long, env = "SEIKAN_OUTBOUND_CAPACITY", default_value = "64")]
        outbound_capacity: usize,
    },
}

/// Setup logging with the specified log level
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match cli.command {
        Commands::Serve {
            bind,
            public_key_timeout,
            identifier_timeout,
            max_id_attempts,
            max_message_size,
            outbound_capacity,
        } => {
            info!(
                "Seikan {} ({}, built {})",
                env!("GIT_TAG"),
                env!("GIT_HASH"),
                env!("BUILD_TIME")
            );

            let mediator = MediatorConfig::default()
                .with_public_key_timeout(Duration::from_secs(public_key_timeout))
                .with_identifier_timeout(Duration::from_secs(identifier_timeout))
                .with_max_id_attempts(max_id_attempts)
                .with_outbound_capacity(outbound_capacity);

            info!(
                "Handshake waits: public key {}s, identifier {}s",
                public_key_timeout, identifier_timeout
            );

            let config = ServerConfig::default()
                .with_bind_addr(bind)
                .with_mediator(mediator)
                .with_max_message_size(max_message_size);

            let shutdown = async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("Received Ctrl+C, shutting down..."),
                    Err(e) => {
                        error!("Failed to listen for Ctrl+C: {}", e);
                        std::future::pending::<()>().await
                    }
                }
            };

            MediatorServer::new(config)
                .start(shutdown)
                .await
                .context("Mediator failed")?;

            info!("Seikan stopped");
            Ok(())
        }
    }
}
