//! Multi-room chat relay - Entry point
//!
//! Binds the listener and accepts connections until Ctrl-C.

use std::env;

use tracing::info;
use tracing_subscriber::EnvFilter;

use relay_chat::{Config, Server, DEFAULT_BINDING};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=relay_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("relay_chat=info")),
        )
        .init();

    // Get bind address from command line or use default
    let binding = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_BINDING.to_string());

    let server = Server::bind(&Config { binding }).await?;

    // Ctrl-C triggers a graceful shutdown: the listener closes and
    // every session is signalled to terminate.
    let handle = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            handle.shutdown();
        }
    });

    server.run().await?;
    Ok(())
}
