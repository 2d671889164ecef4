//! memstash server binary
//!
//! Usage: `server <port>`. The store is snapshotted to `memstash.snapshot` in the
//! working directory.

use clap::Parser;
use memstash::{Result, ServerConfig, StashServer};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(about = "In-memory key/value store speaking a memcached-style get/set protocol")]
struct Args {
    /// TCP port to listen on (1-65534)
    #[arg(value_parser = clap::value_parser!(u16).range(1..65535))]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Invalid or missing port exits here with a usage error, before anything is bound
    let args = Args::parse();

    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let server = Arc::new(StashServer::new(ServerConfig::with_port(args.port)).await?);

    let server_clone = Arc::clone(&server);
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }

        info!("Received Ctrl+C, initiating graceful shutdown...");
        if let Err(e) = server_clone.shutdown() {
            error!(error = %e, "Failed to initiate shutdown");
        }
    });

    server.run().await
}
