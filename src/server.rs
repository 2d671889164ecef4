//! memstash TCP server
//!
//! Loads the store from its snapshot, binds the listener and spawns a
//! [`ConnectionHandler`] task per accepted client.

use crate::{
    connection::ConnectionHandler,
    error::{Result, StashError},
    protocol::{CommandParser, DEFAULT_MAX_FRAME_SIZE},
    snapshot::{Snapshot, DEFAULT_SNAPSHOT_PATH},
    store::{MemoryStore, Store},
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info, warn};

/// memstash server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub snapshot_path: PathBuf,
    /// Largest amount of unframed data buffered per connection
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:11211".to_string(),
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ServerConfig {
    /// Default configuration listening on `port` of the loopback interface
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: format!("127.0.0.1:{}", port),
            ..Self::default()
        }
    }
}

/// memstash TCP server
pub struct StashServer {
    config: ServerConfig,
    store: Arc<MemoryStore>,
    shutdown_tx: broadcast::Sender<()>,
}

impl StashServer {
    /// Create a server, restoring the store from the configured snapshot
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let snapshot = Snapshot::new(&config.snapshot_path);
        let store = MemoryStore::with_snapshot(snapshot).await?;
        info!(
            path = %config.snapshot_path.display(),
            keys = store.len().await,
            "Store restored from snapshot"
        );

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            store: Arc::new(store),
            shutdown_tx,
        })
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!(addr = %listener.local_addr()?, "memstash server listening");
        Ok(listener)
    }

    /// Bind and serve until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on `listener` until shutdown is triggered
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            info!(client = %addr, "Client connected");
                            let handler = ConnectionHandler::new(
                                stream,
                                addr,
                                CommandParser::new(self.config.max_frame_size),
                                Arc::clone(&self.store),
                                self.shutdown_tx.subscribe(),
                            );

                            tokio::spawn(async move {
                                match handler.run().await {
                                    Ok(()) => info!(client = %addr, "Client disconnected"),
                                    Err(StashError::Protocol(e)) => {
                                        info!(client = %addr, reason = %e, "Closing connection")
                                    }
                                    Err(e) => warn!(client = %addr, error = %e, "Error handling client"),
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping server...");
                    break;
                }
            }
        }

        info!("Server stopped");
        Ok(())
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .map_err(|_| StashError::Server("Failed to send shutdown signal".to_string()))?;
        Ok(())
    }
}
