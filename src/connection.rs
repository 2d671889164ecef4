//! Per-connection request loop
//!
//! Each accepted client gets its own `ConnectionHandler` task. Incoming bytes are
//! accumulated in a `BytesMut` buffer until the parser can cut a complete frame, so a
//! command may arrive split over any number of TCP segments.

use crate::error::Result;
use crate::protocol::{trim, Command, CommandParser, Frame, Response};
use crate::store::{MemoryStore, Store};
use bytes::{Buf, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, error, trace, warn};

const INITIAL_BUFFER_SIZE: usize = 4096;

/// Handles a single client connection
pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: BytesMut,
    parser: CommandParser,
    store: Arc<MemoryStore>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        parser: CommandParser,
        store: Arc<MemoryStore>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser,
            store,
            shutdown_rx,
        }
    }

    /// Runs the read-parse-apply-respond loop until the client disconnects, sends an
    /// unknown command, or the server shuts down.
    pub async fn run(mut self) -> Result<()> {
        loop {
            while let Some(frame) = self.next_frame()? {
                let response = self.apply(frame).await;
                self.send_response(&response).await?;
            }

            if self.buffer.capacity() - self.buffer.len() < 1024 {
                self.buffer.reserve(INITIAL_BUFFER_SIZE);
            }

            let n = tokio::select! {
                read = self.stream.get_mut().read_buf(&mut self.buffer) => read?,
                _ = self.shutdown_rx.recv() => {
                    debug!(client = %self.addr, "Shutdown signal received, closing client connection");
                    return Ok(());
                }
            };

            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(());
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("connection closed with {} unframed bytes", self.buffer.len()),
                )
                .into());
            }
            trace!(client = %self.addr, bytes = n, "Read data");
        }
    }

    /// Cuts the next complete frame off the buffer, if there is one
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.parser.parse(&self.buffer)? {
            Some((frame, consumed)) => {
                self.buffer.advance(consumed);
                trace!(
                    client = %self.addr,
                    consumed,
                    remaining = self.buffer.len(),
                    "Parsed frame"
                );
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    async fn apply(&self, frame: Frame) -> Response {
        match frame {
            Frame::Command(Command::Get { keys }) => {
                debug!(client = %self.addr, keys = ?keys, "GET");
                Response::Values(self.store.get(&keys).await)
            }
            Frame::Command(Command::Set { key, size, payload }) => {
                debug!(client = %self.addr, key = %key, size, "SET");
                match self.store.set(key.clone(), trim(&payload).to_vec()).await {
                    Ok(()) => Response::Stored,
                    Err(e) => {
                        error!(client = %self.addr, key = %key, error = %e, "SET failed");
                        Response::NotStored
                    }
                }
            }
            Frame::Rejected(reason) => {
                warn!(client = %self.addr, error = %reason, "Rejected SET");
                Response::NotStored
            }
        }
    }

    async fn send_response(&mut self, response: &Response) -> Result<()> {
        let bytes = response.to_bytes();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        trace!(client = %self.addr, bytes = bytes.len(), "Sent response");
        Ok(())
    }
}
