//! Error types for memstash

use crate::protocol::ParseError;
use std::io;
use thiserror::Error;

/// Result type alias for memstash operations
pub type Result<T> = std::result::Result<T, StashError>;

/// Custom error types for memstash
#[derive(Error, Debug)]
pub enum StashError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Snapshot encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ParseError),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Client error: {0}")]
    Client(String),
}
