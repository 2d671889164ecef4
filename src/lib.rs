//! memstash - an in-memory key-value store with a memcached-style TCP interface
//!
//! This library provides:
//! - A `get`/`set` line protocol with incremental framing
//! - A reader/writer-locked store shared by all connections
//! - Whole-store snapshots written after every mutation
//! - A small async client

pub mod client;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod server;
pub mod snapshot;
pub mod store;

pub use client::Client;
pub use error::{Result, StashError};
pub use protocol::{Command, Response};
pub use server::{ServerConfig, StashServer};
pub use snapshot::Snapshot;
pub use store::{MemoryStore, Store};
