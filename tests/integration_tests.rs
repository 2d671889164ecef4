//! Integration tests for memstash
//!
//! Tests the complete system including server, client, and persistence

use memstash::{Client, ServerConfig, StashServer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

struct TestServer {
    addr: String,
    server: Arc<StashServer>,
    handle: JoinHandle<memstash::Result<()>>,
}

impl TestServer {
    /// Start a server on an ephemeral port, snapshotting to `snapshot_path`
    async fn start(snapshot_path: PathBuf) -> Self {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            snapshot_path,
            ..ServerConfig::default()
        };

        let server = Arc::new(StashServer::new(config).await.unwrap());
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let serving = Arc::clone(&server);
        let handle = tokio::spawn(async move { serving.serve(listener).await });

        Self {
            addr,
            server,
            handle,
        }
    }

    async fn stop(self) {
        self.server.shutdown().unwrap();
        self.handle.await.unwrap().unwrap();
    }
}

fn snapshot_in(dir: &Path) -> PathBuf {
    dir.join("memstash.snapshot")
}

/// Send raw bytes and read exactly `expected.len()` bytes back
async fn exchange(stream: &mut TcpStream, request: &[u8], expected: &[u8]) {
    stream.write_all(request).await.unwrap();

    let mut buf = vec![0u8; expected.len()];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        String::from_utf8_lossy(&buf),
        String::from_utf8_lossy(expected)
    );
}

#[tokio::test]
async fn test_round_trip_wire_format() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(snapshot_in(dir.path())).await;

    let mut stream = TcpStream::connect(&server.addr).await.unwrap();
    exchange(&mut stream, b"set foo 3\r\nbar\r\n", b"STORED\r\n").await;
    exchange(
        &mut stream,
        b"get foo\r\n",
        b"VALUE foo 0 3\r\nbar\r\nEND\r\n",
    )
    .await;
}

#[tokio::test]
async fn test_overwrite_keeps_latest_value() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(snapshot_in(dir.path())).await;

    let mut client = Client::connect(&server.addr).await.unwrap();
    assert!(client.set("key", b"first").await.unwrap());
    assert!(client.set("key", b"second").await.unwrap());

    assert_eq!(
        client.get(&["key"]).await.unwrap(),
        vec![("key".to_string(), b"second".to_vec())]
    );
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_multi_key_get() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(snapshot_in(dir.path())).await;

    let mut client = Client::connect(&server.addr).await.unwrap();
    assert!(client.set("a", b"1").await.unwrap());
    assert!(client.set("b", b"22").await.unwrap());
    client.close().await.unwrap();

    let mut stream = TcpStream::connect(&server.addr).await.unwrap();
    exchange(
        &mut stream,
        b"get a missing b\r\n",
        b"VALUE a 0 1\r\n1\r\nVALUE b 0 2\r\n22\r\nEND\r\n",
    )
    .await;
    exchange(&mut stream, b"get missing other\r\n", b"END\r\n").await;
}

#[tokio::test]
async fn test_key_trimming() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(snapshot_in(dir.path())).await;

    let mut stream = TcpStream::connect(&server.addr).await.unwrap();
    exchange(&mut stream, b"set foo 3\r\nbar\r\n", b"STORED\r\n").await;
    exchange(
        &mut stream,
        b"get foo\0\0\0\0\r\n",
        b"VALUE foo 0 3\r\nbar\r\nEND\r\n",
    )
    .await;
}

#[tokio::test]
async fn test_memcached_style_set_header() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(snapshot_in(dir.path())).await;

    let mut stream = TcpStream::connect(&server.addr).await.unwrap();
    exchange(&mut stream, b"set x 0 0 4\r\n0.25\r\n", b"STORED\r\n").await;
    exchange(&mut stream, b"get x\r\n", b"VALUE x 0 4\r\n0.25\r\nEND\r\n").await;
}

#[tokio::test]
async fn test_binary_value_with_line_breaks() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(snapshot_in(dir.path())).await;

    let value = b"line one\r\nline two\r\n\r\nEND\r\nline three";
    let mut client = Client::connect(&server.addr).await.unwrap();
    assert!(client.set("multiline", value).await.unwrap());
    assert!(client.set("after", b"ok").await.unwrap());

    assert_eq!(
        client.get(&["multiline", "after"]).await.unwrap(),
        vec![
            ("multiline".to_string(), value.to_vec()),
            ("after".to_string(), b"ok".to_vec()),
        ]
    );
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_truncated_payload_is_rejected() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(snapshot_in(dir.path())).await;

    let mut stream = TcpStream::connect(&server.addr).await.unwrap();
    exchange(&mut stream, b"set foo 10\r\nabcd\r\n", b"NOT-STORED\r\n").await;
    exchange(&mut stream, b"get foo\r\n", b"END\r\n").await;

    // An existing value is not overwritten either
    exchange(&mut stream, b"set foo 3\r\nbar\r\n", b"STORED\r\n").await;
    exchange(&mut stream, b"set foo 10\r\nabcd\r\n", b"NOT-STORED\r\n").await;
    exchange(
        &mut stream,
        b"get foo\r\n",
        b"VALUE foo 0 3\r\nbar\r\nEND\r\n",
    )
    .await;
}

#[tokio::test]
async fn test_unknown_command_closes_connection() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(snapshot_in(dir.path())).await;

    let mut stream = TcpStream::connect(&server.addr).await.unwrap();
    stream.write_all(b"delete foo\r\n").await.unwrap();

    let mut buf = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);

    // Other clients are unaffected
    let mut client = Client::connect(&server.addr).await.unwrap();
    assert!(client.set("still", b"up").await.unwrap());
}

#[tokio::test]
async fn test_concurrent_clients() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(snapshot_in(dir.path())).await;

    let num_clients = 20;
    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let addr = server.addr.clone();
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&addr).await.unwrap();
            let key = format!("client_{}", client_id);
            let value = format!("value_{}", client_id);
            assert!(client.set(&key, value.as_bytes()).await.unwrap());
            client.close().await.unwrap();
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let keys: Vec<String> = (0..num_clients).map(|id| format!("client_{}", id)).collect();
    let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();

    let mut client = Client::connect(&server.addr).await.unwrap();
    let values = client.get(&key_refs).await.unwrap();
    assert_eq!(values.len(), num_clients);
    for (id, (key, value)) in values.into_iter().enumerate() {
        assert_eq!(key, format!("client_{}", id));
        assert_eq!(value, format!("value_{}", id).into_bytes());
    }
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_persistence_and_recovery() {
    let dir = tempdir().unwrap();
    let snapshot_path = snapshot_in(dir.path());

    let server = TestServer::start(snapshot_path.clone()).await;
    let mut client = Client::connect(&server.addr).await.unwrap();
    assert!(client.set("persistent_key1", b"persistent_value1").await.unwrap());
    assert!(client.set("persistent_key2", b"persistent_value2").await.unwrap());
    assert!(client.set("persistent_key1", b"rewritten").await.unwrap());
    client.close().await.unwrap();
    server.stop().await;

    let server = TestServer::start(snapshot_path).await;
    let mut client = Client::connect(&server.addr).await.unwrap();
    assert_eq!(
        client.get_one("persistent_key1").await.unwrap(),
        Some(b"rewritten".to_vec())
    );
    assert_eq!(
        client.get_one("persistent_key2").await.unwrap(),
        Some(b"persistent_value2".to_vec())
    );
    assert_eq!(client.get_one("never_set").await.unwrap(), None);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_snapshot_failure_reports_not_stored() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(dir.path().join("missing").join("memstash.snapshot")).await;

    let mut client = Client::connect(&server.addr).await.unwrap();
    assert!(!client.set("key", b"value").await.unwrap());
    assert_eq!(client.get_one("key").await.unwrap(), None);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_large_values() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(snapshot_in(dir.path())).await;

    let mut client = Client::connect(&server.addr).await.unwrap();

    let large_value = "x".repeat(1024 * 1024);
    assert!(client.set("large_key", large_value.as_bytes()).await.unwrap());

    let retrieved = client.get_one("large_key").await.unwrap();
    assert_eq!(retrieved, Some(large_value.into_bytes()));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_error_handling() {
    // Test connection to an invalid address
    let result = Client::connect("127.0.0.1:99999").await;
    assert!(result.is_err());
}
