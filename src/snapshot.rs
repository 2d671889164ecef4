//! Whole-store snapshots for memstash
//!
//! Every successful mutation rewrites the complete mapping to disk. The file is
//! replaced atomically: the new snapshot is written to `<path>.tmp`, synced, and
//! renamed over the old one.

use crate::error::{Result, StashError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Snapshot location used by the server binary, relative to its working directory
pub const DEFAULT_SNAPSHOT_PATH: &str = "memstash.snapshot";

/// Format version written into every snapshot
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    entries: &'a HashMap<String, Vec<u8>>,
}

#[derive(Deserialize)]
struct SnapshotFile {
    version: u32,
    entries: HashMap<String, Vec<u8>>,
}

/// Snapshot file at a fixed path
#[derive(Debug, Clone)]
pub struct Snapshot {
    path: PathBuf,
}

impl Snapshot {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted mapping.
    ///
    /// A missing file yields an empty mapping. A file that cannot be decoded is an
    /// error: starting empty would silently drop the persisted state.
    pub async fn load(&self) -> Result<HashMap<String, Vec<u8>>> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };

        let snapshot: SnapshotFile = bincode::deserialize(&bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StashError::Snapshot(format!(
                "unsupported snapshot version {} in {}",
                snapshot.version,
                self.path.display()
            )));
        }
        Ok(snapshot.entries)
    }

    /// Replace the snapshot with the full contents of `entries`
    pub async fn save(&self, entries: &HashMap<String, Vec<u8>>) -> Result<()> {
        let bytes = bincode::serialize(&SnapshotRef {
            version: SNAPSHOT_VERSION,
            entries,
        })?;

        let temp_path = self.temp_path();
        let mut file = File::create(&temp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;
        debug!(
            path = %self.path.display(),
            keys = entries.len(),
            bytes = bytes.len(),
            "Snapshot written"
        );
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut path = self.path.clone().into_os_string();
        path.push(".tmp");
        PathBuf::from(path)
    }
}
