//! Serialized form of the change tracker.
//!
//! A snapshot is written once after a precompile run and loaded by a
//! production run, which then answers every hash lookup from it without
//! touching the disk. The file is gzip-compressed JSON:
//!
//! ```text
//! {"changeCache": {"/src/main.js": {"ctime": .., "size": .., "info": {..}}},
//!  "projectRoot": "/home/dev/app"}
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CacheError;
use crate::hasher::HashInfo;
use crate::persist;

/// What the tracker remembers about one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Change time in milliseconds since the Unix epoch.
    pub ctime: i64,
    /// File size in bytes.
    pub size: u64,
    /// Hash and classification computed when the file was last read.
    pub info: HashInfo,
}

/// The persisted state of a [`ChangeTracker`](crate::ChangeTracker).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Records keyed by sanitized path relative to the project root.
    pub change_cache: BTreeMap<String, FileRecord>,
    /// Sanitized project root of the run that produced the snapshot.
    pub project_root: String,
}

impl Snapshot {
    /// Encodes the snapshot as gzip-compressed JSON.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CacheError> {
        persist::to_gz_json(self)
    }

    /// Decodes a snapshot from gzip-compressed JSON.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CacheError> {
        persist::from_gz_json(bytes)
    }

    /// Writes the snapshot to `path`.
    pub async fn write(&self, path: &Path) -> Result<(), CacheError> {
        let bytes = self.to_bytes()?;
        debug!(path = %path.display(), entries = self.change_cache.len(), "saving snapshot");
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| CacheError::io(path, e))
    }

    /// Blocking twin of [`Snapshot::write`].
    pub fn write_sync(&self, path: &Path) -> Result<(), CacheError> {
        let bytes = self.to_bytes()?;
        debug!(path = %path.display(), entries = self.change_cache.len(), "saving snapshot");
        std::fs::write(path, bytes).map_err(|e| CacheError::io(path, e))
    }

    /// Reads a snapshot from `path`.
    pub async fn read(path: &Path) -> Result<Self, CacheError> {
        debug!(path = %path.display(), "loading snapshot");
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| CacheError::io(path, e))?;
        Self::from_bytes(&bytes)
    }

    /// Blocking twin of [`Snapshot::read`].
    pub fn read_sync(path: &Path) -> Result<Self, CacheError> {
        debug!(path = %path.display(), "loading snapshot");
        let bytes = std::fs::read(path).map_err(|e| CacheError::io(path, e))?;
        Self::from_bytes(&bytes)
    }
}
