//! File-change tracking.
//!
//! The `ChangeTracker` answers "what is this file's content identity, and has
//! it changed?" with as little I/O as possible. In live mode it stats the
//! file and only reads and hashes it when the change time or size moved. In
//! frozen mode it answers purely from a snapshot and treats a miss as an
//! error, which is how a packaged build proves it needs no recompilation.

use std::collections::HashMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use kiln_common::{sanitize_path, strip_root};
use tracing::debug;

use crate::error::CacheError;
use crate::hasher::{self, HashInfo, Resolved};
use crate::snapshot::{FileRecord, Snapshot};

/// Change time and size of a file as seen by one stat call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    ctime: i64,
    size: u64,
}

impl FileStamp {
    fn from_metadata(path: &Path, meta: std::io::Result<Metadata>) -> Result<Self, CacheError> {
        let meta = meta.map_err(|source| CacheError::Stat {
            path: path.to_path_buf(),
            source,
        })?;
        if !meta.is_file() {
            return Err(CacheError::Stat {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "not a regular file",
                ),
            });
        }
        Ok(Self {
            ctime: change_time_millis(&meta),
            size: meta.len(),
        })
    }

    async fn read(path: &Path) -> Result<Self, CacheError> {
        Self::from_metadata(path, tokio::fs::metadata(path).await)
    }

    fn read_sync(path: &Path) -> Result<Self, CacheError> {
        Self::from_metadata(path, std::fs::metadata(path))
    }

    /// A record is fresh while its stored change time is not older than the
    /// current one and the size is identical. A change time that moved
    /// backwards with the same size is not treated as a change.
    fn is_stale(stored: FileStamp, current: FileStamp) -> bool {
        !(stored.ctime >= current.ctime && stored.size == current.size)
    }
}

impl From<&FileRecord> for FileStamp {
    fn from(record: &FileRecord) -> Self {
        Self {
            ctime: record.ctime,
            size: record.size,
        }
    }
}

#[cfg(unix)]
fn change_time_millis(meta: &Metadata) -> i64 {
    use std::os::unix::fs::MetadataExt;
    meta.ctime() * 1000 + meta.ctime_nsec() / 1_000_000
}

#[cfg(not(unix))]
fn change_time_millis(meta: &Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_millis() as i64)
}

/// Per-project store of file records keyed by sanitized relative path.
#[derive(Debug)]
pub struct ChangeTracker {
    /// Sanitized project root stripped from every key.
    project_root: String,
    /// Project root of the run a loaded snapshot came from.
    original_root: Option<String>,
    /// Frozen mode: never stat, a missing record is an error.
    fail_on_miss: bool,
    records: Mutex<HashMap<String, FileRecord>>,
}

impl ChangeTracker {
    /// Creates an empty live tracker for `project_root`.
    pub fn new(project_root: &Path) -> Self {
        Self {
            project_root: sanitize_path(project_root),
            original_root: None,
            fail_on_miss: false,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a frozen tracker from a snapshot, possibly taken under a
    /// different project root.
    pub fn from_snapshot(snapshot: Snapshot, project_root: &Path) -> Self {
        let original_root = Some(snapshot.project_root).filter(|r| !r.is_empty());
        Self {
            project_root: sanitize_path(project_root),
            original_root,
            fail_on_miss: true,
            records: Mutex::new(snapshot.change_cache.into_iter().collect()),
        }
    }

    /// Switches between frozen (`true`) and live (`false`) lookups.
    pub fn with_fail_on_miss(mut self, fail_on_miss: bool) -> Self {
        self.fail_on_miss = fail_on_miss;
        self
    }

    /// Loads a frozen tracker from a snapshot file.
    pub async fn load(snapshot_path: &Path, project_root: &Path) -> Result<Self, CacheError> {
        let snapshot = Snapshot::read(snapshot_path).await?;
        Ok(Self::from_snapshot(snapshot, project_root))
    }

    /// Blocking twin of [`ChangeTracker::load`].
    pub fn load_sync(snapshot_path: &Path, project_root: &Path) -> Result<Self, CacheError> {
        let snapshot = Snapshot::read_sync(snapshot_path)?;
        Ok(Self::from_snapshot(snapshot, project_root))
    }

    /// Returns `true` if lookups are answered only from recorded entries.
    pub fn is_frozen(&self) -> bool {
        self.fail_on_miss
    }

    /// Returns the sanitized project root.
    pub fn project_root(&self) -> &str {
        &self.project_root
    }

    /// Returns the project root recorded in the loaded snapshot, if any.
    pub fn original_root(&self) -> Option<&str> {
        self.original_root.as_deref()
    }

    /// Number of recorded files.
    pub fn len(&self) -> usize {
        self.records().len()
    }

    /// Returns `true` if no file has been recorded.
    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// Returns the record stored under a cache key.
    pub fn record(&self, key: &str) -> Option<FileRecord> {
        self.records().get(key).cloned()
    }

    /// Computes the cache key of a path: sanitized, with the project root
    /// and then the snapshot's original root stripped.
    pub fn cache_key(&self, path: &Path) -> String {
        let sanitized = sanitize_path(path);
        let key = strip_root(&sanitized, &self.project_root);
        let key = match &self.original_root {
            Some(root) => strip_root(key, root),
            None => key,
        };
        key.to_string()
    }

    /// Returns the hash and classification of a file.
    ///
    /// In frozen mode the answer comes from the snapshot alone. In live mode
    /// the file is stat'ed; it is only read and hashed again when it looks
    /// changed, and then the returned value carries the read contents.
    pub async fn resolve_hash(&self, path: &Path) -> Result<Resolved, CacheError> {
        let key = self.cache_key(path);
        if self.fail_on_miss {
            return self.frozen_info(path, &key).map(Resolved::cached);
        }

        let stamp = FileStamp::read(path).await?;
        if let Some(info) = self.unchanged_info(&key, stamp) {
            return Ok(Resolved::cached(info));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| CacheError::io(path, e))?;
        Ok(self.record_contents(key, stamp, path, bytes))
    }

    /// Blocking twin of [`ChangeTracker::resolve_hash`].
    pub fn resolve_hash_sync(&self, path: &Path) -> Result<Resolved, CacheError> {
        let key = self.cache_key(path);
        if self.fail_on_miss {
            return self.frozen_info(path, &key).map(Resolved::cached);
        }

        let stamp = FileStamp::read_sync(path)?;
        if let Some(info) = self.unchanged_info(&key, stamp) {
            return Ok(Resolved::cached(info));
        }

        let bytes = std::fs::read(path).map_err(|e| CacheError::io(path, e))?;
        Ok(self.record_contents(key, stamp, path, bytes))
    }

    /// Returns `true` if a recorded file's change time or size moved.
    ///
    /// Files that were never recorded report `false`. A recorded file that
    /// can no longer be stat'ed reports `true`. Frozen trackers never stat
    /// and report `false` for every recorded file.
    pub async fn has_changed(&self, path: &Path) -> Result<bool, CacheError> {
        let Some(stored) = self.stored_stamp(path)? else {
            return Ok(false);
        };
        Ok(match FileStamp::read(path).await {
            Ok(current) => FileStamp::is_stale(stored, current),
            Err(_) => true,
        })
    }

    /// Blocking twin of [`ChangeTracker::has_changed`].
    pub fn has_changed_sync(&self, path: &Path) -> Result<bool, CacheError> {
        let Some(stored) = self.stored_stamp(path)? else {
            return Ok(false);
        };
        Ok(match FileStamp::read_sync(path) {
            Ok(current) => FileStamp::is_stale(stored, current),
            Err(_) => true,
        })
    }

    /// Captures the current records for persistence.
    pub fn export_snapshot(&self) -> Snapshot {
        Snapshot {
            change_cache: self
                .records()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            project_root: self.project_root.clone(),
        }
    }

    /// Writes the current records to a snapshot file.
    pub async fn save(&self, path: &Path) -> Result<(), CacheError> {
        self.export_snapshot().write(path).await
    }

    /// Blocking twin of [`ChangeTracker::save`].
    pub fn save_sync(&self, path: &Path) -> Result<(), CacheError> {
        self.export_snapshot().write_sync(path)
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, FileRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn frozen_info(&self, path: &Path, key: &str) -> Result<HashInfo, CacheError> {
        match self.records().get(key) {
            Some(record) => Ok(record.info.clone()),
            None => {
                debug!(
                    path = %path.display(),
                    key,
                    project_root = %self.project_root,
                    original_root = ?self.original_root,
                    "file missing from frozen snapshot"
                );
                Err(CacheError::NotPrecompiled {
                    path: path.to_path_buf(),
                })
            }
        }
    }

    /// Stamp of the recorded entry for `path`, or `None` in the cases where
    /// the answer is "not changed" without a stat.
    fn stored_stamp(&self, path: &Path) -> Result<Option<FileStamp>, CacheError> {
        let key = self.cache_key(path);
        if self.fail_on_miss {
            self.frozen_info(path, &key)?;
            return Ok(None);
        }
        Ok(self.records().get(&key).map(FileStamp::from))
    }

    fn unchanged_info(&self, key: &str, current: FileStamp) -> Option<HashInfo> {
        let records = self.records();
        let record = records.get(key)?;
        let stored = FileStamp::from(record);
        if FileStamp::is_stale(stored, current) {
            debug!(
                key,
                stored_ctime = stored.ctime,
                ctime = current.ctime,
                stored_size = stored.size,
                size = current.size,
                "invalidating cache entry"
            );
            return None;
        }
        Some(record.info.clone())
    }

    fn record_contents(
        &self,
        key: String,
        stamp: FileStamp,
        path: &Path,
        bytes: Vec<u8>,
    ) -> Resolved {
        let resolved = hasher::analyze(path, bytes);
        debug!(key = %key, hash = %resolved.info.hash, "recorded file");
        self.records().insert(
            key,
            FileRecord {
                ctime: stamp.ctime,
                size: stamp.size,
                info: resolved.info.clone(),
            },
        );
        resolved
    }
}

/// Resolves a possibly relative path against the current directory.
pub(crate) fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
