//! Content-addressed artifact storage.
//!
//! Compiled artifacts live directly in a per-compiler cache directory, one
//! file per content hash:
//!
//! ```text
//! <cache_dir>/
//! ├── 3f786850e387550fdab836ed7e6dc881de23001b        # gzip JSON {code, mimeType, dependentFiles}
//! ├── 89e6c98d92887913cadf06b2adb97f26cde4849b        # gzip raw bytes
//! └── 89e6c98d92887913cadf06b2adb97f26cde4849b.info   # gzip JSON {mimeType, dependentFiles}
//! ```
//!
//! Binary payloads are kept out of JSON; the `.info` sidecar carries their
//! metadata and marks the artifact as binary. Artifacts are immutable once
//! written: a changed source has a new hash and therefore a new file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use kiln_common::ContentHash;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::hasher::Payload;
use crate::persist;

/// Extension of the metadata sidecar written next to binary artifacts.
const INFO_EXT: &str = "info";

/// Extension given to emitted source maps.
const SOURCE_MAP_EXT: &str = "js.map";

/// A compiled output with its MIME type and declared dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// MIME type reported by the compiler.
    pub mime_type: String,
    /// Compiled text or bytes.
    pub payload: Payload,
    /// Files the compiler read to produce this artifact (e.g. imports).
    pub dependent_files: Vec<PathBuf>,
}

impl Artifact {
    /// Creates a text artifact with no dependencies.
    pub fn text(mime_type: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            payload: Payload::Text(code.into()),
            dependent_files: Vec::new(),
        }
    }

    /// Creates a binary artifact with no dependencies.
    pub fn binary(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            payload: Payload::Binary(data),
            dependent_files: Vec::new(),
        }
    }

    /// Replaces the dependent files.
    pub fn with_dependencies(mut self, dependent_files: Vec<PathBuf>) -> Self {
        self.dependent_files = dependent_files;
        self
    }
}

/// On-disk JSON body of a text artifact.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextRecord {
    code: String,
    mime_type: String,
    #[serde(default)]
    dependent_files: Vec<PathBuf>,
}

/// On-disk JSON body of a binary artifact's sidecar.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinaryInfo {
    mime_type: String,
    #[serde(default)]
    dependent_files: Vec<PathBuf>,
}

/// The bytes to write for one artifact.
struct Encoded {
    main: Vec<u8>,
    sidecar: Option<Vec<u8>>,
}

fn encode(artifact: &Artifact) -> Result<Encoded, CacheError> {
    match &artifact.payload {
        Payload::Text(code) => Ok(Encoded {
            main: persist::to_gz_json(&TextRecord {
                code: code.clone(),
                mime_type: artifact.mime_type.clone(),
                dependent_files: artifact.dependent_files.clone(),
            })?,
            sidecar: None,
        }),
        Payload::Binary(data) => Ok(Encoded {
            main: persist::gzip(data).map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?,
            sidecar: Some(persist::to_gz_json(&BinaryInfo {
                mime_type: artifact.mime_type.clone(),
                dependent_files: artifact.dependent_files.clone(),
            })?),
        }),
    }
}

fn decode(main: &[u8], sidecar: Option<&[u8]>) -> Result<Artifact, CacheError> {
    match sidecar {
        Some(sidecar) => {
            let info: BinaryInfo = persist::from_gz_json(sidecar)?;
            let data = persist::gunzip(main).map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;
            Ok(Artifact {
                mime_type: info.mime_type,
                payload: Payload::Binary(data),
                dependent_files: info.dependent_files,
            })
        }
        None => {
            let record: TextRecord = persist::from_gz_json(main)?;
            Ok(Artifact {
                mime_type: record.mime_type,
                payload: Payload::Text(record.code),
                dependent_files: record.dependent_files,
            })
        }
    }
}

/// Maps a missing sidecar to `None`; any other read error is kept.
fn optional(result: std::io::Result<Vec<u8>>, path: &Path) -> Result<Option<Vec<u8>>, CacheError> {
    match result {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

/// A sidecar that is already gone counts as removed.
fn removed(result: std::io::Result<()>, path: &Path) -> Result<(), CacheError> {
    match result {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(CacheError::io(path, e)),
        _ => Ok(()),
    }
}

/// Reports a failed artifact read as a miss.
fn soft_miss(hash: &ContentHash, result: Result<Artifact, CacheError>) -> Option<Artifact> {
    match result {
        Ok(artifact) => Some(artifact),
        Err(CacheError::Io { ref source, .. }) if source.kind() == ErrorKind::NotFound => {
            debug!(%hash, "artifact not cached");
            None
        }
        Err(e) => {
            warn!(%hash, error = %e, "discarding unreadable artifact");
            None
        }
    }
}

/// A cache directory that is created on first write.
///
/// Construction never touches the disk. The first [`CacheDir::ensure`] call
/// creates the directory, unless the directory is read-only, in which case
/// it is assumed to exist already.
#[derive(Debug)]
pub struct CacheDir {
    path: PathBuf,
    read_only: bool,
    created: AtomicBool,
}

impl CacheDir {
    /// A writable directory at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            read_only: false,
            created: AtomicBool::new(false),
        }
    }

    /// A directory that is never created.
    pub fn read_only(path: impl Into<PathBuf>) -> Self {
        Self {
            read_only: true,
            ..Self::new(path)
        }
    }

    /// The directory path, whether or not it exists yet.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` if the directory is never created.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn needs_create(&self) -> bool {
        !self.read_only && !self.created.load(Ordering::Acquire)
    }

    fn mark_created(&self) {
        debug!(path = %self.path.display(), "created cache directory");
        self.created.store(true, Ordering::Release);
    }

    /// Creates the directory if needed and returns its path.
    pub async fn ensure(&self) -> Result<&Path, CacheError> {
        if self.needs_create() {
            tokio::fs::create_dir_all(&self.path)
                .await
                .map_err(|e| CacheError::io(&self.path, e))?;
            self.mark_created();
        }
        Ok(&self.path)
    }

    /// Blocking twin of [`CacheDir::ensure`].
    pub fn ensure_sync(&self) -> Result<&Path, CacheError> {
        if self.needs_create() {
            std::fs::create_dir_all(&self.path).map_err(|e| CacheError::io(&self.path, e))?;
            self.mark_created();
        }
        Ok(&self.path)
    }
}

/// Content-addressed store of compiled artifacts inside one [`CacheDir`].
#[derive(Debug)]
pub struct ArtifactStore {
    dir: CacheDir,
}

impl ArtifactStore {
    /// Creates a store over `dir`.
    pub fn new(dir: CacheDir) -> Self {
        Self { dir }
    }

    /// The directory holding the artifacts.
    pub fn dir(&self) -> &CacheDir {
        &self.dir
    }

    /// Path of the main artifact file for `hash`.
    pub fn artifact_path(&self, hash: &ContentHash) -> PathBuf {
        self.dir.path().join(hash.to_string())
    }

    /// Path of the binary metadata sidecar for `hash`.
    pub fn info_path(&self, hash: &ContentHash) -> PathBuf {
        self.dir.path().join(format!("{hash}.{INFO_EXT}"))
    }

    /// Reads the artifact stored under `hash`.
    ///
    /// Returns `None` if it is missing, truncated, or otherwise unreadable.
    /// This is fail-safe: a damaged entry is a miss and gets recompiled.
    pub async fn read(&self, hash: &ContentHash) -> Option<Artifact> {
        soft_miss(hash, self.try_read(hash).await)
    }

    /// Blocking twin of [`ArtifactStore::read`].
    pub fn read_sync(&self, hash: &ContentHash) -> Option<Artifact> {
        soft_miss(hash, self.try_read_sync(hash))
    }

    async fn try_read(&self, hash: &ContentHash) -> Result<Artifact, CacheError> {
        let info_path = self.info_path(hash);
        let sidecar = optional(tokio::fs::read(&info_path).await, &info_path)?;
        let path = self.artifact_path(hash);
        let main = tokio::fs::read(&path)
            .await
            .map_err(|e| CacheError::io(&path, e))?;
        decode(&main, sidecar.as_deref())
    }

    fn try_read_sync(&self, hash: &ContentHash) -> Result<Artifact, CacheError> {
        let info_path = self.info_path(hash);
        let sidecar = optional(std::fs::read(&info_path), &info_path)?;
        let path = self.artifact_path(hash);
        let main = std::fs::read(&path).map_err(|e| CacheError::io(&path, e))?;
        decode(&main, sidecar.as_deref())
    }

    /// Writes `artifact` under `hash`, creating the directory if needed.
    ///
    /// The sidecar of a binary artifact is written before the main file, so
    /// a main file never exists without its metadata.
    pub async fn write(&self, hash: &ContentHash, artifact: &Artifact) -> Result<(), CacheError> {
        let encoded = encode(artifact)?;
        self.dir.ensure().await?;

        let info_path = self.info_path(hash);
        match encoded.sidecar {
            Some(sidecar) => tokio::fs::write(&info_path, sidecar)
                .await
                .map_err(|e| CacheError::io(&info_path, e))?,
            None => removed(tokio::fs::remove_file(&info_path).await, &info_path)?,
        }

        let path = self.artifact_path(hash);
        debug!(path = %path.display(), "saving artifact");
        tokio::fs::write(&path, encoded.main)
            .await
            .map_err(|e| CacheError::io(&path, e))
    }

    /// Blocking twin of [`ArtifactStore::write`].
    pub fn write_sync(&self, hash: &ContentHash, artifact: &Artifact) -> Result<(), CacheError> {
        let encoded = encode(artifact)?;
        self.dir.ensure_sync()?;

        let info_path = self.info_path(hash);
        match encoded.sidecar {
            Some(sidecar) => {
                std::fs::write(&info_path, sidecar).map_err(|e| CacheError::io(&info_path, e))?
            }
            None => removed(std::fs::remove_file(&info_path), &info_path)?,
        }

        let path = self.artifact_path(hash);
        debug!(path = %path.display(), "saving artifact");
        std::fs::write(&path, encoded.main).map_err(|e| CacheError::io(&path, e))
    }
}

/// File name of the source map emitted for `source`: its stem plus `.js.map`.
pub fn source_map_file_name(source: &Path) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{stem}.{SOURCE_MAP_EXT}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(CacheDir::new(dir.path().join("cache")));
        (dir, store)
    }

    #[test]
    fn text_roundtrip() {
        let (_dir, store) = make_store();
        let hash = ContentHash::from_text("source");
        let artifact = Artifact::text("application/javascript", "const x = 1;");
        store.write_sync(&hash, &artifact).unwrap();

        assert!(store.artifact_path(&hash).exists());
        assert!(!store.info_path(&hash).exists());
        assert_eq!(store.read_sync(&hash), Some(artifact));
    }

    #[test]
    fn text_artifact_is_gzipped_json() {
        let (_dir, store) = make_store();
        let hash = ContentHash::from_text("source");
        store
            .write_sync(&hash, &Artifact::text("text/css", "a{}"))
            .unwrap();

        let raw = std::fs::read(store.artifact_path(&hash)).unwrap();
        let json: serde_json::Value = persist::from_gz_json(&raw).unwrap();
        assert_eq!(json["code"], "a{}");
        assert_eq!(json["mimeType"], "text/css");
        assert_eq!(json["dependentFiles"], serde_json::json!([]));
    }

    #[test]
    fn binary_roundtrip_with_dependencies() {
        let (_dir, store) = make_store();
        let data: Vec<u8> = (0..=255u8).cycle().take(4000).collect();
        let hash = ContentHash::from_bytes(&data);
        let deps = vec![PathBuf::from("/app/a.png"), PathBuf::from("/app/b.png")];
        let artifact = Artifact::binary("image/png", data).with_dependencies(deps.clone());
        store.write_sync(&hash, &artifact).unwrap();

        assert!(store.info_path(&hash).exists());
        let back = store.read_sync(&hash).unwrap();
        assert_eq!(back.dependent_files, deps);
        assert_eq!(back, artifact);
    }

    #[test]
    fn read_missing_returns_none() {
        let (_dir, store) = make_store();
        assert!(store.read_sync(&ContentHash::from_text("nope")).is_none());
    }

    #[test]
    fn read_truncated_returns_none() {
        let (_dir, store) = make_store();
        let hash = ContentHash::from_text("source");
        store
            .write_sync(&hash, &Artifact::text("application/javascript", "x".repeat(500)))
            .unwrap();

        let path = store.artifact_path(&hash);
        let raw = std::fs::read(&path).unwrap();
        std::fs::write(&path, &raw[..raw.len() / 2]).unwrap();
        assert!(store.read_sync(&hash).is_none());
    }

    #[test]
    fn read_garbage_returns_none() {
        let (_dir, store) = make_store();
        let hash = ContentHash::from_text("source");
        store.dir().ensure_sync().unwrap();
        std::fs::write(store.artifact_path(&hash), b"garbage data").unwrap();
        assert!(store.read_sync(&hash).is_none());
    }

    #[test]
    fn corrupt_sidecar_returns_none() {
        let (_dir, store) = make_store();
        let hash = ContentHash::from_bytes(b"\x00\x01");
        store
            .write_sync(&hash, &Artifact::binary("image/png", vec![1, 2, 3]))
            .unwrap();
        std::fs::write(store.info_path(&hash), b"{").unwrap();
        assert!(store.read_sync(&hash).is_none());
    }

    #[test]
    fn text_write_clears_stale_sidecar() {
        let (_dir, store) = make_store();
        let hash = ContentHash::from_text("source");
        store
            .write_sync(&hash, &Artifact::binary("image/png", vec![9]))
            .unwrap();
        let text = Artifact::text("text/plain", "now text");
        store.write_sync(&hash, &text).unwrap();
        assert!(!store.info_path(&hash).exists());
        assert_eq!(store.read_sync(&hash), Some(text));
    }

    #[test]
    fn undeletable_sidecar_fails_text_write() {
        let (_dir, store) = make_store();
        let hash = ContentHash::from_text("source");
        let blocker = store.info_path(&hash);
        std::fs::create_dir_all(blocker.join("inner")).unwrap();

        let err = store
            .write_sync(&hash, &Artifact::text("text/plain", "code"))
            .unwrap_err();
        assert!(matches!(err, CacheError::Io { ref path, .. } if *path == blocker));
        assert!(!store.artifact_path(&hash).exists());
    }

    #[tokio::test]
    async fn undeletable_sidecar_fails_async_text_write() {
        let (_dir, store) = make_store();
        let hash = ContentHash::from_text("source");
        std::fs::create_dir_all(store.info_path(&hash).join("inner")).unwrap();

        let result = store.write(&hash, &Artifact::text("text/plain", "code")).await;
        assert!(matches!(result, Err(CacheError::Io { .. })));
        assert!(store.read(&hash).await.is_none());
    }

    #[test]
    fn directory_created_lazily() {
        let (dir, store) = make_store();
        assert!(!dir.path().join("cache").exists());
        store
            .write_sync(&ContentHash::from_text("a"), &Artifact::text("text/plain", "a"))
            .unwrap();
        assert!(dir.path().join("cache").is_dir());
    }

    #[test]
    fn read_only_dir_is_never_created() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(CacheDir::read_only(dir.path().join("cache")));
        let err = store
            .write_sync(&ContentHash::from_text("a"), &Artifact::text("text/plain", "a"))
            .unwrap_err();
        assert!(matches!(err, CacheError::Io { .. }));
        assert!(!dir.path().join("cache").exists());
    }

    #[tokio::test]
    async fn async_roundtrip() {
        let (_dir, store) = make_store();
        let hash = ContentHash::from_text("async");
        let artifact = Artifact::text("application/javascript", "let a;")
            .with_dependencies(vec![PathBuf::from("/app/dep.js")]);
        store.write(&hash, &artifact).await.unwrap();
        assert_eq!(store.read(&hash).await, Some(artifact.clone()));
        assert_eq!(store.read_sync(&hash), Some(artifact));
    }

    #[test]
    fn source_map_names() {
        assert_eq!(source_map_file_name(Path::new("/app/src/main.ts")), "main.js.map");
        assert_eq!(source_map_file_name(Path::new("/app/src/util.coffee")), "util.js.map");
        assert_eq!(source_map_file_name(Path::new("/app/src/LICENSE")), "LICENSE.js.map");
    }
}
