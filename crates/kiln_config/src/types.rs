//! Configuration types deserialized from `kiln.toml`.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// The top-level configuration parsed from `kiln.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct KilnConfig {
    /// Artifact cache settings.
    pub cache: CacheConfig,
    /// File-change snapshot settings.
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

/// Where compiled artifacts are stored and whether the store may be written.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Base cache directory; each compiler identity gets a subdirectory.
    pub dir: PathBuf,
    /// Separate directory for emitted source maps. Defaults to the
    /// per-compiler cache directory.
    #[serde(default)]
    pub source_map_dir: Option<PathBuf>,
    /// Never create cache directories.
    #[serde(default)]
    pub read_only: bool,
}

/// Persistence of the file-change tracker between runs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnapshotConfig {
    /// Path of the gzip-compressed snapshot file.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Treat the snapshot as exhaustive: a lookup for a file missing from
    /// it is an error instead of a disk stat.
    #[serde(default)]
    pub frozen: bool,
}

/// A [`KilnConfig`] with every path made absolute against a project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    /// Absolute base cache directory.
    pub cache_dir: PathBuf,
    /// Absolute source-map directory, if configured.
    pub source_map_dir: Option<PathBuf>,
    /// Absolute snapshot path, if configured.
    pub snapshot_path: Option<PathBuf>,
}

impl KilnConfig {
    /// Creates a live, writable configuration using `cache_dir`.
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache: CacheConfig {
                dir: cache_dir.into(),
                source_map_dir: None,
                read_only: false,
            },
            snapshot: SnapshotConfig::default(),
        }
    }

    /// Joins every relative path in the configuration onto `project_root`.
    pub fn resolve_paths(&self, project_root: &Path) -> ResolvedPaths {
        let abs = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                project_root.join(p)
            }
        };
        ResolvedPaths {
            cache_dir: abs(&self.cache.dir),
            source_map_dir: self.cache.source_map_dir.as_deref().map(abs),
            snapshot_path: self.snapshot.path.as_deref().map(abs),
        }
    }
}
