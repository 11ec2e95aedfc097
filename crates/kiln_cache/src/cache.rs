//! Compile-result cache for a single compiler configuration.
//!
//! The `ArtifactCache` ties a [`ChangeTracker`] to an [`ArtifactStore`]: it
//! resolves a file's content hash, serves the stored artifact for that hash
//! while none of its declared dependencies changed, and otherwise calls the
//! injected compiler and stores what it returns.

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_common::CompilerIdentity;
use tracing::debug;

use crate::artifact::{self, Artifact, ArtifactStore, CacheDir};
use crate::error::CacheError;
use crate::hasher::{HashInfo, Resolved};
use crate::tracker::{absolute, ChangeTracker};

/// Error type returned by compile callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What a compile callback produces for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutput {
    /// The compiled artifact to cache.
    pub artifact: Artifact,
    /// Source map text to write next to the cache, if the compiler made one.
    pub source_map: Option<String>,
}

impl From<Artifact> for CompileOutput {
    fn from(artifact: Artifact) -> Self {
        Self {
            artifact,
            source_map: None,
        }
    }
}

/// Result of [`ArtifactCache::fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    /// The file's hash info and any contents read while resolving it.
    pub resolved: Resolved,
    /// The cached artifact, or `None` on a miss.
    pub artifact: Option<Artifact>,
}

impl Lookup {
    /// Hash and classification of the looked-up file.
    pub fn hash_info(&self) -> &HashInfo {
        &self.resolved.info
    }
}

/// Result of [`ArtifactCache::get_or_compile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compiled {
    /// Hash and classification of the source file.
    pub hash_info: HashInfo,
    /// The artifact, or `None` if the compiler produced nothing.
    pub artifact: Option<Artifact>,
    /// Source map returned by the compiler on this call.
    pub source_map: Option<String>,
    /// `true` if the artifact came from the cache without compiling.
    pub cached: bool,
}

impl Compiled {
    fn hit(lookup: Lookup) -> Self {
        Self {
            hash_info: lookup.resolved.info,
            artifact: lookup.artifact,
            source_map: None,
            cached: true,
        }
    }

    fn compiled(hash_info: HashInfo, output: Option<CompileOutput>) -> Self {
        let (artifact, source_map) = match output {
            Some(out) => (Some(out.artifact), out.source_map),
            None => (None, None),
        };
        Self {
            hash_info,
            artifact,
            source_map,
            cached: false,
        }
    }
}

/// Depth-first walk over declared dependencies that visits each path once.
struct DependencyWalk {
    pending: Vec<PathBuf>,
    visited: HashSet<PathBuf>,
}

impl DependencyWalk {
    fn new(root: &Path, artifact: &Artifact) -> Self {
        let mut walk = Self {
            pending: Vec::new(),
            visited: HashSet::from([root.to_path_buf()]),
        };
        walk.extend(artifact);
        walk
    }

    fn extend(&mut self, artifact: &Artifact) {
        self.pending
            .extend(artifact.dependent_files.iter().rev().map(|p| absolute(p)));
    }

    fn next(&mut self) -> Option<PathBuf> {
        while let Some(path) = self.pending.pop() {
            if self.visited.insert(path.clone()) {
                return Some(path);
            }
        }
        None
    }
}

/// Content-addressed compile cache bound to one compiler configuration.
#[derive(Debug)]
pub struct ArtifactCache {
    store: ArtifactStore,
    source_maps: Option<CacheDir>,
    tracker: Arc<ChangeTracker>,
}

impl ArtifactCache {
    /// Creates a cache rooted at `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>, tracker: Arc<ChangeTracker>) -> Self {
        Self {
            store: ArtifactStore::new(CacheDir::new(cache_dir)),
            source_maps: None,
            tracker,
        }
    }

    /// Creates a cache in `base_dir/<digest of identity>`.
    ///
    /// The directory is created on the first write, never at construction,
    /// and never at all when `read_only` is set.
    pub fn for_compiler(
        base_dir: &Path,
        identity: &CompilerIdentity,
        tracker: Arc<ChangeTracker>,
        read_only: bool,
    ) -> Self {
        let path = base_dir.join(identity.digest().to_string());
        debug!(
            compiler = %identity.name,
            version = %identity.version,
            path = %path.display(),
            "compiler cache path"
        );
        let dir = if read_only {
            CacheDir::read_only(path)
        } else {
            CacheDir::new(path)
        };
        Self {
            store: ArtifactStore::new(dir),
            source_maps: None,
            tracker,
        }
    }

    /// Writes source maps to `dir` instead of the cache directory.
    pub fn with_source_map_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_maps = Some(if self.store.dir().is_read_only() {
            CacheDir::read_only(dir)
        } else {
            CacheDir::new(dir)
        });
        self
    }

    /// The per-compiler cache directory.
    pub fn cache_dir(&self) -> &Path {
        self.store.dir().path()
    }

    /// The directory source maps are written to.
    pub fn source_map_dir(&self) -> &Path {
        self.source_map_cache_dir().path()
    }

    /// The tracker used to resolve hashes.
    pub fn tracker(&self) -> &Arc<ChangeTracker> {
        &self.tracker
    }

    /// The underlying artifact store.
    pub fn artifact_store(&self) -> &ArtifactStore {
        &self.store
    }

    fn source_map_cache_dir(&self) -> &CacheDir {
        self.source_maps.as_ref().unwrap_or(self.store.dir())
    }

    /// Returns `true` if a file should be used verbatim instead of compiled.
    ///
    /// Minified, vendored, already source-mapped, and binary files are passed
    /// through. They may still be cached; they are just not transformed.
    pub fn should_passthrough(info: &HashInfo) -> bool {
        info.is_minified || info.is_in_vendor_tree || info.has_inline_source_map || info.is_binary
    }

    /// Looks up the cached artifact for `path` without compiling.
    ///
    /// Errors resolving the file itself propagate; a missing or unreadable
    /// artifact is reported as `artifact: None`.
    pub async fn fetch(&self, path: &Path) -> Result<Lookup, CacheError> {
        let path = absolute(path);
        debug!(path = %path.display(), "fetching from cache");
        let resolved = self.tracker.resolve_hash(&path).await?;
        let artifact = self.store.read(&resolved.info.hash).await;
        Ok(Lookup { resolved, artifact })
    }

    /// Blocking twin of [`ArtifactCache::fetch`].
    pub fn fetch_sync(&self, path: &Path) -> Result<Lookup, CacheError> {
        let path = absolute(path);
        debug!(path = %path.display(), "fetching from cache");
        let resolved = self.tracker.resolve_hash_sync(&path)?;
        let artifact = self.store.read_sync(&resolved.info.hash);
        Ok(Lookup { resolved, artifact })
    }

    /// Stores `artifact` under the hash in `info`.
    pub async fn store(&self, info: &HashInfo, artifact: &Artifact) -> Result<(), CacheError> {
        self.store.write(&info.hash, artifact).await
    }

    /// Blocking twin of [`ArtifactCache::store`].
    pub fn store_sync(&self, info: &HashInfo, artifact: &Artifact) -> Result<(), CacheError> {
        self.store.write_sync(&info.hash, artifact)
    }

    /// Writes `source_map` as `<stem>.js.map` in the source-map directory.
    pub async fn store_source_map(
        &self,
        source: &Path,
        source_map: &str,
    ) -> Result<PathBuf, CacheError> {
        let dir = self.source_map_cache_dir().ensure().await?;
        let target = dir.join(artifact::source_map_file_name(source));
        debug!(source = %source.display(), target = %target.display(), "saving source map");
        tokio::fs::write(&target, source_map)
            .await
            .map_err(|e| CacheError::io(&target, e))?;
        Ok(target)
    }

    /// Blocking twin of [`ArtifactCache::store_source_map`].
    pub fn store_source_map_sync(
        &self,
        source: &Path,
        source_map: &str,
    ) -> Result<PathBuf, CacheError> {
        let dir = self.source_map_cache_dir().ensure_sync()?;
        let target = dir.join(artifact::source_map_file_name(source));
        debug!(source = %source.display(), target = %target.display(), "saving source map");
        std::fs::write(&target, source_map).map_err(|e| CacheError::io(&target, e))?;
        Ok(target)
    }

    /// Returns the cached artifact for `path`, compiling it on a miss.
    ///
    /// A cached artifact is stale when any of its dependent files, or their
    /// own cached dependents, changed. On a miss `compile` is called with the
    /// absolute path and the resolved hash info; its output is stored unless
    /// the file is vendored.
    pub async fn get_or_compile<F, Fut>(
        &self,
        path: &Path,
        compile: F,
    ) -> Result<Compiled, CacheError>
    where
        F: FnOnce(PathBuf, Resolved) -> Fut,
        Fut: Future<Output = Result<Option<CompileOutput>, BoxError>>,
    {
        let path = absolute(path);
        let lookup = self.fetch(&path).await?;
        if let Some(artifact) = &lookup.artifact {
            if !self.dependencies_changed(&path, artifact).await? {
                return Ok(Compiled::hit(lookup));
            }
        }

        let resolved = lookup.resolved;
        let hash_info = resolved.info.clone();
        debug!(path = %path.display(), hash = %hash_info.hash, "cache miss, compiling");
        let output = compile(path.clone(), resolved)
            .await
            .map_err(|source| CacheError::Compile {
                path: path.clone(),
                source,
            })?;

        if let Some(out) = output.as_ref().filter(|_| Self::should_store(&hash_info)) {
            self.store(&hash_info, &out.artifact).await?;
            if let Some(map) = &out.source_map {
                self.store_source_map(&path, map).await?;
            }
        }
        Ok(Compiled::compiled(hash_info, output))
    }

    /// Blocking twin of [`ArtifactCache::get_or_compile`].
    pub fn get_or_compile_sync<F>(&self, path: &Path, compile: F) -> Result<Compiled, CacheError>
    where
        F: FnOnce(&Path, Resolved) -> Result<Option<CompileOutput>, BoxError>,
    {
        let path = absolute(path);
        let lookup = self.fetch_sync(&path)?;
        if let Some(artifact) = &lookup.artifact {
            if !self.dependencies_changed_sync(&path, artifact)? {
                return Ok(Compiled::hit(lookup));
            }
        }

        let resolved = lookup.resolved;
        let hash_info = resolved.info.clone();
        debug!(path = %path.display(), hash = %hash_info.hash, "cache miss, compiling");
        let output = compile(&path, resolved).map_err(|source| CacheError::Compile {
            path: path.clone(),
            source,
        })?;

        if let Some(out) = output.as_ref().filter(|_| Self::should_store(&hash_info)) {
            self.store_sync(&hash_info, &out.artifact)?;
            if let Some(map) = &out.source_map {
                self.store_source_map_sync(&path, map)?;
            }
        }
        Ok(Compiled::compiled(hash_info, output))
    }

    /// Vendored files are compiled through but never written back.
    fn should_store(info: &HashInfo) -> bool {
        if info.is_in_vendor_tree {
            debug!(hash = %info.hash, "vendored file, not caching");
            return false;
        }
        true
    }

    async fn dependencies_changed(
        &self,
        root: &Path,
        artifact: &Artifact,
    ) -> Result<bool, CacheError> {
        let mut walk = DependencyWalk::new(root, artifact);
        while let Some(dep) = walk.next() {
            if self.tracker.has_changed(&dep).await? {
                debug!(root = %root.display(), dependency = %dep.display(), "dependency changed");
                return Ok(true);
            }
            match self.fetch(&dep).await {
                Ok(Lookup {
                    artifact: Some(dep_artifact),
                    ..
                }) => walk.extend(&dep_artifact),
                Ok(_) => {}
                Err(e) => {
                    debug!(dependency = %dep.display(), error = %e, "dependency unreadable");
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn dependencies_changed_sync(
        &self,
        root: &Path,
        artifact: &Artifact,
    ) -> Result<bool, CacheError> {
        let mut walk = DependencyWalk::new(root, artifact);
        while let Some(dep) = walk.next() {
            if self.tracker.has_changed_sync(&dep)? {
                debug!(root = %root.display(), dependency = %dep.display(), "dependency changed");
                return Ok(true);
            }
            match self.fetch_sync(&dep) {
                Ok(Lookup {
                    artifact: Some(dep_artifact),
                    ..
                }) => walk.extend(&dep_artifact),
                Ok(_) => {}
                Err(e) => {
                    debug!(dependency = %dep.display(), error = %e, "dependency unreadable");
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}
