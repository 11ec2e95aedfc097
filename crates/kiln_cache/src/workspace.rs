//! Project-level wiring of tracker and caches from `kiln.toml`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_common::CompilerIdentity;
use kiln_config::{KilnConfig, ResolvedPaths};
use tracing::{debug, info};

use crate::cache::ArtifactCache;
use crate::error::CacheError;
use crate::tracker::{absolute, ChangeTracker};

/// One project: its configuration, resolved paths and shared tracker.
#[derive(Debug)]
pub struct Workspace {
    project_root: PathBuf,
    config: KilnConfig,
    paths: ResolvedPaths,
    tracker: Arc<ChangeTracker>,
}

impl Workspace {
    /// Loads `kiln.toml` from `project_root` and builds the workspace.
    pub fn open(project_root: &Path) -> Result<Self, CacheError> {
        let config = kiln_config::load_config(project_root)?;
        Self::from_config(config, project_root)
    }

    /// Builds the workspace from an already loaded configuration.
    ///
    /// A frozen configuration loads its snapshot and answers only from it.
    /// Otherwise an existing snapshot file seeds a live tracker, and a
    /// missing one starts empty.
    pub fn from_config(config: KilnConfig, project_root: &Path) -> Result<Self, CacheError> {
        let project_root = absolute(project_root);
        let paths = config.resolve_paths(&project_root);

        let tracker = match &paths.snapshot_path {
            Some(snapshot) if config.snapshot.frozen => {
                info!(snapshot = %snapshot.display(), "loading frozen snapshot");
                ChangeTracker::load_sync(snapshot, &project_root)?
            }
            Some(snapshot) if snapshot.is_file() => {
                debug!(snapshot = %snapshot.display(), "seeding tracker from snapshot");
                ChangeTracker::load_sync(snapshot, &project_root)?.with_fail_on_miss(false)
            }
            _ => ChangeTracker::new(&project_root),
        };

        Ok(Self {
            project_root,
            config,
            paths,
            tracker: Arc::new(tracker),
        })
    }

    /// The absolute project root.
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// The loaded configuration.
    pub fn config(&self) -> &KilnConfig {
        &self.config
    }

    /// Configured paths, resolved against the project root.
    pub fn paths(&self) -> &ResolvedPaths {
        &self.paths
    }

    /// The tracker shared by every cache of this workspace.
    pub fn tracker(&self) -> &Arc<ChangeTracker> {
        &self.tracker
    }

    /// Returns the artifact cache for one compiler configuration.
    pub fn cache_for(&self, identity: &CompilerIdentity) -> ArtifactCache {
        let cache = ArtifactCache::for_compiler(
            &self.paths.cache_dir,
            identity,
            Arc::clone(&self.tracker),
            self.config.cache.read_only,
        );
        match &self.paths.source_map_dir {
            Some(dir) => cache.with_source_map_dir(dir),
            None => cache,
        }
    }

    /// Writes the tracker to the configured snapshot path.
    ///
    /// Returns the path written, or `None` when no snapshot path is set.
    pub async fn save_snapshot(&self) -> Result<Option<PathBuf>, CacheError> {
        let Some(path) = &self.paths.snapshot_path else {
            return Ok(None);
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CacheError::io(parent, e))?;
        }
        self.tracker.save(path).await?;
        info!(path = %path.display(), files = self.tracker.len(), "saved snapshot");
        Ok(Some(path.clone()))
    }

    /// Blocking twin of [`Workspace::save_snapshot`].
    pub fn save_snapshot_sync(&self) -> Result<Option<PathBuf>, CacheError> {
        let Some(path) = &self.paths.snapshot_path else {
            return Ok(None);
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
        }
        self.tracker.save_sync(path)?;
        info!(path = %path.display(), files = self.tracker.len(), "saved snapshot");
        Ok(Some(path.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Artifact;
    use kiln_config::ConfigError;

    fn write_config(dir: &Path, toml: &str) {
        std::fs::write(dir.join(kiln_config::CONFIG_FILE), toml).unwrap();
    }

    #[test]
    fn open_reads_config_and_starts_live() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            "[cache]\ndir = \".kiln\"\n\n[snapshot]\npath = \"kiln-snapshot.json.gz\"\n",
        );

        let ws = Workspace::open(dir.path()).unwrap();
        assert!(!ws.tracker().is_frozen());
        assert!(ws.tracker().is_empty());
        assert_eq!(ws.paths().cache_dir, dir.path().join(".kiln"));
    }

    #[test]
    fn open_without_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Workspace::open(dir.path()).unwrap_err();
        assert!(matches!(err, CacheError::Config(ConfigError::Read { .. })));
    }

    #[test]
    fn caches_share_tracker_and_split_by_compiler() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = KilnConfig::with_cache_dir(".kiln");
        config.cache.source_map_dir = Some(PathBuf::from("maps"));
        let ws = Workspace::from_config(config, dir.path()).unwrap();

        let babel = ws.cache_for(&CompilerIdentity::new("babel", "7.24.0"));
        let tsc = ws.cache_for(&CompilerIdentity::new("typescript", "5.4.0"));
        assert_ne!(babel.cache_dir(), tsc.cache_dir());
        assert!(babel.cache_dir().starts_with(dir.path().join(".kiln")));
        assert_eq!(babel.source_map_dir(), dir.path().join("maps"));
        assert!(Arc::ptr_eq(babel.tracker(), ws.tracker()));
    }

    #[test]
    fn save_then_reopen_frozen() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.js");
        std::fs::write(&file, "let a = 1;").unwrap();

        let mut config = KilnConfig::with_cache_dir(".kiln");
        config.snapshot.path = Some(PathBuf::from("out/snapshot.json.gz"));
        let live = Workspace::from_config(config.clone(), dir.path()).unwrap();
        let identity = CompilerIdentity::new("babel", "7.24.0");
        live.cache_for(&identity)
            .get_or_compile_sync(&file, |_, _| {
                Ok(Some(Artifact::text("text/javascript", "A").into()))
            })
            .unwrap();
        let saved = live.save_snapshot_sync().unwrap().unwrap();
        assert_eq!(saved, dir.path().join("out/snapshot.json.gz"));

        config.snapshot.frozen = true;
        let frozen = Workspace::from_config(config, dir.path()).unwrap();
        assert!(frozen.tracker().is_frozen());
        let hit = frozen
            .cache_for(&identity)
            .get_or_compile_sync(&file, |_, _| panic!("frozen workspace must not compile"))
            .unwrap();
        assert!(hit.cached);
    }

    #[test]
    fn existing_snapshot_seeds_live_tracker() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.js");
        std::fs::write(&file, "a").unwrap();

        let mut config = KilnConfig::with_cache_dir(".kiln");
        config.snapshot.path = Some(PathBuf::from("snapshot.json.gz"));
        let first = Workspace::from_config(config.clone(), dir.path()).unwrap();
        first.tracker().resolve_hash_sync(&file).unwrap();
        first.save_snapshot_sync().unwrap();

        let second = Workspace::from_config(config, dir.path()).unwrap();
        assert!(!second.tracker().is_frozen());
        assert_eq!(second.tracker().len(), 1);
        let unknown = dir.path().join("b.js");
        std::fs::write(&unknown, "b").unwrap();
        assert!(second.tracker().resolve_hash_sync(&unknown).is_ok());
    }

    #[test]
    fn no_snapshot_path_saves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::from_config(KilnConfig::with_cache_dir(".kiln"), dir.path()).unwrap();
        assert_eq!(ws.save_snapshot_sync().unwrap(), None);
    }

    #[tokio::test]
    async fn async_save_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = KilnConfig::with_cache_dir(".kiln");
        config.snapshot.path = Some(PathBuf::from("snap/s.json.gz"));
        let ws = Workspace::from_config(config, dir.path()).unwrap();
        let path = ws.save_snapshot().await.unwrap().unwrap();
        assert!(path.is_file());
    }
}
