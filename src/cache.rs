//! Content-addressed cache directory and single-flight coordination.
//!
//! Grounded on the teacher pack's `puffin-cache` layout: a root directory
//! holding content-addressed subdirectories, with an explicit, narrow API
//! rather than exposing raw paths everywhere. Single-flight coalescing
//! (§4.4/§5) is a keyed map of owned mutex guards, one slot per in-flight
//! key, so concurrent callers for the same URL or digest share one
//! download/extraction instead of racing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const OBJECTS_DIR: &str = "objects";
const STAGING_DIR: &str = "staging";
const ARTIFACT_FILE: &str = "artifact";
const EXTRACTED_DIR: &str = "extracted";

/// The on-disk cache root, keyed by sha256 digest (§3 "Cache entry").
#[derive(Debug, Clone)]
pub struct Cache {
    root: PathBuf,
}

impl Cache {
    /// Open (creating if necessary) a persistent cache rooted at `root`.
    pub fn from_path(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(OBJECTS_DIR))?;
        std::fs::create_dir_all(root.join(STAGING_DIR))?;
        Ok(Cache { root })
    }

    /// The cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_dir(&self, sha256: &str) -> PathBuf {
        self.root.join(OBJECTS_DIR).join(sha256)
    }

    /// Path to the downloaded artifact for `sha256`, whether or not it
    /// exists yet.
    pub fn artifact_path(&self, sha256: &str) -> PathBuf {
        self.object_dir(sha256).join(ARTIFACT_FILE)
    }

    /// Path to the extracted archive tree for `sha256`, whether or not it
    /// exists yet. `None` is rendered by callers that know the artifact
    /// isn't an archive.
    pub fn extracted_path(&self, sha256: &str) -> PathBuf {
        self.object_dir(sha256).join(EXTRACTED_DIR)
    }

    /// Whether the artifact for `sha256` has already been published.
    pub fn has_artifact(&self, sha256: &str) -> bool {
        self.artifact_path(sha256).is_file()
    }

    /// Whether an extracted tree for `sha256` has already been published.
    pub fn has_extracted(&self, sha256: &str) -> bool {
        self.extracted_path(sha256).is_dir()
    }

    /// A fresh, uniquely named staging directory the caller can populate
    /// before publishing it atomically with [`Cache::publish_extracted`].
    /// Using a directory outside `objects/` keeps partially-written trees
    /// from ever being observable under a digest (§4.4 invariant 5).
    pub fn new_staging_dir(&self) -> std::io::Result<tempfile::TempDir> {
        tempfile::tempdir_in(self.root.join(STAGING_DIR))
    }

    /// Move `staged` into place as the published artifact for `sha256`.
    /// The parent directory is created first so the rename is atomic on
    /// the same filesystem.
    pub fn publish_artifact(&self, sha256: &str, staged: &Path) -> std::io::Result<()> {
        let dest = self.artifact_path(sha256);
        std::fs::create_dir_all(dest.parent().unwrap())?;
        std::fs::rename(staged, dest)
    }

    /// Move a staged extraction directory into place for `sha256`.
    pub fn publish_extracted(&self, sha256: &str, staged: &Path) -> std::io::Result<()> {
        let dest = self.extracted_path(sha256);
        std::fs::create_dir_all(dest.parent().unwrap())?;
        std::fs::rename(staged, dest)
    }

    /// Remove the entire cache contents (the `purge` subcommand), then
    /// recreate the empty skeleton so the cache remains usable.
    pub fn purge(&self) -> std::io::Result<()> {
        if self.root.is_dir() {
            std::fs::remove_dir_all(&self.root)?;
        }
        std::fs::create_dir_all(self.root.join(OBJECTS_DIR))?;
        std::fs::create_dir_all(self.root.join(STAGING_DIR))?;
        Ok(())
    }
}

/// A keyed map of mutexes used to coalesce concurrent work on the same
/// key (a URL during fetch, a digest during extraction) into a single
/// winner; other callers simply wait for the slot and then observe
/// whatever state the winner left behind.
#[derive(Debug, Default)]
pub struct SingleFlight {
    slots: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SingleFlight {
    /// An empty set of slots.
    pub fn new() -> Self {
        SingleFlight::default()
    }

    /// Acquire the slot for `key`, blocking until any other holder
    /// releases it. The returned guard owns its `Arc`, so it can be held
    /// across `.await` points without borrowing `self`.
    pub async fn acquire(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_cache_has_no_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::from_path(dir.path()).unwrap();
        assert!(!cache.has_artifact(&"a".repeat(64)));
        assert!(!cache.has_extracted(&"a".repeat(64)));
    }

    #[test]
    fn publish_artifact_makes_it_visible() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::from_path(dir.path()).unwrap();
        let staging = cache.new_staging_dir().unwrap();
        let staged_file = staging.path().join("download");
        std::fs::write(&staged_file, b"payload").unwrap();

        let digest = "b".repeat(64);
        cache.publish_artifact(&digest, &staged_file).unwrap();
        assert!(cache.has_artifact(&digest));
        assert_eq!(std::fs::read(cache.artifact_path(&digest)).unwrap(), b"payload");
    }

    #[test]
    fn purge_removes_published_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::from_path(dir.path()).unwrap();
        let staging = cache.new_staging_dir().unwrap();
        let staged_file = staging.path().join("download");
        std::fs::write(&staged_file, b"payload").unwrap();
        let digest = "c".repeat(64);
        cache.publish_artifact(&digest, &staged_file).unwrap();

        cache.purge().unwrap();
        assert!(!cache.has_artifact(&digest));
    }

    #[tokio::test]
    async fn single_flight_serialises_same_key_access() {
        let flight = SingleFlight::new();
        let counter = Arc::new(tokio::sync::Mutex::new(0u32));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = &flight;
            let counter = counter.clone();
            handles.push(async move {
                let _guard = flight.acquire("same-key").await;
                let mut c = counter.lock().await;
                *c += 1;
            });
        }
        futures::future::join_all(handles).await;
        assert_eq!(*counter.lock().await, 8);
    }
}
