//! Persistent URL → `{sha256, timestamp}` map (§3 "Lockfile entry", §4.3).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Errors raised while reading, writing or updating a lockfile.
#[derive(Debug)]
pub enum LockfileError {
    /// Reading or renaming the file on disk failed.
    Io(std::io::Error),
    /// The file's contents weren't valid lockfile YAML.
    Parse(serde_yaml::Error),
}

impl std::fmt::Display for LockfileError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            LockfileError::Io(e) => write!(f, "lockfile I/O error: {e}"),
            LockfileError::Parse(e) => write!(f, "failed to parse lockfile: {e}"),
        }
    }
}

impl std::error::Error for LockfileError {}

impl From<std::io::Error> for LockfileError {
    fn from(e: std::io::Error) -> Self {
        LockfileError::Io(e)
    }
}

impl From<serde_yaml::Error> for LockfileError {
    fn from(e: serde_yaml::Error) -> Self {
        LockfileError::Parse(e)
    }
}

/// One lockfile entry: the verified digest of the artifact at a URL, and
/// when that digest was recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockEntry {
    /// Lowercase hex-encoded SHA-256 digest.
    pub sha256: String,
    /// When this entry was written, RFC 3339 UTC.
    pub timestamp: DateTime<Utc>,
}

/// An in-memory lockfile, backed by a YAML file on disk. Not `Clone`:
/// callers share one instance behind an `Arc`/`Mutex` (§4.3, §5) so writes
/// from concurrent tasks serialise through a single owner.
#[derive(Debug)]
pub struct Lockfile {
    path: PathBuf,
    entries: BTreeMap<String, LockEntry>,
}

impl Lockfile {
    /// Load `path`, or start empty if it doesn't exist yet (first `lock` run).
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, LockfileError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_yaml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Lockfile { path, entries })
    }

    /// The digest recorded for `url`, if any.
    pub fn get(&self, url: &str) -> Option<&LockEntry> {
        self.entries.get(url)
    }

    /// Record or replace the digest for `url`, stamping the current time.
    pub fn put(&mut self, url: impl Into<String>, sha256: impl Into<String>, now: DateTime<Utc>) {
        self.entries.insert(
            url.into(),
            LockEntry {
                sha256: sha256.into(),
                timestamp: now,
            },
        );
    }

    /// Drop the entry for `url`, if any. Used by `update` (old URL replaced
    /// by a new one) and `lock --prune` style reconciliation.
    pub fn remove(&mut self, url: &str) -> Option<LockEntry> {
        self.entries.remove(url)
    }

    /// Every URL currently recorded.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Drop every entry whose URL is not in `live_urls` (§4.7 step 4: "Remove
    /// lockfile entries whose URLs are no longer referenced by any blueprint").
    pub fn retain_only(&mut self, live_urls: &std::collections::HashSet<String>) {
        self.entries.retain(|url, _| live_urls.contains(url));
    }

    /// Atomically rewrite the lockfile: write to a sibling temp file, fsync,
    /// then rename over the destination (§4.3). Keys are serialised in
    /// sorted order because `entries` is a `BTreeMap`.
    pub fn save(&self) -> Result<(), LockfileError> {
        let contents = serde_yaml::to_string(&self.entries)?;
        atomic_write(&self.path, contents.as_bytes())?;
        Ok(())
    }
}

fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    use std::io::Write;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// A [`Lockfile`] guarded for concurrent access from async tasks (§4.3,
/// §5 "Lockfile: single in-process `tokio::sync::Mutex`").
#[derive(Debug)]
pub struct SharedLockfile(tokio::sync::Mutex<Lockfile>);

impl SharedLockfile {
    /// Load and wrap a lockfile for shared, serialised access.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, LockfileError> {
        Ok(SharedLockfile(tokio::sync::Mutex::new(Lockfile::load(path)?)))
    }

    /// Lock and run `f` against the underlying [`Lockfile`].
    pub async fn with<R>(&self, f: impl FnOnce(&mut Lockfile) -> R) -> R {
        let mut guard = self.0.lock().await;
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let lock = Lockfile::load(dir.path().join("ops2deb.lock.yml")).unwrap();
        assert!(lock.get("https://e.test").is_none());
    }

    #[test]
    fn put_get_remove_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = Lockfile::load(dir.path().join("ops2deb.lock.yml")).unwrap();
        lock.put("https://e.test/a", "a".repeat(64), ts());
        assert_eq!(lock.get("https://e.test/a").unwrap().sha256, "a".repeat(64));
        lock.remove("https://e.test/a");
        assert!(lock.get("https://e.test/a").is_none());
    }

    #[test]
    fn save_then_load_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ops2deb.lock.yml");
        let mut lock = Lockfile::load(&path).unwrap();
        lock.put("https://e.test/a", "b".repeat(64), ts());
        lock.save().unwrap();

        let reloaded = Lockfile::load(&path).unwrap();
        assert_eq!(reloaded.get("https://e.test/a").unwrap().sha256, "b".repeat(64));
    }

    #[test]
    fn retain_only_drops_stale_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = Lockfile::load(dir.path().join("ops2deb.lock.yml")).unwrap();
        lock.put("https://e.test/a", "a".repeat(64), ts());
        lock.put("https://e.test/b", "b".repeat(64), ts());

        let mut live = std::collections::HashSet::new();
        live.insert("https://e.test/a".to_string());
        lock.retain_only(&live);

        assert!(lock.get("https://e.test/a").is_some());
        assert!(lock.get("https://e.test/b").is_none());
    }
}
