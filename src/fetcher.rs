//! Downloads a URL, verifies it against the lockfile, and extracts it into
//! the content-addressed cache (§4.4).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use chrono::Utc;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use crate::archive::{self, ArchiveError};
use crate::cache::{Cache, SingleFlight};
use crate::lockfile::SharedLockfile;

const RETRY_BASE: Duration = Duration::from_secs(1);
const RETRY_MAX: Duration = Duration::from_secs(30);
const RETRY_ATTEMPTS: u32 = 3;

/// Errors raised while fetching and verifying a URL (§4.4).
#[derive(Debug)]
pub enum FetchError {
    /// The HTTP request failed even after retries.
    Network(String),
    /// The lockfile recorded a different digest than the one downloaded.
    HashMismatch { url: String, expected: String, actual: String },
    /// No lockfile entry exists and the caller isn't in locking mode.
    HashMissing(String),
    /// Extracting a recognised archive failed.
    Archive(ArchiveError),
    /// The artifact looked like an archive but wasn't a format this tool extracts.
    UnsupportedFormat(String),
    /// Filesystem I/O failed outside the archive extraction path.
    Io(std::io::Error),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FetchError::Network(msg) => write!(f, "failed to download: {msg}"),
            FetchError::HashMismatch { url, expected, actual } => write!(
                f,
                "sha256 mismatch for {url}: lockfile has {expected}, downloaded {actual}"
            ),
            FetchError::HashMissing(url) => {
                write!(f, "no lockfile entry for {url}; run `ops2deb lock` first")
            }
            FetchError::Archive(e) => write!(f, "{e}"),
            FetchError::UnsupportedFormat(ext) => write!(f, "unsupported archive format: {ext}"),
            FetchError::Io(e) => write!(f, "I/O error while fetching: {e}"),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        FetchError::Io(e)
    }
}

impl From<ArchiveError> for FetchError {
    fn from(e: ArchiveError) -> Self {
        match e {
            ArchiveError::UnsupportedFormat(ext) => FetchError::UnsupportedFormat(ext),
            other => FetchError::Archive(other),
        }
    }
}

/// Whether a fetch is allowed to record a brand-new digest (`lock`/`update`)
/// or must fail when the lockfile has no entry for the URL yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// `generate`/`build`: every URL must already be locked.
    Verify,
    /// `lock`/`update`: a missing entry is recorded rather than rejected.
    Locking,
}

/// The result of fetching one URL: where the raw artifact landed, where it
/// was extracted to (if it was a recognised archive), and its digest.
#[derive(Debug, Clone)]
pub struct Fetched {
    /// Path to the downloaded artifact inside the cache.
    pub file_path: PathBuf,
    /// Path to the extracted tree, if the artifact was an archive.
    pub extracted_dir: Option<PathBuf>,
    /// Lowercase hex sha256 digest of the downloaded bytes.
    pub sha256: String,
}

/// Downloads, verifies and extracts URLs, coordinating concurrent requests
/// for the same URL through a single-flight map (§4.4/§5).
pub struct Fetcher {
    client: reqwest::Client,
    cache: Cache,
    lockfile: Arc<SharedLockfile>,
    in_flight: SingleFlight,
}

impl Fetcher {
    /// Build a fetcher backed by `cache` and `lockfile`, using `connect_timeout`/
    /// `download_timeout` from the [`crate::env::Environment`].
    pub fn new(
        cache: Cache,
        lockfile: Arc<SharedLockfile>,
        connect_timeout: Duration,
        download_timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(download_timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Fetcher {
            client,
            cache,
            lockfile,
            in_flight: SingleFlight::new(),
        })
    }

    /// Fetch `url`, verifying or recording its digest according to `mode`.
    pub async fn fetch(&self, url: &str, mode: Mode) -> Result<Fetched, FetchError> {
        let _slot = self.in_flight.acquire(url).await;

        if let Some(entry) = self.lockfile.with(|lock| lock.get(url).cloned()).await {
            if self.cache.has_artifact(&entry.sha256) {
                debug!("cache hit for {url} ({})", entry.sha256);
                return Ok(self.finish(url, &entry.sha256).await?);
            }
        }

        info!("fetching {url}");
        let bytes = self.download_with_retry(url).await?;
        let sha256 = hex::encode(Sha256::digest(&bytes));

        match self.lockfile.with(|lock| lock.get(url).cloned()).await {
            Some(entry) if entry.sha256 != sha256 => {
                return Err(FetchError::HashMismatch {
                    url: url.to_string(),
                    expected: entry.sha256,
                    actual: sha256,
                })
            }
            Some(_) => {}
            None if mode == Mode::Locking => {
                self.lockfile
                    .with(|lock| lock.put(url.to_string(), sha256.clone(), Utc::now()))
                    .await;
            }
            None => return Err(FetchError::HashMissing(url.to_string())),
        }

        if !self.cache.has_artifact(&sha256) {
            let staging = self.cache.new_staging_dir()?;
            let staged_file = staging.path().join("download");
            tokio::fs::write(&staged_file, &bytes).await?;
            self.cache.publish_artifact(&sha256, &staged_file)?;
        }

        self.finish(url, &sha256).await
    }

    /// Persist whatever digests this fetcher has recorded so far (§4.3).
    /// `lock` calls this after locking every URL; without it, entries
    /// written by [`Fetcher::fetch`] in [`Mode::Locking`] only ever exist
    /// in memory.
    pub async fn save_lockfile(&self) -> Result<(), crate::lockfile::LockfileError> {
        self.lockfile.with(|lock| lock.save()).await
    }

    /// Drop lockfile entries whose URL isn't in `live_urls`, then persist
    /// the result against the same in-memory [`Lockfile`] this fetcher
    /// mutates, so entries just written by `update`/`lock` aren't lost to a
    /// stale on-disk read (§4.7 step 4).
    pub async fn prune_lockfile(
        &self,
        live_urls: &std::collections::HashSet<String>,
    ) -> Result<(), crate::lockfile::LockfileError> {
        self.lockfile
            .with(|lock| {
                lock.retain_only(live_urls);
                lock.save()
            })
            .await
    }

    async fn finish(&self, url: &str, sha256: &str) -> Result<Fetched, FetchError> {
        let file_path = self.cache.artifact_path(sha256);
        let extracted_dir = self.maybe_extract(url, sha256, &file_path).await?;
        Ok(Fetched {
            file_path,
            extracted_dir,
            sha256: sha256.to_string(),
        })
    }

    async fn maybe_extract(
        &self,
        url: &str,
        sha256: &str,
        file_path: &std::path::Path,
    ) -> Result<Option<PathBuf>, FetchError> {
        let Some(kind) = archive::detect(url) else {
            return Ok(None);
        };
        if self.cache.has_extracted(sha256) {
            return Ok(Some(self.cache.extracted_path(sha256)));
        }

        let cache = self.cache.clone();
        let sha256 = sha256.to_string();
        let file_path = file_path.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || -> Result<PathBuf, FetchError> {
            let staging = cache.new_staging_dir()?;
            std::fs::create_dir_all(staging.path())?;
            archive::extract(kind, &file_path, staging.path())?;
            cache.publish_extracted(&sha256, staging.path())?;
            Ok(cache.extracted_path(&sha256))
        })
        .await
        .map_err(|e| FetchError::Network(e.to_string()))??;

        info!("extracted {url} to {}", extracted.display());
        Ok(Some(extracted))
    }

    async fn download_with_retry(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let backoff = ExponentialBackoff {
            initial_interval: RETRY_BASE,
            max_interval: RETRY_MAX,
            max_elapsed_time: Some(RETRY_MAX * RETRY_ATTEMPTS),
            ..ExponentialBackoff::default()
        };

        let mut attempt = 0u32;
        let client = &self.client;
        backoff::future::retry(backoff, || async {
            attempt += 1;
            match client.get(url).send().await {
                Ok(response) if response.status().is_client_error() => {
                    Err(backoff::Error::permanent(FetchError::Network(format!(
                        "{url}: {} (not retried, client error)",
                        response.status()
                    ))))
                }
                Ok(response) => match response.error_for_status() {
                    Ok(response) => response
                        .bytes()
                        .await
                        .map(|b| b.to_vec())
                        .map_err(|e| retryable(url, e, attempt)),
                    Err(e) => Err(retryable(url, e, attempt)),
                },
                Err(e) => Err(retryable(url, e, attempt)),
            }
        })
        .await
    }
}

fn retryable(url: &str, e: reqwest::Error, attempt: u32) -> backoff::Error<FetchError> {
    warn!("retrying {url} after attempt {attempt}: {e}");
    backoff::Error::transient(FetchError::Network(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_mismatch_message_names_both_digests() {
        let err = FetchError::HashMismatch {
            url: "https://e.test".to_string(),
            expected: "a".repeat(64),
            actual: "b".repeat(64),
        };
        let msg = err.to_string();
        assert!(msg.contains(&"a".repeat(64)));
        assert!(msg.contains(&"b".repeat(64)));
    }

    #[tokio::test]
    async fn fetcher_builds_with_a_fresh_cache_and_lockfile() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::from_path(dir.path().join("cache")).unwrap();
        let lockfile =
            Arc::new(SharedLockfile::load(dir.path().join("ops2deb.lock.yml")).unwrap());
        Fetcher::new(cache, lockfile, Duration::from_secs(5), Duration::from_secs(5)).unwrap();
    }
}
