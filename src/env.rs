//! Process-wide configuration read once from the environment.
//!
//! Nothing outside [`Environment::from_process_env`] and the template engine's
//! `env()` function calls [`std::env::var`] directly; every component that
//! needs a cache directory, a token or a timeout takes an `&Environment`
//! instead of reaching into the process environment itself.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CACHE_DIR: &str = "/tmp/ops2deb_cache";
const DEFAULT_OUTPUT_DIR: &str = "./output";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Values threaded explicitly through every component instead of being read
/// ad hoc from the process environment.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Bearer token used when querying the GitHub releases API.
    pub github_token: Option<String>,
    /// Root of the content-addressed fetch/extract cache.
    pub cache_dir: PathBuf,
    /// Root under which generated source trees and `.deb` files land.
    pub output_dir: PathBuf,
    /// Whether verbose logging was requested.
    pub verbose: bool,
    /// Number of concurrent builds/extractions, `None` means "use the CPU count".
    pub workers: Option<usize>,
    /// Per-HTTP-request connect timeout.
    pub connect_timeout: Duration,
    /// Overall timeout for a single artifact download.
    pub download_timeout: Duration,
    /// Wall-clock timeout for a single external build process.
    pub build_timeout: Duration,
}

impl Default for Environment {
    fn default() -> Self {
        Environment {
            github_token: None,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            verbose: false,
            workers: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            build_timeout: DEFAULT_BUILD_TIMEOUT,
        }
    }
}

impl Environment {
    /// Build an [`Environment`] from `OPS2DEB_*` variables, falling back to
    /// the documented defaults for anything unset.
    pub fn from_process_env() -> Self {
        let mut env = Environment::default();

        if let Ok(token) = std::env::var("OPS2DEB_GITHUB_TOKEN") {
            if !token.is_empty() {
                env.github_token = Some(token);
            }
        }
        if let Ok(dir) = std::env::var("OPS2DEB_CACHE_DIR") {
            env.cache_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("OPS2DEB_OUTPUT_DIR") {
            env.output_dir = PathBuf::from(dir);
        }
        if let Ok(verbose) = std::env::var("OPS2DEB_VERBOSE") {
            env.verbose = verbose == "1";
        }
        if let Ok(workers) = std::env::var("OPS2DEB_WORKERS") {
            if let Ok(n) = workers.parse::<usize>() {
                env.workers = Some(n);
            }
        }

        env
    }

    /// Resolve the effective build/extraction parallelism.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let env = Environment::default();
        assert_eq!(env.cache_dir, PathBuf::from(DEFAULT_CACHE_DIR));
        assert_eq!(env.output_dir, PathBuf::from(DEFAULT_OUTPUT_DIR));
        assert!(env.github_token.is_none());
        assert!(env.worker_count() >= 1);
    }
}
