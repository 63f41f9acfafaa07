//! End-to-end scenarios (§8): generation, fetch integrity, matrix expansion,
//! `lock`, and single-flight coalescing, driven against the public API with
//! real temp directories and, where a scenario needs one, a tiny hand-rolled
//! HTTP/1.1 fixture server (no mocking crate is in the dependency stack).

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ops2deb::cache::Cache;
use ops2deb::config::ConfigDocument;
use ops2deb::fetcher::{FetchError, Fetcher, Mode};
use ops2deb::lockfile::SharedLockfile;
use ops2deb::session::PlainSession;
use ops2deb::sourcetree;

/// A single-purpose HTTP/1.1 server for test fixtures: every accepted
/// connection gets the same canned `body`, and `hits` counts how many
/// connections were actually accepted (§8 S5's "exactly one observed
/// request").
fn spawn_fixture_server(body: &'static [u8]) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_thread = hits.clone();

    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            hits_thread.fetch_add(1, Ordering::SeqCst);
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(header.as_bytes());
            let _ = stream.write_all(body);
        }
    });

    (format!("http://{addr}"), hits)
}

fn fetcher_against(cache_dir: &std::path::Path, lockfile_path: &std::path::Path) -> Fetcher {
    let cache = Cache::from_path(cache_dir).unwrap();
    let lockfile = Arc::new(SharedLockfile::load(lockfile_path.to_path_buf()).unwrap());
    Fetcher::new(cache, lockfile, Duration::from_secs(5), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn s1_single_blueprint_without_fetch_generates_expected_tree() {
    let source = "name: demo\n\
version: 1.0.0\n\
summary: hi\n\
description: hi\n\
script:\n\
  - \"echo ok > {{src}}/usr/share/demo/readme\"\n";

    let doc = ConfigDocument::parse(std::path::PathBuf::from("ops2deb.yml"), source.to_string()).unwrap();
    let rendered = doc.rendered().unwrap();
    assert_eq!(rendered.len(), 1);

    let output = tempfile::tempdir().unwrap();
    let session = PlainSession::new();
    let tree = sourcetree::generate(&rendered[0], output.path(), None, &session).unwrap();

    assert_eq!(tree.root, output.path().join("demo_1.0.0_amd64"));
    assert!(tree.control_text.contains("Package: demo"));
    assert!(tree.control_text.contains("Architecture: amd64"));

    let readme = std::fs::read_to_string(tree.staged_root.join("usr/share/demo/readme")).unwrap();
    assert_eq!(readme, "ok\n");
}

#[tokio::test]
async fn s2_hash_mismatch_leaves_the_cache_empty() {
    let (base_url, _hits) = spawn_fixture_server(b"the actual served body");
    let url = format!("{base_url}/x.bin");

    let dir = tempfile::tempdir().unwrap();
    let lockfile_path = dir.path().join("ops2deb.lock.yml");
    {
        let mut lock = ops2deb::lockfile::Lockfile::load(&lockfile_path).unwrap();
        lock.put(url.clone(), "a".repeat(64), chrono::Utc::now());
        lock.save().unwrap();
    }

    let fetcher = fetcher_against(&dir.path().join("cache"), &lockfile_path);
    let err = fetcher.fetch(&url, Mode::Verify).await.unwrap_err();
    assert!(matches!(err, FetchError::HashMismatch { .. }));

    let cache = Cache::from_path(dir.path().join("cache")).unwrap();
    assert!(!cache.has_artifact(&"a".repeat(64)));
}

#[tokio::test]
async fn s3_matrix_expansion_counts_and_urls() {
    let source = "name: demo\n\
summary: hi\n\
description: hi\n\
fetch: \"https://e.test/{{version}}/{{goarch}}.tgz\"\n\
matrix:\n\
  architectures: [amd64, arm64]\n\
  versions: [\"1.0.0\", \"1.1.0\"]\n";

    let doc = ConfigDocument::parse(std::path::PathBuf::from("ops2deb.yml"), source.to_string()).unwrap();
    let rendered = doc.rendered().unwrap();
    assert_eq!(rendered.len(), 4);

    let urls: Vec<String> = rendered.iter().map(|r| r.fetch_url.clone().unwrap()).collect();
    assert_eq!(
        urls,
        vec![
            "https://e.test/1.0.0/amd64.tgz",
            "https://e.test/1.0.0/arm64.tgz",
            "https://e.test/1.1.0/amd64.tgz",
            "https://e.test/1.1.0/arm64.tgz",
        ]
    );
}

#[tokio::test]
async fn s5_ten_concurrent_fetches_yield_one_network_hit() {
    let (base_url, hits) = spawn_fixture_server(b"payload");
    let url = format!("{base_url}/artifact.bin");

    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(fetcher_against(&dir.path().join("cache"), &dir.path().join("ops2deb.lock.yml")));

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let fetcher = fetcher.clone();
        let url = url.clone();
        tasks.push(tokio::spawn(async move { fetcher.fetch(&url, Mode::Locking).await }));
    }

    let mut digests = std::collections::HashSet::new();
    for task in tasks {
        let fetched = task.await.unwrap().unwrap();
        digests.insert(fetched.sha256);
    }

    assert_eq!(digests.len(), 1, "every caller must observe the same digest");
    assert_eq!(hits.load(Ordering::SeqCst), 1, "single-flight must coalesce into one request");
}

#[tokio::test]
async fn s6_lock_writes_sorted_entries_and_rerun_is_a_noop() {
    let bodies: [&'static [u8]; 3] = [b"one", b"two", b"three"];
    let mut urls = Vec::new();
    let mut hit_counters = Vec::new();
    for body in bodies {
        let (base_url, hits) = spawn_fixture_server(body);
        urls.push(format!("{base_url}/artifact"));
        hit_counters.push(hits);
    }

    let dir = tempfile::tempdir().unwrap();
    let lockfile_path = dir.path().join("ops2deb.lock.yml");
    let shared = Arc::new(SharedLockfile::load(lockfile_path.clone()).unwrap());
    let cache = Cache::from_path(dir.path().join("cache")).unwrap();
    let fetcher = Fetcher::new(cache, shared.clone(), Duration::from_secs(5), Duration::from_secs(5)).unwrap();

    for url in &urls {
        fetcher.fetch(url, Mode::Locking).await.unwrap();
    }
    // `lock` persists through the same `SharedLockfile` the fetcher mutated.
    shared.with(|l| l.save()).await.unwrap();

    let persisted = ops2deb::lockfile::Lockfile::load(&lockfile_path).unwrap();
    let keys: Vec<&str> = persisted.urls().collect();
    let mut sorted_keys = keys.clone();
    sorted_keys.sort();
    assert_eq!(keys, sorted_keys, "lockfile keys must already be in sorted order");
    assert_eq!(keys.len(), 3);

    for url in &urls {
        fetcher.fetch(url, Mode::Locking).await.unwrap();
    }
    for hits in &hit_counters {
        assert_eq!(hits.load(Ordering::SeqCst), 1, "re-running lock must not re-fetch an already-cached URL");
    }
}
