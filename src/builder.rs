//! Turns generated source trees into `.deb` files with bounded parallelism
//! and per-package failure isolation (§4.6).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info};
use tokio::sync::Semaphore;

use crate::debian::changelog::debian_version_string;
use crate::config::RenderedBlueprint;
use crate::session::Session;
use crate::sourcetree::GeneratedTree;

/// One build failure, identified by the blueprint it came from.
#[derive(Debug)]
pub struct BuildFailure {
    /// Package name.
    pub name: String,
    /// Package architecture.
    pub architecture: String,
    /// Human-readable cause.
    pub error: String,
}

/// The aggregate result of building every package in a run.
#[derive(Debug, Default)]
pub struct BuildReport {
    /// `.deb` paths that were produced successfully.
    pub built: Vec<PathBuf>,
    /// Failures, one per package that could not be built.
    pub failed: Vec<BuildFailure>,
}

impl BuildReport {
    /// Whether any package failed to build (§6: non-zero exit iff any build failed).
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Assemble a `.deb` for each `(rendered, tree)` pair, with at most
/// `workers` concurrent builds.
pub async fn build_all(
    items: Vec<(RenderedBlueprint, GeneratedTree)>,
    output_dir: &Path,
    workers: usize,
    external_builder: bool,
    session: Arc<dyn Session>,
) -> BuildReport {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let output_dir = output_dir.to_path_buf();

    let tasks = items.into_iter().map(|(rendered, tree)| {
        let semaphore = semaphore.clone();
        let output_dir = output_dir.clone();
        let session = session.clone();
        tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
            build_one(&rendered, &tree, &output_dir, external_builder, session.as_ref()).await
        })
    });

    let results = futures::future::join_all(tasks).await;

    let mut report = BuildReport::default();
    for result in results {
        match result.expect("build task panicked") {
            Ok(path) => report.built.push(path),
            Err(failure) => report.failed.push(failure),
        }
    }
    report
}

async fn build_one(
    rendered: &RenderedBlueprint,
    tree: &GeneratedTree,
    output_dir: &Path,
    external_builder: bool,
    session: &dyn Session,
) -> Result<PathBuf, BuildFailure> {
    let label = format!("{} {} {}", rendered.name, rendered.version, rendered.architecture);
    info!("building {label}");

    let deb_name = format!(
        "{}_{}_{}.deb",
        rendered.name,
        debian_version_string(rendered),
        rendered.architecture
    );
    let output_path = output_dir.join(&deb_name);

    let result = if external_builder {
        build_external(tree, session)
    } else {
        build_in_process(tree, &output_path)
    };

    match result {
        Ok(()) => {
            info!("built {label} -> {}", output_path.display());
            Ok(output_path)
        }
        Err(err) => {
            error!("failed to build {label}: {err}");
            Err(BuildFailure {
                name: rendered.name.clone(),
                architecture: rendered.architecture.clone(),
                error: err,
            })
        }
    }
}

fn build_in_process(tree: &GeneratedTree, output_path: &Path) -> Result<(), String> {
    crate::deb::assemble(&tree.control_text, &tree.staged_root, output_path).map_err(|e| e.to_string())
}

fn build_external(tree: &GeneratedTree, session: &dyn Session) -> Result<(), String> {
    session
        .check_call(&["dpkg-buildpackage", "-b", "-us", "-uc"], Some(&tree.root), None)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_has_failures_reflects_failed_builds() {
        let mut report = BuildReport::default();
        assert!(!report.has_failures());
        report.failed.push(BuildFailure {
            name: "demo".to_string(),
            architecture: "amd64".to_string(),
            error: "boom".to_string(),
        });
        assert!(report.has_failures());
    }
}
