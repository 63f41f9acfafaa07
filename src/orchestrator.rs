//! Sequences the library's components into the subcommands exposed by the
//! CLI (§4.9), and maps their outcomes onto the documented exit codes (§6/§7).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info, warn};

use crate::builder::{self, BuildReport};
use crate::cli::{Cli, Command, DeltaFormat};
use crate::config::{render::RenderedBlueprint, ConfigDocument};
use crate::delta;
use crate::env::Environment;
use crate::fetcher::{Fetcher, Mode};
use crate::lockfile::SharedLockfile;
use crate::session::{PlainSession, Session};
use crate::sourcetree::{self, GeneratedTree};
use crate::updater;

/// Exit code 0: the run completed with nothing left to report as a failure.
pub const EXIT_OK: i32 = 0;
/// Exit code 1: a generic, uncategorised failure.
pub const EXIT_GENERIC: i32 = 1;
/// Exit code 2: the configuration failed to parse or validate.
pub const EXIT_CONFIG: i32 = 2;
/// Exit code 3: a lockfile/hash mismatch or a missing lock entry.
pub const EXIT_LOCK: i32 = 3;
/// Exit code 4: at least one package failed to build.
pub const EXIT_BUILD: i32 = 4;
/// Exit code 77: the run was cancelled (SIGINT).
pub const EXIT_INTERRUPTED: i32 = 77;

/// Errors that abort a run outright (as opposed to [`BuildReport::failed`],
/// which is a partial, per-package failure that still yields [`EXIT_BUILD`]).
#[derive(Debug)]
pub enum OrchestratorError {
    /// Loading, validating or rendering the configuration failed.
    Config(crate::config::ConfigError),
    /// A URL fetch or hash check failed outside of a per-package build step.
    Lock(crate::fetcher::FetchError),
    /// Some other I/O failure.
    Io(std::io::Error),
}

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            OrchestratorError::Config(e) => write!(f, "{e}"),
            OrchestratorError::Lock(e) => write!(f, "{e}"),
            OrchestratorError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for OrchestratorError {}

impl From<crate::config::ConfigError> for OrchestratorError {
    fn from(e: crate::config::ConfigError) -> Self {
        OrchestratorError::Config(e)
    }
}

impl From<crate::fetcher::FetchError> for OrchestratorError {
    fn from(e: crate::fetcher::FetchError) -> Self {
        OrchestratorError::Lock(e)
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(e: std::io::Error) -> Self {
        OrchestratorError::Io(e)
    }
}

impl From<crate::lockfile::LockfileError> for OrchestratorError {
    fn from(e: crate::lockfile::LockfileError) -> Self {
        OrchestratorError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
    }
}

impl OrchestratorError {
    /// The exit code this error maps to (§6/§7).
    pub fn exit_code(&self) -> i32 {
        match self {
            OrchestratorError::Config(_) => EXIT_CONFIG,
            OrchestratorError::Lock(crate::fetcher::FetchError::HashMismatch { .. })
            | OrchestratorError::Lock(crate::fetcher::FetchError::HashMissing(_)) => EXIT_LOCK,
            OrchestratorError::Lock(_) => EXIT_GENERIC,
            OrchestratorError::Io(_) => EXIT_GENERIC,
        }
    }
}

/// Run the subcommand selected by `cli`, returning the process exit code.
pub async fn run(cli: Cli, env: Environment) -> i32 {
    match run_inner(&cli, &env).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            e.exit_code()
        }
    }
}

async fn run_inner(cli: &Cli, env: &Environment) -> Result<i32, OrchestratorError> {
    match &cli.command {
        Command::Validate => {
            let doc = ConfigDocument::load(&cli.config)?;
            doc.rendered()?;
            info!("configuration is valid ({} blueprint(s))", doc.blueprints.len());
            Ok(EXIT_OK)
        }
        Command::Format => {
            let doc = ConfigDocument::load(&cli.config)?;
            let canonical = doc.to_canonical_yaml()?;
            std::fs::write(&cli.config, canonical)?;
            Ok(EXIT_OK)
        }
        Command::Lock => {
            let doc = ConfigDocument::load(&cli.config)?;
            let rendered = doc.rendered()?;
            let fetcher = build_fetcher(env, &doc.lockfile_path).await?;
            lock_all(&rendered, &fetcher).await?;
            fetcher.save_lockfile().await?;
            Ok(EXIT_OK)
        }
        Command::Purge => {
            crate::cache::Cache::from_path(&env.cache_dir)?.purge()?;
            Ok(EXIT_OK)
        }
        Command::Migrate => {
            migrate(&cli.config).await?;
            Ok(EXIT_OK)
        }
        Command::Generate { output } => {
            let output_dir = output.clone().unwrap_or_else(|| env.output_dir.clone());
            let doc = ConfigDocument::load(&cli.config)?;
            let rendered = doc.rendered()?;
            let fetcher = build_fetcher(env, &doc.lockfile_path).await?;
            generate_all(&rendered, &output_dir, &fetcher).await?;
            Ok(EXIT_OK)
        }
        Command::Build { output, workers, external_builder } => {
            let output_dir = output.clone().unwrap_or_else(|| env.output_dir.clone());
            let doc = ConfigDocument::load(&cli.config)?;
            let rendered = doc.rendered()?;
            let report = rebuild(&rendered, &output_dir, workers.unwrap_or_else(|| env.worker_count()), *external_builder).await?;
            Ok(report_exit_code(&report))
        }
        Command::Default { output, workers, external_builder } => {
            let output_dir = output.clone().unwrap_or_else(|| env.output_dir.clone());
            let doc = ConfigDocument::load(&cli.config)?;
            let rendered = doc.rendered()?;
            let fetcher = build_fetcher(env, &doc.lockfile_path).await?;
            generate_all(&rendered, &output_dir, &fetcher).await?;
            let report = rebuild(
                &rendered,
                &output_dir,
                workers.unwrap_or_else(|| env.worker_count()),
                *external_builder,
            )
            .await?;
            Ok(report_exit_code(&report))
        }
        Command::Update { only, dry_run, skip_build, output } => {
            let mut doc = ConfigDocument::load(&cli.config)?;
            let fetcher = build_fetcher(env, &doc.lockfile_path).await?;
            let client = reqwest::Client::new();
            let outcomes = updater::update_all(&mut doc, &fetcher, &client, only, *dry_run).await;
            for outcome in &outcomes {
                info!("{outcome}");
            }
            let any_failed = outcomes.iter().any(|o| matches!(o, updater::Outcome::Failed { .. }));

            if *dry_run {
                return Ok(if any_failed { EXIT_GENERIC } else { EXIT_OK });
            }

            std::fs::write(&cli.config, &doc.source)?;
            let rendered = doc.rendered()?;
            prune_stale_lockfile_entries(&fetcher, &rendered).await?;

            if *skip_build {
                return Ok(if any_failed { EXIT_GENERIC } else { EXIT_OK });
            }

            let output_dir = output.clone().unwrap_or_else(|| env.output_dir.clone());
            generate_all(&rendered, &output_dir, &fetcher).await?;
            let report = rebuild(&rendered, &output_dir, env.worker_count(), false).await?;
            Ok(if any_failed { EXIT_GENERIC } else { report_exit_code(&report) })
        }
        Command::Delta { old, new, format } => {
            let old_doc = ConfigDocument::load(old)?;
            let new_doc = ConfigDocument::load(new)?;
            let d = delta::delta(&old_doc.rendered()?, &new_doc.rendered()?);
            match format {
                DeltaFormat::Text => print!("{}", delta::format_text(&d)),
                DeltaFormat::Json => println!(
                    "{}",
                    delta::format_json(&d).map_err(|e| OrchestratorError::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        e
                    )))?
                ),
            }
            Ok(EXIT_OK)
        }
    }
}

fn report_exit_code(report: &BuildReport) -> i32 {
    if report.has_failures() {
        EXIT_BUILD
    } else {
        EXIT_OK
    }
}

async fn build_fetcher(env: &Environment, lockfile_path: &Path) -> Result<Fetcher, OrchestratorError> {
    let cache = crate::cache::Cache::from_path(&env.cache_dir)?;
    let lockfile = Arc::new(SharedLockfile::load(lockfile_path.to_path_buf())?);
    Ok(Fetcher::new(cache, lockfile, env.connect_timeout, env.download_timeout)?)
}

async fn lock_all(rendered: &[RenderedBlueprint], fetcher: &Fetcher) -> Result<(), OrchestratorError> {
    for r in rendered {
        if let Some(url) = &r.fetch_url {
            fetcher.fetch(url, Mode::Locking).await?;
        }
    }
    Ok(())
}

async fn generate_all(
    rendered: &[RenderedBlueprint],
    output_dir: &Path,
    fetcher: &Fetcher,
) -> Result<(), OrchestratorError> {
    std::fs::create_dir_all(output_dir)?;
    let session = PlainSession::new();
    for r in rendered {
        let extracted = match &r.fetch_url {
            Some(url) => {
                let fetched = fetcher.fetch(url, Mode::Verify).await?;
                fetched.extracted_dir
            }
            None => None,
        };
        sourcetree::generate(r, output_dir, extracted.as_deref(), &session)
            .map_err(|e| OrchestratorError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        info!("generated {} {} {}", r.name, r.version, r.architecture);
    }
    Ok(())
}

/// Re-locate the already-generated source tree for each rendered blueprint
/// and hand them to the builder. `build`/`update --skip-build=false` both
/// assume `generate` (this run or a prior one) already populated
/// `output_dir`.
async fn rebuild(
    rendered: &[RenderedBlueprint],
    output_dir: &Path,
    workers: usize,
    external_builder: bool,
) -> Result<BuildReport, OrchestratorError> {
    let mut items = Vec::new();
    for r in rendered {
        let root = output_dir.join(format!("{}_{}_{}", r.name, r.version, r.architecture));
        let control_path = root.join("debian/control");
        let control_text = std::fs::read_to_string(&control_path).map_err(|e| {
            warn!("missing generated tree for {} {} ({}); run `generate` first", r.name, r.version, root.display());
            e
        })?;
        let tree = GeneratedTree {
            root: root.clone(),
            staged_root: root.join("src"),
            control_text,
        };
        items.push((r.clone(), tree));
    }

    let session: Arc<dyn Session> = Arc::new(PlainSession::new());
    Ok(builder::build_all(items, output_dir, workers, external_builder, session).await)
}

/// Rewrite a legacy `fetch.sha256`/`fetch.sha256: {arch: hash}` configuration
/// into the split config + lockfile layout (§4.7 Open Question c): every
/// legacy digest is moved into the sibling lockfile keyed by its rendered
/// URL, and the `sha256` field is dropped from the document.
async fn migrate(config_path: &Path) -> Result<(), OrchestratorError> {
    let source = std::fs::read_to_string(config_path)?;
    let mut value: serde_yaml::Value = serde_yaml::from_str(&source)
        .map_err(|e| OrchestratorError::Config(crate::config::ConfigError::Parse(e)))?;

    let lockfile_path = config_path
        .with_extension("")
        .with_extension("lock.yml");
    let mut lockfile = crate::lockfile::Lockfile::load(&lockfile_path)?;
    let now = chrono::Utc::now();
    let mut migrated_any = false;

    let items: Vec<&mut serde_yaml::Value> = match &mut value {
        serde_yaml::Value::Sequence(items) => items.iter_mut().collect(),
        mapping @ serde_yaml::Value::Mapping(_) => vec![mapping],
        _ => vec![],
    };

    for item in items {
        migrated_any |= migrate_one_blueprint(item, &mut lockfile, now)?;
    }

    if migrated_any {
        lockfile.save()?;
        let rewritten = serde_yaml::to_string(&value)
            .map_err(|e| OrchestratorError::Config(crate::config::ConfigError::Parse(e)))?;
        std::fs::write(config_path, rewritten)?;
        info!("migrated legacy fetch.sha256 entries into {}", lockfile_path.display());
    } else {
        info!("no legacy fetch.sha256 entries found; nothing to migrate");
    }
    Ok(())
}

fn migrate_one_blueprint(
    item: &mut serde_yaml::Value,
    lockfile: &mut crate::lockfile::Lockfile,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<bool, OrchestratorError> {
    let Some(mapping) = item.as_mapping_mut() else {
        return Ok(false);
    };
    let name = mapping
        .get(&serde_yaml::Value::from("name"))
        .and_then(|v| v.as_str())
        .unwrap_or("<unknown>")
        .to_string();

    let Some(fetch) = mapping.get_mut(&serde_yaml::Value::from("fetch")) else {
        return Ok(false);
    };
    let Some(fetch_mapping) = fetch.as_mapping_mut() else {
        return Ok(false);
    };

    let Some(sha_value) = fetch_mapping.remove(serde_yaml::Value::from("sha256")) else {
        return Ok(false);
    };
    let url = fetch_mapping
        .get(&serde_yaml::Value::from("url"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let Some(url) = url else {
        warn!("blueprint \"{name}\" has a legacy `sha256` but no `fetch.url`; dropping it unlinked");
        return Ok(true);
    };

    match sha_value {
        serde_yaml::Value::String(hash) => {
            lockfile.put(url, hash, now);
        }
        serde_yaml::Value::Mapping(per_arch) => {
            for (_, hash) in per_arch {
                if let Some(hash) = hash.as_str() {
                    lockfile.put(url.clone(), hash.to_string(), now);
                }
            }
        }
        _ => {}
    }
    Ok(true)
}

/// Drop lockfile entries no rendered blueprint references anymore (§4.7 step
/// 4), then persist the result against the same lockfile instance `fetcher`
/// has been mutating (not a fresh on-disk read, which would miss the
/// digests `update` just recorded via `relock_fetch_url`).
async fn prune_stale_lockfile_entries(
    fetcher: &Fetcher,
    rendered: &[RenderedBlueprint],
) -> Result<(), OrchestratorError> {
    let live: HashSet<String> = rendered.iter().filter_map(|r| r.fetch_url.clone()).collect();
    fetcher.prune_lockfile(&live).await?;
    Ok(())
}
