//! Update engine (§4.7): finds newer upstream versions for each blueprint
//! and rewrites the configuration and lockfile in place.

pub mod strategy;

use reqwest::Client;

use crate::config::ConfigDocument;
use crate::fetcher::{Fetcher, Mode};

pub use strategy::StrategyError;

/// Outcome of checking a single blueprint for updates.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The blueprint's current version is already the newest one found.
    UpToDate { name: String, version: String },
    /// A newer version was found and (unless `dry_run`) written back.
    Updated { name: String, old: String, new: String },
    /// Discovery failed; the blueprint is left untouched.
    Failed { name: String, reason: String },
}

impl Outcome {
    /// The blueprint name this outcome is about, for sorted/grouped reporting.
    pub fn name(&self) -> &str {
        match self {
            Outcome::UpToDate { name, .. } => name,
            Outcome::Updated { name, .. } => name,
            Outcome::Failed { name, .. } => name,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Outcome::UpToDate { name, version } => write!(f, "{name}: up to date ({version})"),
            Outcome::Updated { name, old, new } => write!(f, "{name}: updated {old} -> {new}"),
            Outcome::Failed { name, reason } => write!(f, "{name}: failed ({reason})"),
        }
    }
}

/// Check every blueprint in `doc` (optionally restricted to `only`) for a
/// newer upstream version, applying the result directly to `doc` unless
/// `dry_run`. Epoch is never bumped automatically (§4.7 Open Question d) —
/// if the discovered version sorts lower than the current one under Debian
/// version rules, that's still reported as `Updated`; bumping `epoch` to
/// recover from a genuine downgrade is left to the operator.
pub async fn update_all(
    doc: &mut ConfigDocument,
    fetcher: &Fetcher,
    client: &Client,
    only: &[String],
    dry_run: bool,
) -> Vec<Outcome> {
    let mut outcomes = Vec::new();

    for index in 0..doc.blueprints.len() {
        let blueprint = doc.blueprints[index].clone();
        if !only.is_empty() && !only.iter().any(|n| n == &blueprint.name) {
            continue;
        }

        let current_version = match &blueprint.version {
            Some(v) => v.clone(),
            None => {
                outcomes.push(Outcome::Failed {
                    name: blueprint.name.clone(),
                    reason: "matrix.versions blueprints are not auto-updated".to_string(),
                });
                continue;
            }
        };

        let hint = blueprint.update.clone().unwrap_or_default();
        let fetch_url = blueprint.fetch.as_ref().map(|f| f.url().to_string());
        let discovered = strategy::discover(
            client,
            fetch_url.as_deref(),
            blueprint.homepage.as_deref(),
            &hint,
        )
        .await;

        match discovered {
            Ok(new_version) if new_version == current_version => {
                outcomes.push(Outcome::UpToDate {
                    name: blueprint.name.clone(),
                    version: current_version,
                });
            }
            Ok(new_version) => {
                if !dry_run {
                    if let Err(e) = doc.rewrite_version(index, &new_version) {
                        outcomes.push(Outcome::Failed {
                            name: blueprint.name.clone(),
                            reason: e.to_string(),
                        });
                        continue;
                    }
                    if let Err(e) = relock_fetch_url(&blueprint, &new_version, fetcher).await {
                        outcomes.push(Outcome::Failed {
                            name: blueprint.name.clone(),
                            reason: e.to_string(),
                        });
                        continue;
                    }
                }
                outcomes.push(Outcome::Updated {
                    name: blueprint.name.clone(),
                    old: current_version,
                    new: new_version,
                });
            }
            Err(e) => {
                outcomes.push(Outcome::Failed {
                    name: blueprint.name.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    outcomes
}

/// After a version bump, fetch and record the new URL's hash for every
/// architecture the blueprint renders to, so a subsequent `build` doesn't
/// hit a cold `HashMissing` (§4.7 step 3). A no-op for blueprints without
/// `fetch`.
async fn relock_fetch_url(
    blueprint: &crate::config::Blueprint,
    new_version: &str,
    fetcher: &Fetcher,
) -> Result<(), StrategyError> {
    let Some(fetch) = &blueprint.fetch else {
        return Ok(());
    };

    let architectures: Vec<String> = blueprint
        .matrix
        .as_ref()
        .and_then(|m| m.architectures.clone())
        .unwrap_or_else(|| vec![blueprint.architecture.clone()]);

    for architecture in &architectures {
        let goarch = crate::config::render::goarch(architecture)
            .map_err(|e| StrategyError::Network(e.to_string()))?;
        let mut ctx = crate::template::TemplateContext::new()
            .with("version", new_version.to_string())
            .with("goarch", goarch.to_string());
        if let Some(target) = fetch.target_for(architecture) {
            ctx = ctx.with("target", target.to_string());
        }
        let url = crate::template::render(fetch.url(), &ctx)
            .map_err(|e| StrategyError::Network(e.to_string()))?;
        fetcher
            .fetch(&url, Mode::Locking)
            .await
            .map_err(|e| StrategyError::Network(e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_display_reports_old_and_new_version() {
        let outcome = Outcome::Updated {
            name: "demo".to_string(),
            old: "1.0.0".to_string(),
            new: "1.1.0".to_string(),
        };
        assert_eq!(outcome.to_string(), "demo: updated 1.0.0 -> 1.1.0");
    }

    #[test]
    fn outcome_name_is_exposed_for_grouping() {
        let outcome = Outcome::UpToDate {
            name: "demo".to_string(),
            version: "1.0.0".to_string(),
        };
        assert_eq!(outcome.name(), "demo");
    }
}
