//! Structured diff between two rendered configurations (§4.8).

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::RenderedBlueprint;

/// One `(name, architecture)` entry present on only one side, or present on
/// both sides with a different version.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Delta {
    /// Packages present in the new set but not the old one.
    pub added: Vec<PackageRef>,
    /// Packages present in the old set but not the new one.
    pub removed: Vec<PackageRef>,
    /// Packages present in both, with a different version.
    pub updated: Vec<VersionChange>,
}

/// A `(name, architecture)` identity, independent of version.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct PackageRef {
    /// Package name.
    pub name: String,
    /// Package architecture.
    pub architecture: String,
    /// Version at the side this `PackageRef` was taken from.
    pub version: String,
}

/// A package whose version differs between the old and new sets.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct VersionChange {
    /// Package name.
    pub name: String,
    /// Package architecture.
    pub architecture: String,
    /// Version on the old side.
    pub old_version: String,
    /// Version on the new side.
    pub new_version: String,
}

/// Diff `old` against `new`, keyed by `(name, architecture)` (§4.8 invariant:
/// a blueprint's `matrix.versions` axis means the same `(name, architecture)`
/// can legitimately appear more than once; when it does, every distinct old
/// version not present in `new` is reported `removed`, and vice versa).
pub fn delta(old: &[RenderedBlueprint], new: &[RenderedBlueprint]) -> Delta {
    let old_versions = versions_by_key(old);
    let new_versions = versions_by_key(new);

    let mut added = Vec::new();
    let mut removed = Vec::new();
    let mut updated = Vec::new();

    for (key, new_vset) in &new_versions {
        let old_vset = old_versions.get(key);
        for version in new_vset {
            let existed = old_vset.is_some_and(|vs| vs.contains(version));
            if !existed {
                added.push(PackageRef {
                    name: key.0.clone(),
                    architecture: key.1.clone(),
                    version: version.clone(),
                });
            }
        }
    }

    for (key, old_vset) in &old_versions {
        let new_vset = new_versions.get(key);
        for version in old_vset {
            let still_present = new_vset.is_some_and(|vs| vs.contains(version));
            if !still_present {
                removed.push(PackageRef {
                    name: key.0.clone(),
                    architecture: key.1.clone(),
                    version: version.clone(),
                });
            }
        }
    }

    // A key present on both sides with exactly one version each, differing,
    // reads better as "updated" than as one add plus one remove.
    for (key, old_vset) in &old_versions {
        if let Some(new_vset) = new_versions.get(key) {
            if old_vset.len() == 1 && new_vset.len() == 1 {
                let old_version = old_vset.iter().next().unwrap();
                let new_version = new_vset.iter().next().unwrap();
                if old_version != new_version {
                    updated.push(VersionChange {
                        name: key.0.clone(),
                        architecture: key.1.clone(),
                        old_version: old_version.clone(),
                        new_version: new_version.clone(),
                    });
                    added.retain(|p| !(p.name == key.0 && p.architecture == key.1));
                    removed.retain(|p| !(p.name == key.0 && p.architecture == key.1));
                }
            }
        }
    }

    added.sort();
    removed.sort();
    updated.sort();
    Delta { added, removed, updated }
}

fn versions_by_key(
    rendered: &[RenderedBlueprint],
) -> BTreeMap<(String, String), std::collections::BTreeSet<String>> {
    let mut map: BTreeMap<(String, String), std::collections::BTreeSet<String>> = BTreeMap::new();
    for r in rendered {
        map.entry(r.package_key()).or_default().insert(r.version.clone());
    }
    map
}

/// Render `delta` as the `delta` subcommand's default human-readable text.
pub fn format_text(delta: &Delta) -> String {
    let mut out = String::new();
    for p in &delta.added {
        out.push_str(&format!("+ {} {} ({})\n", p.name, p.version, p.architecture));
    }
    for p in &delta.removed {
        out.push_str(&format!("- {} {} ({})\n", p.name, p.version, p.architecture));
    }
    for u in &delta.updated {
        out.push_str(&format!(
            "~ {} {} -> {} ({})\n",
            u.name, u.old_version, u.new_version, u.architecture
        ));
    }
    out
}

/// Render `delta` as `--format json`.
pub fn format_json(delta: &Delta) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(delta)
}
