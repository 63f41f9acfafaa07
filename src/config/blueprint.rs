//! The declared blueprint schema (§3), deserialised straight off the YAML
//! document. Unknown fields are rejected so a typo in a blueprint surfaces
//! as a [`crate::config::ConfigError::Schema`] rather than being ignored.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn default_revision() -> u32 {
    1
}

fn default_architecture() -> String {
    "amd64".to_string()
}

/// One declared package, possibly expanded into several [`super::RenderedBlueprint`]s
/// by its `matrix`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Blueprint {
    /// Non-empty package slug.
    pub name: String,
    /// Upstream version. Mutually exclusive with `matrix.versions`.
    #[serde(default)]
    pub version: Option<String>,
    /// Debian revision suffix, defaults to 1.
    #[serde(default = "default_revision")]
    pub revision: u32,
    /// Debian epoch, defaults to 0 (no `N:` prefix rendered).
    #[serde(default)]
    pub epoch: u32,
    /// Debian architecture, defaults to `amd64`. Not a closed enum: any
    /// value debian recognises is accepted, but only `amd64`/`arm64`/`armhf`
    /// have a `{{goarch}}` mapping (§3).
    #[serde(default = "default_architecture")]
    pub architecture: String,
    /// Optional homepage URL recorded in `debian/control`.
    #[serde(default)]
    pub homepage: Option<String>,
    /// Single-line summary (the short `Description:` field).
    pub summary: String,
    /// Multi-line description (the long `Description:` body).
    pub description: String,
    /// Ordered `Depends:` relation strings.
    #[serde(default)]
    pub depends: Vec<String>,
    /// Ordered `Recommends:` relation strings.
    #[serde(default)]
    pub recommends: Vec<String>,
    /// Ordered `Conflicts:` relation strings.
    #[serde(default)]
    pub conflicts: Vec<String>,
    /// Upstream artifact to fetch, if any.
    #[serde(default)]
    pub fetch: Option<Fetch>,
    /// Ordered install directives applied to the staging directory.
    #[serde(default)]
    pub install: Vec<InstallEntry>,
    /// Ordered shell commands run in the staging directory.
    #[serde(default)]
    pub script: Vec<String>,
    /// Architecture/version matrix this blueprint expands over.
    #[serde(default)]
    pub matrix: Option<Matrix>,
    /// Ambient addition (§4.7, Open Question a): hints for the updater.
    #[serde(default)]
    pub update: Option<UpdateHint>,
}

/// Either a bare URL string or an object with per-architecture `{{target}}`
/// substitutions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Fetch {
    /// `fetch: "https://example.test/{{version}}.tar.gz"`
    Url(String),
    /// `fetch: {url: "...", targets: {amd64: "x86_64", arm64: "aarch64"}}`
    Detailed {
        /// The templated URL.
        url: String,
        /// `{{target}}` substitution per architecture.
        #[serde(default)]
        targets: HashMap<String, String>,
    },
}

impl Fetch {
    /// The raw, unrendered URL template.
    pub fn url(&self) -> &str {
        match self {
            Fetch::Url(url) => url,
            Fetch::Detailed { url, .. } => url,
        }
    }

    /// The `{{target}}` substitution declared for `architecture`, if any.
    pub fn target_for(&self, architecture: &str) -> Option<&str> {
        match self {
            Fetch::Url(_) => None,
            Fetch::Detailed { targets, .. } => targets.get(architecture).map(String::as_str),
        }
    }
}

/// One `install` directive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InstallEntry {
    /// `"A:B"` (copy) or `"dir/"` (recursive copy, trailing slash).
    Spec(String),
    /// `{path, content}`: a here-document materialised at `src/path`.
    Content {
        /// Destination path under the staging directory.
        path: String,
        /// Here-document content, written verbatim (trailing newline kept).
        content: String,
    },
}

/// The `architectures × versions` axes a blueprint expands over.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Matrix {
    /// Architectures to expand over; a singleton of the blueprint's
    /// `architecture` field when absent.
    #[serde(default)]
    pub architectures: Option<Vec<String>>,
    /// Versions to expand over; mutually exclusive with the top-level
    /// `version` field.
    #[serde(default)]
    pub versions: Option<Vec<String>>,
}

/// Ambient, ops2deb-specific hint steering the updater (§4.7 Open Question a).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateHint {
    /// Force a specific strategy instead of inferring one from the fetch URL.
    #[serde(default)]
    pub strategy: Option<String>,
    /// A regex whose first capture group is the comparable version string,
    /// used by the `custom` strategy.
    #[serde(default)]
    pub version_regex: Option<String>,
}
