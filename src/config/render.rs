//! Matrix expansion and fetch-URL rendering (§3 "Rendered blueprint"/"URL entry").

use crate::config::blueprint::{Blueprint, InstallEntry};
use crate::config::ConfigError;
use crate::template::{render, TemplateContext};

/// Debian architecture → Go-style `{{goarch}}` mapping. `all` has no
/// meaningful architecture to fetch a binary for, so referencing `{{goarch}}`
/// on an `all` package is an error.
pub fn goarch(architecture: &str) -> Result<&'static str, ConfigError> {
    match architecture {
        "amd64" => Ok("amd64"),
        "arm64" => Ok("arm64"),
        "armhf" => Ok("arm"),
        "all" => Err(ConfigError::Schema(vec![
            "{{goarch}} has no mapping for architecture \"all\"".to_string(),
        ])),
        other => Err(ConfigError::Schema(vec![format!(
            "{{{{goarch}}}} has no mapping for architecture \"{other}\""
        )])),
    }
}

/// One concrete `(name, version, architecture)` instance produced by
/// expanding a [`Blueprint`]'s `matrix`.
#[derive(Debug, Clone)]
pub struct RenderedBlueprint {
    /// Index of the declaring [`Blueprint`] in the configuration, used to
    /// preserve declaration order and to locate the source span when
    /// rewriting the document (§4.2 round-tripping).
    pub blueprint_index: usize,
    /// Package slug.
    pub name: String,
    /// Concrete version for this rendered instance.
    pub version: String,
    /// Concrete architecture for this rendered instance.
    pub architecture: String,
    /// Debian revision.
    pub revision: u32,
    /// Debian epoch.
    pub epoch: u32,
    /// Optional homepage.
    pub homepage: Option<String>,
    /// Short description.
    pub summary: String,
    /// Long description.
    pub description: String,
    /// `Depends:` relations.
    pub depends: Vec<String>,
    /// `Recommends:` relations.
    pub recommends: Vec<String>,
    /// `Conflicts:` relations.
    pub conflicts: Vec<String>,
    /// Fully rendered fetch URL, if `fetch` was set.
    pub fetch_url: Option<String>,
    /// Raw (unrendered) install directives; `{{src}}` and friends are
    /// expanded later, once the staging directory exists (§4.1/§4.5).
    pub install: Vec<InstallEntry>,
    /// Raw (unrendered) script lines.
    pub script: Vec<String>,
}

impl RenderedBlueprint {
    /// `(name, architecture)` key used by the delta reporter (§4.8).
    pub fn package_key(&self) -> (String, String) {
        (self.name.clone(), self.architecture.clone())
    }

    /// `(name, version, revision, epoch, architecture)` uniqueness key (§3 invariant).
    pub fn identity_key(&self) -> (String, String, u32, u32, String) {
        (
            self.name.clone(),
            self.version.clone(),
            self.revision,
            self.epoch,
            self.architecture.clone(),
        )
    }

    /// The template context used for `{{src}}`-aware rendering of install
    /// entries and script lines, extended with the staging directory once
    /// it is known (§4.5).
    pub fn base_template_context(&self) -> Result<TemplateContext, ConfigError> {
        let mut ctx = TemplateContext::new()
            .with("version", self.version.clone())
            .with("target", "");
        if let Ok(goarch_value) = goarch(&self.architecture) {
            ctx = ctx.with("goarch", goarch_value);
        }
        Ok(ctx)
    }
}

/// Expand every [`Blueprint`] in `blueprints` into its [`RenderedBlueprint`]s,
/// in the stable order required by §4.2: declaration order, then (per §8
/// scenario S3) versions outer / architectures inner within a blueprint's matrix.
pub fn expand_all(blueprints: &[Blueprint]) -> Result<Vec<RenderedBlueprint>, ConfigError> {
    let mut out = Vec::new();
    for (index, blueprint) in blueprints.iter().enumerate() {
        out.extend(expand_one(index, blueprint)?);
    }
    Ok(out)
}

fn expand_one(index: usize, blueprint: &Blueprint) -> Result<Vec<RenderedBlueprint>, ConfigError> {
    let versions: Vec<String> = match (&blueprint.matrix.as_ref().and_then(|m| m.versions.clone()), &blueprint.version)
    {
        (Some(versions), _) => versions.clone(),
        (None, Some(version)) => vec![version.clone()],
        (None, None) => {
            return Err(ConfigError::Schema(vec![format!(
                "blueprint \"{}\" has neither `version` nor `matrix.versions`",
                blueprint.name
            )]))
        }
    };

    let architectures: Vec<String> = blueprint
        .matrix
        .as_ref()
        .and_then(|m| m.architectures.clone())
        .unwrap_or_else(|| vec![blueprint.architecture.clone()]);

    let mut rendered = Vec::with_capacity(versions.len() * architectures.len());
    for version in &versions {
        let version = render_version(version)?;
        for architecture in &architectures {
            rendered.push(render_instance(index, blueprint, &version, architecture)?);
        }
    }
    Ok(rendered)
}

fn render_version(raw: &str) -> Result<String, ConfigError> {
    // §4.2: inline Jinja in `version` (practically: `env(...)` calls) is
    // rendered before scalar validation. No blueprint fields are bound yet.
    render(raw, &TemplateContext::new())
        .map_err(|e| ConfigError::Template(e.to_string()))
}

fn render_instance(
    blueprint_index: usize,
    blueprint: &Blueprint,
    version: &str,
    architecture: &str,
) -> Result<RenderedBlueprint, ConfigError> {
    let fetch_url = match &blueprint.fetch {
        None => None,
        Some(fetch) => {
            let mut ctx = TemplateContext::new()
                .with("version", version.to_string())
                .with("goarch", goarch(architecture)?.to_string());
            if let Some(target) = fetch.target_for(architecture) {
                ctx = ctx.with("target", target.to_string());
            }
            Some(
                render(fetch.url(), &ctx)
                    .map_err(|e| ConfigError::Template(format!("fetch.url: {e}")))?,
            )
        }
    };

    Ok(RenderedBlueprint {
        blueprint_index,
        name: blueprint.name.clone(),
        version: version.to_string(),
        architecture: architecture.to_string(),
        revision: blueprint.revision,
        epoch: blueprint.epoch,
        homepage: blueprint.homepage.clone(),
        summary: blueprint.summary.clone(),
        description: blueprint.description.clone(),
        depends: blueprint.depends.clone(),
        recommends: blueprint.recommends.clone(),
        conflicts: blueprint.conflicts.clone(),
        fetch_url,
        install: blueprint.install.clone(),
        script: blueprint.script.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::blueprint::Matrix;

    fn base_blueprint() -> Blueprint {
        Blueprint {
            name: "demo".to_string(),
            version: None,
            revision: 1,
            epoch: 0,
            architecture: "amd64".to_string(),
            homepage: None,
            summary: "s".to_string(),
            description: "d".to_string(),
            depends: vec![],
            recommends: vec![],
            conflicts: vec![],
            fetch: Some(crate::config::blueprint::Fetch::Url(
                "https://e.test/{{version}}/{{goarch}}.tgz".to_string(),
            )),
            install: vec![],
            script: vec![],
            matrix: Some(Matrix {
                architectures: Some(vec!["amd64".to_string(), "arm64".to_string()]),
                versions: Some(vec!["1.0.0".to_string(), "1.1.0".to_string()]),
            }),
            update: None,
        }
    }

    #[test]
    fn matrix_expansion_count_and_order() {
        // §8 invariant 1 + scenario S3.
        let rendered = expand_one(0, &base_blueprint()).unwrap();
        assert_eq!(rendered.len(), 4);
        let urls: Vec<_> = rendered.iter().map(|r| r.fetch_url.clone().unwrap()).collect();
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

    #[test]
    fn rendered_tuples_are_unique() {
        let rendered = expand_one(0, &base_blueprint()).unwrap();
        let mut keys: Vec<_> = rendered.iter().map(|r| r.identity_key()).collect();
        let len_before = keys.len();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), len_before);
    }

    #[test]
    fn goarch_all_is_an_error() {
        assert!(goarch("all").is_err());
    }

    #[test]
    fn single_blueprint_without_matrix_yields_one_instance() {
        let mut blueprint = base_blueprint();
        blueprint.matrix = None;
        blueprint.version = Some("2.0.0".to_string());
        blueprint.fetch = None;
        let rendered = expand_one(0, &blueprint).unwrap();
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].version, "2.0.0");
        assert_eq!(rendered[0].architecture, "amd64");
    }
}
