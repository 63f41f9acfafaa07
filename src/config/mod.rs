//! Blueprint model, YAML loader, matrix expansion and validation (§3, §4.2).

pub mod blueprint;
pub mod render;

use std::path::{Path, PathBuf};

pub use blueprint::{Blueprint, Fetch, InstallEntry, Matrix, UpdateHint};
pub use render::{expand_all, goarch, RenderedBlueprint};

const DEFAULT_LOCKFILE_NAME: &str = "ops2deb.lock.yml";
const LOCKFILE_DIRECTIVE_PREFIX: &str = "# lockfile=";

/// Errors raised while loading or validating a configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The document wasn't valid YAML at all.
    Parse(serde_yaml::Error),
    /// Field-level problems, aggregated across every blueprint so a user
    /// sees every mistake in one run instead of fixing them one at a time.
    Schema(Vec<String>),
    /// A template expansion failed while rendering `version` or `fetch.url`.
    Template(String),
    /// Reading the configuration file from disk failed.
    Io(std::io::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ConfigError::Parse(e) => write!(f, "failed to parse configuration: {e}"),
            ConfigError::Schema(errors) => {
                writeln!(f, "configuration has {} problem(s):", errors.len())?;
                for (i, e) in errors.iter().enumerate() {
                    write!(f, "  {}. {e}", i + 1)?;
                    if i + 1 < errors.len() {
                        writeln!(f)?;
                    }
                }
                Ok(())
            }
            ConfigError::Template(e) => write!(f, "template error: {e}"),
            ConfigError::Io(e) => write!(f, "failed to read configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

/// A loaded configuration file: the blueprints it declares, the lockfile
/// path it selects, and (for round-tripping, §4.2/§9) its original source
/// text.
#[derive(Debug, Clone)]
pub struct ConfigDocument {
    /// Path the document was loaded from.
    pub path: PathBuf,
    /// Raw source text, kept so targeted rewrites (update/migrate) can
    /// leave everything they don't touch byte-for-byte untouched.
    pub source: String,
    /// Lockfile path selected by the `# lockfile=PATH` directive, or the
    /// default sibling file.
    pub lockfile_path: PathBuf,
    /// Parsed, validated blueprints in declaration order.
    pub blueprints: Vec<Blueprint>,
}

impl ConfigDocument {
    /// Load and validate the configuration at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        Self::parse(path.to_path_buf(), source)
    }

    /// Parse and validate an already-read configuration document. Exposed
    /// separately from [`ConfigDocument::load`] so tests don't need a
    /// filesystem fixture for every case.
    pub fn parse(path: PathBuf, source: String) -> Result<Self, ConfigError> {
        let lockfile_path = resolve_lockfile_path(&path, &source);
        let blueprints = parse_blueprints(&source)?;

        let mut errors = Vec::new();
        for blueprint in &blueprints {
            errors.extend(validate_blueprint(blueprint));
        }
        if !errors.is_empty() {
            return Err(ConfigError::Schema(errors));
        }

        Ok(ConfigDocument {
            path,
            source,
            lockfile_path,
            blueprints,
        })
    }

    /// Expand every blueprint into its rendered instances (§3/§4.2).
    pub fn rendered(&self) -> Result<Vec<RenderedBlueprint>, ConfigError> {
        let rendered = expand_all(&self.blueprints)?;

        let mut seen = std::collections::HashSet::new();
        let mut dupes = Vec::new();
        for r in &rendered {
            if !seen.insert(r.identity_key()) {
                dupes.push(format!(
                    "duplicate rendered package ({}, {}, revision {}, epoch {}, {})",
                    r.name, r.version, r.revision, r.epoch, r.architecture
                ));
            }
        }
        if !dupes.is_empty() {
            return Err(ConfigError::Schema(dupes));
        }

        Ok(rendered)
    }

    /// Replace the `version:` scalar of the blueprint at `blueprint_index`
    /// with `new_version`, leaving every other line of the document
    /// untouched (§4.2/§4.7 round-tripping). Fails if the blueprint or its
    /// `version:` line cannot be located.
    pub fn rewrite_version(
        &mut self,
        blueprint_index: usize,
        new_version: &str,
    ) -> Result<(), ConfigError> {
        let span = blueprint_span(&self.source, blueprint_index).ok_or_else(|| {
            ConfigError::Schema(vec![format!(
                "could not locate blueprint #{blueprint_index} in the source document"
            )])
        })?;
        let rewritten = rewrite_scalar_field(&self.source, span, "version", new_version)
            .ok_or_else(|| {
                ConfigError::Schema(vec![format!(
                    "could not locate a `version:` line for blueprint #{blueprint_index}"
                )])
            })?;
        self.source = rewritten;
        self.blueprints = parse_blueprints(&self.source)?;
        Ok(())
    }

    /// Re-serialise the document canonically via `serde_yaml`, re-attaching
    /// the `# lockfile=` directive. This is `format`'s implementation; it is
    /// idempotent (running it twice yields the same bytes) but, unlike
    /// [`ConfigDocument::rewrite_version`], does not preserve comments or
    /// quoting style elsewhere in the document — `serde_yaml` has no
    /// comment-preserving AST, and none of the rest of the corpus's
    /// dependency stacks carry one either (see DESIGN.md).
    pub fn to_canonical_yaml(&self) -> Result<String, ConfigError> {
        let body = if self.blueprints.len() == 1 {
            serde_yaml::to_string(&self.blueprints[0])
        } else {
            serde_yaml::to_string(&self.blueprints)
        }
        .map_err(ConfigError::Parse)?;

        let mut out = String::new();
        if let Some(directive) = leading_directive_line(&self.source) {
            out.push_str(directive);
            out.push('\n');
        }
        out.push_str(&body);
        Ok(out)
    }
}

fn resolve_lockfile_path(config_path: &Path, source: &str) -> PathBuf {
    let directive = leading_directive_line(source)
        .and_then(|line| line.strip_prefix(LOCKFILE_DIRECTIVE_PREFIX))
        .map(str::trim);

    let raw = match directive {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_LOCKFILE_NAME),
    };

    if raw.is_absolute() {
        raw
    } else {
        config_path
            .parent()
            .map(|dir| dir.join(&raw))
            .unwrap_or(raw)
    }
}

fn leading_directive_line(source: &str) -> Option<&str> {
    source
        .lines()
        .next()
        .filter(|line| line.starts_with(LOCKFILE_DIRECTIVE_PREFIX))
}

fn parse_blueprints(source: &str) -> Result<Vec<Blueprint>, ConfigError> {
    let value: serde_yaml::Value = serde_yaml::from_str(source).map_err(ConfigError::Parse)?;
    match value {
        serde_yaml::Value::Sequence(items) => {
            let mut blueprints = Vec::with_capacity(items.len());
            let mut errors = Vec::new();
            for (i, item) in items.into_iter().enumerate() {
                match serde_yaml::from_value::<Blueprint>(item) {
                    Ok(bp) => blueprints.push(bp),
                    Err(e) => errors.push(format!("blueprint #{i}: {e}")),
                }
            }
            if !errors.is_empty() {
                return Err(ConfigError::Schema(errors));
            }
            Ok(blueprints)
        }
        other => match serde_yaml::from_value::<Blueprint>(other) {
            Ok(bp) => Ok(vec![bp]),
            Err(e) => Err(ConfigError::Schema(vec![e.to_string()])),
        },
    }
}

fn validate_blueprint(blueprint: &Blueprint) -> Vec<String> {
    let mut errors = Vec::new();
    let prefix = format!("blueprint \"{}\"", blueprint.name);

    if blueprint.name.trim().is_empty() {
        errors.push(format!("{prefix}: `name` must not be empty"));
    }
    if blueprint.summary.trim().is_empty() {
        errors.push(format!("{prefix}: `summary` must not be empty"));
    }
    if blueprint.summary.contains('\n') {
        errors.push(format!("{prefix}: `summary` must be a single line"));
    }
    if blueprint.description.trim().is_empty() {
        errors.push(format!("{prefix}: `description` must not be empty"));
    }
    if blueprint.revision == 0 {
        errors.push(format!("{prefix}: `revision` must be a positive integer"));
    }

    let matrix_versions = blueprint.matrix.as_ref().and_then(|m| m.versions.as_ref());
    match (matrix_versions, &blueprint.version) {
        (Some(_), Some(_)) => errors.push(format!(
            "{prefix}: `version` and `matrix.versions` are mutually exclusive"
        )),
        (None, None) => errors.push(format!(
            "{prefix}: one of `version` or `matrix.versions` is required"
        )),
        _ => {}
    }

    if let Some(fetch) = &blueprint.fetch {
        if fetch.url().contains("{{target}}") || fetch.url().contains("{{ target }}") {
            let architectures = blueprint
                .matrix
                .as_ref()
                .and_then(|m| m.architectures.clone())
                .unwrap_or_else(|| vec![blueprint.architecture.clone()]);
            for architecture in architectures {
                if fetch.target_for(&architecture).is_none() {
                    errors.push(format!(
                        "{prefix}: fetch.url references {{{{target}}}} but `fetch.targets` has no entry for \"{architecture}\""
                    ));
                }
            }
        }
    }

    errors
}

/// Byte range of blueprint `index`'s YAML block within `source`.
fn blueprint_span(source: &str, index: usize) -> Option<(usize, usize)> {
    let lines: Vec<&str> = source.lines().collect();
    let body_start = lines
        .iter()
        .position(|line| !line.starts_with('#') && !line.trim().is_empty())?;

    let is_sequence = lines[body_start].trim_start().starts_with("- ");
    if !is_sequence {
        let start = line_byte_offset(source, body_start);
        return if index == 0 {
            Some((start, source.len()))
        } else {
            None
        };
    }

    let item_indent = lines[body_start].len() - lines[body_start].trim_start().len();
    let mut item_starts = Vec::new();
    for (i, line) in lines.iter().enumerate().skip(body_start) {
        let indent = line.len() - line.trim_start().len();
        if indent == item_indent && line.trim_start().starts_with("- ") {
            item_starts.push(i);
        }
    }

    let start_line = *item_starts.get(index)?;
    let end_line = item_starts.get(index + 1).copied().unwrap_or(lines.len());
    Some((line_byte_offset(source, start_line), line_byte_offset(source, end_line)))
}

fn line_byte_offset(source: &str, line_index: usize) -> usize {
    if line_index == 0 {
        return 0;
    }
    source
        .match_indices('\n')
        .nth(line_index - 1)
        .map(|(i, _)| i + 1)
        .unwrap_or(source.len())
}

/// Replace the scalar value of `field` within `span`, preserving the rest
/// of the document. Matches a line whose first non-`- ` token is
/// `field:`, at the indentation established by that blueprint's `name:`
/// line (so a same-named key nested under `fetch`/`install` isn't matched).
fn rewrite_scalar_field(source: &str, span: (usize, usize), field: &str, new_value: &str) -> Option<String> {
    let (start, end) = span;
    let block = &source[start..end];
    let baseline_indent = block.lines().find_map(|line| {
        let stripped = line.trim_start_matches("- ").trim_start();
        if stripped.starts_with("name:") {
            Some(key_column(line))
        } else {
            None
        }
    })?;

    let mut offset_in_block = 0usize;
    for line in block.split_inclusive('\n') {
        let bare = line.trim_end_matches('\n');
        let this_indent = key_column(bare);
        let trimmed = bare.trim_start_matches("- ").trim_start();
        if this_indent == baseline_indent && trimmed.starts_with(&format!("{field}:")) {
            let field_start = bare.find(&format!("{field}:")).unwrap();
            let value_start = field_start + field.len() + 1;
            let rest = &bare[value_start..];
            let (quote, comment) = split_value(rest);
            let new_line = format!(
                "{}{field}: {quote}{new_value}{quote}{}",
                &bare[..field_start],
                comment,
            );
            let abs_start = start + offset_in_block;
            let abs_line_end = abs_start + bare.len();
            let mut out = String::with_capacity(source.len());
            out.push_str(&source[..abs_start]);
            out.push_str(&new_line);
            out.push_str(&source[abs_line_end..]);
            return Some(out);
        }
        offset_in_block += line.len();
    }
    None
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// The column a line's first key starts at: past the leading indent, and
/// past a sequence item's `- ` marker if present, so a list item's `name:`
/// lines up with its siblings' (un-dashed) `version:`/`summary:` lines.
fn key_column(line: &str) -> usize {
    let leading = indent_of(line);
    let rest = &line[leading..];
    match rest.strip_prefix("- ") {
        Some(after) => leading + (rest.len() - after.len()),
        None => leading,
    }
}

/// Split `" 1.0.0  # note"` into (`quote char or ""`, `"  # note"`),
/// detecting whether the existing scalar was quoted so the replacement
/// keeps the same quoting style.
fn split_value(rest: &str) -> (&'static str, String) {
    let trimmed = rest.trim_start();
    let quote = if trimmed.starts_with('"') {
        "\""
    } else if trimmed.starts_with('\'') {
        "'"
    } else {
        ""
    };
    let comment = trimmed
        .rfind('#')
        .map(|i| format!("  {}", &trimmed[i..]))
        .unwrap_or_default();
    (quote, comment)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEQUENCE_DOC: &str = "# lockfile=custom.lock.yml\n\
- name: demo\n\
  version: 1.0.0\n\
  summary: hi\n\
  description: hi\n\
- name: other\n\
  version: 2.0.0 # pinned\n\
  summary: hi\n\
  description: hi\n";

    #[test]
    fn lockfile_directive_is_honoured() {
        let doc = ConfigDocument::parse(PathBuf::from("/tmp/ops2deb.yml"), SEQUENCE_DOC.to_string())
            .unwrap();
        assert_eq!(doc.lockfile_path, PathBuf::from("/tmp/custom.lock.yml"));
        assert_eq!(doc.blueprints.len(), 2);
    }

    #[test]
    fn default_lockfile_path_is_sibling() {
        let source = "name: demo\nversion: 1.0.0\nsummary: hi\ndescription: hi\n";
        let doc = ConfigDocument::parse(PathBuf::from("/tmp/ops2deb.yml"), source.to_string()).unwrap();
        assert_eq!(doc.lockfile_path, PathBuf::from("/tmp/ops2deb.lock.yml"));
    }

    #[test]
    fn version_and_matrix_versions_conflict() {
        let source = "name: demo\nversion: 1.0.0\nsummary: hi\ndescription: hi\nmatrix:\n  versions: [\"1.0.0\"]\n";
        let err = ConfigDocument::parse(PathBuf::from("x.yml"), source.to_string()).unwrap_err();
        assert!(matches!(err, ConfigError::Schema(_)));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let source = "name: demo\nversion: 1.0.0\nsummary: hi\ndescription: hi\nbogus: true\n";
        let err = ConfigDocument::parse(PathBuf::from("x.yml"), source.to_string()).unwrap_err();
        assert!(matches!(err, ConfigError::Schema(_)));
    }

    #[test]
    fn rewrite_version_preserves_surrounding_lines_and_comments() {
        let mut doc =
            ConfigDocument::parse(PathBuf::from("/tmp/ops2deb.yml"), SEQUENCE_DOC.to_string()).unwrap();
        doc.rewrite_version(1, "2.0.1").unwrap();
        assert!(doc.source.contains("version: 2.0.1 # pinned"));
        assert!(doc.source.contains("name: demo"));
        assert!(doc.source.contains("version: 1.0.0"));
        assert_eq!(doc.blueprints[1].version.as_deref(), Some("2.0.1"));
    }

    #[test]
    fn rewrite_version_on_single_mapping_document() {
        let source = "name: demo\nversion: 1.0.0\nsummary: hi\ndescription: hi\n";
        let mut doc = ConfigDocument::parse(PathBuf::from("x.yml"), source.to_string()).unwrap();
        doc.rewrite_version(0, "1.2.3").unwrap();
        assert_eq!(doc.source, "name: demo\nversion: 1.2.3\nsummary: hi\ndescription: hi\n");
    }
}
