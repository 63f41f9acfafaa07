//! Generates `<output>/<name>_<version>_<architecture>/` for one rendered
//! blueprint: the `src/` staging payload plus the `debian/` metadata files
//! (§4.5).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::RenderedBlueprint;
use crate::debian;
use crate::session::Session;
use crate::template::{render, TemplateContext, TemplateError};

/// Errors raised while generating a source tree.
#[derive(Debug)]
pub enum SourceTreeError {
    /// Filesystem operations failed.
    Io(std::io::Error),
    /// An install entry or script line failed to render.
    Template(TemplateError),
    /// A `script` command exited non-zero.
    Script(crate::session::Error),
    /// An `install` entry named a source that doesn't exist in the staging
    /// tree yet (e.g. `fetch` wasn't set and no prior entry created it).
    MissingSource(String),
}

impl std::fmt::Display for SourceTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SourceTreeError::Io(e) => write!(f, "source tree I/O error: {e}"),
            SourceTreeError::Template(e) => write!(f, "{e}"),
            SourceTreeError::Script(e) => write!(f, "script failed: {e}"),
            SourceTreeError::MissingSource(path) => {
                write!(f, "install entry references missing source \"{path}\"")
            }
        }
    }
}

impl std::error::Error for SourceTreeError {}

impl From<std::io::Error> for SourceTreeError {
    fn from(e: std::io::Error) -> Self {
        SourceTreeError::Io(e)
    }
}

impl From<TemplateError> for SourceTreeError {
    fn from(e: TemplateError) -> Self {
        SourceTreeError::Template(e)
    }
}

/// A generated source tree's layout, returned so the builder (§4.6) knows
/// where to find the staged payload and the rendered control text.
pub struct GeneratedTree {
    /// Root directory: `<output>/<name>_<version>_<architecture>/`.
    pub root: PathBuf,
    /// `root/src`, the staged payload that becomes `data.tar.zst`.
    pub staged_root: PathBuf,
    /// Rendered `debian/control` contents.
    pub control_text: String,
}

/// Build the source tree for `rendered` under `output_dir`, using
/// `extracted_source` (the fetcher's cache extraction, if `fetch` was set)
/// and running `script` entries through `session`.
pub fn generate(
    rendered: &RenderedBlueprint,
    output_dir: &Path,
    extracted_source: Option<&Path>,
    session: &dyn Session,
) -> Result<GeneratedTree, SourceTreeError> {
    let root = output_dir.join(format!(
        "{}_{}_{}",
        rendered.name, rendered.version, rendered.architecture
    ));
    if root.exists() {
        std::fs::remove_dir_all(&root)?;
    }
    let staged_root = root.join("src");
    std::fs::create_dir_all(&staged_root)?;

    if let Some(extracted) = extracted_source {
        fs_extra::dir::copy(extracted, &staged_root, &recursive_copy_options())
            .map_err(|e| SourceTreeError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
    }

    let ctx = rendered
        .base_template_context()
        .map_err(|_| TemplateError::InvalidExpression("rendered blueprint context".to_string()))?
        .with("src", staged_root.to_string_lossy().into_owned());

    apply_install_entries(rendered, &staged_root, &ctx)?;
    run_scripts(rendered, &root, &staged_root, &ctx, session)?;

    let control_text = debian::Control::new(rendered).to_string();
    std::fs::create_dir_all(root.join("debian"))?;
    std::fs::write(root.join("debian/control"), &control_text)?;
    std::fs::write(
        root.join("debian/changelog"),
        debian::Changelog::new(rendered, chrono::Utc::now()).to_string(),
    )?;
    std::fs::write(root.join("debian/rules"), debian::rules(false))?;
    let mut perms = std::fs::metadata(root.join("debian/rules"))?.permissions();
    set_executable(&mut perms);
    std::fs::set_permissions(root.join("debian/rules"), perms)?;

    let listing = staged_files_relative(&staged_root)?;
    std::fs::write(root.join("debian/install"), debian::install_listing(&listing))?;
    std::fs::write(
        root.join("debian/copyright"),
        debian::copyright(&rendered.name, rendered.fetch_url.as_deref()),
    )?;

    Ok(GeneratedTree {
        root,
        staged_root,
        control_text,
    })
}

#[cfg(unix)]
fn set_executable(perms: &mut std::fs::Permissions) {
    use std::os::unix::fs::PermissionsExt;
    perms.set_mode(0o755);
}

#[cfg(not(unix))]
fn set_executable(_perms: &mut std::fs::Permissions) {}

fn apply_install_entries(
    rendered: &RenderedBlueprint,
    staged_root: &Path,
    ctx: &TemplateContext,
) -> Result<(), SourceTreeError> {
    use crate::config::blueprint::InstallEntry;

    for entry in &rendered.install {
        match entry {
            InstallEntry::Spec(spec) => {
                let spec = render(spec, ctx)?;
                if let Some(dir) = spec.strip_suffix('/') {
                    let source = staged_root.join(dir);
                    if !source.exists() {
                        return Err(SourceTreeError::MissingSource(dir.to_string()));
                    }
                    let dest = staged_root.join(dir);
                    std::fs::create_dir_all(&dest)?;
                    copy_recursive(&source, &dest)?;
                } else {
                    let (source, dest) = spec
                        .split_once(':')
                        .ok_or_else(|| SourceTreeError::MissingSource(spec.clone()))?;
                    let source_path = staged_root.join(source);
                    if !source_path.exists() {
                        return Err(SourceTreeError::MissingSource(source.to_string()));
                    }
                    let dest_path = strip_and_join(staged_root, dest);
                    if let Some(parent) = dest_path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::copy(&source_path, &dest_path)?;
                }
            }
            InstallEntry::Content { path, content } => {
                let path = render(path, ctx)?;
                let content = render(content, ctx)?;
                let dest_path = strip_and_join(staged_root, &path);
                if let Some(parent) = dest_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&dest_path, content)?;
                let mut perms = std::fs::metadata(&dest_path)?.permissions();
                set_mode_0644(&mut perms);
                std::fs::set_permissions(&dest_path, perms)?;
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode_0644(perms: &mut std::fs::Permissions) {
    use std::os::unix::fs::PermissionsExt;
    perms.set_mode(0o644);
}

#[cfg(not(unix))]
fn set_mode_0644(_perms: &mut std::fs::Permissions) {}

fn strip_and_join(staged_root: &Path, dest: &str) -> PathBuf {
    staged_root.join(dest.trim_start_matches('/'))
}

fn recursive_copy_options() -> fs_extra::dir::CopyOptions {
    let mut options = fs_extra::dir::CopyOptions::new();
    options.content_only = true;
    options.overwrite = true;
    options
}

fn copy_recursive(source: &Path, dest: &Path) -> std::io::Result<()> {
    fs_extra::dir::copy(source, dest, &recursive_copy_options())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    Ok(())
}

fn run_scripts(
    rendered: &RenderedBlueprint,
    run_dir: &Path,
    staged_root: &Path,
    ctx: &TemplateContext,
    session: &dyn Session,
) -> Result<(), SourceTreeError> {
    for command in &rendered.script {
        let command = render(command, ctx)?;
        let mut env = HashMap::new();
        env.insert("src".to_string(), staged_root.to_string_lossy().into_owned());
        session
            .check_call(&["sh", "-c", &command], Some(run_dir), Some(&env))
            .map_err(SourceTreeError::Script)?;
    }
    Ok(())
}

fn staged_files_relative(staged_root: &Path) -> std::io::Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(staged_root) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() {
            let relative = entry
                .path()
                .strip_prefix(staged_root)
                .expect("walkdir yields paths under the root it was given");
            files.push(relative.to_string_lossy().into_owned());
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::PlainSession;

    fn rendered_with(install: Vec<crate::config::blueprint::InstallEntry>, script: Vec<String>) -> RenderedBlueprint {
        RenderedBlueprint {
            blueprint_index: 0,
            name: "demo".to_string(),
            version: "1.0.0".to_string(),
            architecture: "amd64".to_string(),
            revision: 1,
            epoch: 0,
            homepage: None,
            summary: "s".to_string(),
            description: "d".to_string(),
            depends: vec![],
            recommends: vec![],
            conflicts: vec![],
            fetch_url: None,
            install,
            script,
        }
    }

    #[test]
    fn generates_control_and_script_output() {
        let output_dir = tempfile::tempdir().unwrap();
        let rendered = rendered_with(
            vec![],
            vec!["mkdir -p {{src}}/usr/share/demo && echo ok > {{src}}/usr/share/demo/readme".to_string()],
        );
        let session = PlainSession::new();
        let tree = generate(&rendered, output_dir.path(), None, &session).unwrap();

        assert!(tree.control_text.contains("Package: demo"));
        assert!(tree.control_text.contains("Architecture: amd64"));
        let readme = std::fs::read_to_string(tree.staged_root.join("usr/share/demo/readme")).unwrap();
        assert_eq!(readme, "ok\n");
    }

    #[test]
    fn content_install_entry_writes_a_file() {
        let output_dir = tempfile::tempdir().unwrap();
        let rendered = rendered_with(
            vec![crate::config::blueprint::InstallEntry::Content {
                path: "usr/share/demo/hi.txt".to_string(),
                content: "hello\n".to_string(),
            }],
            vec![],
        );
        let session = PlainSession::new();
        let tree = generate(&rendered, output_dir.path(), None, &session).unwrap();
        let content = std::fs::read_to_string(tree.staged_root.join("usr/share/demo/hi.txt")).unwrap();
        assert_eq!(content, "hello\n");
    }

    #[test]
    fn debian_install_lists_every_staged_file() {
        let output_dir = tempfile::tempdir().unwrap();
        let rendered = rendered_with(
            vec![crate::config::blueprint::InstallEntry::Content {
                path: "usr/bin/demo".to_string(),
                content: "bin\n".to_string(),
            }],
            vec![],
        );
        let session = PlainSession::new();
        let tree = generate(&rendered, output_dir.path(), None, &session).unwrap();
        let listing = std::fs::read_to_string(tree.root.join("debian/install")).unwrap();
        assert_eq!(listing, "src/usr/bin/demo /usr/bin/demo\n");
    }
}
