//! In-process `.deb` assembly (§4.6 default build path), grounded on the
//! `ar`/`tar` wiring used by the pack's Debian deb-builder reference, but
//! walking a staged directory on disk instead of an in-memory file
//! manifest, and forcing `root:root` ownership on every `data.tar.zst`
//! member regardless of the invoking user.

use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use walkdir::WalkDir;

/// Errors raised while assembling a `.deb`.
#[derive(Debug)]
pub enum DebError {
    /// Reading the staged tree or writing the output file failed.
    Io(std::io::Error),
}

impl std::fmt::Display for DebError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DebError::Io(e) => write!(f, "failed to assemble .deb: {e}"),
        }
    }
}

impl std::error::Error for DebError {}

impl From<std::io::Error> for DebError {
    fn from(e: std::io::Error) -> Self {
        DebError::Io(e)
    }
}

/// Assemble a `.deb` at `output_path` from `control_text` (the full
/// `debian/control` contents) and the files under `staged_root` (the
/// package's `src/` payload, already laid out at its final install paths).
pub fn assemble(control_text: &str, staged_root: &Path, output_path: &Path) -> Result<(), DebError> {
    let data_tar = build_data_tar(staged_root)?;
    let md5sums = md5sums_for(staged_root)?;
    let control_tar = build_control_tar(control_text, &md5sums)?;

    let data_tar_zst = zstd::stream::encode_all(std::io::Cursor::new(data_tar), 0)?;
    let control_tar_zst = zstd::stream::encode_all(std::io::Cursor::new(control_tar), 0)?;

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(output_path)?;
    let mut ar_builder = ar::Builder::new(file);

    append_ar_member(&mut ar_builder, "debian-binary", b"2.0\n")?;
    append_ar_member(&mut ar_builder, "control.tar.zst", &control_tar_zst)?;
    append_ar_member(&mut ar_builder, "data.tar.zst", &data_tar_zst)?;

    Ok(())
}

fn append_ar_member<W: std::io::Write>(
    builder: &mut ar::Builder<W>,
    name: &str,
    data: &[u8],
) -> Result<(), DebError> {
    let mut header = ar::Header::new(name.as_bytes().to_vec(), data.len() as u64);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    builder.append(&header, data)?;
    Ok(())
}

/// One `md5sums` line per staged file, `<hex digest>  <path>\n`, sorted by
/// path for determinism (§4.6: "regenerating must yield byte-identical
/// outputs save for build timestamps").
fn md5sums_for(staged_root: &Path) -> Result<Vec<u8>, DebError> {
    let mut paths = staged_files(staged_root)?;
    paths.sort();

    let mut out = Vec::new();
    for relative in &paths {
        let bytes = std::fs::read(staged_root.join(relative))?;
        let digest = Md5::digest(&bytes);
        out.extend_from_slice(hex::encode(digest).as_bytes());
        out.extend_from_slice(b"  ");
        out.extend_from_slice(relative.to_string_lossy().as_bytes());
        out.push(b'\n');
    }
    Ok(out)
}

fn staged_files(staged_root: &Path) -> Result<Vec<PathBuf>, DebError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(staged_root) {
        let entry = entry.map_err(|e| DebError::Io(e.into()))?;
        if entry.file_type().is_file() {
            let relative = entry
                .path()
                .strip_prefix(staged_root)
                .expect("walkdir yields paths under the root it was given")
                .to_path_buf();
            files.push(relative);
        }
    }
    Ok(files)
}

fn build_control_tar(control_text: &str, md5sums: &[u8]) -> Result<Vec<u8>, DebError> {
    let mut builder = tar::Builder::new(Vec::new());
    append_root_owned_file(&mut builder, "control", control_text.as_bytes(), 0o644)?;
    append_root_owned_file(&mut builder, "md5sums", md5sums, 0o644)?;
    Ok(builder.into_inner()?)
}

fn build_data_tar(staged_root: &Path) -> Result<Vec<u8>, DebError> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut paths = staged_files(staged_root)?;
    paths.sort();

    for relative in &paths {
        let absolute = staged_root.join(relative);
        let bytes = std::fs::read(&absolute)?;
        let mode = file_mode(&absolute)?;
        let archive_path = format!("./{}", relative.display());
        append_root_owned_file(&mut builder, &archive_path, &bytes, mode)?;
    }
    Ok(builder.into_inner()?)
}

#[cfg(unix)]
fn file_mode(path: &Path) -> std::io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(std::fs::metadata(path)?.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> std::io::Result<u32> {
    Ok(0o644)
}

fn append_root_owned_file<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    name: &str,
    data: &[u8],
    mode: u32,
) -> Result<(), DebError> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(mode);
    header.set_uid(0);
    header.set_gid(0);
    header.set_username("root").ok();
    header.set_groupname("root").ok();
    header.set_cksum();
    builder.append_data(&mut header, name, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembled_deb_has_the_three_mandated_members_in_order() {
        let staging = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(staging.path().join("usr/bin")).unwrap();
        std::fs::write(staging.path().join("usr/bin/demo"), b"#!/bin/sh\necho hi\n").unwrap();

        let output_dir = tempfile::tempdir().unwrap();
        let output_path = output_dir.path().join("demo_1.0.0_amd64.deb");
        assemble("Package: demo\n", staging.path(), &output_path).unwrap();

        let mut archive = ar::Archive::new(std::fs::File::open(&output_path).unwrap());
        let names: Vec<String> = std::iter::from_fn(|| archive.next_entry())
            .map(|entry| {
                String::from_utf8_lossy(entry.unwrap().header().identifier()).into_owned()
            })
            .collect();
        assert_eq!(names, vec!["debian-binary", "control.tar.zst", "data.tar.zst"]);
    }

    #[test]
    fn md5sums_lists_every_staged_file_sorted() {
        let staging = tempfile::tempdir().unwrap();
        std::fs::write(staging.path().join("b.txt"), b"b").unwrap();
        std::fs::write(staging.path().join("a.txt"), b"a").unwrap();

        let sums = String::from_utf8(md5sums_for(staging.path()).unwrap()).unwrap();
        let lines: Vec<&str> = sums.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("a.txt"));
        assert!(lines[1].ends_with("b.txt"));
    }
}
