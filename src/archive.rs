//! Archive format detection and extraction (§4.4 steps d/4).
//!
//! Each recognised format is unpacked into a destination directory that
//! the caller has already prepared as a private staging area; this module
//! never decides where things get published, only how bytes on disk
//! become a directory tree.

use std::io::Read;
use std::path::{Path, PathBuf};

/// Errors raised while detecting or extracting an archive.
#[derive(Debug)]
pub enum ArchiveError {
    /// The extension didn't match any recognised format.
    UnsupportedFormat(String),
    /// An entry's symlink target pointed outside the extraction root.
    UnsafeSymlink(PathBuf),
    /// The archive was malformed or truncated.
    Corrupt(String),
    /// Reading or writing to disk failed.
    Io(std::io::Error),
}

impl std::fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ArchiveError::UnsupportedFormat(ext) => write!(f, "unsupported archive format: {ext}"),
            ArchiveError::UnsafeSymlink(path) => {
                write!(f, "archive symlink escapes extraction root: {}", path.display())
            }
            ArchiveError::Corrupt(msg) => write!(f, "corrupt archive: {msg}"),
            ArchiveError::Io(e) => write!(f, "archive I/O error: {e}"),
        }
    }
}

impl std::error::Error for ArchiveError {}

impl From<std::io::Error> for ArchiveError {
    fn from(e: std::io::Error) -> Self {
        ArchiveError::Io(e)
    }
}

/// The archive kind inferred from a URL or file name's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Uncompressed `.tar`.
    Tar,
    /// Gzip-compressed tar (`.tar.gz`/`.tgz`).
    TarGz,
    /// XZ-compressed tar (`.tar.xz`).
    TarXz,
    /// Bzip2-compressed tar (`.tar.bz2`) — detected but not extractable;
    /// no bzip2 decoder is in the dependency stack (documented gap).
    TarBz2,
    /// `.zip`.
    Zip,
    /// A Debian binary package, extracted via its inner `data.tar.*`.
    Deb,
}

/// Infer the archive kind from a file name, or `None` if it isn't a
/// recognised archive (the fetcher then just stores the plain file).
pub fn detect(file_name: &str) -> Option<Kind> {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        Some(Kind::TarGz)
    } else if lower.ends_with(".tar.xz") {
        Some(Kind::TarXz)
    } else if lower.ends_with(".tar.bz2") {
        Some(Kind::TarBz2)
    } else if lower.ends_with(".tar") {
        Some(Kind::Tar)
    } else if lower.ends_with(".zip") {
        Some(Kind::Zip)
    } else if lower.ends_with(".deb") {
        Some(Kind::Deb)
    } else {
        None
    }
}

/// Extract `file` (of format `kind`) into `dest`, which must already exist
/// and be empty.
pub fn extract(kind: Kind, file: &Path, dest: &Path) -> Result<(), ArchiveError> {
    match kind {
        Kind::Tar => extract_tar(std::fs::File::open(file)?, dest),
        Kind::TarGz => extract_tar(flate2::read::GzDecoder::new(std::fs::File::open(file)?), dest),
        Kind::TarXz => {
            let mut compressed = std::fs::File::open(file)?;
            let mut decompressed = Vec::new();
            lzma_rs::xz_decompress(&mut compressed, &mut decompressed)
                .map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
            extract_tar(std::io::Cursor::new(decompressed), dest)
        }
        Kind::TarBz2 => Err(ArchiveError::UnsupportedFormat(
            "tar.bz2 (no bzip2 decoder in the dependency stack)".to_string(),
        )),
        Kind::Zip => extract_zip(file, dest),
        Kind::Deb => extract_deb(file, dest),
    }
}

fn extract_tar(reader: impl Read, dest: &Path) -> Result<(), ArchiveError> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_type = entry.header().entry_type();
        if entry_type.is_symlink() || entry_type.is_hard_link() {
            if let Some(link_name) = entry.link_name()? {
                if link_name.is_absolute() {
                    return Err(ArchiveError::UnsafeSymlink(link_name.into_owned()));
                }
            }
        }
        entry.unpack_in(dest)?;
    }
    Ok(())
}

fn extract_zip(file: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let mut zip = zip::ZipArchive::new(std::fs::File::open(file)?)
        .map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
        let out_path = match entry.enclosed_name() {
            Some(path) => dest.join(path),
            None => return Err(ArchiveError::UnsafeSymlink(PathBuf::from(entry.name()))),
        };
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out_file = std::fs::File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out_file)?;
        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode))?;
        }
    }
    Ok(())
}

/// Extract the inner `data.tar.*` member of a `.deb` (an `ar` archive
/// containing `debian-binary`, `control.tar.*` and `data.tar.*`).
fn extract_deb(file: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let mut ar = ar::Archive::new(std::fs::File::open(file)?);
    while let Some(entry) = ar.next_entry() {
        let mut entry = entry.map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
        let name = String::from_utf8_lossy(entry.header().identifier()).into_owned();
        if !name.starts_with("data.tar") {
            continue;
        }
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;
        return if name.ends_with(".gz") {
            extract_tar(flate2::read::GzDecoder::new(std::io::Cursor::new(bytes)), dest)
        } else if name.ends_with(".xz") {
            let mut decompressed = Vec::new();
            lzma_rs::xz_decompress(&mut std::io::Cursor::new(bytes), &mut decompressed)
                .map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
            extract_tar(std::io::Cursor::new(decompressed), dest)
        } else if name.ends_with(".zst") {
            let decompressed =
                zstd::stream::decode_all(std::io::Cursor::new(bytes)).map_err(ArchiveError::Io)?;
            extract_tar(std::io::Cursor::new(decompressed), dest)
        } else {
            extract_tar(std::io::Cursor::new(bytes), dest)
        };
    }
    Err(ArchiveError::Corrupt(
        "no data.tar.* member found in .deb".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_known_extensions() {
        assert_eq!(detect("foo-1.0.0.tar.gz"), Some(Kind::TarGz));
        assert_eq!(detect("foo.tgz"), Some(Kind::TarGz));
        assert_eq!(detect("foo.tar.xz"), Some(Kind::TarXz));
        assert_eq!(detect("foo.tar.bz2"), Some(Kind::TarBz2));
        assert_eq!(detect("foo.tar"), Some(Kind::Tar));
        assert_eq!(detect("foo.zip"), Some(Kind::Zip));
        assert_eq!(detect("foo_1.0.0_amd64.deb"), Some(Kind::Deb));
        assert_eq!(detect("foo.bin"), None);
    }

    #[test]
    fn extract_plain_tar_round_trips_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let tar_path = dir.path().join("a.tar");
        {
            let file = std::fs::File::create(&tar_path).unwrap();
            let mut builder = tar::Builder::new(file);
            let data = b"hello";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_cksum();
            builder.append_data(&mut header, "hello.txt", &data[..]).unwrap();
            builder.finish().unwrap();
        }

        let dest = dir.path().join("out");
        std::fs::create_dir_all(&dest).unwrap();
        extract(Kind::Tar, &tar_path, &dest).unwrap();
        assert_eq!(std::fs::read(dest.join("hello.txt")).unwrap(), b"hello");
    }

    #[test]
    fn tar_bz2_is_an_explicit_unsupported_format() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("a.tar.bz2");
        std::fs::write(&fake, b"not really bzip2").unwrap();
        let dest = dir.path().join("out");
        std::fs::create_dir_all(&dest).unwrap();
        let err = extract(Kind::TarBz2, &fake, &dest).unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedFormat(_)));
    }
}
