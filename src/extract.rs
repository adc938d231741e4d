use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use flate2::read::GzDecoder;
use serde::Deserialize;
use tar::Archive;
use tracing::debug;
use walkdir::WalkDir;
use xz2::read::XzDecoder;
use zip::ZipArchive;
use crate::error::{InstallError, StageResult};
use crate::util::is_executable;

/// Packaging of a downloaded artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ArchiveKind {
    #[serde(rename = "tar.gz")]
    TarGz,
    #[serde(rename = "tar.xz")]
    TarXz,
    #[serde(rename = "zip")]
    Zip,
    /// The artifact is the executable itself.
    #[serde(rename = "raw")]
    Raw,
}

impl ArchiveKind {
    /// Guesses the kind from a file name; anything unrecognised is raw.
    pub fn infer(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            ArchiveKind::TarGz
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            ArchiveKind::TarXz
        } else if name.ends_with(".zip") {
            ArchiveKind::Zip
        } else {
            ArchiveKind::Raw
        }
    }
}

/// Unpacks `archive` into `dest`, which must exist.
///
/// Failures here mean the archive itself is unreadable; a readable archive
/// that lacks the expected binary is reported later by [`locate_binary`].
pub fn unpack(archive: &Path, kind: ArchiveKind, dest: &Path) -> StageResult<()> {
    let failed = |reason: String| InstallError::Extraction {
        archive: archive.display().to_string(),
        reason,
    };
    debug!(archive = %archive.display(), ?kind, dest = %dest.display(), "unpacking");
    let file = File::open(archive).map_err(|e| failed(e.to_string()))?;
    match kind {
        ArchiveKind::TarGz => Archive::new(GzDecoder::new(file))
            .unpack(dest)
            .map_err(|e| failed(e.to_string())),
        ArchiveKind::TarXz => Archive::new(XzDecoder::new(file))
            .unpack(dest)
            .map_err(|e| failed(e.to_string())),
        ArchiveKind::Zip => unpack_zip(file, dest).map_err(|e| failed(e.to_string())),
        ArchiveKind::Raw => {
            let target = dest.join(archive.file_name().unwrap_or_default());
            fs::copy(archive, &target).map_err(|e| failed(e.to_string()))?;
            Ok(())
        }
    }
}

fn unpack_zip(file: File, dest: &Path) -> anyhow::Result<()> {
    let mut archive = ZipArchive::new(file)?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        // Entries escaping the destination are skipped.
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let out_path = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;
        fs::write(&out_path, &content)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out_path, fs::Permissions::from_mode(mode))?;
        }
    }
    Ok(())
}

/// Finds the executable inside an unpacked tree.
///
/// With `exact` the binary must sit at that relative path. Otherwise the
/// tree is searched recursively for a file named `binary`, preferring the
/// shallowest executable match so versioned subdirectories are found.
pub fn locate_binary(
    root: &Path,
    binary: &str,
    exact: Option<&str>,
    archive_name: &str,
) -> StageResult<PathBuf> {
    let not_found = || InstallError::BinaryNotFound {
        binary: exact.unwrap_or(binary).to_string(),
        archive: archive_name.to_string(),
    };
    if let Some(exact) = exact {
        let candidate = root.join(exact);
        return if candidate.is_file() {
            Ok(candidate)
        } else {
            Err(not_found())
        };
    }
    let mut candidates: Vec<(usize, bool, PathBuf)> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == binary)
        .map(|entry| (entry.depth(), !is_executable(entry.path()), entry.into_path()))
        .collect();
    candidates.sort();
    candidates
        .into_iter()
        .next()
        .map(|(_, _, path)| path)
        .ok_or_else(not_found)
}

/// Finds the directory that holds `relative` (e.g. `bin/go`) so the whole
/// tree can be installed. Archives usually wrap their tree in one top-level
/// directory, so `root` and its immediate children are checked.
pub fn locate_tree(root: &Path, relative: &str, archive_name: &str) -> StageResult<PathBuf> {
    if root.join(relative).is_file() {
        return Ok(root.to_path_buf());
    }
    let entries = fs::read_dir(root).map_err(|e| InstallError::Extraction {
        archive: archive_name.to_string(),
        reason: e.to_string(),
    })?;
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        if path.is_dir() && path.join(relative).is_file() {
            return Ok(path);
        }
    }
    Err(InstallError::BinaryNotFound {
        binary: relative.to_string(),
        archive: archive_name.to_string(),
    })
}

/// Copies a directory tree, keeping permissions and relative symlinks.
pub fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dest.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(link, &target)?;
            #[cfg(windows)]
            std::os::windows::fs::symlink_file(link, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::tempdir;

    fn tar_with<W: Write>(writer: W, entries: &[(&str, &[u8], u32)]) -> W {
        let mut builder = tar::Builder::new(writer);
        for (name, content, mode) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(*mode);
            header.set_cksum();
            builder.append_data(&mut header, name, *content).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn tar_gz_with(path: &Path, entries: &[(&str, &[u8], u32)]) {
        let file = File::create(path).unwrap();
        tar_with(GzEncoder::new(file, Compression::default()), entries)
            .finish()
            .unwrap();
    }

    #[test]
    fn test_infer_kind() {
        assert_eq!(ArchiveKind::infer("k9s_Linux_amd64.tar.gz"), ArchiveKind::TarGz);
        assert_eq!(ArchiveKind::infer("x.TGZ"), ArchiveKind::TarGz);
        assert_eq!(ArchiveKind::infer("shellcheck-v0.10.0.linux.x86_64.tar.xz"), ArchiveKind::TarXz);
        assert_eq!(ArchiveKind::infer("deno-x86_64-unknown-linux-gnu.zip"), ArchiveKind::Zip);
        assert_eq!(ArchiveKind::infer("yq_linux_amd64"), ArchiveKind::Raw);
    }

    #[test]
    fn test_tar_gz_nested_binary_is_found() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("tool.tar.gz");
        tar_gz_with(
            &archive,
            &[
                ("tool-1.0/README.md", &b"readme"[..], 0o644),
                ("tool-1.0/bin/tool", &b"#!/bin/sh\necho 1.0\n"[..], 0o755),
            ],
        );
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        unpack(&archive, ArchiveKind::TarGz, &out).unwrap();
        let found = locate_binary(&out, "tool", None, "tool.tar.gz").unwrap();
        assert_eq!(found, out.join("tool-1.0/bin/tool"));
    }

    #[test]
    fn test_missing_binary_differs_from_corrupt_archive() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("tool.tar.gz");
        tar_gz_with(&archive, &[("other", &b"x"[..], 0o755)]);
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        unpack(&archive, ArchiveKind::TarGz, &out).unwrap();
        let err = locate_binary(&out, "tool", None, "tool.tar.gz").unwrap_err();
        assert!(matches!(err, InstallError::BinaryNotFound { .. }));

        let corrupt = dir.path().join("corrupt.tar.gz");
        fs::write(&corrupt, b"definitely not gzip").unwrap();
        let err = unpack(&corrupt, ArchiveKind::TarGz, &out).unwrap_err();
        assert!(matches!(err, InstallError::Extraction { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_tar_xz_keeps_modes() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let archive = dir.path().join("shellcheck-v0.10.0.linux.x86_64.tar.xz");
        let file = File::create(&archive).unwrap();
        tar_with(
            xz2::write::XzEncoder::new(file, 6),
            &[
                ("shellcheck-v0.10.0/README.txt", &b"readme"[..], 0o644),
                ("shellcheck-v0.10.0/shellcheck", &b"#!/bin/sh
echo 0.10.0
"[..], 0o755),
            ],
        )
        .finish()
        .unwrap();

        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        unpack(&archive, ArchiveKind::infer("shellcheck-v0.10.0.linux.x86_64.tar.xz"), &out).unwrap();
        let found = locate_binary(&out, "shellcheck", None, "shellcheck.tar.xz").unwrap();
        assert_eq!(found, out.join("shellcheck-v0.10.0/shellcheck"));
        assert_eq!(fs::metadata(&found).unwrap().permissions().mode() & 0o100, 0o100);

        let corrupt = dir.path().join("corrupt.tar.xz");
        fs::write(&corrupt, b"not xz").unwrap();
        let err = unpack(&corrupt, ArchiveKind::TarXz, &out).unwrap_err();
        assert!(matches!(err, InstallError::Extraction { .. }));
    }

    #[test]
    fn test_zip_with_exact_path() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("protoc.zip");
        let mut writer = zip::ZipWriter::new(File::create(&archive).unwrap());
        let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
        writer.start_file("bin/protoc", options).unwrap();
        writer.write_all(b"binary").unwrap();
        writer.start_file("include/google/any.proto", options).unwrap();
        writer.write_all(b"syntax").unwrap();
        writer.finish().unwrap();

        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        unpack(&archive, ArchiveKind::Zip, &out).unwrap();
        let found = locate_binary(&out, "protoc", Some("bin/protoc"), "protoc.zip").unwrap();
        assert_eq!(fs::read(found).unwrap(), b"binary");
        assert_eq!(locate_tree(&out, "bin/protoc", "protoc.zip").unwrap(), out);
    }

    #[test]
    fn test_locate_tree_under_top_level_dir() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("go/bin")).unwrap();
        fs::write(dir.path().join("go/bin/go"), b"go").unwrap();
        assert_eq!(
            locate_tree(dir.path(), "bin/go", "go.tar.gz").unwrap(),
            dir.path().join("go")
        );
        assert!(locate_tree(dir.path(), "bin/gofmt", "go.tar.gz").is_err());
    }

    #[test]
    fn test_raw_is_copied() {
        let dir = tempdir().unwrap();
        let raw = dir.path().join("yq_linux_amd64");
        fs::write(&raw, b"yq").unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        unpack(&raw, ArchiveKind::Raw, &out).unwrap();
        assert!(out.join("yq_linux_amd64").is_file());
    }
}
