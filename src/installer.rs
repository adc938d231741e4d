use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};
use crate::config::InstallSettings;
use crate::error::{InstallError, StageResult};
use crate::extract::copy_tree;
use crate::util::expand_path;

/// Where a descriptor allows its tool to be installed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    User,
    System,
    /// System scope when privileged, user scope otherwise.
    #[default]
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    User,
    System,
}

/// Install locations, resolved once per invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallScope {
    pub scope: Scope,
    /// Directory that receives executables and stable symlinks.
    pub bin_dir: PathBuf,
    /// Root of versioned tool trees.
    pub tools_dir: PathBuf,
    /// Running as root; placed files are chowned to `0:0`.
    pub privileged: bool,
}

impl InstallScope {
    /// An explicit `install_dir` always wins and needs no privilege check;
    /// otherwise the descriptor's mode decides.
    pub fn resolve(
        tool: &str,
        mode: InstallMode,
        install_dir: Option<&Path>,
        privileged: bool,
        settings: &InstallSettings,
    ) -> Result<Self> {
        let scope = match (install_dir, mode) {
            (Some(_), _) | (None, InstallMode::Auto) => {
                if privileged {
                    Scope::System
                } else {
                    Scope::User
                }
            }
            (None, InstallMode::System) if !privileged => {
                return Err(InstallError::InsufficientPrivilege {
                    tool: tool.to_string(),
                }
                .into());
            }
            (None, InstallMode::System) => Scope::System,
            (None, InstallMode::User) => Scope::User,
        };
        let bin_dir = match (install_dir, scope) {
            (Some(dir), _) => dir.to_path_buf(),
            (None, Scope::User) => expand_path(&settings.user_bin_dir)?,
            (None, Scope::System) => expand_path(&settings.system_bin_dir)?,
        };
        let tools_dir = match (&settings.tools_dir, scope) {
            (Some(dir), _) => expand_path(dir)?,
            (None, Scope::User) => expand_path("~/.local/share/toolstall/tools")?,
            (None, Scope::System) => PathBuf::from("/usr/local/lib/toolstall"),
        };
        // Relative directories would end up verbatim in profile PATH lines.
        let bin_dir = absolute(&bin_dir)?;
        let tools_dir = absolute(&tools_dir)?;
        // Ownership only changes when we are root installing system-wide.
        let privileged = privileged && scope == Scope::System;
        debug!(?scope, bin_dir = %bin_dir.display(), "resolved install scope");
        Ok(Self {
            scope,
            bin_dir,
            tools_dir,
            privileged,
        })
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path)
        .with_context(|| format!("Could not resolve directory {}", path.display()))
}

/// Creates `path` and its parents.
pub fn ensure_dir(path: &Path) -> StageResult<()> {
    fs::create_dir_all(path).map_err(|source| InstallError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

fn write_err(path: &Path) -> impl FnOnce(io::Error) -> InstallError + '_ {
    move |source| InstallError::Write {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_root_owner(path: &Path) -> io::Result<()> {
    std::os::unix::fs::chown(path, Some(0), Some(0))
}

#[cfg(not(unix))]
fn set_root_owner(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Copies `src` to `<bin_dir>/<name>` with mode 0755.
///
/// The copy goes to a sibling temporary name first and is renamed into place,
/// so a running copy of the old binary is never overwritten in place.
pub fn place_binary(src: &Path, scope: &InstallScope, name: &str) -> StageResult<PathBuf> {
    ensure_dir(&scope.bin_dir)?;
    let dest = scope.bin_dir.join(name);
    let staging = scope.bin_dir.join(format!(".{name}.toolstall-tmp"));
    fs::copy(src, &staging).map_err(write_err(&staging))?;
    make_executable(&staging).map_err(write_err(&staging))?;
    if scope.privileged {
        set_root_owner(&staging).map_err(write_err(&staging))?;
    }
    if let Err(source) = fs::rename(&staging, &dest) {
        let _ = fs::remove_file(&staging);
        return Err(InstallError::Write { path: dest, source });
    }
    info!(path = %dest.display(), "installed binary");
    Ok(dest)
}

/// Points `link` at `target`.
///
/// An existing symlink is replaced. Anything else at `link` is left alone and
/// reported as [`InstallError::NotASymlink`].
pub fn replace_symlink(target: &Path, link: &Path) -> StageResult<()> {
    match fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_symlink() => {
            debug!(link = %link.display(), "replacing existing symlink");
            fs::remove_file(link).map_err(write_err(link))?;
        }
        Ok(_) => {
            return Err(InstallError::NotASymlink {
                path: link.to_path_buf(),
            });
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(write_err(link)(e)),
    }
    #[cfg(unix)]
    std::os::unix::fs::symlink(target, link).map_err(write_err(link))?;
    #[cfg(windows)]
    std::os::windows::fs::symlink_file(target, link).map_err(write_err(link))?;
    Ok(())
}

/// Installs a whole tree under `<tools_dir>/<tool>/<version>` and links each
/// of `bins` (relative to the tree) into the bin directory.
///
/// Returns the link paths in the order of `bins`.
pub fn install_tree(
    tree: &Path,
    scope: &InstallScope,
    tool: &str,
    version: &str,
    bins: &[String],
) -> StageResult<Vec<PathBuf>> {
    let dest = scope.tools_dir.join(tool).join(version);
    if dest.exists() {
        fs::remove_dir_all(&dest).map_err(write_err(&dest))?;
    }
    ensure_dir(&dest)?;
    copy_tree(tree, &dest).map_err(write_err(&dest))?;
    if scope.privileged {
        for entry in walkdir::WalkDir::new(&dest).into_iter().filter_map(|e| e.ok()) {
            set_root_owner(entry.path()).map_err(write_err(entry.path()))?;
        }
    }
    info!(path = %dest.display(), "installed tree");

    ensure_dir(&scope.bin_dir)?;
    let mut links = Vec::with_capacity(bins.len());
    for bin in bins {
        let target = dest.join(bin);
        make_executable(&target).map_err(write_err(&target))?;
        let name = Path::new(bin).file_name().unwrap_or_else(|| OsStr::new(bin));
        let link = scope.bin_dir.join(name);
        replace_symlink(&target, &link)?;
        debug!(link = %link.display(), target = %target.display(), "linked");
        links.push(link);
    }
    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn user_scope(root: &Path) -> InstallScope {
        InstallScope {
            scope: Scope::User,
            bin_dir: root.join("bin"),
            tools_dir: root.join("tools"),
            privileged: false,
        }
    }

    #[test]
    fn test_resolve_explicit_dir_skips_privilege_check() {
        let settings = InstallSettings::default();
        let scope = InstallScope::resolve(
            "azd",
            InstallMode::System,
            Some(Path::new("/tmp/fakebin")),
            false,
            &settings,
        )
        .unwrap();
        assert_eq!(scope.scope, Scope::User);
        assert_eq!(scope.bin_dir, PathBuf::from("/tmp/fakebin"));
    }

    #[test]
    fn test_resolve_relative_dir_is_made_absolute() {
        let settings = InstallSettings::default();
        let scope = InstallScope::resolve("gh", InstallMode::Auto, Some(Path::new("relbin")), false, &settings)
            .unwrap();
        assert!(scope.bin_dir.is_absolute());
        assert_eq!(scope.bin_dir, std::env::current_dir().unwrap().join("relbin"));
    }

    #[test]
    fn test_resolve_system_without_privilege_fails() {
        let settings = InstallSettings::default();
        let err = InstallScope::resolve("azd", InstallMode::System, None, false, &settings)
            .unwrap_err();
        let err = err.downcast::<InstallError>().unwrap();
        assert!(matches!(err, InstallError::InsufficientPrivilege { .. }));
    }

    #[test]
    fn test_resolve_auto() {
        let settings = InstallSettings::default();
        let user = InstallScope::resolve("gh", InstallMode::Auto, None, false, &settings).unwrap();
        assert_eq!(user.scope, Scope::User);
        assert!(user.bin_dir.ends_with(".local/bin"));
        let system = InstallScope::resolve("gh", InstallMode::Auto, None, true, &settings).unwrap();
        assert_eq!(system.scope, Scope::System);
        assert_eq!(system.bin_dir, PathBuf::from("/usr/local/bin"));
        assert!(system.privileged);
    }

    #[test]
    fn test_place_binary_creates_dir_and_sets_mode() {
        let root = tempdir().unwrap();
        let src = root.path().join("src");
        fs::write(&src, b"#!/bin/sh\n").unwrap();
        let scope = user_scope(root.path());
        let dest = place_binary(&src, &scope, "tool").unwrap();
        assert_eq!(dest, root.path().join("bin/tool"));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&dest).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
        assert!(!root.path().join("bin/.tool.toolstall-tmp").exists());
        // Second placement overwrites.
        place_binary(&src, &scope, "tool").unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_existing_symlink_is_replaced() {
        let root = tempdir().unwrap();
        let old = root.path().join("old");
        let new = root.path().join("new");
        fs::write(&old, b"old").unwrap();
        fs::write(&new, b"new").unwrap();
        let link = root.path().join("link");
        std::os::unix::fs::symlink(&old, &link).unwrap();

        replace_symlink(&new, &link).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), new);
    }

    #[test]
    fn test_regular_file_is_not_overwritten() {
        let root = tempdir().unwrap();
        let target = root.path().join("target");
        fs::write(&target, b"target").unwrap();
        let link = root.path().join("link");
        fs::write(&link, b"user data").unwrap();

        let err = replace_symlink(&target, &link).unwrap_err();
        assert!(matches!(err, InstallError::NotASymlink { .. }));
        assert!(err.to_string().contains("exists and is not a symlink"));
        assert_eq!(fs::read(&link).unwrap(), b"user data");
    }

    #[cfg(unix)]
    #[test]
    fn test_install_tree_links_bins() {
        let root = tempdir().unwrap();
        let tree = root.path().join("go");
        fs::create_dir_all(tree.join("bin")).unwrap();
        fs::write(tree.join("bin/go"), b"go").unwrap();
        fs::write(tree.join("bin/gofmt"), b"gofmt").unwrap();
        let scope = user_scope(root.path());

        let bins = vec!["bin/go".to_string(), "bin/gofmt".to_string()];
        let links = install_tree(&tree, &scope, "go", "1.22.1", &bins).unwrap();
        assert_eq!(links[0], root.path().join("bin/go"));
        assert_eq!(
            fs::read_link(&links[0]).unwrap(),
            root.path().join("tools/go/1.22.1/bin/go")
        );

        // Reinstalling a new version moves the stable alias.
        install_tree(&tree, &scope, "go", "1.23.0", &bins).unwrap();
        assert_eq!(
            fs::read_link(&links[0]).unwrap(),
            root.path().join("tools/go/1.23.0/bin/go")
        );
    }
}
