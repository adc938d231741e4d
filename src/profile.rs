use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use crate::error::{InstallError, StageResult};

/// Profile created when none of the configured ones exist.
pub const FALLBACK_PROFILE: &str = ".profile";

/// The shell line that puts `bin_dir` on PATH.
pub fn path_export_line(bin_dir: &Path) -> String {
    format!("export PATH=\"{}:$PATH\"", bin_dir.display())
}

/// Appends `line` to `profile` unless an identical line is already present.
///
/// Returns whether the file changed. A missing file is created.
pub fn ensure_line(profile: &Path, line: &str) -> io::Result<bool> {
    let existing = match fs::read_to_string(profile) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };
    if existing.lines().any(|l| l.trim() == line.trim()) {
        debug!(profile = %profile.display(), "line already present");
        return Ok(false);
    }
    let mut file = OpenOptions::new().create(true).append(true).open(profile)?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "{line}")?;
    Ok(true)
}

/// Adds `lines` to every configured profile under `home` that exists, or to
/// `~/.profile` when none do. Returns the profiles that were modified.
pub fn update_profiles(home: &Path, profiles: &[String], lines: &[String]) -> StageResult<Vec<PathBuf>> {
    let mut targets: Vec<PathBuf> = profiles
        .iter()
        .map(|p| home.join(p))
        .filter(|p| p.is_file())
        .collect();
    if targets.is_empty() {
        targets.push(home.join(FALLBACK_PROFILE));
    }
    let mut changed = Vec::new();
    for profile in targets {
        let mut touched = false;
        for line in lines {
            touched |= ensure_line(&profile, line).map_err(|source| InstallError::Write {
                path: profile.clone(),
                source,
            })?;
        }
        if touched {
            info!(profile = %profile.display(), "updated shell profile");
            changed.push(profile);
        }
    }
    Ok(changed)
}
