use std::path::Path;
use std::process::Command;
use tracing::info;
use crate::error::{InstallError, StageResult};

/// Runs the installed binary with `args` and returns the first non-empty
/// line it printed.
///
/// A binary that cannot start, exits non-zero, or prints nothing at all
/// fails verification.
pub fn verify_binary(path: &Path, args: &[String]) -> StageResult<String> {
    let failed = |reason: String| InstallError::Verification {
        path: path.to_path_buf(),
        reason,
    };
    let output = Command::new(path)
        .args(args)
        .output()
        .map_err(|e| failed(e.to_string()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(failed(format!(
            "`{}` exited with {}: {}",
            args.join(" "),
            output.status,
            stderr.trim()
        )));
    }
    // Some tools print their version on stderr.
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let reported = stdout
        .lines()
        .chain(stderr.lines())
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .ok_or_else(|| failed("no version output".to_string()))?;
    info!(path = %path.display(), version = %reported, "verified");
    Ok(reported)
}
