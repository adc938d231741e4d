use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};
use crate::error::{InstallError, StageResult};
use crate::fetch::{Fetcher, ScratchDir};
use crate::util::{expand_template, TemplateVars};
use crate::version::ResolvedVersion;

/// A vendor installer invocation with every placeholder filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptPlan {
    pub url: String,
    pub interpreter: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl ScriptPlan {
    /// Fills `{dir}`, `{tag}` and `{version}`.
    ///
    /// The pinned URL and arguments only apply when the version yields an
    /// installer value, so "latest" under `empty-means-unset` leaves the
    /// vendor's own default in charge.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        url: &str,
        pinned_url: Option<&str>,
        interpreter: &str,
        args: &[String],
        pinned_args: &[String],
        env: &BTreeMap<String, String>,
        version: &ResolvedVersion,
        dir: &Path,
    ) -> Self {
        let value = version.installer_value();
        let vars = TemplateVars {
            tag: value.map(str::to_string),
            ..TemplateVars::default()
        }
        .with_dir(dir);
        let expand = |s: &String| expand_template(s, &vars);

        let url = match (value, pinned_url) {
            (Some(_), Some(pinned)) => expand_template(pinned, &vars),
            _ => expand_template(url, &vars),
        };
        let mut expanded: Vec<String> = args.iter().map(expand).collect();
        if value.is_some() {
            expanded.extend(pinned_args.iter().map(expand));
        }
        Self {
            url,
            interpreter: interpreter.to_string(),
            args: expanded,
            env: env.iter().map(|(k, v)| (k.clone(), expand(v))).collect(),
        }
    }
}

/// Downloads and runs a vendor installer script, then checks that it left
/// `binary` in `bin_dir`.
///
/// The script's output goes straight to the terminal. A non-zero exit is
/// reported as [`InstallError::ScriptFailed`] carrying the script's status.
pub fn run_installer_script(
    tool: &str,
    plan: &ScriptPlan,
    fetcher: &Fetcher,
    scratch: &ScratchDir,
    bin_dir: &Path,
    binary: &str,
) -> StageResult<PathBuf> {
    let script = fetcher.download(&plan.url, scratch)?;
    info!(tool, interpreter = %plan.interpreter, args = ?plan.args, "running vendor installer");
    debug!(env = ?plan.env, "installer environment");

    let status = Command::new(&plan.interpreter)
        .arg(&script.path)
        .args(&plan.args)
        .envs(&plan.env)
        .status()
        .map_err(|_| InstallError::MissingDependency(plan.interpreter.clone()))?;
    if !status.success() {
        // Killed by a signal: no code to pass through.
        let code = status.code().unwrap_or(1);
        return Err(InstallError::ScriptFailed {
            tool: tool.to_string(),
            code,
        });
    }

    let installed = bin_dir.join(binary);
    if !installed.is_file() {
        return Err(InstallError::BinaryNotFound {
            binary: binary.to_string(),
            archive: plan.url.clone(),
        });
    }
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{resolve_version, VersionRule};

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_latest_unset_skips_pinned_parts() {
        let env = BTreeMap::from([("UV_INSTALL_DIR".to_string(), "{dir}".to_string())]);
        let version = resolve_version("", VersionRule::EmptyMeansUnset);
        let plan = ScriptPlan::new(
            "https://astral.sh/uv/install.sh",
            Some("https://astral.sh/uv/{version}/install.sh"),
            "sh",
            &[],
            &strings(&["--version", "{version}"]),
            &env,
            &version,
            Path::new("/opt/bin"),
        );
        assert_eq!(plan.url, "https://astral.sh/uv/install.sh");
        assert!(plan.args.is_empty());
        assert_eq!(plan.env["UV_INSTALL_DIR"], "/opt/bin");
    }

    #[test]
    fn test_pinned_version_fills_placeholders() {
        let version = resolve_version("1.2.0", VersionRule::AddVPrefixIfNumeric);
        let plan = ScriptPlan::new(
            "https://fnm.vercel.app/install",
            None,
            "bash",
            &strings(&["--install-dir", "{dir}"]),
            &strings(&["--release", "{tag}"]),
            &BTreeMap::new(),
            &version,
            Path::new("/home/u/.local/bin"),
        );
        assert_eq!(
            plan.args,
            strings(&["--install-dir", "/home/u/.local/bin", "--release", "v1.2.0"])
        );
    }

    #[test]
    fn test_latest_without_unset_passes_latest() {
        let version = resolve_version("latest", VersionRule::AddVPrefixIfNumeric);
        let plan = ScriptPlan::new(
            "https://example.com/install.sh",
            None,
            "sh",
            &[],
            &strings(&["--release", "{tag}"]),
            &BTreeMap::new(),
            &version,
            Path::new("/bin"),
        );
        assert_eq!(plan.args, strings(&["--release", "latest"]));
    }
}
