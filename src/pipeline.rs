use std::path::{Path, PathBuf};
use anyhow::Result;
use tracing::{debug, info, info_span};
use crate::config::Settings;
use crate::error::{InstallError, StageResult};
use crate::extract::{locate_binary, locate_tree, unpack, ArchiveKind};
use crate::fetch::{Fetcher, ScratchDir};
use crate::installer::{ensure_dir, install_tree, place_binary, InstallScope, Scope};
use crate::platform::{Platform, PlatformTokens};
use crate::profile::{path_export_line, update_profiles};
use crate::registry::{Layout, Registry, Source, ToolDescriptor};
use crate::release::{GitHubReleases, ReleaseSource, UrlTemplate};
use crate::script::{run_installer_script, ScriptPlan};
use crate::util::{home_dir, is_privileged};
use crate::verify::verify_binary;
use crate::version::{resolve_version, ResolvedVersion};

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub tool: String,
    /// Raw version string; empty or "latest" for the newest release.
    pub version: String,
    pub install_dir: Option<PathBuf>,
}

/// Outcome of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallResult {
    pub tool: String,
    /// The concrete tag that was installed, or "latest" for vendor scripts
    /// that chose it themselves.
    pub version: String,
    /// The executable (or stable symlink) in the bin directory.
    pub installed_path: PathBuf,
    /// First line printed by the verify command.
    pub reported_version: String,
    pub profiles_updated: Vec<PathBuf>,
}

/// Runs every install through the same sequence of stages.
pub struct Pipeline {
    registry: Registry,
    settings: Settings,
    fetcher: Fetcher,
    privileged: bool,
    platform: Option<Platform>,
    home: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(registry: Registry, settings: Settings) -> Result<Self> {
        let fetcher = Fetcher::new(&settings.network)?;
        Ok(Self {
            registry,
            settings,
            fetcher,
            privileged: is_privileged(),
            platform: None,
            home: None,
        })
    }

    /// Overrides the detected privilege level.
    pub fn with_privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    /// Installs for `platform` instead of the host.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Home directory whose shell profiles get PATH lines.
    pub fn with_home(mut self, home: PathBuf) -> Self {
        self.home = Some(home);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Installs one tool. The first failing stage aborts the whole install;
    /// the scratch directory is removed on every path out of here.
    pub fn install(&self, request: &InstallRequest) -> Result<InstallResult> {
        let descriptor = self.registry.get(&request.tool)?;
        let _span = info_span!("install", tool = %descriptor.name).entered();

        check_dependencies(descriptor)?;
        let version = resolve_version(&request.version, descriptor.version_rule);
        debug!(raw = %request.version, %version, "resolved version");

        let platform = match self.platform {
            Some(platform) => platform,
            None => Platform::detect()?,
        };
        let tokens = descriptor.platform.translate(&descriptor.name, platform)?;
        debug!(%platform, %tokens, "resolved platform");

        let scope = InstallScope::resolve(
            &descriptor.name,
            descriptor.install_mode,
            request.install_dir.as_deref(),
            self.privileged,
            &self.settings.install,
        )?;
        let scratch = ScratchDir::new()?;

        let (installed_path, version) = match strategy(descriptor, &self.fetcher, &version, &scope.bin_dir) {
            Strategy::Script(plan) => {
                ensure_dir(&scope.bin_dir)?;
                let path = run_installer_script(
                    &descriptor.name,
                    &plan,
                    &self.fetcher,
                    &scratch,
                    &scope.bin_dir,
                    descriptor.binary_name(),
                )?;
                (path, version)
            }
            Strategy::Release(source) => {
                self.install_artifact(descriptor, source.as_ref(), &version, &tokens, &scope, &scratch)?
            }
        };

        let reported_version = verify_binary(&installed_path, &descriptor.verify)?;
        let profiles_updated = self.update_profiles(descriptor, &scope)?;
        drop(scratch);

        info!(path = %installed_path.display(), %version, "install complete");
        Ok(InstallResult {
            tool: descriptor.name.clone(),
            version: version.to_string(),
            installed_path,
            reported_version,
            profiles_updated,
        })
    }

    fn install_artifact(
        &self,
        descriptor: &ToolDescriptor,
        source: &dyn ReleaseSource,
        version: &ResolvedVersion,
        tokens: &PlatformTokens,
        scope: &InstallScope,
        scratch: &ScratchDir,
    ) -> Result<(PathBuf, ResolvedVersion)> {
        let located = source.locate(version, tokens)?;
        let download = self.fetcher.download(&located.asset.download_url, scratch)?;
        if let Some(checksum_url) = &located.checksum_url {
            self.fetcher
                .verify_checksum(&download, &located.asset.name, checksum_url)?;
        }

        let kind = descriptor
            .archive
            .unwrap_or_else(|| ArchiveKind::infer(&located.asset.name));
        let unpacked = scratch.path().join("unpacked");
        ensure_dir(&unpacked)?;
        unpack(&download.path, kind, &unpacked)?;

        let path = match &descriptor.layout {
            Layout::Binary => {
                let file_name = file_name(&download.path);
                let exact = match kind {
                    ArchiveKind::Raw => Some(file_name.as_str()),
                    _ => descriptor.path.as_deref(),
                };
                let binary = locate_binary(&unpacked, descriptor.binary_name(), exact, &located.asset.name)?;
                place_binary(&binary, scope, descriptor.binary_name())?
            }
            Layout::Tree { bins } => {
                let first = bins.first().ok_or_else(|| InstallError::BinaryNotFound {
                    binary: descriptor.binary_name().to_string(),
                    archive: located.asset.name.clone(),
                })?;
                let tree = locate_tree(&unpacked, first, &located.asset.name)?;
                let dir_name = located.version.version().unwrap_or("latest");
                let links = install_tree(&tree, scope, &descriptor.name, dir_name, bins)?;
                links.into_iter().next().unwrap_or_else(|| scope.bin_dir.join(first))
            }
        };
        Ok((path, located.version))
    }

    fn update_profiles(&self, descriptor: &ToolDescriptor, scope: &InstallScope) -> Result<Vec<PathBuf>> {
        let install = &self.settings.install;
        if scope.scope != Scope::User || !install.modify_profiles {
            return Ok(Vec::new());
        }
        let mut lines = vec![path_export_line(&scope.bin_dir)];
        lines.extend(descriptor.shell_snippet.clone());
        let home = match &self.home {
            Some(home) => home.clone(),
            None => home_dir()?,
        };
        Ok(update_profiles(&home, &install.profiles, &lines)?)
    }
}

/// How a descriptor's artifact is obtained.
enum Strategy<'a> {
    Release(Box<dyn ReleaseSource + 'a>),
    Script(ScriptPlan),
}

fn strategy<'a>(
    descriptor: &'a ToolDescriptor,
    fetcher: &'a Fetcher,
    version: &ResolvedVersion,
    bin_dir: &Path,
) -> Strategy<'a> {
    let checksum = descriptor.checksum.as_ref();
    match &descriptor.source {
        Source::Github { repo, asset } => {
            Strategy::Release(Box::new(GitHubReleases::new(fetcher, repo, asset, checksum)))
        }
        Source::Url { url, latest } => {
            Strategy::Release(Box::new(UrlTemplate::new(fetcher, url, latest, checksum)))
        }
        Source::Script {
            url,
            pinned_url,
            interpreter,
            args,
            pinned_args,
            env,
        } => Strategy::Script(ScriptPlan::new(
            url,
            pinned_url.as_deref(),
            interpreter,
            args,
            pinned_args,
            env,
            version,
            bin_dir,
        )),
    }
}

/// Every external executable the descriptor needs must be on PATH before
/// anything touches the network.
pub fn check_dependencies(descriptor: &ToolDescriptor) -> StageResult<()> {
    for dependency in &descriptor.dependencies {
        let found = which::which(dependency)
            .map_err(|_| InstallError::MissingDependency(dependency.clone()))?;
        debug!(dependency, path = %found.display(), "dependency found");
    }
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
