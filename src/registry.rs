use std::collections::{BTreeMap, HashMap};
use serde::Deserialize;
use crate::error::{InstallError, StageResult};
use crate::extract::ArchiveKind;
use crate::installer::InstallMode;
use crate::platform::PlatformNames;
use crate::version::VersionRule;

/// Descriptors shipped with the binary.
const BUILTIN_TOOLS: &str = include_str!("tools.toml");

/// Where a tool's artifact comes from.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Source {
    /// A GitHub repository whose releases carry one asset per platform.
    Github {
        /// `owner/repo`
        repo: String,
        /// Asset-name pattern, matched against the release's asset list.
        asset: String,
    },
    /// A stable download-URL scheme; no asset list is consulted.
    Url {
        url: String,
        latest: LatestLookup,
    },
    /// A vendor-supplied shell installer.
    Script {
        url: String,
        /// Used instead of `url` when a concrete version was requested.
        pinned_url: Option<String>,
        #[serde(default = "default_interpreter")]
        interpreter: String,
        #[serde(default)]
        args: Vec<String>,
        /// Appended to `args` when a concrete version was requested.
        #[serde(default)]
        pinned_args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
}

/// How a URL-template tool finds out what "latest" is.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum LatestLookup {
    /// `tag_name` of the repository's latest GitHub release.
    GithubTag { repo: String },
    /// First line of a plain-text document.
    Text {
        url: String,
        strip_prefix: Option<String>,
    },
    /// A top-level string field of a JSON document.
    Json { url: String, field: String },
}

/// How an unpacked artifact lands on disk.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Layout {
    /// A single executable copied into the bin directory.
    #[default]
    Binary,
    /// The whole archive tree kept under a versioned directory, with a stable
    /// symlink per listed binary (paths relative to the tree root).
    Tree { bins: Vec<String> },
}

/// Where the expected digest of an artifact is published. Exactly one form
/// must be given.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Checksum {
    /// Asset-name pattern of a checksum file in the same GitHub release.
    Asset(String),
    /// URL template of a checksum file; `{url}` is the artifact URL.
    Url(String),
}

/// Everything needed to install one tool. Immutable once loaded.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ToolDescriptor {
    #[serde(skip)]
    pub name: String,
    pub description: Option<String>,
    pub source: Source,
    #[serde(default)]
    pub version_rule: VersionRule,
    #[serde(default)]
    pub platform: PlatformNames,
    /// Inferred from the asset name when absent.
    pub archive: Option<ArchiveKind>,
    /// Executable name; defaults to the tool name.
    pub binary: Option<String>,
    /// Exact path of the executable inside the archive.
    pub path: Option<String>,
    #[serde(default)]
    pub layout: Layout,
    #[serde(default)]
    pub install_mode: InstallMode,
    /// External executables that must be on PATH.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "default_verify")]
    pub verify: Vec<String>,
    pub checksum: Option<Checksum>,
    /// Extra line for shell profiles, e.g. shell integration.
    pub shell_snippet: Option<String>,
}

fn default_interpreter() -> String {
    "sh".to_string()
}

fn default_verify() -> Vec<String> {
    vec!["--version".to_string()]
}

impl ToolDescriptor {
    pub fn binary_name(&self) -> &str {
        self.binary.as_deref().unwrap_or(&self.name)
    }

    /// The GitHub repository the tool's releases live in, if any.
    pub fn github_repo(&self) -> Option<&str> {
        match &self.source {
            Source::Github { repo, .. } => Some(repo),
            Source::Url {
                latest: LatestLookup::GithubTag { repo },
                ..
            } => Some(repo),
            _ => None,
        }
    }

    /// Rejects combinations serde alone cannot rule out.
    pub fn validate(&self) -> StageResult<()> {
        let invalid = |reason: &str| {
            Err(InstallError::InvalidDescriptor {
                name: self.name.clone(),
                reason: reason.to_string(),
            })
        };
        match (&self.source, &self.checksum) {
            (Source::Url { .. }, Some(Checksum::Asset(_))) => {
                return invalid("a checksum asset needs a github source; use `checksum = { url = ... }`");
            }
            (Source::Script { .. }, Some(_)) => {
                return invalid("script installers cannot declare a checksum");
            }
            _ => {}
        }
        if let Layout::Tree { bins } = &self.layout {
            if bins.is_empty() {
                return invalid("a tree layout must list at least one binary");
            }
        }
        Ok(())
    }

    pub fn source_kind(&self) -> &'static str {
        match self.source {
            Source::Github { .. } => "github",
            Source::Url { .. } => "url",
            Source::Script { .. } => "script",
        }
    }
}

/// Static mapping from tool name to descriptor.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    tools: BTreeMap<String, ToolDescriptor>,
}

impl Registry {
    /// Parses the built-in descriptor table.
    pub fn builtin() -> anyhow::Result<Self> {
        let tools: HashMap<String, ToolDescriptor> = toml::from_str(BUILTIN_TOOLS)?;
        Ok(Self::default().with_tools(tools)?)
    }

    /// Adds descriptors, replacing built-ins of the same name.
    pub fn with_tools<I>(mut self, tools: I) -> StageResult<Self>
    where
        I: IntoIterator<Item = (String, ToolDescriptor)>,
    {
        for (name, mut descriptor) in tools {
            descriptor.name = name.clone();
            descriptor.validate()?;
            self.tools.insert(name, descriptor);
        }
        Ok(self)
    }

    pub fn get(&self, name: &str) -> StageResult<&ToolDescriptor> {
        self.tools.get(name).ok_or_else(|| InstallError::UnknownTool {
            name: name.to_string(),
            known: self.names().collect::<Vec<_>>().join(", "),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values()
    }
}
