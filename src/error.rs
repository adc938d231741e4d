use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Broad class of an install failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Missing dependency, unsupported platform, insufficient privilege.
    Precondition,
    /// Metadata fetch or artifact download failure.
    Network,
    /// No matching asset, malformed or empty metadata, unusable archive.
    Resolution,
    /// Directory creation, binary placement, symlink conflicts.
    Filesystem,
    /// The installed binary does not run.
    Verification,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Precondition => "precondition",
            Category::Network => "network",
            Category::Resolution => "resolution",
            Category::Filesystem => "filesystem",
            Category::Verification => "verification",
        };
        f.write_str(s)
    }
}

/// Every fatal condition the install pipeline can hit.
///
/// Each variant carries the context an operator needs (tool, URL, path) and
/// maps to a [`Category`] and a pipeline stage via [`InstallError::stage`].
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("unknown tool `{name}` (known tools: {known})")]
    UnknownTool { name: String, known: String },

    #[error("invalid tool descriptor `{name}`: {reason}")]
    InvalidDescriptor { name: String, reason: String },

    #[error("missing required dependency `{0}`; install it and re-run")]
    MissingDependency(String),

    #[error("unsupported operating system `{0}`")]
    UnsupportedOs(String),

    #[error("unsupported architecture `{0}`")]
    UnsupportedArch(String),

    #[error("{tool} has no release for {what} `{value}`")]
    PlatformNotMapped {
        tool: String,
        what: &'static str,
        value: String,
    },

    #[error("{tool} must be installed system-wide; re-run as root or pass an install directory")]
    InsufficientPrivilege { tool: String },

    #[error("failed to fetch release information from {url}: {reason}")]
    ReleaseFetch { url: String, reason: String },

    #[error("malformed release metadata from {url}: {reason}")]
    MalformedMetadata { url: String, reason: String },

    #[error("no asset found for platform {platform} in {repo}@{tag} (wanted `{pattern}`, available: {available})")]
    NoAsset {
        repo: String,
        tag: String,
        platform: String,
        pattern: String,
        available: String,
    },

    #[error("ambiguous release data for {repo}@{tag}: `{pattern}` matches {matches}")]
    AmbiguousAsset {
        repo: String,
        tag: String,
        pattern: String,
        matches: String,
    },

    #[error("failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("checksum mismatch for {name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("no checksum for {name} in {source_url}")]
    ChecksumMissing { name: String, source_url: String },

    #[error("failed to extract {archive}: {reason}")]
    Extraction { archive: String, reason: String },

    #[error("binary `{binary}` not found after extracting {archive}")]
    BinaryNotFound { binary: String, archive: String },

    #[error("installer script for {tool} exited with status {code}")]
    ScriptFailed { tool: String, code: i32 },

    #[error("cannot create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} exists and is not a symlink; refusing to overwrite it", path.display())]
    NotASymlink { path: PathBuf },

    #[error("{} failed verification: {reason}", path.display())]
    Verification { path: PathBuf, reason: String },
}

impl InstallError {
    pub fn category(&self) -> Category {
        use InstallError::*;
        match self {
            UnknownTool { .. }
            | InvalidDescriptor { .. }
            | MissingDependency(_)
            | UnsupportedOs(_)
            | UnsupportedArch(_)
            | PlatformNotMapped { .. }
            | InsufficientPrivilege { .. } => Category::Precondition,
            ReleaseFetch { .. } | Download { .. } => Category::Network,
            MalformedMetadata { .. }
            | NoAsset { .. }
            | AmbiguousAsset { .. }
            | ChecksumMismatch { .. }
            | ChecksumMissing { .. }
            | Extraction { .. }
            | BinaryNotFound { .. } => Category::Resolution,
            CreateDir { .. } | Write { .. } | NotASymlink { .. } => Category::Filesystem,
            ScriptFailed { .. } | Verification { .. } => Category::Verification,
        }
    }

    /// The pipeline stage that raised the error, used as the diagnostic prefix.
    pub fn stage(&self) -> &'static str {
        use InstallError::*;
        match self {
            UnknownTool { .. } | InvalidDescriptor { .. } => "registry",
            MissingDependency(_) => "dependencies",
            UnsupportedOs(_) | UnsupportedArch(_) | PlatformNotMapped { .. } => "platform",
            InsufficientPrivilege { .. } => "install",
            ReleaseFetch { .. }
            | MalformedMetadata { .. }
            | NoAsset { .. }
            | AmbiguousAsset { .. } => "release",
            Download { .. } | ChecksumMismatch { .. } | ChecksumMissing { .. } => "fetch",
            Extraction { .. } | BinaryNotFound { .. } | ScriptFailed { .. } => "extract",
            CreateDir { .. } | Write { .. } | NotASymlink { .. } => "install",
            Verification { .. } => "verify",
        }
    }

    /// Process exit code for this error. A failed vendor script passes its
    /// own status through; everything else exits with 1.
    pub fn exit_code(&self) -> u8 {
        match self {
            InstallError::ScriptFailed { code, .. } => u8::try_from(*code)
                .ok()
                .filter(|c| *c != 0)
                .unwrap_or(1),
            _ => 1,
        }
    }
}

pub type StageResult<T> = std::result::Result<T, InstallError>;
