use std::fmt;
use serde::Deserialize;
use crate::error::{InstallError, StageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Linux,
    Darwin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    Aarch64,
}

/// The host platform in canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

/// A platform spelled the way one upstream project names its assets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformTokens {
    pub os: String,
    pub arch: String,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let os = match self.os {
            Os::Linux => "linux",
            Os::Darwin => "darwin",
        };
        let arch = match self.arch {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
        };
        write!(f, "{os}/{arch}")
    }
}

impl fmt::Display for PlatformTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

/// Parses a kernel name as printed by `uname -s` (or Rust's `std::env::consts::OS`).
pub fn parse_os(raw: &str) -> StageResult<Os> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "linux" => Ok(Os::Linux),
        "darwin" | "macos" => Ok(Os::Darwin),
        _ => Err(InstallError::UnsupportedOs(raw.to_string())),
    }
}

/// Parses a machine name as printed by `uname -m` (or `std::env::consts::ARCH`).
pub fn parse_arch(raw: &str) -> StageResult<Arch> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "x86_64" | "amd64" | "x64" => Ok(Arch::X86_64),
        "aarch64" | "arm64" => Ok(Arch::Aarch64),
        _ => Err(InstallError::UnsupportedArch(raw.to_string())),
    }
}

impl Platform {
    pub fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    pub fn from_raw(kernel: &str, machine: &str) -> StageResult<Self> {
        Ok(Self::new(parse_os(kernel)?, parse_arch(machine)?))
    }

    /// Detects the host platform. `TOOLSTALL_OS` and `TOOLSTALL_ARCH` take
    /// precedence over the compiled-in target.
    pub fn detect() -> StageResult<Self> {
        let kernel = std::env::var("TOOLSTALL_OS").unwrap_or_else(|_| std::env::consts::OS.to_string());
        let machine =
            std::env::var("TOOLSTALL_ARCH").unwrap_or_else(|_| std::env::consts::ARCH.to_string());
        Self::from_raw(&kernel, &machine)
    }
}

/// Per-tool operating system vocabulary.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct OsNames {
    pub linux: Option<String>,
    pub darwin: Option<String>,
}

/// Per-tool architecture vocabulary.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ArchNames {
    pub x86_64: Option<String>,
    pub aarch64: Option<String>,
}

impl Default for OsNames {
    fn default() -> Self {
        Self {
            linux: Some("linux".to_string()),
            darwin: Some("darwin".to_string()),
        }
    }
}

impl Default for ArchNames {
    fn default() -> Self {
        Self {
            x86_64: Some("amd64".to_string()),
            aarch64: Some("arm64".to_string()),
        }
    }
}

/// Translation table from canonical platform to one upstream's asset names.
///
/// A missing entry means the upstream publishes nothing for that platform.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct PlatformNames {
    #[serde(default)]
    pub os: OsNames,
    #[serde(default)]
    pub arch: ArchNames,
}

impl PlatformNames {
    pub fn translate(&self, tool: &str, platform: Platform) -> StageResult<PlatformTokens> {
        let (os_key, os) = match platform.os {
            Os::Linux => ("linux", &self.os.linux),
            Os::Darwin => ("darwin", &self.os.darwin),
        };
        let (arch_key, arch) = match platform.arch {
            Arch::X86_64 => ("x86_64", &self.arch.x86_64),
            Arch::Aarch64 => ("aarch64", &self.arch.aarch64),
        };
        let os = os.clone().ok_or_else(|| InstallError::PlatformNotMapped {
            tool: tool.to_string(),
            what: "operating system",
            value: os_key.to_string(),
        })?;
        let arch = arch.clone().ok_or_else(|| InstallError::PlatformNotMapped {
            tool: tool.to_string(),
            what: "architecture",
            value: arch_key.to_string(),
        })?;
        Ok(PlatformTokens { os, arch })
    }
}
