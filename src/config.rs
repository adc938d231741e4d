use std::collections::HashMap;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use crate::registry::ToolDescriptor;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Contents of `config.toml`, with environment overrides applied by [`Settings::load`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub network: NetworkSettings,
    pub install: InstallSettings,
    /// Additional tool descriptors; same schema as the built-in table.
    pub tools: HashMap<String, ToolDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkSettings {
    /// Connect and read timeout in seconds.
    pub timeout_secs: u64,
    /// GitHub REST API base URL.
    pub api_url: String,
    /// Permit plain-HTTP URLs (mirrors, local test servers).
    pub allow_http: bool,
    pub user_agent: String,
    /// Bearer token for the GitHub API. Only ever read from the environment.
    #[serde(skip)]
    pub token: Option<String>,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            api_url: DEFAULT_API_URL.to_string(),
            allow_http: false,
            user_agent: concat!("toolstall/", env!("CARGO_PKG_VERSION")).to_string(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstallSettings {
    pub user_bin_dir: String,
    pub system_bin_dir: String,
    /// Root for versioned tool trees; defaults depend on the install scope.
    pub tools_dir: Option<String>,
    /// Append PATH exports and shell snippets to shell profiles.
    pub modify_profiles: bool,
    /// Profile files relative to the home directory.
    pub profiles: Vec<String>,
}

impl Default for InstallSettings {
    fn default() -> Self {
        Self {
            user_bin_dir: "~/.local/bin".to_string(),
            system_bin_dir: "/usr/local/bin".to_string(),
            tools_dir: None,
            modify_profiles: true,
            profiles: vec![".bashrc".to_string(), ".zshrc".to_string()],
        }
    }
}

impl Settings {
    /// `$TOOLSTALL_CONFIG`, else `config.toml` in the platform config directory.
    pub fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("TOOLSTALL_CONFIG") {
            return Some(PathBuf::from(path));
        }
        ProjectDirs::from("org", "toolstall", "toolstall")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Loads the config file if it exists, then applies environment overrides.
    pub fn load() -> Result<Self> {
        let mut settings = match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Applies environment overrides through `lookup` so tests need not touch
    /// the process environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        self.network.token = non_empty("GITHUB_TOKEN").or_else(|| non_empty("GH_TOKEN"));
        if let Some(url) = non_empty("GITHUB_API_URL") {
            self.network.api_url = url;
        }
        if let Some(flag) = non_empty("TOOLSTALL_ALLOW_HTTP") {
            self.network.allow_http = is_truthy(&flag);
        }
        if let Some(secs) = non_empty("TOOLSTALL_TIMEOUT").and_then(|s| s.parse().ok()) {
            self.network.timeout_secs = secs;
        }
        if let Some(flag) = non_empty("TOOLSTALL_NO_MODIFY_PATH") {
            if is_truthy(&flag) {
                self.install.modify_profiles = false;
            }
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
