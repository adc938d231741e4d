use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use anyhow::{anyhow, Result};
use regex::Regex;
use semver::Version;
use crate::platform::PlatformTokens;
use crate::version::strip_v;

/// Values substituted into descriptor templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    pub tag: Option<String>,
    pub os: Option<String>,
    pub arch: Option<String>,
    pub dir: Option<String>,
    pub url: Option<String>,
}

impl TemplateVars {
    pub fn new(tag: Option<&str>, tokens: &PlatformTokens) -> Self {
        Self {
            tag: tag.map(str::to_string),
            os: Some(tokens.os.clone()),
            arch: Some(tokens.arch.clone()),
            ..Self::default()
        }
    }

    pub fn with_dir(mut self, dir: &Path) -> Self {
        self.dir = Some(dir.to_string_lossy().into_owned());
        self
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }
}

/// Replaces `{tag}`, `{version}`, `{os}`, `{arch}`, `{dir}` and `{url}`.
///
/// Unknown braces (such as `{tar.gz,zip}` alternatives) and placeholders
/// without a value are left untouched.
pub fn expand_template(template: &str, vars: &TemplateVars) -> String {
    let version = vars.tag.as_deref().map(strip_v);
    let pairs = [
        ("{tag}", vars.tag.as_deref()),
        ("{version}", version),
        ("{os}", vars.os.as_deref()),
        ("{arch}", vars.arch.as_deref()),
        ("{dir}", vars.dir.as_deref()),
        ("{url}", vars.url.as_deref()),
    ];
    let mut out = template.to_string();
    for (key, value) in pairs {
        if let Some(value) = value {
            out = out.replace(key, value);
        }
    }
    out
}

/// Compiles an expanded asset pattern into an anchored regex.
///
/// `*` and `?` are globs, `{a,b}` is an alternative, everything else is literal.
pub fn pattern_regex(pattern: &str) -> Result<Regex> {
    let mut re = String::from("^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '{' => {
                let mut group = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    group.push(inner);
                }
                if !closed {
                    return Err(anyhow!("unclosed `{{` in asset pattern `{pattern}`"));
                }
                let alternatives: Vec<String> = group.split(',').map(regex::escape).collect();
                re.push_str(&format!("(?:{})", alternatives.join("|")));
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Ok(Regex::new(&re)?)
}

/// Sorts release tags newest first. Tags that are not semver keep their
/// relative order after all semver tags.
pub fn sort_tags(tags: Vec<String>) -> Vec<String> {
    let mut tags: Vec<(Option<Version>, String)> = tags
        .into_iter()
        .map(|tag| (Version::parse(strip_v(&tag)).ok(), tag))
        .collect();
    tags.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(a), Some(b)) => b.cmp(a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    tags.into_iter().map(|(_, tag)| tag).collect()
}

/// Expands a leading `~` and environment variables in a configured path.
pub fn expand_path(raw: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(raw).map_err(|e| anyhow!("cannot expand path `{raw}`: {e}"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

pub fn home_dir() -> Result<PathBuf> {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .ok_or_else(|| anyhow!("Could not determine home directory"))
}

/// Whether the process runs with the privileged (root) user id.
#[cfg(unix)]
pub fn is_privileged() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_privileged() -> bool {
    false
}

/// Checks if a given path is an executable file on Unix.
#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Checks if a given path has a Windows executable extension (.exe, .bat, .cmd).
#[cfg(windows)]
pub fn is_executable(path: &Path) -> bool {
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        let ext = ext.to_ascii_lowercase();
        matches!(ext.as_str(), "exe" | "bat" | "cmd")
    } else {
        false
    }
}
