use std::fmt;
use serde::Deserialize;

/// How a tool's upstream spells its release tags. Each descriptor carries its
/// own rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum VersionRule {
    /// `1.2.3` becomes `v1.2.3`; anything else is kept.
    #[default]
    AddVPrefixIfNumeric,
    /// `v1.2.3` becomes `1.2.3`.
    StripVPrefix,
    /// Used verbatim.
    Passthrough,
    /// Used verbatim, and "latest" means "pass no version at all".
    EmptyMeansUnset,
}

/// The token later stages address a release with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Canonical {
    Latest,
    Tag(String),
}

/// A user-supplied version after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    pub raw: String,
    pub canonical: Canonical,
    pub rule: VersionRule,
}

/// Normalizes `raw` according to `rule`. Never fails.
pub fn resolve_version(raw: &str, rule: VersionRule) -> ResolvedVersion {
    let trimmed = raw.trim();
    let canonical = if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("latest") {
        Canonical::Latest
    } else {
        Canonical::Tag(match rule {
            VersionRule::AddVPrefixIfNumeric => {
                if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
                    format!("v{trimmed}")
                } else {
                    trimmed.to_string()
                }
            }
            VersionRule::StripVPrefix => strip_v(trimmed).to_string(),
            VersionRule::Passthrough | VersionRule::EmptyMeansUnset => trimmed.to_string(),
        })
    };
    ResolvedVersion {
        raw: raw.to_string(),
        canonical,
        rule,
    }
}

/// Removes one leading `v` when it is followed by a digit.
pub fn strip_v(tag: &str) -> &str {
    match tag.strip_prefix('v') {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest,
        _ => tag,
    }
}

impl ResolvedVersion {
    pub fn is_latest(&self) -> bool {
        self.canonical == Canonical::Latest
    }

    /// The canonical tag, or `None` while still unresolved "latest".
    pub fn tag(&self) -> Option<&str> {
        match &self.canonical {
            Canonical::Tag(tag) => Some(tag),
            Canonical::Latest => None,
        }
    }

    /// The bare version number (tag without a leading `v`).
    pub fn version(&self) -> Option<&str> {
        self.tag().map(strip_v)
    }

    /// The value handed to a vendor installer, if any.
    ///
    /// Under [`VersionRule::EmptyMeansUnset`] "latest" produces no value so the
    /// installer falls back to its own default.
    pub fn installer_value(&self) -> Option<&str> {
        match (&self.canonical, self.rule) {
            (Canonical::Tag(tag), _) => Some(tag),
            (Canonical::Latest, VersionRule::EmptyMeansUnset) => None,
            (Canonical::Latest, _) => Some("latest"),
        }
    }

    /// Pins "latest" to a concrete upstream tag once it is known.
    ///
    /// The upstream tag is already in the tool's own spelling, so it is stored
    /// as-is rather than re-normalized.
    pub fn pinned(&self, upstream_tag: &str) -> ResolvedVersion {
        ResolvedVersion {
            raw: self.raw.clone(),
            canonical: Canonical::Tag(upstream_tag.to_string()),
            rule: self.rule,
        }
    }
}

impl fmt::Display for ResolvedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.canonical {
            Canonical::Latest => f.write_str("latest"),
            Canonical::Tag(tag) => f.write_str(tag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_RULES: [VersionRule; 4] = [
        VersionRule::AddVPrefixIfNumeric,
        VersionRule::StripVPrefix,
        VersionRule::Passthrough,
        VersionRule::EmptyMeansUnset,
    ];

    #[test]
    fn test_empty_whitespace_and_latest_are_latest() {
        for rule in ALL_RULES {
            for raw in ["", "  ", "latest", "LATEST"] {
                assert!(resolve_version(raw, rule).is_latest(), "{raw:?} under {rule:?}");
            }
        }
    }

    #[test]
    fn test_add_v_prefix() {
        let rule = VersionRule::AddVPrefixIfNumeric;
        assert_eq!(resolve_version("1.2.3", rule).tag(), Some("v1.2.3"));
        assert_eq!(resolve_version("v1.2.3", rule).tag(), Some("v1.2.3"));
        assert_eq!(resolve_version(" 2.0 ", rule).tag(), Some("v2.0"));
        assert_eq!(resolve_version("nightly", rule).tag(), Some("nightly"));
    }

    #[test]
    fn test_strip_v_prefix() {
        let rule = VersionRule::StripVPrefix;
        assert_eq!(resolve_version("v1.2.3", rule).tag(), Some("1.2.3"));
        assert_eq!(resolve_version("1.2.3", rule).tag(), Some("1.2.3"));
        assert_eq!(resolve_version("vendor", rule).tag(), Some("vendor"));
    }

    #[test]
    fn test_passthrough_keeps_tag() {
        assert_eq!(
            resolve_version("v1.2.3", VersionRule::Passthrough).tag(),
            Some("v1.2.3")
        );
        assert_eq!(resolve_version("1.2.3", VersionRule::Passthrough).version(), Some("1.2.3"));
    }

    #[test]
    fn test_installer_value() {
        let unset = resolve_version("", VersionRule::EmptyMeansUnset);
        assert_eq!(unset.installer_value(), None);
        let latest = resolve_version("", VersionRule::StripVPrefix);
        assert_eq!(latest.installer_value(), Some("latest"));
        let pinned = resolve_version("v0.4.1", VersionRule::StripVPrefix);
        assert_eq!(pinned.installer_value(), Some("0.4.1"));
    }

    #[test]
    fn test_pinned_keeps_upstream_spelling() {
        let latest = resolve_version("latest", VersionRule::StripVPrefix);
        let pinned = latest.pinned("v1.9.0");
        assert_eq!(pinned.tag(), Some("v1.9.0"));
        assert_eq!(pinned.version(), Some("1.9.0"));
        assert_eq!(pinned.raw, "latest");
    }
}
