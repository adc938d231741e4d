use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, info};
use crate::error::{InstallError, StageResult};
use crate::fetch::{file_name_from_url, Fetcher};
use crate::platform::PlatformTokens;
use crate::registry::{Checksum, LatestLookup};
use crate::util::{expand_template, pattern_regex, TemplateVars};
use crate::version::ResolvedVersion;

/// A published GitHub release.
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

/// A downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Asset {
    pub name: String,
    #[serde(rename = "browser_download_url")]
    pub download_url: String,
}

/// The artifact to fetch, with "latest" already pinned to a concrete tag.
#[derive(Debug, Clone)]
pub struct LocatedRelease {
    pub version: ResolvedVersion,
    pub asset: Asset,
    /// Where the artifact's digest is published, if the tool declares one.
    pub checksum_url: Option<String>,
}

/// A way of turning a version and platform into exactly one download URL.
pub trait ReleaseSource {
    fn locate(&self, version: &ResolvedVersion, tokens: &PlatformTokens) -> StageResult<LocatedRelease>;
}

/// API-driven lookup through the GitHub releases endpoint.
pub struct GitHubReleases<'a> {
    fetcher: &'a Fetcher,
    repo: &'a str,
    asset: &'a str,
    checksum: Option<&'a Checksum>,
}

/// Convention-driven lookup: the URL is built from a template.
pub struct UrlTemplate<'a> {
    fetcher: &'a Fetcher,
    url: &'a str,
    latest: &'a LatestLookup,
    checksum: Option<&'a Checksum>,
}

impl<'a> GitHubReleases<'a> {
    pub fn new(fetcher: &'a Fetcher, repo: &'a str, asset: &'a str, checksum: Option<&'a Checksum>) -> Self {
        Self {
            fetcher,
            repo,
            asset,
            checksum,
        }
    }
}

impl<'a> UrlTemplate<'a> {
    pub fn new(
        fetcher: &'a Fetcher,
        url: &'a str,
        latest: &'a LatestLookup,
        checksum: Option<&'a Checksum>,
    ) -> Self {
        Self {
            fetcher,
            url,
            latest,
            checksum,
        }
    }
}

/// `GET /repos/{repo}/releases/latest` or `/releases/tags/{tag}`.
pub fn fetch_release(fetcher: &Fetcher, repo: &str, tag: Option<&str>) -> StageResult<Release> {
    let url = match tag {
        Some(tag) => release_endpoint(fetcher.api_url(), repo, &["releases", "tags", tag])?,
        None => release_endpoint(fetcher.api_url(), repo, &["releases", "latest"])?,
    };
    fetcher.get_json(url.as_str())
}

/// Most recent releases of `repo`, as returned by the API (newest first by date).
pub fn list_releases(fetcher: &Fetcher, repo: &str) -> StageResult<Vec<Release>> {
    let mut url = release_endpoint(fetcher.api_url(), repo, &["releases"])?;
    url.set_query(Some("per_page=30"));
    fetcher.get_json(url.as_str())
}

/// `{api_url}/repos/{owner}/{name}/{tail...}` with every segment percent-encoded,
/// so a tag can never add path segments, a query or a fragment.
pub fn release_endpoint(api_url: &str, repo: &str, tail: &[&str]) -> StageResult<Url> {
    let invalid = |reason: String| InstallError::ReleaseFetch {
        url: api_url.to_string(),
        reason,
    };
    let mut url = Url::parse(api_url).map_err(|e| invalid(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| invalid("API URL cannot carry a path".to_string()))?
        .pop_if_empty()
        .push("repos")
        .extend(repo.split('/'))
        .extend(tail);
    Ok(url)
}

/// Picks the single asset whose name matches `pattern` (already expanded).
///
/// No match and more than one match are both fatal.
pub fn select_asset(release: &Release, repo: &str, pattern: &str, tokens: &PlatformTokens) -> StageResult<Asset> {
    let regex = pattern_regex(pattern).map_err(|e| InstallError::MalformedMetadata {
        url: repo.to_string(),
        reason: e.to_string(),
    })?;
    let matches: Vec<&Asset> = release.assets.iter().filter(|a| regex.is_match(&a.name)).collect();
    match matches.as_slice() {
        [asset] => Ok((*asset).clone()),
        [] => Err(InstallError::NoAsset {
            repo: repo.to_string(),
            tag: release.tag_name.clone(),
            platform: tokens.to_string(),
            pattern: pattern.to_string(),
            available: names(release.assets.iter()),
        }),
        many => Err(InstallError::AmbiguousAsset {
            repo: repo.to_string(),
            tag: release.tag_name.clone(),
            pattern: pattern.to_string(),
            matches: names(many.iter().copied()),
        }),
    }
}

fn names<'a>(assets: impl Iterator<Item = &'a Asset>) -> String {
    let names: Vec<&str> = assets.map(|a| a.name.as_str()).collect();
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

impl ReleaseSource for GitHubReleases<'_> {
    fn locate(&self, version: &ResolvedVersion, tokens: &PlatformTokens) -> StageResult<LocatedRelease> {
        let release = fetch_release(self.fetcher, self.repo, version.tag())?;
        let version = version.pinned(&release.tag_name);
        let vars = TemplateVars::new(version.tag(), tokens);
        let pattern = expand_template(self.asset, &vars);
        let asset = select_asset(&release, self.repo, &pattern, tokens)?;
        info!(repo = self.repo, tag = %release.tag_name, asset = %asset.name, "located release asset");

        let checksum_url = match self.checksum {
            Some(Checksum::Asset(pattern)) => {
                let pattern = expand_template(pattern, &vars);
                Some(select_asset(&release, self.repo, &pattern, tokens)?.download_url)
            }
            Some(Checksum::Url(template)) => {
                Some(expand_template(template, &vars.clone().with_url(&asset.download_url)))
            }
            None => None,
        };
        Ok(LocatedRelease {
            version,
            asset,
            checksum_url,
        })
    }
}

impl UrlTemplate<'_> {
    fn latest_tag(&self) -> StageResult<String> {
        let (url, tag) = match self.latest {
            LatestLookup::GithubTag { repo } => {
                let url = release_endpoint(self.fetcher.api_url(), repo, &["releases", "latest"])?;
                let release: Release = self.fetcher.get_json(url.as_str())?;
                (url.to_string(), release.tag_name)
            }
            LatestLookup::Text { url, strip_prefix } => {
                let text = self.fetcher.get_text(url)?;
                let first = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or_default();
                let first = match strip_prefix {
                    Some(prefix) => first.strip_prefix(prefix.as_str()).unwrap_or(first),
                    None => first,
                };
                (url.clone(), first.to_string())
            }
            LatestLookup::Json { url, field } => {
                let doc: serde_json::Value = self.fetcher.get_json(url)?;
                let value = doc.get(field).and_then(|v| v.as_str()).unwrap_or_default();
                (url.clone(), value.to_string())
            }
        };
        if tag.is_empty() {
            return Err(InstallError::MalformedMetadata {
                url,
                reason: "latest version lookup returned nothing".to_string(),
            });
        }
        debug!(%url, %tag, "resolved latest version");
        Ok(tag)
    }
}

impl ReleaseSource for UrlTemplate<'_> {
    fn locate(&self, version: &ResolvedVersion, tokens: &PlatformTokens) -> StageResult<LocatedRelease> {
        if let Some(Checksum::Asset(pattern)) = self.checksum {
            return Err(InstallError::InvalidDescriptor {
                name: self.url.to_string(),
                reason: format!("checksum asset `{pattern}` needs a GitHub release; use a checksum url"),
            });
        }
        let version = match version.tag() {
            Some(_) => version.clone(),
            None => version.pinned(&self.latest_tag()?),
        };
        let vars = TemplateVars::new(version.tag(), tokens);
        let url = expand_template(self.url, &vars);
        let asset = Asset {
            name: file_name_from_url(&url),
            download_url: url,
        };
        info!(url = %asset.download_url, "built download URL");
        let checksum_url = match self.checksum {
            Some(Checksum::Url(template)) => {
                Some(expand_template(template, &vars.clone().with_url(&asset.download_url)))
            }
            _ => None,
        };
        Ok(LocatedRelease {
            version,
            asset,
            checksum_url,
        })
    }
}
