use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use anyhow::{Context, Result};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::redirect::Policy;
use reqwest::tls;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use crate::config::NetworkSettings;
use crate::error::{InstallError, StageResult};

const MAX_REDIRECTS: usize = 10;

/// Exit status used when an interrupt signal aborts the process.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Scratch directories alive in this process, removed by the signal handler.
static LIVE_SCRATCH: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

/// Registers the SIGINT/SIGTERM handler that removes scratch directories
/// before exiting. Must run before the first [`ScratchDir`] is created.
pub fn install_interrupt_handler() -> Result<()> {
    ctrlc::set_handler(|| {
        remove_live_scratch();
        std::process::exit(EXIT_INTERRUPTED);
    })
    .context("Could not register the interrupt handler")
}

fn remove_live_scratch() {
    let mut live = LIVE_SCRATCH.lock().unwrap_or_else(|e| e.into_inner());
    for path in live.drain(..) {
        let _ = std::fs::remove_dir_all(&path);
    }
}

/// A temporary directory removed when dropped and on interruption.
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub fn new() -> StageResult<Self> {
        // Held across creation so an interrupt never misses a fresh directory.
        let mut live = LIVE_SCRATCH.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::Builder::new()
            .prefix("toolstall-")
            .tempdir()
            .map_err(|source| InstallError::CreateDir {
                path: std::env::temp_dir(),
                source,
            })?;
        live.push(dir.path().to_path_buf());
        drop(live);
        debug!(path = %dir.path().display(), "created scratch directory");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let mut live = LIVE_SCRATCH.lock().unwrap_or_else(|e| e.into_inner());
        live.retain(|p| p != self.dir.path());
        debug!(path = %self.dir.path().display(), "removing scratch directory");
    }
}

/// A downloaded artifact and its SHA-256 digest.
#[derive(Debug, Clone)]
pub struct Download {
    pub path: PathBuf,
    pub sha256: String,
}

/// Blocking HTTP client for release metadata and artifacts.
pub struct Fetcher {
    client: Client,
    api_url: String,
    token: Option<String>,
}

impl Fetcher {
    /// Builds the client: TLS 1.3 minimum, HTTPS only (unless `allow_http`),
    /// no redirects to plain HTTP, explicit timeouts.
    pub fn new(settings: &NetworkSettings) -> Result<Self> {
        let allow_http = settings.allow_http;
        let redirects = Policy::custom(move |attempt| {
            let insecure = attempt.url().scheme() != "https";
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else if insecure && !allow_http {
                let target = attempt.url().to_string();
                attempt.error(format!("refusing redirect to non-HTTPS URL {target}"))
            } else {
                attempt.follow()
            }
        });
        let timeout = Duration::from_secs(settings.timeout_secs);
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .min_tls_version(tls::Version::TLS_1_3)
            .https_only(!allow_http)
            .redirect(redirects)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .context("Could not build the HTTP client")?;
        if allow_http {
            warn!("plain HTTP is allowed; downloads are not protected in transit");
        }
        Ok(Self {
            client,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
        })
    }

    /// Base URL of the GitHub REST API.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn get(&self, url: &str) -> RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) if self.wants_token(url) => request.bearer_auth(token),
            _ => request,
        }
    }

    /// The token only goes to the API host and github.com itself.
    fn wants_token(&self, url: &str) -> bool {
        url.starts_with(&self.api_url) || url.starts_with("https://github.com/")
    }

    /// GETs `url` as text; errors are plain reasons so callers pick the variant.
    fn fetch_body(&self, url: &str) -> std::result::Result<String, String> {
        debug!(%url, "fetching metadata");
        let response = self
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        response.text().map_err(|e| e.to_string())
    }

    /// GETs a JSON metadata document.
    pub fn get_json<T: DeserializeOwned>(&self, url: &str) -> StageResult<T> {
        let body = self.get_text(url)?;
        serde_json::from_str(&body).map_err(|e| InstallError::MalformedMetadata {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// GETs a plain-text metadata document.
    pub fn get_text(&self, url: &str) -> StageResult<String> {
        self.fetch_body(url).map_err(|reason| InstallError::ReleaseFetch {
            url: url.to_string(),
            reason,
        })
    }

    /// Streams `url` into `dir` and hashes the result.
    pub fn download(&self, url: &str, dir: &ScratchDir) -> StageResult<Download> {
        let failed = |reason: String| InstallError::Download {
            url: url.to_string(),
            reason,
        };
        info!(%url, "downloading");
        let mut response = self.get(url).send().map_err(|e| failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }
        let path = dir.path().join(file_name_from_url(url));
        let mut file = File::create(&path).map_err(|source| InstallError::Write {
            path: path.clone(),
            source,
        })?;
        let bytes = response
            .copy_to(&mut file)
            .map_err(|e| failed(e.to_string()))?;
        let sha256 = sha256_file(&path).map_err(|source| InstallError::Write {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), bytes, %sha256, "download complete");
        Ok(Download { path, sha256 })
    }

    /// Fetches the checksum document at `checksum_url` and compares the entry
    /// for `name` with the artifact's digest.
    pub fn verify_checksum(&self, download: &Download, name: &str, checksum_url: &str) -> StageResult<()> {
        let text = self.fetch_body(checksum_url).map_err(|reason| InstallError::Download {
            url: checksum_url.to_string(),
            reason,
        })?;
        let expected = find_checksum(&text, name).ok_or_else(|| InstallError::ChecksumMissing {
            name: name.to_string(),
            source_url: checksum_url.to_string(),
        })?;
        if !expected.eq_ignore_ascii_case(&download.sha256) {
            return Err(InstallError::ChecksumMismatch {
                name: name.to_string(),
                expected,
                actual: download.sha256.clone(),
            });
        }
        info!(%name, "checksum verified");
        Ok(())
    }
}

/// Last path segment of a URL, without query or fragment.
pub fn file_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("download")
        .to_string()
}

pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Finds the digest for `name` in a checksum document.
///
/// Accepts `sha256sum` manifests (`<hex>  [*|./]name` per line) and
/// single-digest sidecar files.
pub fn find_checksum(text: &str, name: &str) -> Option<String> {
    let is_digest = |s: &str| s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit());
    for line in text.lines() {
        let mut fields = line.split_whitespace();
        let (Some(digest), Some(file)) = (fields.next(), fields.next()) else {
            continue;
        };
        let file = file.trim_start_matches('*').trim_start_matches("./");
        if file == name && is_digest(digest) {
            return Some(digest.to_ascii_lowercase());
        }
    }
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    match lines.as_slice() {
        [only] => {
            let digest = only.split_whitespace().next()?;
            let names_other_file = only
                .split_whitespace()
                .nth(1)
                .is_some_and(|f| f.trim_start_matches('*').trim_start_matches("./") != name);
            (is_digest(digest) && !names_other_file).then(|| digest.to_ascii_lowercase())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_from_url("https://dl.k8s.io/release/v1.30.0/bin/linux/amd64/kubectl"),
            "kubectl"
        );
        assert_eq!(file_name_from_url("https://go.dev/VERSION?m=text"), "VERSION");
        assert_eq!(file_name_from_url("https://example.com/dir/"), "dir");
    }

    #[test]
    fn test_sha256_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, "test").unwrap();
        assert_eq!(sha256_file(&path).unwrap(), DIGEST);
    }

    #[test]
    fn test_find_checksum_in_manifest() {
        let text = format!(
            "{}  other.tar.gz\n{DIGEST}  tool_linux_amd64.tar.gz\n",
            "0".repeat(64)
        );
        assert_eq!(find_checksum(&text, "tool_linux_amd64.tar.gz").as_deref(), Some(DIGEST));
        assert_eq!(find_checksum(&text, "missing.zip"), None);
    }

    #[test]
    fn test_find_checksum_strips_markers() {
        let text = format!("{DIGEST} *./just.tar.gz\n");
        assert_eq!(find_checksum(&text, "just.tar.gz").as_deref(), Some(DIGEST));
    }

    #[test]
    fn test_find_checksum_sidecar() {
        assert_eq!(find_checksum(&format!("{DIGEST}\n"), "kubectl").as_deref(), Some(DIGEST));
        let other = format!("{DIGEST}  helm-v3.tar.gz");
        assert_eq!(find_checksum(&other, "kubectl"), None);
    }

    #[test]
    fn test_scratch_dir_is_removed_on_drop() {
        let scratch = ScratchDir::new().unwrap();
        let path = scratch.path().to_path_buf();
        std::fs::write(path.join("partial"), b"x").unwrap();
        assert!(LIVE_SCRATCH.lock().unwrap().contains(&path));
        drop(scratch);
        assert!(!path.exists());
        assert!(!LIVE_SCRATCH.lock().unwrap().contains(&path));

        // The interrupt path removes directories that are still alive.
        let scratch = ScratchDir::new().unwrap();
        let path = scratch.path().to_path_buf();
        std::fs::write(path.join("partial"), b"x").unwrap();
        remove_live_scratch();
        assert!(!path.exists());
        assert!(!LIVE_SCRATCH.lock().unwrap().contains(&path));
        drop(scratch);
    }

    #[test]
    fn test_http_rejected_without_allow_http() {
        let settings = NetworkSettings::default();
        let fetcher = Fetcher::new(&settings).unwrap();
        let err = fetcher.get_text("http://127.0.0.1:9/metadata").unwrap_err();
        assert!(matches!(err, InstallError::ReleaseFetch { .. }));
    }
}
