#![allow(dead_code)]

use std::path::Path;
use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use tokio::runtime::Runtime;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const FAKE_SCRIPT: &[u8] = b"#!/bin/sh\necho \"fake 1.0.0\"\n";

/// A mock release server. The runtime must outlive every request, so both are
/// kept together.
pub struct ReleaseServer {
    runtime: Runtime,
    server: MockServer,
}

impl ReleaseServer {
    pub fn start() -> Self {
        let runtime = Runtime::new().unwrap();
        let server = runtime.block_on(MockServer::start());
        Self { runtime, server }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn json(&self, route: &str, body: serde_json::Value) {
        self.runtime.block_on(
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(200).set_body_json(body))
                .mount(&self.server),
        );
    }

    pub fn bytes(&self, route: &str, body: Vec<u8>) {
        self.runtime.block_on(
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
                .mount(&self.server),
        );
    }

    /// Serves release `tag` of `acme/fake` with one tarball for linux/amd64 and
    /// a checksum manifest. `digest` overrides the published checksum.
    pub fn fake_release(&self, tag: &str, digest: Option<&str>) {
        let archive = fake_tarball();
        let name = "fake_linux_amd64.tar.gz";
        let digest = digest.map(str::to_string).unwrap_or_else(|| sha256_hex(&archive));
        let uri = self.uri();
        let release = serde_json::json!({
            "tag_name": tag,
            "assets": [
                {"name": name, "browser_download_url": format!("{uri}/download/{name}")},
                {"name": "fake_darwin_arm64.tar.gz", "browser_download_url": format!("{uri}/download/fake_darwin_arm64.tar.gz")},
                {"name": "checksums.txt", "browser_download_url": format!("{uri}/download/checksums.txt")}
            ]
        });
        self.json(&format!("/repos/acme/fake/releases/tags/{tag}"), release.clone());
        self.json("/repos/acme/fake/releases/latest", release);
        self.bytes(&format!("/download/{name}"), archive);
        self.bytes(
            "/download/checksums.txt",
            format!("{digest}  {name}\n").into_bytes(),
        );
    }
}

/// `fake-1.0.0/bin/fake`, a shell script printing its version.
pub fn fake_tarball() -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_size(FAKE_SCRIPT.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder
        .append_data(&mut header, "fake-1.0.0/bin/fake", FAKE_SCRIPT)
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// A config file pointing the GitHub API at `api_url` and declaring the
/// `fake` tool plus `extra` descriptor TOML.
pub fn write_config(dir: &Path, api_url: &str, extra: &str) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    let tools_dir = dir.join("tools");
    let tools_dir = tools_dir.display();
    let text = format!(
        r#"
[network]
api_url = "{api_url}"
allow_http = true
timeout_secs = 10

[install]
profiles = [".bashrc"]
tools_dir = "{tools_dir}"

[tools.fake]
description = "Test tool"
source = {{ kind = "github", repo = "acme/fake", asset = "fake_{{os}}_{{arch}}.tar.gz" }}
checksum = {{ asset = "checksums.txt" }}
{extra}
"#
    );
    std::fs::write(&path, text).unwrap();
    path
}
