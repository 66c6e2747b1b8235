/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Artifact ingestion: fetch, verify and reconcile a release tarball.
//!
//! A publication request names a URL, a version and a SHA-256 digest. The
//! pipeline fetches the artifact (20 s deadline), caps it at 20 MiB of
//! transferred bytes, hashes and counts the on-the-wire bytes, walks the
//! tar archive (gzip selected by Content-Type, with a magic-number sniff
//! for `application/octet-stream`), extracts the application manifest and
//! an optional `package.json`, and cross-checks the manifest fields
//! against the request. Every check failure is a 422; reconciliation
//! collects all field violations into a single message so an editor fixes
//! everything in one publish cycle.
//!
//! Nothing here persists: the output is an in-memory [`Version`] the store
//! adapter writes as the final step of a publication.

use std::io::{self, Read};

use async_trait::async_trait;
use chrono::Utc;
use flate2::read::GzDecoder;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::channel::{channel_of, version_match, Channel};
use crate::error::RegistryError;
use crate::models::{version_id, AppType, Version, VersionOptions};

/// Cap on transferred artifact bytes.
pub const MAX_TARBALL_SIZE: u64 = 20 * 1024 * 1024;

/// Overall deadline for the artifact fetch.
pub const FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(20);

/// Content types for which gzip decompression is mandatory.
const GZIP_CONTENT_TYPES: &[&str] = &[
    "application/gzip",
    "application/x-gzip",
    "application/x-tgz",
    "application/tar+gzip",
];

const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

const MANIFEST_WEBAPP: &str = "manifest.webapp";
const MANIFEST_KONNECTOR: &str = "manifest.konnector";
const PACKAGE_JSON: &str = "package.json";

/// A fetched artifact: the response Content-Type and its body.
///
/// Fetchers may deliver more than [`MAX_TARBALL_SIZE`] bytes; validation
/// only ever reads up to the cap.
pub struct FetchedTarball {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Transport used to retrieve release artifacts. Abstracted so tests can
/// serve archives without a network.
#[async_trait]
pub trait TarballFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedTarball, RegistryError>;
}

/// [`TarballFetcher`] backed by reqwest, with the 20 s overall deadline.
pub struct HttpTarballFetcher {
    client: reqwest::Client,
}

impl HttpTarballFetcher {
    pub fn new() -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| {
                RegistryError::Unprocessable(format!("Could not create HTTP client: {}", e))
            })?;
        Ok(HttpTarballFetcher { client })
    }
}

#[async_trait]
impl TarballFetcher for HttpTarballFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedTarball, RegistryError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RegistryError::unreachable_version(url, e))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(RegistryError::unreachable_version(
                url,
                format!("server responded with code {}", response.status().as_u16()),
            ));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| RegistryError::unreachable_version(url, e))?
        {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > MAX_TARBALL_SIZE {
                // Past the cap the rest of the stream is of no use;
                // validation fails on the truncated archive.
                break;
            }
        }
        debug!(url, bytes = body.len(), "artifact fetched");
        Ok(FetchedTarball { content_type, body })
    }
}

/// Fetch and validate an artifact, producing the in-memory [`Version`].
pub async fn download_version(
    fetcher: &dyn TarballFetcher,
    opts: &VersionOptions,
) -> Result<Version, RegistryError> {
    let fetched = fetcher.fetch(&opts.url).await?;
    validate_tarball(opts, fetched)
}

fn tar_error(url: &str, err: io::Error) -> RegistryError {
    // The tar reader reports a stream cut by the size cap either as
    // UnexpectedEof or as an "unexpected EOF" skip failure.
    let truncated =
        err.kind() == io::ErrorKind::UnexpectedEof || err.to_string().contains("unexpected EOF");
    if truncated {
        RegistryError::unreachable_version(url, format!("file is too big: {}", err))
    } else {
        RegistryError::unreachable_version(url, err)
    }
}

#[derive(Deserialize)]
struct PackageJson {
    version: Option<String>,
}

/// Verify a fetched artifact against its publication request.
///
/// Hash and byte count cover the compressed, on-the-wire bytes, truncated
/// at [`MAX_TARBALL_SIZE`].
pub fn validate_tarball(
    opts: &VersionOptions,
    fetched: FetchedTarball,
) -> Result<Version, RegistryError> {
    let url = &opts.url;
    let cap = MAX_TARBALL_SIZE as usize;
    let wire = &fetched.body[..fetched.body.len().min(cap)];
    let size = wire.len() as i64;
    let digest = Sha256::digest(wire);

    let content_type = fetched.content_type.as_deref().unwrap_or("");
    let gzipped = wire.starts_with(&GZIP_MAGIC);
    let reader: Box<dyn Read + '_> = if GZIP_CONTENT_TYPES.contains(&content_type) {
        if !gzipped {
            return Err(RegistryError::unreachable_version(
                url,
                "content is not gzip encoded",
            ));
        }
        Box::new(GzDecoder::new(wire))
    } else if content_type == "application/octet-stream" && gzipped {
        Box::new(GzDecoder::new(wire))
    } else {
        Box::new(wire)
    };

    let mut archive = tar::Archive::new(reader);
    // Common top-level directory of the archive: set by the first nested
    // entry, cleared for good when a later entry disagrees.
    let mut prefix: Option<String> = None;
    let mut manifest: Option<(AppType, Vec<u8>)> = None;
    let mut package_version: Option<String> = None;

    let entries = archive
        .entries()
        .map_err(|e| RegistryError::unreachable_version(url, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| tar_error(url, e))?;
        let kind = entry.header().entry_type();
        if !kind.is_file() && !kind.is_dir() {
            continue;
        }

        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let logical = match name.split_once('/') {
            Some((top, rest)) => {
                match prefix.as_mut() {
                    None => prefix = Some(top.to_string()),
                    Some(p) if p != top => p.clear(),
                    Some(_) => {}
                }
                rest.to_string()
            }
            None => name,
        };

        match logical.as_str() {
            MANIFEST_WEBAPP | MANIFEST_KONNECTOR => {
                let app_type = if logical == MANIFEST_WEBAPP {
                    AppType::Webapp
                } else {
                    AppType::Konnector
                };
                let mut content = Vec::new();
                entry
                    .read_to_end(&mut content)
                    .map_err(|e| tar_error(url, e))?;
                manifest = Some((app_type, content));
            }
            PACKAGE_JSON => {
                let mut content = Vec::new();
                entry
                    .read_to_end(&mut content)
                    .map_err(|e| tar_error(url, e))?;
                let package: PackageJson = serde_json::from_slice(&content).map_err(|e| {
                    RegistryError::Unprocessable(format!(
                        "File package.json is not valid in {}: {}",
                        url, e
                    ))
                })?;
                package_version = package.version;
            }
            _ => {}
        }
    }

    let declared = hex::decode(&opts.sha256).unwrap_or_default();
    if declared != digest.as_slice() {
        return Err(RegistryError::Unprocessable(
            "Checksum does not match the calculated one".to_string(),
        ));
    }

    let Some((app_type, manifest_content)) = manifest else {
        return Err(RegistryError::Unprocessable(
            "Application tarball does not contain a manifest".to_string(),
        ));
    };

    let fields: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(&manifest_content).map_err(|e| {
            RegistryError::Unprocessable(format!("Content of the manifest is not JSON valid: {}", e))
        })?;

    reconcile(opts, &fields, package_version.as_deref())?;

    // Non-empty per the reconciliation above.
    let editor = fields
        .get("editor")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let slug = fields
        .get("slug")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let manifest_raw = String::from_utf8(manifest_content)
        .map_err(|e| {
            RegistryError::Unprocessable(format!("Content of the manifest is not JSON valid: {}", e))
        })
        .and_then(|text| {
            serde_json::value::RawValue::from_string(text).map_err(|e| {
                RegistryError::Unprocessable(format!(
                    "Content of the manifest is not JSON valid: {}",
                    e
                ))
            })
        })?;

    Ok(Version {
        id: Some(version_id(&slug, &opts.version)),
        rev: None,
        slug,
        editor,
        app_type,
        version: opts.version.clone(),
        manifest: manifest_raw,
        created_at: Utc::now(),
        url: opts.url.clone(),
        size,
        sha256: opts.sha256.clone(),
        tar_prefix: prefix.unwrap_or_default(),
        attachments: None,
    })
}

/// Cross-check the manifest (and an optional `package.json` version)
/// against the publication request, accumulating every violation.
///
/// Version rule: outside the dev channel the declared version must match
/// exactly; a dev build only has to share the numeric triple, since its
/// suffix encodes a commit hash the manifest does not carry.
fn reconcile(
    opts: &VersionOptions,
    manifest: &serde_json::Map<String, serde_json::Value>,
    package_version: Option<&str>,
) -> Result<(), RegistryError> {
    let mut problems: Vec<String> = Vec::new();

    let editor = manifest.get("editor").and_then(|v| v.as_str());
    if editor.map_or(true, str::is_empty) {
        problems.push(r#""editor" field is empty"#.to_string());
    }

    let slug = manifest.get("slug").and_then(|v| v.as_str());
    if slug.map_or(true, str::is_empty) {
        problems.push(r#""slug" field is empty"#.to_string());
    }

    let channel = channel_of(&opts.version);
    let manifest_version = manifest.get("version").and_then(|v| v.as_str());
    let version_matches = match manifest_version {
        Some(version) if channel != Channel::Dev => version == opts.version,
        Some(version) => version_match(&opts.version, version),
        None => false,
    };
    if !version_matches {
        problems.push(format!(
            r#""version" field does not match ("{}" != "{}")"#,
            manifest_version.unwrap_or_default(),
            opts.version
        ));
    }

    if let Some(package_version) = package_version {
        let package_matches = if channel != Channel::Dev {
            package_version == opts.version
        } else {
            version_match(&opts.version, package_version)
        };
        if !package_matches {
            problems.push(format!(
                r#"version from package.json ("{}" != "{}")"#,
                package_version, opts.version
            ));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(RegistryError::Unprocessable(format!(
            "Content of the manifest does not match: {}",
            problems.join("; ")
        )))
    }
}
