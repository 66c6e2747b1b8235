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

//! End-to-end publication scenarios: archive ingestion through to the
//! durable version record, against the in-memory store and a canned
//! fetcher.

use std::collections::HashMap;
use std::io::Write;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};

use lamproom::tarball::FetchedTarball;
use lamproom::{
    App, AppType, MemoryStore, Registry, RegistryError, Space, TarballFetcher, VersionOptions,
    MAX_TARBALL_SIZE,
};

/// Serves canned bodies by URL.
struct CannedFetcher {
    responses: HashMap<String, (String, Vec<u8>)>,
}

impl CannedFetcher {
    fn new() -> Self {
        CannedFetcher {
            responses: HashMap::new(),
        }
    }

    fn serve(mut self, url: &str, content_type: &str, body: Vec<u8>) -> Self {
        self.responses
            .insert(url.to_string(), (content_type.to_string(), body));
        self
    }
}

#[async_trait]
impl TarballFetcher for CannedFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedTarball, RegistryError> {
        match self.responses.get(url) {
            Some((content_type, body)) => Ok(FetchedTarball {
                content_type: Some(content_type.clone()),
                body: body.clone(),
            }),
            None => Err(RegistryError::Unprocessable(format!(
                "Could not reach version on specified url {}: no canned response",
                url
            ))),
        }
    }
}

fn tar_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, *name, *content).unwrap();
    }
    builder.into_inner().unwrap()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn make_app(slug: &str, app_type: AppType) -> App {
    App {
        id: None,
        rev: None,
        slug: slug.to_string(),
        name: None,
        app_type,
        editor: "Cozy".to_string(),
        developer: None,
        description: None,
        category: String::new(),
        repository: String::new(),
        created_at: None,
        updated_at: None,
        locales: None,
        tags: None,
        logo_url: String::new(),
        screenshot_urls: None,
        maintenance_activated: None,
        versions: None,
        latest_version: None,
    }
}

fn make_opts(version: &str, url: &str, body: &[u8]) -> VersionOptions {
    VersionOptions {
        version: version.to_string(),
        url: url.to_string(),
        sha256: sha256_hex(body),
    }
}

async fn make_registry() -> (Registry<MemoryStore>, Space) {
    let registry = Registry::new(MemoryStore::new());
    let space = Space::default();
    registry.init_space(&space).await.unwrap();
    (registry, space)
}

const NOTES_URL: &str = "https://downloads.example.org/notes.tar.gz";
const NOTES_MANIFEST: &[u8] = br#"{"editor":"Cozy","slug":"notes","version":"1.2.3"}"#;

#[tokio::test]
async fn test_publish_stores_version() {
    // E1: a well-formed gzipped archive with a matching digest.
    let (registry, space) = make_registry().await;
    registry
        .create_or_update_app(&space, make_app("notes", AppType::Webapp), "Cozy")
        .await
        .unwrap();

    let body = gzip(&tar_bytes(&[("notes/manifest.webapp", NOTES_MANIFEST)]));
    let size = body.len() as i64;
    let opts = make_opts("1.2.3", NOTES_URL, &body);
    let fetcher = CannedFetcher::new().serve(NOTES_URL, "application/gzip", body);

    let published = registry
        .publish_version(&space, &fetcher, "notes", &opts)
        .await
        .unwrap();
    assert_eq!(published.slug, "notes");
    assert_eq!(published.app_type, AppType::Webapp);
    assert_eq!(published.tar_prefix, "notes");
    assert_eq!(published.size, size);
    assert_eq!(published.sha256, opts.sha256);

    let stored = registry
        .find_published_version(&space, "notes", "1.2.3")
        .await
        .unwrap();
    assert_eq!(stored.id.as_deref(), Some("notes-1.2.3"));
    assert_eq!(stored.editor, "Cozy");
    assert_eq!(stored.url, NOTES_URL);
    assert_eq!(stored.size, size);
}

#[tokio::test]
async fn test_publish_rejects_wrong_checksum() {
    // E2: same archive, declared digest off by one byte; nothing written.
    let (registry, space) = make_registry().await;
    registry
        .create_or_update_app(&space, make_app("notes", AppType::Webapp), "Cozy")
        .await
        .unwrap();

    let body = gzip(&tar_bytes(&[("notes/manifest.webapp", NOTES_MANIFEST)]));
    let mut opts = make_opts("1.2.3", NOTES_URL, &body);
    let mut digest = hex::decode(&opts.sha256).unwrap();
    digest[31] ^= 0x01;
    opts.sha256 = hex::encode(digest);
    let fetcher = CannedFetcher::new().serve(NOTES_URL, "application/gzip", body);

    let err = registry
        .publish_version(&space, &fetcher, "notes", &opts)
        .await
        .unwrap_err();
    assert_eq!(err.status(), 422);

    assert!(matches!(
        registry.find_version(&space, "notes", "1.2.3").await,
        Err(RegistryError::VersionNotFound)
    ));
}

#[tokio::test]
async fn test_publish_dev_build_matches_on_triple() {
    // E3: a dev build only shares the numeric triple with its manifest.
    let (registry, space) = make_registry().await;
    registry
        .create_or_update_app(&space, make_app("notes", AppType::Webapp), "Cozy")
        .await
        .unwrap();

    let body = gzip(&tar_bytes(&[("notes/manifest.webapp", NOTES_MANIFEST)]));
    let opts = make_opts("1.2.3-dev.abc123", NOTES_URL, &body);
    let fetcher = CannedFetcher::new().serve(NOTES_URL, "application/gzip", body);

    let published = registry
        .publish_version(&space, &fetcher, "notes", &opts)
        .await
        .unwrap();
    assert_eq!(published.version, "1.2.3-dev.abc123");
    assert_eq!(published.id.as_deref(), Some("notes-1.2.3-dev.abc123"));
}

#[tokio::test]
async fn test_publish_dev_build_rejects_wrong_triple() {
    // E4: the triple of a dev build must still match the manifest.
    let (registry, space) = make_registry().await;
    registry
        .create_or_update_app(&space, make_app("notes", AppType::Webapp), "Cozy")
        .await
        .unwrap();

    let manifest = br#"{"editor":"Cozy","slug":"notes","version":"1.2.4"}"#;
    let body = gzip(&tar_bytes(&[("notes/manifest.webapp", manifest)]));
    let opts = make_opts("1.2.3-dev.abc123", NOTES_URL, &body);
    let fetcher = CannedFetcher::new().serve(NOTES_URL, "application/gzip", body);

    let err = registry
        .publish_version(&space, &fetcher, "notes", &opts)
        .await
        .unwrap_err();
    assert_eq!(err.status(), 422);
    assert!(err.to_string().contains("version"));
}

#[tokio::test]
async fn test_concurrent_publications_race_to_one_winner() {
    // E5: two concurrent publications of the same (slug, version); the
    // store's unique id constraint picks the winner.
    let (registry, space) = make_registry().await;
    registry
        .create_or_update_app(&space, make_app("notes", AppType::Webapp), "Cozy")
        .await
        .unwrap();

    let body = gzip(&tar_bytes(&[("notes/manifest.webapp", NOTES_MANIFEST)]));
    let opts = make_opts("1.2.3", NOTES_URL, &body);
    let fetcher = CannedFetcher::new().serve(NOTES_URL, "application/gzip", body);

    let (first, second) = tokio::join!(
        registry.publish_version(&space, &fetcher, "notes", &opts),
        registry.publish_version(&space, &fetcher, "notes", &opts),
    );

    let successes = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one publication must win");
    let loser = if first.is_err() { first } else { second };
    assert!(matches!(loser, Err(RegistryError::VersionAlreadyExists)));
}

#[tokio::test]
async fn test_publish_rejects_oversized_artifact() {
    // Property 5: a stream over 20 MiB of transferred bytes fails.
    let (registry, space) = make_registry().await;
    registry
        .create_or_update_app(&space, make_app("notes", AppType::Webapp), "Cozy")
        .await
        .unwrap();

    let huge = vec![0u8; (MAX_TARBALL_SIZE + 1024 * 1024) as usize];
    let body = tar_bytes(&[
        ("notes/blob.bin", huge.as_slice()),
        ("notes/manifest.webapp", NOTES_MANIFEST),
    ]);
    let opts = make_opts("1.2.3", NOTES_URL, &body);
    let fetcher = CannedFetcher::new().serve(NOTES_URL, "application/octet-stream", body);

    let err = registry
        .publish_version(&space, &fetcher, "notes", &opts)
        .await
        .unwrap_err();
    assert_eq!(err.status(), 422);
    assert!(err.to_string().contains("too big"), "got: {}", err);
}

#[tokio::test]
async fn test_publish_requires_existing_app() {
    let (registry, space) = make_registry().await;

    let body = gzip(&tar_bytes(&[("notes/manifest.webapp", NOTES_MANIFEST)]));
    let opts = make_opts("1.2.3", NOTES_URL, &body);
    let fetcher = CannedFetcher::new().serve(NOTES_URL, "application/gzip", body);

    assert!(matches!(
        registry
            .publish_version(&space, &fetcher, "notes", &opts)
            .await,
        Err(RegistryError::AppNotFound)
    ));
}

#[tokio::test]
async fn test_publish_rejects_slug_mismatch() {
    let (registry, space) = make_registry().await;
    registry
        .create_or_update_app(&space, make_app("photos", AppType::Webapp), "Cozy")
        .await
        .unwrap();

    let body = gzip(&tar_bytes(&[("notes/manifest.webapp", NOTES_MANIFEST)]));
    let opts = make_opts("1.2.3", NOTES_URL, &body);
    let fetcher = CannedFetcher::new().serve(NOTES_URL, "application/gzip", body);

    assert!(matches!(
        registry
            .publish_version(&space, &fetcher, "photos", &opts)
            .await,
        Err(RegistryError::AppSlugMismatch)
    ));
}

#[tokio::test]
async fn test_publish_validates_options_first() {
    let (registry, space) = make_registry().await;
    let fetcher = CannedFetcher::new();

    let opts = VersionOptions {
        version: "not-a-version".to_string(),
        url: "https://example.org/x.tgz".to_string(),
        sha256: "00".repeat(32),
    };
    let err = registry
        .publish_version(&space, &fetcher, "notes", &opts)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VersionInvalid");
    assert_eq!(err.status(), 400);
}

#[tokio::test]
async fn test_republish_same_version_conflicts() {
    let (registry, space) = make_registry().await;
    registry
        .create_or_update_app(&space, make_app("notes", AppType::Webapp), "Cozy")
        .await
        .unwrap();

    let body = gzip(&tar_bytes(&[("notes/manifest.webapp", NOTES_MANIFEST)]));
    let opts = make_opts("1.2.3", NOTES_URL, &body);
    let fetcher = CannedFetcher::new().serve(NOTES_URL, "application/gzip", body);

    registry
        .publish_version(&space, &fetcher, "notes", &opts)
        .await
        .unwrap();
    let err = registry
        .publish_version(&space, &fetcher, "notes", &opts)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::VersionAlreadyExists));
    assert_eq!(err.status(), 409);
}
