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

//! Discovery layer: channel-aware lookups and listings.
//!
//! "Latest version" and "versions list" are fetched from the document
//! store for every application in a listing, so both paths are memoized in
//! the registry's LRU caches (256 entries, 5 minute TTL). The caches are
//! read-through: a miss is a fresh read, a failure to decode a cached
//! entry is treated as a miss, and staleness after a publication is
//! bounded by the TTL on top of the invalidation done at version-create.

use std::collections::BTreeMap;

use tracing::debug;

use super::{from_doc, version_cache_key, Registry, Space, APPS_INDEXES};
use crate::channel::{channel_of, Channel};
use crate::error::RegistryError;
use crate::models::{is_valid_slug, App, AppVersions, Version, VersionOptions};
use crate::store::{DocumentStore, FindQuery, Selector, SortOrder, ViewQuery};
use crate::tarball::{download_version, TarballFetcher};

const VALID_FILTERS: &[&str] = &["type", "editor", "category", "tags", "locales"];
const VALID_SORTS: &[&str] = &["slug", "type", "editor", "category", "created_at", "updated_at"];

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 200;
const VERSIONS_LIST_LIMIT: usize = 2000;
const MAINTENANCE_LIMIT: usize = 1000;

/// Options for [`Registry::get_apps_list`].
#[derive(Debug, Clone)]
pub struct AppsListOptions {
    /// Page size; 0 means the default of 50, values above 200 are clamped.
    pub limit: usize,
    /// Opaque pagination cursor from a previous call; start at 0.
    pub cursor: i64,
    /// Sort field, optionally prefixed with `-` for descending order.
    pub sort: String,
    /// Equality filters over `{type, editor, category}`, contains-all
    /// filters over comma-separated `{tags, locales}`. Unknown fields are
    /// ignored.
    pub filters: BTreeMap<String, String>,
    pub latest_version_channel: Channel,
    pub versions_channel: Channel,
}

impl Default for AppsListOptions {
    fn default() -> Self {
        AppsListOptions {
            limit: 0,
            cursor: 0,
            sort: String::new(),
            filters: BTreeMap::new(),
            latest_version_channel: Channel::Stable,
            versions_channel: Channel::Stable,
        }
    }
}

fn is_design_doc(doc: &serde_json::Value) -> bool {
    doc.get("_id")
        .and_then(|id| id.as_str())
        .map(|id| id.starts_with("_design/"))
        .unwrap_or(false)
}

impl<S: DocumentStore> Registry<S> {
    /// Fetch an application enriched with its version lists for `channel`
    /// and its latest stable version (other channels' latest is reachable
    /// through [`Registry::find_latest_version`]).
    pub async fn find_app(
        &self,
        space: &Space,
        slug: &str,
        channel: Channel,
    ) -> Result<App, RegistryError> {
        let mut app = self.find_app_doc(space, slug).await?;
        app.versions = Some(self.find_app_versions(space, &app.slug, channel).await?);
        app.latest_version = match self.find_latest_version(space, &app.slug, Channel::Stable).await
        {
            Ok(version) => Some(version),
            Err(RegistryError::VersionNotFound) => None,
            Err(err) => return Err(err),
        };
        Ok(app)
    }

    /// The greatest version of an application on the given channel.
    pub async fn find_latest_version(
        &self,
        space: &Space,
        slug: &str,
        channel: Channel,
    ) -> Result<Version, RegistryError> {
        if !is_valid_slug(slug) {
            return Err(RegistryError::AppSlugInvalid);
        }

        let key = version_cache_key(space, slug, channel);
        if let Some(bytes) = self.cache_versions_latest.get(&key) {
            if let Ok(version) = serde_json::from_slice::<Version>(&bytes) {
                return Ok(version);
            }
        }

        let rows = self
            .version_view_query(
                space,
                slug,
                channel,
                ViewQuery {
                    limit: Some(1),
                    descending: true,
                    include_docs: true,
                },
            )
            .await?;
        let Some(row) = rows.into_iter().next() else {
            return Err(RegistryError::VersionNotFound);
        };
        let doc = row.doc.ok_or(RegistryError::VersionNotFound)?;
        let mut latest: Version = from_doc(doc)?;
        latest.strip_internal_fields();

        if let Ok(bytes) = serde_json::to_vec(&latest) {
            self.cache_versions_latest.add(key, bytes);
        }
        Ok(latest)
    }

    /// The ordered version lists of an application, as seen from the given
    /// channel.
    ///
    /// Composition is inclusive: a Beta request also carries the stable
    /// list; a Dev request carries everything, with stable versions also
    /// counted as beta. Dev builds never appear in the beta list.
    pub async fn find_app_versions(
        &self,
        space: &Space,
        slug: &str,
        channel: Channel,
    ) -> Result<AppVersions, RegistryError> {
        if !is_valid_slug(slug) {
            return Err(RegistryError::AppSlugInvalid);
        }

        let key = version_cache_key(space, slug, channel);
        if let Some(bytes) = self.cache_versions_list.get(&key) {
            if let Ok(versions) = serde_json::from_slice::<AppVersions>(&bytes) {
                return Ok(versions);
            }
        }

        let rows = self
            .version_view_query(
                space,
                slug,
                channel,
                ViewQuery {
                    limit: Some(VERSIONS_LIST_LIMIT),
                    descending: false,
                    include_docs: false,
                },
            )
            .await?;
        let all: Vec<String> = rows
            .into_iter()
            .filter_map(|row| row.value.as_str().map(str::to_string))
            .collect();

        let versions = match channel {
            Channel::Stable => AppVersions {
                stable: all,
                ..Default::default()
            },
            Channel::Beta => {
                let stable = all
                    .iter()
                    .filter(|v| channel_of(v) == Channel::Stable)
                    .cloned()
                    .collect();
                AppVersions {
                    stable,
                    beta: all,
                    dev: Vec::new(),
                }
            }
            Channel::Dev => {
                let stable: Vec<String> = all
                    .iter()
                    .filter(|v| channel_of(v) == Channel::Stable)
                    .cloned()
                    .collect();
                let beta = all
                    .iter()
                    .filter(|v| channel_of(v) != Channel::Dev)
                    .cloned()
                    .collect();
                AppVersions {
                    stable,
                    beta,
                    dev: all,
                }
            }
        };

        if let Ok(bytes) = serde_json::to_vec(&versions) {
            self.cache_versions_list.add(key, bytes);
        }
        Ok(versions)
    }

    /// Cursor-paginated listing of applications.
    ///
    /// Returns the next cursor (−1 when the end of the list was reached)
    /// and at most `limit` applications, each enriched through the cached
    /// discovery paths.
    pub async fn get_apps_list(
        &self,
        space: &Space,
        opts: &AppsListOptions,
    ) -> Result<(i64, Vec<App>), RegistryError> {
        let (sort_field, order) = match opts.sort.strip_prefix('-') {
            Some(field) => (field, SortOrder::Desc),
            None => (opts.sort.as_str(), SortOrder::Asc),
        };
        let sort_field = if VALID_SORTS.contains(&sort_field) {
            sort_field
        } else {
            "slug"
        };

        let mut sort = vec![(sort_field.to_string(), order)];
        if sort_field != "slug" {
            sort.push(("slug".to_string(), order));
        }

        let mut selector = vec![(sort_field.to_string(), Selector::Exists)];
        for (name, value) in &opts.filters {
            if !VALID_FILTERS.contains(&name.as_str()) {
                continue;
            }
            let clause = match name.as_str() {
                "tags" | "locales" => {
                    Selector::ContainsAll(value.split(',').map(str::to_string).collect())
                }
                _ => Selector::Eq(serde_json::Value::String(value.clone())),
            };
            selector.push((name.clone(), clause));
        }

        let limit = match opts.limit {
            0 => DEFAULT_LIMIT,
            n => n.min(MAX_LIMIT),
        };
        let mut cursor = opts.cursor.max(0);

        // Fetch one row past the page to tell "more pages" from "done",
        // plus headroom for design documents a backend may leak into the
        // result set.
        let designs_count = APPS_INDEXES.len();
        let query = FindQuery {
            use_index: Some(format!("apps-index-by-{}", sort_field)),
            selector,
            sort,
            skip: cursor as usize,
            limit: Some(limit + designs_count + 1),
        };
        debug!(space = space.prefix(), sort_field, cursor, "listing applications");
        let rows = self.store.find(space.apps_db(), query).await?;

        let mut apps: Vec<App> = Vec::with_capacity(rows.len());
        for row in rows {
            if is_design_doc(&row) {
                continue;
            }
            apps.push(from_doc(row)?);
        }

        if apps.is_empty() {
            return Ok((-1, apps));
        }
        if apps.len() > limit {
            apps.truncate(limit);
            cursor += apps.len() as i64;
        } else {
            cursor = -1;
        }

        for app in &mut apps {
            app.versions = Some(
                self.find_app_versions(space, &app.slug, opts.versions_channel)
                    .await?,
            );
            app.latest_version = match self
                .find_latest_version(space, &app.slug, opts.latest_version_channel)
                .await
            {
                Ok(version) => Some(version),
                Err(RegistryError::VersionNotFound) => None,
                Err(err) => return Err(err),
            };
        }

        Ok((cursor, apps))
    }

    /// Every version awaiting approval in this space.
    pub async fn get_pending_versions(&self, space: &Space) -> Result<Vec<Version>, RegistryError> {
        let docs = self.store.all_docs(space.pending_versions_db()).await?;
        let mut versions = Vec::new();
        for doc in docs {
            if is_design_doc(&doc) {
                continue;
            }
            versions.push(from_doc(doc)?);
        }
        Ok(versions)
    }

    /// Applications currently flagged for maintenance.
    pub async fn get_maintenance_apps(&self, space: &Space) -> Result<Vec<App>, RegistryError> {
        let query = FindQuery {
            use_index: Some("apps-index-by-maintenance".to_string()),
            selector: vec![(
                "maintenance_activated".to_string(),
                Selector::Eq(serde_json::Value::Bool(true)),
            )],
            limit: Some(MAINTENANCE_LIMIT),
            ..Default::default()
        };
        let rows = self.store.find(space.apps_db(), query).await?;
        let mut apps = Vec::new();
        for row in rows {
            if is_design_doc(&row) {
                continue;
            }
            apps.push(from_doc(row)?);
        }
        Ok(apps)
    }

    /// Full publication pipeline for one version: validate the request,
    /// fetch and verify the artifact, reconcile its manifest, and append
    /// the resulting version. The store write is the only side effect and
    /// happens last; any earlier failure leaves no trace.
    pub async fn publish_version(
        &self,
        space: &Space,
        fetcher: &dyn TarballFetcher,
        app_slug: &str,
        opts: &VersionOptions,
    ) -> Result<Version, RegistryError> {
        if !is_valid_slug(app_slug) {
            return Err(RegistryError::AppSlugInvalid);
        }
        opts.validate()?;

        let ver = download_version(fetcher, opts).await?;
        if !ver.slug.eq_ignore_ascii_case(app_slug) {
            return Err(RegistryError::AppSlugMismatch);
        }

        let app = self.find_app_doc(space, app_slug).await?;
        self.create_version(space, &app, ver).await
    }
}
