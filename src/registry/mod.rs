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

//! Store adapter: spaces, index bootstrap, application upsert and version
//! creation.
//!
//! A [`Space`] is a logical tenant carrying its own `apps`, `versions`,
//! `pending-versions` and `editors` collections, optionally tagged with a
//! deployment prefix. The [`Registry`] owns the document-store handle and
//! the discovery caches; every operation takes the space it acts on, so no
//! global state is involved.
//!
//! Applications are updated in place (slug and type frozen after
//! creation); versions are append-only and never mutated, with the store's
//! unique-id constraint resolving concurrent publications of the same
//! (slug, version).

mod finders;
mod views;

pub use finders::AppsListOptions;

use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::Cache;
use crate::channel::{is_valid_version, Channel};
use crate::error::RegistryError;
use crate::models::{app_id, is_valid_slug, version_id, App, AppVersions, Localized, Version};
use crate::store::{Document, DocumentStore, StoreError};

/// Secondary indexes ensured over the `apps` collection, one per sortable
/// field.
pub(crate) const APPS_INDEXES: &[(&str, &[&str])] = &[
    ("by-slug", &["slug"]),
    ("by-type", &["type", "slug", "category"]),
    ("by-editor", &["editor", "slug", "category"]),
    ("by-category", &["category", "slug", "editor"]),
    ("by-created_at", &["created_at", "slug", "category", "editor"]),
    ("by-updated_at", &["updated_at", "slug", "category", "editor"]),
];

const VERSIONS_INDEX: (&str, &[&str]) = ("versions-index", &["version", "slug", "type"]);

const VERSIONS_CACHE_ENTRIES: usize = 256;
const VERSIONS_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// A logical tenant: the set of collection names one deployment space uses.
#[derive(Debug, Clone)]
pub struct Space {
    prefix: String,
    apps_db: String,
    vers_db: String,
    pending_vers_db: String,
    editors_db: String,
}

impl Space {
    /// Create a space, optionally tagged with a deployment prefix
    /// (`prefix-apps`, `prefix-versions`, ...).
    pub fn new(prefix: Option<&str>) -> Self {
        let tag = |name: &str| match prefix {
            Some(p) if !p.is_empty() => format!("{}-{}", p, name),
            _ => name.to_string(),
        };
        Space {
            prefix: prefix.unwrap_or_default().to_string(),
            apps_db: tag("apps"),
            vers_db: tag("versions"),
            pending_vers_db: tag("pending-versions"),
            editors_db: tag("editors"),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn apps_db(&self) -> &str {
        &self.apps_db
    }

    pub fn versions_db(&self) -> &str {
        &self.vers_db
    }

    pub fn pending_versions_db(&self) -> &str {
        &self.pending_vers_db
    }

    pub fn editors_db(&self) -> &str {
        &self.editors_db
    }
}

impl Default for Space {
    fn default() -> Self {
        Space::new(None)
    }
}

/// The registry core: a document-store handle plus the discovery caches.
pub struct Registry<S> {
    store: S,
    pub(crate) cache_versions_latest: Cache,
    pub(crate) cache_versions_list: Cache,
}

pub(crate) fn to_doc<T: Serialize>(value: &T) -> Result<Document, RegistryError> {
    serde_json::to_value(value)
        .map_err(|e| StoreError::Malformed(e.to_string()))
        .map_err(RegistryError::from)
}

pub(crate) fn from_doc<T: DeserializeOwned>(doc: Document) -> Result<T, RegistryError> {
    serde_json::from_value(doc)
        .map_err(|e| StoreError::Malformed(e.to_string()))
        .map_err(RegistryError::from)
}

/// Discovery cache key for one (space, slug, channel).
pub(crate) fn version_cache_key(space: &Space, slug: &str, channel: Channel) -> String {
    format!("{}/{}/{}", space.prefix(), app_id(slug), channel)
}

impl<S: DocumentStore> Registry<S> {
    /// Wrap a pre-initialized store handle.
    pub fn new(store: S) -> Self {
        Registry {
            store,
            cache_versions_latest: Cache::new(VERSIONS_CACHE_ENTRIES, VERSIONS_CACHE_TTL),
            cache_versions_list: Cache::new(VERSIONS_CACHE_ENTRIES, VERSIONS_CACHE_TTL),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Ensure a space's collections and indexes exist.
    pub async fn init_space(&self, space: &Space) -> Result<(), RegistryError> {
        for db in [
            space.apps_db(),
            space.versions_db(),
            space.pending_versions_db(),
            space.editors_db(),
        ] {
            self.store.ensure_database(db).await?;
        }
        for (name, fields) in APPS_INDEXES {
            let index_name = format!("apps-index-{}", name);
            self.store
                .ensure_index(space.apps_db(), &index_name, fields)
                .await?;
        }
        let (name, fields) = VERSIONS_INDEX;
        self.store
            .ensure_index(space.versions_db(), name, fields)
            .await?;
        debug!(space = space.prefix(), "space initialized");
        Ok(())
    }

    /// Fetch an application document, without discovery enrichment.
    pub(crate) async fn find_app_doc(
        &self,
        space: &Space,
        slug: &str,
    ) -> Result<App, RegistryError> {
        if !is_valid_slug(slug) {
            return Err(RegistryError::AppSlugInvalid);
        }
        match self.store.get(space.apps_db(), &app_id(slug)).await? {
            Some(doc) => from_doc(doc),
            None => Err(RegistryError::AppNotFound),
        }
    }

    /// Create an application on first publish, or update it in place.
    ///
    /// Identity fields (id, slug, type, created_at) are frozen after
    /// creation; the editor is taken from the authenticated caller.
    /// Optional fields left unset keep their stored value. When the merged
    /// document equals the stored one nothing is written and `updated_at`
    /// is not bumped.
    ///
    /// Returns the resulting app and whether a write happened.
    pub async fn create_or_update_app(
        &self,
        space: &Space,
        mut app: App,
        editor: &str,
    ) -> Result<(App, bool), RegistryError> {
        app.validate()?;

        let existing = match self.find_app_doc(space, &app.slug).await {
            Ok(doc) => Some(doc),
            Err(RegistryError::AppNotFound) => None,
            Err(err) => return Err(err),
        };
        let now = Utc::now();

        let Some(stored) = existing else {
            let id = app_id(&app.slug);
            app.id = Some(id.clone());
            app.slug = id.clone();
            app.editor = editor.to_string();
            app.created_at = Some(now);
            app.updated_at = Some(now);
            app.versions = None;
            app.latest_version = None;
            if app.name.is_none() {
                app.name = Some(Localized::default());
            }
            if app.description.is_none() {
                app.description = Some(Localized::default());
            }
            if app.locales.is_none() {
                app.locales = Some(Default::default());
            }
            if app.tags.is_none() {
                app.tags = Some(Vec::new());
            }
            if app.screenshot_urls.is_none() {
                app.screenshot_urls = Some(Vec::new());
            }
            self.store
                .create(space.apps_db(), &id, to_doc(&app)?)
                .await?;
            info!(slug = %id, editor, "application created");
            app.versions = Some(AppVersions::default());
            return Ok((app, true));
        };

        app.id = stored.id.clone();
        app.rev = stored.rev.clone();
        app.slug = stored.slug.clone();
        app.app_type = stored.app_type;
        app.created_at = stored.created_at;
        app.editor = editor.to_string();
        app.versions = None;
        app.latest_version = None;
        if app.category.is_empty() {
            app.category = stored.category.clone();
        }
        if app.repository.is_empty() {
            app.repository = stored.repository.clone();
        }
        if app.logo_url.is_empty() {
            app.logo_url = stored.logo_url.clone();
        }
        if app.name.is_none() {
            app.name = stored.name.clone();
        }
        if app.developer.is_none() {
            app.developer = stored.developer.clone();
        }
        if app.description.is_none() {
            app.description = stored.description.clone();
        }
        if app.locales.is_none() {
            app.locales = stored.locales.clone();
        }
        if app.tags.is_none() {
            app.tags = stored.tags.clone();
        }
        if app.screenshot_urls.is_none() {
            app.screenshot_urls = stored.screenshot_urls.clone();
        }
        if app.maintenance_activated.is_none() {
            app.maintenance_activated = stored.maintenance_activated;
        }

        // Deep-equality modulo updated_at: an identical republish is a no-op.
        let mut reference = stored;
        reference.versions = None;
        reference.latest_version = None;
        let mut candidate = app.clone();
        candidate.updated_at = reference.updated_at;
        if candidate == reference {
            app.updated_at = reference.updated_at;
            return Ok((app, false));
        }

        app.updated_at = Some(now);
        let id = app.id.clone().unwrap_or_else(|| app_id(&app.slug));
        self.store.put(space.apps_db(), &id, to_doc(&app)?).await?;
        info!(slug = %app.slug, editor, "application updated");

        app.versions = Some(self.find_app_versions(space, &app.slug, Channel::Stable).await?);
        Ok((app, true))
    }

    /// Look up a version in one or more collections by (slug, version).
    async fn find_version_in(
        &self,
        dbs: &[&str],
        slug: &str,
        version: &str,
    ) -> Result<Version, RegistryError> {
        if !is_valid_slug(slug) {
            return Err(RegistryError::AppSlugInvalid);
        }
        if !is_valid_version(version) {
            return Err(RegistryError::VersionInvalid);
        }
        let id = version_id(slug, version);
        for db in dbs {
            if let Some(doc) = self.store.get(db, &id).await? {
                return from_doc(doc);
            }
        }
        Err(RegistryError::VersionNotFound)
    }

    /// Find a version among published and pending collections.
    pub async fn find_version(
        &self,
        space: &Space,
        slug: &str,
        version: &str,
    ) -> Result<Version, RegistryError> {
        self.find_version_in(
            &[space.versions_db(), space.pending_versions_db()],
            slug,
            version,
        )
        .await
    }

    /// Find a published version only.
    pub async fn find_published_version(
        &self,
        space: &Space,
        slug: &str,
        version: &str,
    ) -> Result<Version, RegistryError> {
        self.find_version_in(&[space.versions_db()], slug, version)
            .await
    }

    /// Find a pending version only.
    pub async fn find_pending_version(
        &self,
        space: &Space,
        slug: &str,
        version: &str,
    ) -> Result<Version, RegistryError> {
        self.find_version_in(&[space.pending_versions_db()], slug, version)
            .await
    }

    async fn create_version_in(
        &self,
        space: &Space,
        db: &str,
        app: &App,
        mut ver: Version,
    ) -> Result<Version, RegistryError> {
        match self.find_version(space, &ver.slug, &ver.version).await {
            Err(RegistryError::VersionNotFound) => {}
            Ok(_) => return Err(RegistryError::VersionAlreadyExists),
            Err(err) => return Err(err),
        }

        ver.slug = app.slug.clone();
        ver.app_type = app.app_type;
        ver.editor = app.editor.clone();
        let id = version_id(&ver.slug, &ver.version);
        ver.id = Some(id.clone());

        // The write is the only side effect of a publication and is issued
        // last; two concurrent publications race on the unique id here.
        match self.store.create(db, &id, to_doc(&ver)?).await {
            Ok(rev) => ver.rev = Some(rev),
            Err(StoreError::Conflict { .. }) => return Err(RegistryError::VersionAlreadyExists),
            Err(err) => return Err(err.into()),
        }

        for channel in [Channel::Stable, Channel::Beta, Channel::Dev] {
            let key = version_cache_key(space, &ver.slug, channel);
            self.cache_versions_latest.remove(&key);
            self.cache_versions_list.remove(&key);
        }

        info!(slug = %ver.slug, version = %ver.version, "version created");
        Ok(ver)
    }

    /// Append a new published version. Fails with `VersionAlreadyExists`
    /// when the (slug, version) pair is already taken, published or
    /// pending. There is no update path: versions are immutable.
    pub async fn create_version(
        &self,
        space: &Space,
        app: &App,
        ver: Version,
    ) -> Result<Version, RegistryError> {
        self.create_version_in(space, space.versions_db(), app, ver)
            .await
    }

    /// Append a version into the pending collection, awaiting approval.
    pub async fn create_pending_version(
        &self,
        space: &Space,
        app: &App,
        ver: Version,
    ) -> Result<Version, RegistryError> {
        self.create_version_in(space, space.pending_versions_db(), app, ver)
            .await
    }
}
