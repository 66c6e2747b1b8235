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

//! Per-application channel views.
//!
//! For every application a design document `versions-{slug}` holds three
//! views over the versions collection. Each view emits a numeric sort key
//! so that a descending range query returns "latest first" for the
//! requested channel, and an ascending one the full ordered list:
//!
//! - `stable`: stable docs only, key `[major, minor, patch]`
//! - `beta`: stable + beta docs, key `[major, minor, patch, code, exp]`
//! - `dev`: every doc, key `[major, minor, patch, code, date]`
//!
//! `code` is 1 for stable and 0 otherwise, so a stable release sorts above
//! the prereleases of its triple; `exp` is the beta counter; `date` is the
//! creation time in epoch milliseconds, the tiebreak between dev builds of
//! one triple.
//!
//! Views are installed lazily: a query hitting `ViewNotFound` creates the
//! design document and retries once.

use chrono::DateTime;
use tracing::debug;

use super::{Registry, Space};
use crate::channel::{channel_of, split_version, Channel, BETA_SUFFIX};
use crate::error::RegistryError;
use crate::models::app_id;
use crate::store::{DesignDoc, Document, DocumentStore, StoreError, ViewDef, ViewQuery, ViewRow};

/// Name of the design document holding one application's version views.
pub(crate) fn versions_view_doc_name(slug: &str) -> String {
    format!("versions-{}", app_id(slug))
}

struct ExpandedVersion {
    v: [i64; 3],
    channel: Channel,
    code: i64,
    exp: i64,
    date: i64,
}

/// Decompose a version document into the pieces the sort keys are built
/// from. Documents without a usable version string emit nothing.
fn expand_version(doc: &Document) -> Option<ExpandedVersion> {
    let version = doc.get("version")?.as_str()?;
    let [major, minor, patch] = split_version(version);
    let v = [
        major.parse().ok()?,
        minor.parse().ok()?,
        patch.parse().ok()?,
    ];
    let channel = channel_of(version);
    let exp = match channel {
        Channel::Beta => version
            .rfind(BETA_SUFFIX)
            .and_then(|at| version[at + BETA_SUFFIX.len()..].parse().ok())
            .unwrap_or(0),
        _ => 0,
    };
    let date = doc
        .get("created_at")
        .and_then(Document::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.timestamp_millis())
        .unwrap_or(0);
    Some(ExpandedVersion {
        v,
        channel,
        code: if channel == Channel::Stable { 1 } else { 0 },
        exp,
        date,
    })
}

fn emitted_value(doc: &Document) -> Document {
    doc.get("version").cloned().unwrap_or(Document::Null)
}

/// The three channel views of one application's design document.
pub(crate) fn versions_design(slug: &str) -> DesignDoc {
    let stable = ViewDef::new(Channel::Stable.as_str(), |doc: &Document| {
        match expand_version(doc) {
            Some(version) if version.channel == Channel::Stable => {
                let key = serde_json::json!([version.v[0], version.v[1], version.v[2]]);
                vec![(key, emitted_value(doc))]
            }
            _ => Vec::new(),
        }
    });
    let beta = ViewDef::new(Channel::Beta.as_str(), |doc: &Document| {
        match expand_version(doc) {
            Some(version) if version.channel != Channel::Dev => {
                let key = serde_json::json!([
                    version.v[0],
                    version.v[1],
                    version.v[2],
                    version.code,
                    version.exp
                ]);
                vec![(key, emitted_value(doc))]
            }
            _ => Vec::new(),
        }
    });
    let dev = ViewDef::new(Channel::Dev.as_str(), |doc: &Document| {
        match expand_version(doc) {
            Some(version) => {
                let key = serde_json::json!([
                    version.v[0],
                    version.v[1],
                    version.v[2],
                    version.code,
                    version.date
                ]);
                vec![(key, emitted_value(doc))]
            }
            None => Vec::new(),
        }
    });
    DesignDoc {
        name: versions_view_doc_name(slug),
        views: vec![stable, beta, dev],
    }
}

impl<S: DocumentStore> Registry<S> {
    pub(crate) async fn create_versions_views(
        &self,
        space: &Space,
        slug: &str,
    ) -> Result<(), RegistryError> {
        debug!(slug, "installing version views");
        self.store
            .put_design(space.versions_db(), versions_design(slug))
            .await?;
        Ok(())
    }

    /// Range-query one channel view, creating the design document and
    /// retrying once when it does not exist yet. A failure of the retried
    /// query surfaces as-is.
    pub(crate) async fn version_view_query(
        &self,
        space: &Space,
        slug: &str,
        channel: Channel,
        query: ViewQuery,
    ) -> Result<Vec<ViewRow>, RegistryError> {
        let ddoc = versions_view_doc_name(slug);
        match self
            .store
            .query_view(space.versions_db(), &ddoc, channel.as_str(), query.clone())
            .await
        {
            Err(StoreError::ViewNotFound { .. }) => {
                self.create_versions_views(space, slug).await?;
                Ok(self
                    .store
                    .query_view(space.versions_db(), &ddoc, channel.as_str(), query)
                    .await?)
            }
            other => Ok(other?),
        }
    }
}
