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

//! Persisted document models.
//!
//! Field names are wire-normative: these structs serialize to the exact
//! shapes stored in the document database. The `name`, `description` and
//! `locales` fields are polymorphic on input (editors historically sent
//! either a localized map or a bare string), so they get custom decoders
//! that normalize the scalar form.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

use crate::error::RegistryError;

static VALID_SLUG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9\-]*$").expect("slug regex is valid"));

/// Whether a string is an acceptable application slug.
pub fn is_valid_slug(slug: &str) -> bool {
    VALID_SLUG_RE.is_match(slug)
}

/// Document id of an application: the lowercased slug.
pub fn app_id(slug: &str) -> String {
    slug.to_lowercase()
}

/// Document id of a version: `{lowercased-slug}-{version}`.
pub fn version_id(slug: &str, version: &str) -> String {
    format!("{}-{}", app_id(slug), version)
}

/// Family of an application bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppType {
    Webapp,
    Konnector,
}

impl AppType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppType::Webapp => "webapp",
            AppType::Konnector => "konnector",
        }
    }
}

impl fmt::Display for AppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `{lang -> text}` mapping that also accepts a bare string on input,
/// promoted to `{"en": text}`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct Localized(pub BTreeMap<String, String>);

impl<'de> Deserialize<'de> for Localized {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Map(BTreeMap<String, String>),
            Scalar(String),
        }
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Map(map) => Localized(map),
            Repr::Scalar(text) => {
                let mut map = BTreeMap::new();
                map.insert("en".to_string(), text);
                Localized(map)
            }
        })
    }
}

/// A locale list that also accepts an object on input, keeping its keys.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct Locales(pub Vec<String>);

impl<'de> Deserialize<'de> for Locales {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            List(Vec<String>),
            Map(BTreeMap<String, serde_json::Value>),
        }
        Ok(match Repr::deserialize(deserializer)? {
            Repr::List(list) => Locales(list),
            Repr::Map(map) => Locales(map.into_keys().collect()),
        })
    }
}

/// Publisher contact block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Developer {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
}

/// Per-channel version lists of one application (derived, never stored).
///
/// The lists are inclusive: `beta` contains the stable versions and `dev`
/// contains everything, when the requested channel exposes them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppVersions {
    pub stable: Vec<String>,
    pub beta: Vec<String>,
    pub dev: Vec<String>,
}

/// An application document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub slug: String,
    #[serde(default)]
    pub name: Option<Localized>,
    #[serde(rename = "type")]
    pub app_type: AppType,
    #[serde(default)]
    pub editor: String,
    #[serde(default)]
    pub developer: Option<Developer>,
    #[serde(default)]
    pub description: Option<Localized>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub locales: Option<Locales>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub logo_url: String,
    #[serde(default)]
    pub screenshot_urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_activated: Option<bool>,
    /// Filled by the discovery layer, never persisted as part of the doc.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versions: Option<AppVersions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<Version>,
}

impl App {
    /// Validate the mutable application fields.
    ///
    /// The slug must match the slug grammar; the editor must be set; the
    /// repository, when present, must be a parseable URL. The `type` field
    /// is a closed enum and needs no check here.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.slug.is_empty() || !is_valid_slug(&self.slug) {
            return Err(RegistryError::AppInvalid("slug".to_string()));
        }
        let mut fields = Vec::new();
        if self.editor.is_empty() {
            fields.push("editor");
        }
        if !self.repository.is_empty() && url::Url::parse(&self.repository).is_err() {
            fields.push("repository");
        }
        if fields.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::AppInvalid(fields.join(", ")))
        }
    }
}

/// A published (or pending) version document.
///
/// The manifest is kept verbatim, byte for byte, as extracted from the
/// archive. `size` counts transferred bytes and is string-encoded on the
/// wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub slug: String,
    pub editor: String,
    #[serde(rename = "type")]
    pub app_type: AppType,
    pub version: String,
    pub manifest: Box<RawValue>,
    pub created_at: DateTime<Utc>,
    pub url: String,
    #[serde(with = "size_as_string")]
    pub size: i64,
    pub sha256: String,
    pub tar_prefix: String,
    #[serde(
        rename = "_attachments",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub attachments: Option<serde_json::Value>,
}

impl Version {
    /// Drop store-internal fields before the version leaves the registry.
    pub fn strip_internal_fields(&mut self) {
        self.id = None;
        self.rev = None;
        self.attachments = None;
    }
}

// Manual impl: the raw manifest compares by its JSON text.
impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.rev == other.rev
            && self.slug == other.slug
            && self.editor == other.editor
            && self.app_type == other.app_type
            && self.version == other.version
            && self.manifest.get() == other.manifest.get()
            && self.created_at == other.created_at
            && self.url == other.url
            && self.size == other.size
            && self.sha256 == other.sha256
            && self.tar_prefix == other.tar_prefix
            && self.attachments == other.attachments
    }
}

/// Caller-supplied publication request for one version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionOptions {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub sha256: String,
}

impl VersionOptions {
    /// Validate the request fields, accumulating every offender.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let mut fields = Vec::new();
        if self.version.is_empty() || !crate::channel::is_valid_version(&self.version) {
            fields.push("version");
        }
        if self.url.is_empty() || url::Url::parse(&self.url).is_err() {
            fields.push("url");
        }
        match hex::decode(&self.sha256) {
            Ok(digest) if digest.len() == 32 => {}
            _ => fields.push("sha256"),
        }
        if fields.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::VersionFieldsInvalid(fields.join(", ")))
        }
    }
}

mod size_as_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(size: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(size)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
