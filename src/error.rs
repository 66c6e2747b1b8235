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

//! Registry error taxonomy.
//!
//! Every public operation reports a [`RegistryError`]. Each variant maps to
//! an HTTP status code and a stable wire code so the transport layer can
//! render responses without inspecting messages. Validation failures during
//! manifest reconciliation are accumulated into a single `Unprocessable`
//! message so an editor can fix every field in one publish cycle.

use thiserror::Error;

use crate::store::StoreError;

/// Errors reported by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Application was not found")]
    AppNotFound,

    #[error("Invalid application slug: should start with a letter and contain only alphanumeric characters and dashes")]
    AppSlugInvalid,

    #[error("Application slug does not match the one specified in the body")]
    AppSlugMismatch,

    #[error("Invalid application, the following fields are missing or erroneous: {0}")]
    AppInvalid(String),

    #[error("Version was not found")]
    VersionNotFound,

    #[error("Version already exists")]
    VersionAlreadyExists,

    #[error("Version does not match the one specified in the body")]
    VersionMismatch,

    #[error("Invalid version value")]
    VersionInvalid,

    #[error("Invalid version, the following fields are missing or erroneous: {0}")]
    VersionFieldsInvalid(String),

    #[error(r#"Invalid version channel: should be "stable", "beta" or "dev""#)]
    ChannelInvalid,

    /// Any fetch, ingestion or reconciliation failure. The message embeds
    /// the original cause; the caller republishes after fixing it.
    #[error("{0}")]
    Unprocessable(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RegistryError {
    /// HTTP status code associated with this error.
    pub fn status(&self) -> u16 {
        match self {
            RegistryError::AppInvalid(_)
            | RegistryError::AppSlugInvalid
            | RegistryError::AppSlugMismatch
            | RegistryError::VersionInvalid
            | RegistryError::VersionFieldsInvalid(_)
            | RegistryError::VersionMismatch
            | RegistryError::ChannelInvalid => 400,
            RegistryError::AppNotFound | RegistryError::VersionNotFound => 404,
            RegistryError::VersionAlreadyExists => 409,
            RegistryError::Unprocessable(_) => 422,
            RegistryError::Store(_) => 500,
        }
    }

    /// Stable wire code for the transport layer.
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::AppNotFound => "AppNotFound",
            RegistryError::AppSlugInvalid => "AppSlugInvalid",
            RegistryError::AppSlugMismatch => "AppSlugMismatch",
            RegistryError::AppInvalid(_) => "AppInvalid",
            RegistryError::VersionNotFound => "VersionNotFound",
            RegistryError::VersionAlreadyExists => "VersionAlreadyExists",
            RegistryError::VersionMismatch => "VersionMismatch",
            RegistryError::VersionInvalid | RegistryError::VersionFieldsInvalid(_) => {
                "VersionInvalid"
            }
            RegistryError::ChannelInvalid => "ChannelInvalid",
            RegistryError::Unprocessable(_) => "Unprocessable",
            RegistryError::Store(_) => "StoreError",
        }
    }

    /// Build the 422 reported when an artifact cannot be fetched or read.
    pub(crate) fn unreachable_version(url: &str, cause: impl std::fmt::Display) -> Self {
        RegistryError::Unprocessable(format!(
            "Could not reach version on specified url {}: {}",
            url, cause
        ))
    }
}
