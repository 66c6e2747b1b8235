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

//! # Lamproom
//!
//! Core of an application registry for two bundle families, webapps and
//! konnectors. It turns a signed publication request into a durable,
//! queryable version record and answers channel-aware discovery queries.
//!
//! ## Architecture
//!
//! - [`tarball`]: the ingestion pipeline — streaming fetch, size cap,
//!   content-hash verification, archive traversal, manifest extraction and
//!   reconciliation.
//! - [`channel`]: the version grammar — three channels (stable, beta, dev)
//!   with a total order per channel.
//! - [`registry`]: the store adapter and the discovery layer — per-space
//!   collections, per-application channel views materialized in the
//!   document store, and LRU+TTL memoization of list operations.
//! - [`store`]: the document-store abstraction and the in-memory reference
//!   backend. Deployments pass a pre-initialized store handle.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use lamproom::{
//!     AppsListOptions, Channel, HttpTarballFetcher, MemoryStore, Registry, Space,
//!     VersionOptions,
//! };
//!
//! # async fn example() -> Result<(), lamproom::RegistryError> {
//! let registry = Registry::new(MemoryStore::new());
//! let space = Space::default();
//! registry.init_space(&space).await?;
//!
//! // Publish a version from a release artifact.
//! let fetcher = HttpTarballFetcher::new()?;
//! let opts = VersionOptions {
//!     version: "1.2.3".into(),
//!     url: "https://downloads.example.org/notes-1.2.3.tar.gz".into(),
//!     sha256: "…".into(),
//! };
//! registry.publish_version(&space, &fetcher, "notes", &opts).await?;
//!
//! // Channel-aware discovery.
//! let latest = registry
//!     .find_latest_version(&space, "notes", Channel::Stable)
//!     .await?;
//! let (_cursor, apps) = registry
//!     .get_apps_list(&space, &AppsListOptions::default())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod channel;
pub mod error;
pub mod models;
pub mod registry;
pub mod store;
pub mod tarball;

// Re-export commonly used types
pub use cache::Cache;
pub use channel::{
    channel_of, is_valid_version, split_version, version_less, version_match, Channel,
};
pub use error::RegistryError;
pub use models::{
    App, AppType, AppVersions, Developer, Localized, Locales, Version, VersionOptions,
};
pub use registry::{AppsListOptions, Registry, Space};
pub use store::{DocumentStore, MemoryStore, StoreError};
pub use tarball::{
    download_version, validate_tarball, FetchedTarball, HttpTarballFetcher, TarballFetcher,
    MAX_TARBALL_SIZE,
};
