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

//! Document-store abstraction.
//!
//! The registry core is written against [`DocumentStore`], a small trait
//! modeling what it needs from a document database: revisioned CRUD,
//! secondary indexes over field lists, and stored views that emit sorted
//! key/value pairs. Deployments hand the registry a pre-initialized store
//! handle; the crate ships [`memory::MemoryStore`] as the reference
//! backend.
//!
//! Views are registered per design document as map functions. Querying a
//! view whose design document does not exist yet reports
//! [`StoreError::ViewNotFound`], which the registry uses to create views
//! lazily.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;

/// A stored JSON document. `_id` and `_rev` live inside the value.
pub type Document = serde_json::Value;

/// Errors reported by document-store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database {db} does not exist")]
    DatabaseNotFound { db: String },

    #[error("document {id} already exists in {db}")]
    Conflict { db: String, id: String },

    #[error("design document {ddoc} has no view {view}")]
    ViewNotFound { ddoc: String, view: String },

    #[error("malformed document: {0}")]
    Malformed(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// One clause of a [`FindQuery`] selector.
#[derive(Debug, Clone)]
pub enum Selector {
    /// The field exists with a non-null value (`{"$gt": null}`).
    Exists,
    /// The field equals the given value.
    Eq(Document),
    /// The field is an array containing every listed string (`{"$all": ..}`).
    ContainsAll(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// A selector query against a database, served by a secondary index.
#[derive(Debug, Clone, Default)]
pub struct FindQuery {
    /// Index hint; backends may ignore it.
    pub use_index: Option<String>,
    pub selector: Vec<(String, Selector)>,
    pub sort: Vec<(String, SortOrder)>,
    pub skip: usize,
    pub limit: Option<usize>,
}

/// Options for a view range query.
#[derive(Debug, Clone, Default)]
pub struct ViewQuery {
    pub limit: Option<usize>,
    pub descending: bool,
    pub include_docs: bool,
}

/// One row emitted by a view.
#[derive(Debug, Clone)]
pub struct ViewRow {
    pub id: String,
    pub key: Document,
    pub value: Document,
    /// Present when the query asked for `include_docs`.
    pub doc: Option<Document>,
}

/// A view map function: for one document, emit zero or more (key, value)
/// pairs. Rows are served sorted by key.
pub type ViewMapFn = Arc<dyn Fn(&Document) -> Vec<(Document, Document)> + Send + Sync>;

/// A named view inside a design document.
#[derive(Clone)]
pub struct ViewDef {
    pub name: String,
    pub map: ViewMapFn,
}

impl ViewDef {
    pub fn new(
        name: impl Into<String>,
        map: impl Fn(&Document) -> Vec<(Document, Document)> + Send + Sync + 'static,
    ) -> Self {
        ViewDef {
            name: name.into(),
            map: Arc::new(map),
        }
    }
}

/// A design document: a named bundle of views, stored under `_design/{name}`
/// and visible to full scans like any other document.
#[derive(Clone)]
pub struct DesignDoc {
    pub name: String,
    pub views: Vec<ViewDef>,
}

/// What the registry requires from a document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create the database if it does not exist yet.
    async fn ensure_database(&self, db: &str) -> Result<(), StoreError>;

    /// Create (or replace) a secondary index over the given field list.
    async fn ensure_index(&self, db: &str, name: &str, fields: &[&str]) -> Result<(), StoreError>;

    /// Fetch a document by id. Missing documents are `Ok(None)`.
    async fn get(&self, db: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Insert a new document. Fails with [`StoreError::Conflict`] when the
    /// id is already taken; this is the registry's unique-(slug, version)
    /// backstop under concurrent publications.
    async fn create(&self, db: &str, id: &str, doc: Document) -> Result<String, StoreError>;

    /// Write a document, replacing any existing revision.
    async fn put(&self, db: &str, id: &str, doc: Document) -> Result<String, StoreError>;

    /// Run a selector query.
    async fn find(&self, db: &str, query: FindQuery) -> Result<Vec<Document>, StoreError>;

    /// Every document in the database, design documents included, ordered
    /// by id.
    async fn all_docs(&self, db: &str) -> Result<Vec<Document>, StoreError>;

    /// Install or replace a design document and its views.
    async fn put_design(&self, db: &str, design: DesignDoc) -> Result<(), StoreError>;

    /// Range-query one view of a design document.
    async fn query_view(
        &self,
        db: &str,
        ddoc: &str,
        view: &str,
        query: ViewQuery,
    ) -> Result<Vec<ViewRow>, StoreError>;
}
