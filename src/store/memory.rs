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

//! In-memory document-store backend.
//!
//! Reference implementation of [`DocumentStore`]: revisioned documents in
//! per-database ordered maps, selector evaluation for `find`, and view
//! materialization at query time with document-store key collation
//! (null < booleans < numbers < strings < arrays, arrays element-wise).
//!
//! The backend counts `get`/`find`/`query_view` calls so tests can assert
//! that cached discovery paths stop hitting the store.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use super::{
    DesignDoc, Document, DocumentStore, FindQuery, Selector, SortOrder, StoreError, ViewMapFn,
    ViewQuery, ViewRow,
};

#[derive(Default)]
struct Database {
    docs: BTreeMap<String, Document>,
    indexes: HashMap<String, Vec<String>>,
    designs: HashMap<String, HashMap<String, ViewMapFn>>,
}

/// In-memory [`DocumentStore`] backend.
#[derive(Default)]
pub struct MemoryStore {
    databases: RwLock<HashMap<String, Database>>,
    gets: AtomicU64,
    finds: AtomicU64,
    view_queries: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get` calls served so far.
    pub fn get_count(&self) -> u64 {
        self.gets.load(AtomicOrdering::Relaxed)
    }

    /// Number of `find` calls served so far.
    pub fn find_count(&self) -> u64 {
        self.finds.load(AtomicOrdering::Relaxed)
    }

    /// Number of `query_view` calls served so far.
    pub fn view_query_count(&self) -> u64 {
        self.view_queries.load(AtomicOrdering::Relaxed)
    }

    fn next_rev(previous: Option<&Document>) -> String {
        let generation = previous
            .and_then(|doc| doc.get("_rev"))
            .and_then(|rev| rev.as_str())
            .and_then(|rev| rev.split('-').next())
            .and_then(|n| n.parse::<u64>().ok())
            .unwrap_or(0);
        format!("{}-{}", generation + 1, Uuid::new_v4().simple())
    }

    fn stamp(doc: &mut Document, id: &str, rev: &str) -> Result<(), StoreError> {
        let object = doc
            .as_object_mut()
            .ok_or_else(|| StoreError::Malformed("document is not a JSON object".to_string()))?;
        object.insert("_id".to_string(), Document::from(id));
        object.insert("_rev".to_string(), Document::from(rev));
        Ok(())
    }
}

fn is_design_id(id: &str) -> bool {
    id.starts_with("_design/")
}

/// Document-store key collation: null < false < true < numbers < strings <
/// arrays; arrays compare element-wise, then by length.
pub(crate) fn collate(a: &Document, b: &Document) -> Ordering {
    fn rank(value: &Document) -> u8 {
        match value {
            Document::Null => 0,
            Document::Bool(_) => 1,
            Document::Number(_) => 2,
            Document::String(_) => 3,
            Document::Array(_) => 4,
            Document::Object(_) => 5,
        }
    }

    match (a, b) {
        (Document::Bool(x), Document::Bool(y)) => x.cmp(y),
        (Document::Number(x), Document::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Document::String(x), Document::String(y)) => x.cmp(y),
        (Document::Array(x), Document::Array(y)) => {
            for (xi, yi) in x.iter().zip(y.iter()) {
                match collate(xi, yi) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            x.len().cmp(&y.len())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

fn matches_selector(doc: &Document, selector: &[(String, Selector)]) -> bool {
    selector.iter().all(|(field, clause)| {
        let value = doc.get(field);
        match clause {
            Selector::Exists => matches!(value, Some(v) if !v.is_null()),
            Selector::Eq(expected) => value == Some(expected),
            Selector::ContainsAll(wanted) => match value.and_then(|v| v.as_array()) {
                Some(items) => wanted
                    .iter()
                    .all(|w| items.iter().any(|item| item.as_str() == Some(w.as_str()))),
                None => false,
            },
        }
    })
}

fn compare_by_sort(a: &Document, b: &Document, sort: &[(String, SortOrder)]) -> Ordering {
    for (field, order) in sort {
        let left = a.get(field).unwrap_or(&Document::Null);
        let right = b.get(field).unwrap_or(&Document::Null);
        let ordering = collate(left, right);
        let ordering = match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ensure_database(&self, db: &str) -> Result<(), StoreError> {
        let mut databases = self.databases.write().expect("store lock poisoned");
        databases.entry(db.to_string()).or_default();
        Ok(())
    }

    async fn ensure_index(&self, db: &str, name: &str, fields: &[&str]) -> Result<(), StoreError> {
        let mut databases = self.databases.write().expect("store lock poisoned");
        let database = databases
            .get_mut(db)
            .ok_or_else(|| StoreError::DatabaseNotFound { db: db.to_string() })?;
        database.indexes.insert(
            name.to_string(),
            fields.iter().map(|f| f.to_string()).collect(),
        );
        // Indexes live in the database as design documents, like any other
        // document-store deployment; listings must cope with seeing them.
        let id = format!("_design/{}", name);
        let mut marker = serde_json::json!({ "language": "query" });
        let rev = Self::next_rev(database.docs.get(&id));
        Self::stamp(&mut marker, &id, &rev)?;
        database.docs.insert(id, marker);
        Ok(())
    }

    async fn get(&self, db: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.gets.fetch_add(1, AtomicOrdering::Relaxed);
        let databases = self.databases.read().expect("store lock poisoned");
        let database = databases
            .get(db)
            .ok_or_else(|| StoreError::DatabaseNotFound { db: db.to_string() })?;
        Ok(database.docs.get(id).cloned())
    }

    async fn create(&self, db: &str, id: &str, mut doc: Document) -> Result<String, StoreError> {
        let mut databases = self.databases.write().expect("store lock poisoned");
        let database = databases
            .get_mut(db)
            .ok_or_else(|| StoreError::DatabaseNotFound { db: db.to_string() })?;
        if database.docs.contains_key(id) {
            return Err(StoreError::Conflict {
                db: db.to_string(),
                id: id.to_string(),
            });
        }
        let rev = Self::next_rev(None);
        Self::stamp(&mut doc, id, &rev)?;
        database.docs.insert(id.to_string(), doc);
        Ok(rev)
    }

    async fn put(&self, db: &str, id: &str, mut doc: Document) -> Result<String, StoreError> {
        let mut databases = self.databases.write().expect("store lock poisoned");
        let database = databases
            .get_mut(db)
            .ok_or_else(|| StoreError::DatabaseNotFound { db: db.to_string() })?;
        let rev = Self::next_rev(database.docs.get(id));
        Self::stamp(&mut doc, id, &rev)?;
        database.docs.insert(id.to_string(), doc);
        Ok(rev)
    }

    async fn find(&self, db: &str, query: FindQuery) -> Result<Vec<Document>, StoreError> {
        self.finds.fetch_add(1, AtomicOrdering::Relaxed);
        let databases = self.databases.read().expect("store lock poisoned");
        let database = databases
            .get(db)
            .ok_or_else(|| StoreError::DatabaseNotFound { db: db.to_string() })?;

        let mut matching: Vec<&Document> = database
            .docs
            .iter()
            .filter(|(id, _)| !is_design_id(id))
            .map(|(_, doc)| doc)
            .filter(|doc| matches_selector(doc, &query.selector))
            .collect();
        matching.sort_by(|a, b| compare_by_sort(a, b, &query.sort));

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(matching
            .into_iter()
            .skip(query.skip)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn all_docs(&self, db: &str) -> Result<Vec<Document>, StoreError> {
        let databases = self.databases.read().expect("store lock poisoned");
        let database = databases
            .get(db)
            .ok_or_else(|| StoreError::DatabaseNotFound { db: db.to_string() })?;
        Ok(database.docs.values().cloned().collect())
    }

    async fn put_design(&self, db: &str, design: DesignDoc) -> Result<(), StoreError> {
        let mut databases = self.databases.write().expect("store lock poisoned");
        let database = databases
            .get_mut(db)
            .ok_or_else(|| StoreError::DatabaseNotFound { db: db.to_string() })?;

        let views = design
            .views
            .iter()
            .map(|view| (view.name.clone(), view.map.clone()))
            .collect();
        database.designs.insert(design.name.clone(), views);

        let id = format!("_design/{}", design.name);
        let mut marker = serde_json::json!({ "language": "rust" });
        let rev = Self::next_rev(database.docs.get(&id));
        Self::stamp(&mut marker, &id, &rev)?;
        database.docs.insert(id, marker);
        Ok(())
    }

    async fn query_view(
        &self,
        db: &str,
        ddoc: &str,
        view: &str,
        query: ViewQuery,
    ) -> Result<Vec<ViewRow>, StoreError> {
        self.view_queries.fetch_add(1, AtomicOrdering::Relaxed);
        let databases = self.databases.read().expect("store lock poisoned");
        let database = databases
            .get(db)
            .ok_or_else(|| StoreError::DatabaseNotFound { db: db.to_string() })?;

        let map = database
            .designs
            .get(ddoc)
            .and_then(|views| views.get(view))
            .ok_or_else(|| StoreError::ViewNotFound {
                ddoc: ddoc.to_string(),
                view: view.to_string(),
            })?;

        let mut rows: Vec<ViewRow> = Vec::new();
        for (id, doc) in database.docs.iter().filter(|(id, _)| !is_design_id(id)) {
            for (key, value) in map(doc) {
                rows.push(ViewRow {
                    id: id.clone(),
                    key,
                    value,
                    doc: query.include_docs.then(|| doc.clone()),
                });
            }
        }
        rows.sort_by(|a, b| collate(&a.key, &b.key).then_with(|| a.id.cmp(&b.id)));
        if query.descending {
            rows.reverse();
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::super::ViewDef;
    use super::*;
    use serde_json::json;

    async fn make_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.ensure_database("apps").await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_create_get_roundtrip() {
        let store = make_store().await;
        let rev = store
            .create("apps", "notes", json!({"slug": "notes"}))
            .await
            .unwrap();
        assert!(rev.starts_with("1-"));

        let doc = store.get("apps", "notes").await.unwrap().unwrap();
        assert_eq!(doc["_id"], json!("notes"));
        assert_eq!(doc["_rev"], json!(rev));
        assert_eq!(doc["slug"], json!("notes"));
    }

    #[tokio::test]
    async fn test_create_conflicts_on_existing_id() {
        let store = make_store().await;
        store.create("apps", "notes", json!({})).await.unwrap();
        let err = store.create("apps", "notes", json!({})).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_put_bumps_revision() {
        let store = make_store().await;
        let first = store.create("apps", "notes", json!({"n": 1})).await.unwrap();
        let second = store.put("apps", "notes", json!({"n": 2})).await.unwrap();
        assert!(first.starts_with("1-"));
        assert!(second.starts_with("2-"));
    }

    #[tokio::test]
    async fn test_missing_database() {
        let store = MemoryStore::new();
        let err = store.get("nope", "id").await.unwrap_err();
        assert!(matches!(err, StoreError::DatabaseNotFound { .. }));
    }

    #[tokio::test]
    async fn test_find_with_selector_sort_and_paging() {
        let store = make_store().await;
        for (slug, category) in [("a", "tools"), ("b", "media"), ("c", "tools"), ("d", "tools")] {
            store
                .create("apps", slug, json!({"slug": slug, "category": category}))
                .await
                .unwrap();
        }

        let query = FindQuery {
            selector: vec![(
                "category".to_string(),
                Selector::Eq(json!("tools")),
            )],
            sort: vec![("slug".to_string(), SortOrder::Desc)],
            skip: 1,
            limit: Some(2),
            ..Default::default()
        };
        let docs = store.find("apps", query).await.unwrap();
        let slugs: Vec<&str> = docs.iter().map(|d| d["slug"].as_str().unwrap()).collect();
        assert_eq!(slugs, vec!["c", "a"]);
    }

    #[tokio::test]
    async fn test_find_contains_all() {
        let store = make_store().await;
        store
            .create("apps", "a", json!({"tags": ["foo", "bar"]}))
            .await
            .unwrap();
        store
            .create("apps", "b", json!({"tags": ["foo"]}))
            .await
            .unwrap();

        let query = FindQuery {
            selector: vec![(
                "tags".to_string(),
                Selector::ContainsAll(vec!["foo".to_string(), "bar".to_string()]),
            )],
            ..Default::default()
        };
        let docs = store.find("apps", query).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["_id"], json!("a"));
    }

    #[tokio::test]
    async fn test_find_skips_design_docs() {
        let store = make_store().await;
        store.ensure_index("apps", "by-slug", &["slug"]).await.unwrap();
        store.create("apps", "a", json!({"slug": "a"})).await.unwrap();

        let query = FindQuery {
            selector: vec![("slug".to_string(), Selector::Exists)],
            ..Default::default()
        };
        let docs = store.find("apps", query).await.unwrap();
        assert_eq!(docs.len(), 1);

        // all_docs, by contrast, exposes the index's design document.
        let all = store.all_docs("apps").await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_view_not_found_then_created() {
        let store = make_store().await;
        store.create("apps", "a", json!({"rank": 2})).await.unwrap();

        let err = store
            .query_view("apps", "ranks", "all", ViewQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ViewNotFound { .. }));

        let design = DesignDoc {
            name: "ranks".to_string(),
            views: vec![ViewDef::new("all", |doc: &Document| {
                vec![(doc["rank"].clone(), json!(null))]
            })],
        };
        store.put_design("apps", design).await.unwrap();

        let rows = store
            .query_view("apps", "ranks", "all", ViewQuery::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, json!(2));
    }

    #[tokio::test]
    async fn test_view_rows_sorted_by_key_collation() {
        let store = make_store().await;
        for (id, key) in [("a", json!([1, 2, 10])), ("b", json!([1, 2, 3])), ("c", json!([1, 10, 0]))] {
            store.create("apps", id, json!({"key": key})).await.unwrap();
        }
        let design = DesignDoc {
            name: "keys".to_string(),
            views: vec![ViewDef::new("k", |doc: &Document| {
                vec![(doc["key"].clone(), json!(null))]
            })],
        };
        store.put_design("apps", design).await.unwrap();

        let rows = store
            .query_view("apps", "keys", "k", ViewQuery::default())
            .await
            .unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);

        let rows = store
            .query_view(
                "apps",
                "keys",
                "k",
                ViewQuery {
                    descending: true,
                    limit: Some(1),
                    include_docs: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(rows[0].id, "c");
        assert!(rows[0].doc.is_some());
    }

    #[test]
    fn test_collation_ranks_types() {
        let ordered = [
            json!(null),
            json!(false),
            json!(true),
            json!(-1),
            json!(2.5),
            json!("a"),
            json!("b"),
            json!([1]),
            json!([1, 0]),
            json!([2]),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(collate(&pair[0], &pair[1]), Ordering::Less);
        }
    }

    #[tokio::test]
    async fn test_operation_counters() {
        let store = make_store().await;
        store.create("apps", "a", json!({})).await.unwrap();
        store.get("apps", "a").await.unwrap();
        store.get("apps", "a").await.unwrap();
        store.find("apps", FindQuery::default()).await.unwrap();
        assert_eq!(store.get_count(), 2);
        assert_eq!(store.find_count(), 1);
        assert_eq!(store.view_query_count(), 0);
    }
}
