//! # Record Store
//!
//! Document-oriented persistence behind every resource (tickets, about, recaps, site stats).
//!
//! ## Model
//! - Collections of JSON objects keyed by a server-generated string id
//! - The id lives beside the document, never inside it
//! - Single-document operations only, no transactions across documents
//!
//! ## Consistency
//! - Concurrent updates to one document are last-write-wins
//! - Read-your-writes across calls is not assumed by callers
use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type Document = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub data: Document,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record {0} does not exist")]
    Missing(String),

    #[error("record {id} is malformed: {source}")]
    Corrupt {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("field {field} of record {id} is not a number")]
    NotCounter { id: String, field: String },

    #[error("record store unavailable: {0}")]
    Backend(#[from] redis::RedisError),
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    async fn list(&self, collection: &str) -> Result<Vec<Record>, StoreError>;

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Record>, StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Inserts under a fresh id and returns it.
    async fn add(&self, collection: &str, data: Document) -> Result<String, StoreError>;

    /// Creates or replaces the document at `id`.
    async fn set(&self, collection: &str, id: &str, data: Document) -> Result<(), StoreError>;

    /// Merges `fields` into an existing document, failing with [`StoreError::Missing`].
    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<Document, StoreError>;

    /// Returns whether a document was removed.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    /// Atomically adds `by` to a numeric field, treating a missing document or field as 0.
    async fn increment(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        by: i64,
    ) -> Result<i64, StoreError>;
}

pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn merge(target: &mut Document, fields: Document) {
    for (key, value) in fields {
        target.insert(key, value);
    }
}

/// In-process store used for local development and tests.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, HashMap<String, Document>>>,
    calls: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of store operations served so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }
}

fn to_records(documents: &HashMap<String, Document>) -> Vec<Record> {
    let mut records: Vec<Record> = documents
        .iter()
        .map(|(id, data)| Record {
            id: id.clone(),
            data: data.clone(),
        })
        .collect();

    records.sort_by(|a, b| a.id.cmp(&b.id));
    records
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn list(&self, collection: &str) -> Result<Vec<Record>, StoreError> {
        self.touch();

        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(to_records)
            .unwrap_or_default())
    }

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Record>, StoreError> {
        let records = self.list(collection).await?;

        Ok(records
            .into_iter()
            .filter(|record| record.data.get(field) == Some(value))
            .collect())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.touch();

        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|documents| documents.get(id))
            .cloned())
    }

    async fn add(&self, collection: &str, data: Document) -> Result<String, StoreError> {
        self.touch();

        let id = new_id();
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), data);

        Ok(id)
    }

    async fn set(&self, collection: &str, id: &str, data: Document) -> Result<(), StoreError> {
        self.touch();

        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data);

        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<Document, StoreError> {
        self.touch();

        let mut collections = self.collections.write().await;
        let document = collections
            .get_mut(collection)
            .and_then(|documents| documents.get_mut(id))
            .ok_or_else(|| StoreError::Missing(id.to_string()))?;

        merge(document, fields);
        Ok(document.clone())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        self.touch();

        Ok(self
            .collections
            .write()
            .await
            .get_mut(collection)
            .and_then(|documents| documents.remove(id))
            .is_some())
    }

    async fn increment(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        by: i64,
    ) -> Result<i64, StoreError> {
        self.touch();

        let mut collections = self.collections.write().await;
        let document = collections
            .entry(collection.to_string())
            .or_default()
            .entry(id.to_string())
            .or_default();

        let current = match document.get(field) {
            None => 0,
            Some(value) => value.as_i64().ok_or_else(|| StoreError::NotCounter {
                id: id.to_string(),
                field: field.to_string(),
            })?,
        };

        let next = current + by;
        document.insert(field.to_string(), Value::from(next));

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    #[tokio::test]
    async fn test_add_then_get() {
        let store = MemoryStore::new();
        let id = store
            .add("tickets", doc(json!({"title": "x"})))
            .await
            .unwrap();

        assert!(!id.is_empty());
        assert_eq!(
            store.get("tickets", &id).await.unwrap(),
            Some(doc(json!({"title": "x"})))
        );
        assert_eq!(store.get("tickets", "nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_find_by_field() {
        let store = MemoryStore::new();
        store
            .add("tickets", doc(json!({"ownerId": "u1"})))
            .await
            .unwrap();
        store
            .add("tickets", doc(json!({"ownerId": "u2"})))
            .await
            .unwrap();

        let found = store
            .find_by_field("tickets", "ownerId", &json!("u1"))
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].data["ownerId"], json!("u1"));
        assert!(
            store
                .find_by_field("other", "ownerId", &json!("u1"))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_update_merges_and_requires_existing() {
        let store = MemoryStore::new();
        let id = store
            .add("tickets", doc(json!({"title": "x", "seats": 1})))
            .await
            .unwrap();

        let updated = store
            .update("tickets", &id, doc(json!({"seats": 2})))
            .await
            .unwrap();
        assert_eq!(updated, doc(json!({"title": "x", "seats": 2})));

        let missing = store.update("tickets", "gone", Document::new()).await;
        assert!(matches!(missing, Err(StoreError::Missing(id)) if id == "gone"));
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let store = MemoryStore::new();
        let id = store.add("tickets", Document::new()).await.unwrap();

        assert!(store.delete("tickets", &id).await.unwrap());
        assert!(!store.delete("tickets", &id).await.unwrap());
    }

    #[tokio::test]
    async fn test_increment() {
        let store = MemoryStore::new();

        assert_eq!(
            store.increment("siteStats", "visitors", "count", 1).await.unwrap(),
            1
        );
        assert_eq!(
            store.increment("siteStats", "visitors", "count", 2).await.unwrap(),
            3
        );

        store
            .set("siteStats", "broken", doc(json!({"count": "many"})))
            .await
            .unwrap();
        assert!(matches!(
            store.increment("siteStats", "broken", "count", 1).await,
            Err(StoreError::NotCounter { .. })
        ));
    }

    #[tokio::test]
    async fn test_calls_are_counted() {
        let store = MemoryStore::new();
        assert_eq!(store.calls(), 0);

        store.list("tickets").await.unwrap();
        store.get("tickets", "x").await.unwrap();

        assert_eq!(store.calls(), 2);
    }
}
