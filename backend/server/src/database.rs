//! # Redis
//!
//! Production [`RecordStore`] backend.
//!
//! ## Layout
//!
//! - Collection index: set `unilife:<collection>` of record ids
//! - Record: hash `unilife:<collection>:<id>`, one hash field per document field
//! - Hash values are the JSON encoding of each field, so an integer field is stored as its
//!   decimal digits and `HINCRBY` works on it directly
//! - A record exists when its id is in the index, an empty document has no hash key
//!
//! ## Writes
//!
//! Every operation is one Lua script, so each is atomic per record:
//! - Inserts refuse an id already in the index
//! - Updates `HSET` the supplied fields on an indexed record, otherwise report it missing
//! - Increments are `HINCRBY`, concurrent visits never conflict
//! - A delete drops the index entry and the hash together, a later update sees it missing
use std::{
    collections::HashMap,
    sync::LazyLock,
    time::Duration,
};

use async_trait::async_trait;
use redis::{
    Client, RedisError, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use serde_json::Value;
use tracing::warn;

use crate::store::{Document, Record, RecordStore, StoreError, new_id};

const KEY_PREFIX: &str = "unilife";

// KEYS[1] index set. Record hashes are derived from it, single instance only.
static LIST: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local ids = redis.call('SMEMBERS', KEYS[1])
local records = {}
for i, id in ipairs(ids) do
    records[i] = { id, redis.call('HGETALL', KEYS[1] .. ':' .. id) }
end
return records
"#,
    )
});

// KEYS[1] index, KEYS[2] record hash, ARGV[1] id.
static GET: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
if redis.call('SISMEMBER', KEYS[1], ARGV[1]) == 0 then
    return false
end
return redis.call('HGETALL', KEYS[2])
"#,
    )
});

// ARGV[2] is 1 to refuse an existing id, ARGV[3..] are field/value pairs.
static WRITE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
if redis.call('SADD', KEYS[1], ARGV[1]) == 0 and ARGV[2] == '1' then
    return 0
end
redis.call('DEL', KEYS[2])
if #ARGV > 2 then
    redis.call('HSET', KEYS[2], unpack(ARGV, 3))
end
return 1
"#,
    )
});

// ARGV[2..] are field/value pairs, answers the merged record or nil.
static UPDATE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
if redis.call('SISMEMBER', KEYS[1], ARGV[1]) == 0 then
    return false
end
if #ARGV > 1 then
    redis.call('HSET', KEYS[2], unpack(ARGV, 2))
end
return redis.call('HGETALL', KEYS[2])
"#,
    )
});

static DELETE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local removed = redis.call('SREM', KEYS[1], ARGV[1])
redis.call('DEL', KEYS[2])
return removed
"#,
    )
});

// ARGV[2] field, ARGV[3] delta. Answers nil when the field holds a non-integer.
static INCREMENT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local current = redis.call('HGET', KEYS[2], ARGV[2])
if current and not string.match(current, '^%-?%d+$') then
    return false
end
redis.call('SADD', KEYS[1], ARGV[1])
return redis.call('HINCRBY', KEYS[2], ARGV[2], ARGV[3])
"#,
    )
});

pub async fn init_redis(redis_url: &str) -> Result<ConnectionManager, RedisError> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(500));

    let client = Client::open(redis_url)?;
    client.get_connection_manager_with_config(config).await
}

fn index_key(collection: &str) -> String {
    format!("{KEY_PREFIX}:{collection}")
}

fn record_key(collection: &str, id: &str) -> String {
    format!("{KEY_PREFIX}:{collection}:{id}")
}

/// Flattens a document into hash field/value pairs.
fn encode(id: &str, document: &Document) -> Result<Vec<(String, String)>, StoreError> {
    document
        .iter()
        .map(|(field, value)| {
            let raw = serde_json::to_string(value).map_err(|source| StoreError::Corrupt {
                id: id.to_string(),
                source,
            })?;

            Ok((field.clone(), raw))
        })
        .collect()
}

fn decode(id: &str, fields: HashMap<String, String>) -> Result<Document, StoreError> {
    fields
        .into_iter()
        .map(|(field, raw)| {
            let value: Value =
                serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
                    id: id.to_string(),
                    source,
                })?;

            Ok((field, value))
        })
        .collect()
}

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    async fn write(
        &self,
        collection: &str,
        id: &str,
        data: &Document,
        only_new: bool,
    ) -> Result<bool, StoreError> {
        let mut invocation = WRITE.prepare_invoke();
        invocation
            .key(index_key(collection))
            .key(record_key(collection, id))
            .arg(id)
            .arg(if only_new { "1" } else { "0" });
        for (field, raw) in encode(id, data)? {
            invocation.arg(field).arg(raw);
        }

        let mut connection = self.connection.clone();
        let written: i64 = invocation.invoke_async(&mut connection).await?;

        Ok(written == 1)
    }
}

#[async_trait]
impl RecordStore for RedisStore {
    fn backend_tag(&self) -> &'static str {
        "redis"
    }

    async fn list(&self, collection: &str) -> Result<Vec<Record>, StoreError> {
        let mut connection = self.connection.clone();
        let raw: Vec<(String, HashMap<String, String>)> = LIST
            .key(index_key(collection))
            .invoke_async(&mut connection)
            .await?;

        let mut records = raw
            .into_iter()
            .map(|(id, fields)| {
                let data = decode(&id, fields)?;
                Ok(Record { id, data })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
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
        let mut connection = self.connection.clone();
        let raw: Option<HashMap<String, String>> = GET
            .key(index_key(collection))
            .key(record_key(collection, id))
            .arg(id)
            .invoke_async(&mut connection)
            .await?;

        raw.map(|fields| decode(id, fields)).transpose()
    }

    async fn add(&self, collection: &str, data: Document) -> Result<String, StoreError> {
        loop {
            let id = new_id();

            if self.write(collection, &id, &data, true).await? {
                return Ok(id);
            }

            warn!("Generated id {id} already taken in {collection}, retrying");
        }
    }

    async fn set(&self, collection: &str, id: &str, data: Document) -> Result<(), StoreError> {
        self.write(collection, id, &data, false).await?;

        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<Document, StoreError> {
        let mut invocation = UPDATE.prepare_invoke();
        invocation
            .key(index_key(collection))
            .key(record_key(collection, id))
            .arg(id);
        for (field, raw) in encode(id, &fields)? {
            invocation.arg(field).arg(raw);
        }

        let mut connection = self.connection.clone();
        let raw: Option<HashMap<String, String>> = invocation.invoke_async(&mut connection).await?;

        match raw {
            Some(fields) => decode(id, fields),
            None => Err(StoreError::Missing(id.to_string())),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();
        let removed: i64 = DELETE
            .key(index_key(collection))
            .key(record_key(collection, id))
            .arg(id)
            .invoke_async(&mut connection)
            .await?;

        Ok(removed > 0)
    }

    async fn increment(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        by: i64,
    ) -> Result<i64, StoreError> {
        let mut connection = self.connection.clone();
        let next: Option<i64> = INCREMENT
            .key(index_key(collection))
            .key(record_key(collection, id))
            .arg(id)
            .arg(field)
            .arg(by)
            .invoke_async(&mut connection)
            .await?;

        next.ok_or_else(|| StoreError::NotCounter {
            id: id.to_string(),
            field: field.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::env;

    use serde_json::json;

    use super::*;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    #[test]
    fn test_keys() {
        assert_eq!(index_key("tickets"), "unilife:tickets");
        assert_eq!(record_key("tickets", "abc"), "unilife:tickets:abc");
    }

    #[test]
    fn test_encode_decode_keeps_values() {
        let document = doc(json!({
            "title": "x",
            "tags": [],
            "meta": {},
            "seats": 2,
            "price": 12.5,
            "note": null,
            "createdAt": 1760000000000i64,
        }));

        let fields: HashMap<String, String> = encode("t1", &document).unwrap().into_iter().collect();
        assert_eq!(fields["tags"], "[]");
        assert_eq!(fields["meta"], "{}");
        assert_eq!(fields["title"], "\"x\"");

        assert_eq!(decode("t1", fields).unwrap(), document);
    }

    #[test]
    fn test_integer_fields_are_hincrby_compatible() {
        let fields = encode("visitors", &doc(json!({"count": -3}))).unwrap();

        assert_eq!(fields, vec![("count".to_string(), "-3".to_string())]);
    }

    #[test]
    fn test_decode_corrupt() {
        let mut fields = HashMap::new();
        fields.insert("title".to_string(), "not json".to_string());

        assert!(matches!(
            decode("t1", fields),
            Err(StoreError::Corrupt { id, .. }) if id == "t1"
        ));
    }

    async fn live_store() -> Option<RedisStore> {
        let url = env::var("REDIS_URL").ok()?;
        let connection = init_redis(&url).await.unwrap();

        Some(RedisStore::new(connection))
    }

    #[tokio::test]
    #[ignore = "needs a Redis server at REDIS_URL"]
    async fn test_redis_add_get_delete() {
        let Some(store) = live_store().await else {
            return;
        };
        let collection = format!("test-{}", new_id());

        let id = store
            .add(&collection, doc(json!({"title": "x", "tags": []})))
            .await
            .unwrap();
        assert_eq!(
            store.get(&collection, &id).await.unwrap(),
            Some(doc(json!({"title": "x", "tags": []})))
        );
        assert_eq!(store.list(&collection).await.unwrap().len(), 1);

        assert!(store.delete(&collection, &id).await.unwrap());
        assert!(!store.delete(&collection, &id).await.unwrap());
        assert_eq!(store.get(&collection, &id).await.unwrap(), None);
        assert!(store.list(&collection).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "needs a Redis server at REDIS_URL"]
    async fn test_redis_update() {
        let Some(store) = live_store().await else {
            return;
        };
        let collection = format!("test-{}", new_id());

        assert!(matches!(
            store.update(&collection, "ghost", doc(json!({"title": "y"}))).await,
            Err(StoreError::Missing(id)) if id == "ghost"
        ));
        assert_eq!(store.get(&collection, "ghost").await.unwrap(), None);

        let id = store
            .add(&collection, doc(json!({"title": "x", "seats": 1})))
            .await
            .unwrap();
        assert_eq!(
            store
                .update(&collection, &id, doc(json!({"seats": 2})))
                .await
                .unwrap(),
            doc(json!({"title": "x", "seats": 2}))
        );

        store.delete(&collection, &id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs a Redis server at REDIS_URL"]
    async fn test_redis_concurrent_increment() {
        let Some(store) = live_store().await else {
            return;
        };
        let collection = format!("test-{}", new_id());

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                let collection = collection.clone();
                tokio::spawn(async move {
                    store.increment(&collection, "visitors", "count", 1).await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let document = store.get(&collection, "visitors").await.unwrap().unwrap();
        assert_eq!(document["count"], json!(50));

        store
            .set(&collection, "broken", doc(json!({"count": "many"})))
            .await
            .unwrap();
        assert!(matches!(
            store.increment(&collection, "broken", "count", 1).await,
            Err(StoreError::NotCounter { .. })
        ));

        store.delete(&collection, "visitors").await.unwrap();
        store.delete(&collection, "broken").await.unwrap();
    }
}
