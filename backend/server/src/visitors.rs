use serde_json::Value;
use tracing::warn;

use crate::{error::AppError, store::RecordStore};

pub const SITE_STATS: &str = "siteStats";
pub const VISITORS: &str = "visitors";
pub const COUNT: &str = "count";

/// Current visitor count, creating the counter document at 0 when it is missing.
pub async fn count(store: &dyn RecordStore) -> Result<i64, AppError> {
    if let Some(document) = store.get(SITE_STATS, VISITORS).await? {
        return Ok(document.get(COUNT).and_then(Value::as_i64).unwrap_or(0));
    }

    warn!("{SITE_STATS}/{VISITORS} not found, creating it");
    // Adding 0 creates the document without racing a concurrent visit.
    Ok(store.increment(SITE_STATS, VISITORS, COUNT, 0).await?)
}

pub async fn record_visit(store: &dyn RecordStore) -> Result<i64, AppError> {
    Ok(store.increment(SITE_STATS, VISITORS, COUNT, 1).await?)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_count_creates_counter() {
        let store = MemoryStore::new();

        assert_eq!(count(&store).await.unwrap(), 0);

        let document = store.get(SITE_STATS, VISITORS).await.unwrap().unwrap();
        assert_eq!(document[COUNT], json!(0));
    }

    #[tokio::test]
    async fn test_visits_accumulate() {
        let store = MemoryStore::new();

        for _ in 0..3 {
            record_visit(&store).await.unwrap();
        }

        assert_eq!(count(&store).await.unwrap(), 3);
    }
}
