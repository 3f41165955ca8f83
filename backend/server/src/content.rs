//! # Site Content
//!
//! "About" entries and the recap/aftermovie gallery.
//!
//! Anyone can read. Only admins can create, edit or delete, using the same create-or-update
//! payload as tickets. There is no per-record ownership here.
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    auth::Identity,
    error::AppError,
    store::{Document, Record, RecordStore, StoreError},
    utils::SaveRequest,
};

pub const CREATED_AT: &str = "createdAt";
pub const STATUS: &str = "status";

#[derive(Debug, Clone, Copy)]
pub struct Collection {
    pub name: &'static str,
    pub kind: &'static str,
}

pub const ABOUT: Collection = Collection {
    name: "about",
    kind: "About",
};

pub const RECAPS: Collection = Collection {
    name: "recaps",
    kind: "Recap",
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    pub id: String,
    #[serde(flatten)]
    pub fields: Document,
}

impl From<Record> for Entry {
    fn from(record: Record) -> Self {
        Self {
            id: record.id,
            fields: record.data,
        }
    }
}

fn require_admin(identity: &Identity, collection: Collection) -> Result<(), AppError> {
    if identity.is_admin {
        return Ok(());
    }

    warn!(
        "{} tried to manage {} without the admin claim",
        identity.subject_id, collection.name
    );
    Err(AppError::Forbidden("admin claim required"))
}

fn not_found(collection: Collection, id: &str) -> AppError {
    AppError::NotFound {
        kind: collection.kind,
        id: id.to_string(),
    }
}

/// Lists a collection, optionally keeping only entries with a matching `status`.
pub async fn list(
    store: &dyn RecordStore,
    collection: Collection,
    status: Option<&str>,
) -> Result<Vec<Entry>, AppError> {
    let records = match status {
        Some(status) => {
            store
                .find_by_field(collection.name, STATUS, &Value::from(status))
                .await?
        }
        None => store.list(collection.name).await?,
    };

    Ok(records.into_iter().map(Entry::from).collect())
}

pub async fn save(
    store: &dyn RecordStore,
    collection: Collection,
    identity: &Identity,
    request: SaveRequest,
) -> Result<Entry, AppError> {
    require_admin(identity, collection)?;

    match request {
        SaveRequest::Create(mut data) => {
            data.insert(
                CREATED_AT.to_string(),
                Value::from(Utc::now().timestamp_millis()),
            );

            let id = store.add(collection.name, data.clone()).await?;
            info!("{} created {} {id}", identity.subject_id, collection.name);

            Ok(Entry { id, fields: data })
        }
        SaveRequest::Update { id, mut fields } => {
            fields.remove(CREATED_AT);

            let data = store
                .update(collection.name, &id, fields)
                .await
                .map_err(|e| match e {
                    StoreError::Missing(id) => not_found(collection, &id),
                    other => other.into(),
                })?;
            info!("{} updated {} {id}", identity.subject_id, collection.name);

            Ok(Entry { id, fields: data })
        }
    }
}

pub async fn delete(
    store: &dyn RecordStore,
    collection: Collection,
    identity: &Identity,
    id: &str,
) -> Result<(), AppError> {
    require_admin(identity, collection)?;

    if !store.delete(collection.name, id).await? {
        return Err(not_found(collection, id));
    }

    info!("{} deleted {} {id}", identity.subject_id, collection.name);
    Ok(())
}
