//! # Tickets
//!
//! Ownership rules for ticket records.
//!
//! ## Lifecycle of a request
//!
//! `Unverified → Verified → Authorized | Forbidden → Completed | Failed`
//!
//! - Verification happens in the [`Identity`] extractor, before any store call
//! - Authorization is decided here, per record
//! - The store performs the read/write
//!
//! ## Rules
//!
//! - List: admins see everything, everyone else only records they own
//! - Save without an id: create, owner and creation time come from the server
//! - Save with an id: update, owner or admin only, the owner never changes
//! - Delete: owner or admin only, hard delete
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    auth::Identity,
    error::AppError,
    store::{Document, Record, RecordStore, StoreError},
    utils::SaveRequest,
};

pub const TICKETS: &str = "tickets";
pub const OWNER_ID: &str = "ownerId";
pub const CREATED_AT: &str = "createdAt";

/// Fields a client can never write.
pub const PROTECTED: [&str; 2] = [OWNER_ID, CREATED_AT];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub owner_id: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    #[serde(flatten)]
    pub fields: Document,
}

impl Ticket {
    fn from_record(record: Record) -> Result<Self, StoreError> {
        let Record { id, mut data } = record;
        data.insert("id".to_string(), Value::String(id.clone()));

        serde_json::from_value(Value::Object(data))
            .map_err(|source| StoreError::Corrupt { id, source })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Owner,
    Admin,
}

pub fn authorize(identity: &Identity, ticket: &Ticket) -> Result<Access, AppError> {
    if ticket.owner_id == identity.subject_id {
        Ok(Access::Owner)
    } else if identity.is_admin {
        Ok(Access::Admin)
    } else {
        warn!(
            "{} denied access to ticket {} owned by {}",
            identity.subject_id, ticket.id, ticket.owner_id
        );
        Err(AppError::Forbidden("not the ticket owner"))
    }
}

fn not_found(id: &str) -> AppError {
    AppError::NotFound {
        kind: "Ticket",
        id: id.to_string(),
    }
}

async fn fetch(store: &dyn RecordStore, id: &str) -> Result<Ticket, AppError> {
    let data = store.get(TICKETS, id).await?.ok_or_else(|| not_found(id))?;

    Ok(Ticket::from_record(Record {
        id: id.to_string(),
        data,
    })?)
}

pub async fn list(store: &dyn RecordStore, identity: &Identity) -> Result<Vec<Ticket>, AppError> {
    let records = if identity.is_admin {
        store.list(TICKETS).await?
    } else {
        store
            .find_by_field(TICKETS, OWNER_ID, &Value::from(identity.subject_id.as_str()))
            .await?
    };

    let tickets = records
        .into_iter()
        .map(Ticket::from_record)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(tickets)
}

pub async fn save(
    store: &dyn RecordStore,
    identity: &Identity,
    request: SaveRequest,
) -> Result<Ticket, AppError> {
    match request {
        SaveRequest::Create(mut data) => {
            for field in PROTECTED {
                data.remove(field);
            }
            data.insert(OWNER_ID.to_string(), Value::from(identity.subject_id.as_str()));
            data.insert(
                CREATED_AT.to_string(),
                Value::from(Utc::now().timestamp_millis()),
            );

            let id = store.add(TICKETS, data.clone()).await?;
            info!("{} created ticket {id}", identity.subject_id);

            Ok(Ticket::from_record(Record { id, data })?)
        }
        SaveRequest::Update { id, mut fields } => {
            let existing = fetch(store, &id).await?;
            let access = authorize(identity, &existing)?;

            for field in PROTECTED {
                fields.remove(field);
            }

            let data = store
                .update(TICKETS, &id, fields)
                .await
                .map_err(|e| match e {
                    StoreError::Missing(id) => not_found(&id),
                    other => other.into(),
                })?;
            info!("{} updated ticket {id} as {access:?}", identity.subject_id);

            Ok(Ticket::from_record(Record { id, data })?)
        }
    }
}

pub async fn delete(store: &dyn RecordStore, identity: &Identity, id: &str) -> Result<(), AppError> {
    let existing = fetch(store, id).await?;
    let access = authorize(identity, &existing)?;

    // Lost a race with another delete.
    if !store.delete(TICKETS, id).await? {
        return Err(not_found(id));
    }

    info!("{} deleted ticket {id} as {access:?}", identity.subject_id);
    Ok(())
}
