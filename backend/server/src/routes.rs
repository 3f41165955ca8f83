use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    auth::Identity,
    content::{self, ABOUT, Collection, Entry, RECAPS},
    error::{ApiError, AppError, Context},
    state::State as AppState,
    tickets::{self, PROTECTED, Ticket},
    utils::parse_save,
    visitors,
};

type Created = (StatusCode, Json<Value>);

fn body(payload: Result<Json<Value>, JsonRejection>, action: &'static str) -> Result<Value, ApiError> {
    payload.map(|Json(value)| value).map_err(|e| {
        let error = if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(e.body_text())
        } else {
            AppError::MalformedPayload(e.body_text())
        };

        error.during(action)
    })
}

pub async fn healthz_handler() -> &'static str {
    "ok"
}

pub async fn list_tickets_handler(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Vec<Ticket>>, ApiError> {
    let tickets = tickets::list(state.store.as_ref(), &identity)
        .await
        .during("fetching tickets")?;

    Ok(Json(tickets))
}

pub async fn save_ticket_handler(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Created, ApiError> {
    const ACTION: &str = "saving ticket";

    let request = parse_save(body(payload, ACTION)?, &PROTECTED).during(ACTION)?;
    let ticket = tickets::save(state.store.as_ref(), &identity, request)
        .await
        .during(ACTION)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Ticket saved successfully", "ticket": ticket })),
    ))
}

pub async fn delete_ticket_handler(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    tickets::delete(state.store.as_ref(), &identity, &id)
        .await
        .during("deleting ticket")?;

    Ok(Json(json!({ "message": "Ticket deleted successfully" })))
}

pub async fn visitors_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let count = visitors::count(state.store.as_ref())
        .await
        .during("fetching visitor count")?;

    Ok(Json(json!({ "count": count })))
}

pub async fn visit_handler(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    visitors::record_visit(state.store.as_ref())
        .await
        .during("incrementing visitor count")?;

    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
pub struct ContentFilter {
    status: Option<String>,
}

async fn list_content(
    state: &AppState,
    collection: Collection,
    filter: Result<Query<ContentFilter>, QueryRejection>,
    action: &'static str,
) -> Result<Json<Vec<Entry>>, ApiError> {
    let Query(filter) =
        filter.map_err(|e| AppError::MalformedPayload(e.body_text()).during(action))?;
    let entries = content::list(state.store.as_ref(), collection, filter.status.as_deref())
        .await
        .during(action)?;

    Ok(Json(entries))
}

async fn save_content(
    state: &AppState,
    collection: Collection,
    identity: Identity,
    payload: Result<Json<Value>, JsonRejection>,
    action: &'static str,
    key: &'static str,
) -> Result<Created, ApiError> {
    let request = parse_save(body(payload, action)?, &[content::CREATED_AT]).during(action)?;
    let entry = content::save(state.store.as_ref(), collection, &identity, request)
        .await
        .during(action)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": format!("{} saved successfully", collection.kind),
            key: entry,
        })),
    ))
}

async fn delete_content(
    state: &AppState,
    collection: Collection,
    identity: Identity,
    id: String,
    action: &'static str,
) -> Result<Json<Value>, ApiError> {
    content::delete(state.store.as_ref(), collection, &identity, &id)
        .await
        .during(action)?;

    Ok(Json(
        json!({ "message": format!("{} deleted successfully", collection.kind) }),
    ))
}

pub async fn list_about_handler(
    State(state): State<Arc<AppState>>,
    filter: Result<Query<ContentFilter>, QueryRejection>,
) -> Result<Json<Vec<Entry>>, ApiError> {
    list_content(&state, ABOUT, filter, "fetching about content").await
}

pub async fn save_about_handler(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Created, ApiError> {
    save_content(&state, ABOUT, identity, payload, "saving about content", "about").await
}

pub async fn delete_about_handler(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    delete_content(&state, ABOUT, identity, id, "deleting about content").await
}

pub async fn list_recaps_handler(
    State(state): State<Arc<AppState>>,
    filter: Result<Query<ContentFilter>, QueryRejection>,
) -> Result<Json<Vec<Entry>>, ApiError> {
    list_content(&state, RECAPS, filter, "fetching recaps").await
}

pub async fn save_recap_handler(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Created, ApiError> {
    save_content(&state, RECAPS, identity, payload, "saving recap", "recap").await
}

pub async fn delete_recap_handler(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    delete_content(&state, RECAPS, identity, id, "deleting recap").await
}
