use serde_json::Value;

use crate::{
    error::AppError::{self, MalformedPayload},
    store::Document,
};

/// A save payload split on the presence of a non-empty `id`.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveRequest {
    Create(Document),
    Update { id: String, fields: Document },
}

/// Parses a create-or-update body, dropping `protected` fields the client may not set.
pub fn parse_save(payload: Value, protected: &[&str]) -> Result<SaveRequest, AppError> {
    let Value::Object(mut fields) = payload else {
        return Err(MalformedPayload("expected a JSON object".to_string()));
    };

    let id = match fields.remove("id") {
        None | Some(Value::Null) => None,
        Some(Value::String(id)) if id.trim().is_empty() => None,
        Some(Value::String(id)) => Some(id),
        Some(other) => {
            return Err(MalformedPayload(format!("id must be a string, got {other}")));
        }
    };

    for field in protected {
        fields.remove(*field);
    }

    Ok(match id {
        None => SaveRequest::Create(fields),
        Some(id) => SaveRequest::Update { id, fields },
    })
}
