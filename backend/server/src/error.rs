use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

use crate::{auth::VerifyError, store::StoreError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unauthorized: {0}")]
    Unauthenticated(&'static str),

    #[error("Forbidden: {0}")]
    Forbidden(&'static str),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::MalformedPayload { .. } => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Attaches the action that failed, e.g. `"deleting ticket"`.
    pub fn during(self, action: &'static str) -> ApiError {
        ApiError {
            action,
            error: self,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::InternalError(Box::new(e))
    }
}

impl From<VerifyError> for AppError {
    fn from(e: VerifyError) -> Self {
        match e {
            VerifyError::Rejected => AppError::Unauthenticated("token rejected"),
            other => AppError::InternalError(Box::new(other)),
        }
    }
}

/// An [`AppError`] tied to the request action, rendered as `{ message, error }`.
#[derive(Debug)]
pub struct ApiError {
    pub action: &'static str,
    pub error: AppError,
}

pub trait Context<T> {
    fn during(self, action: &'static str) -> Result<T, ApiError>;
}

impl<T, E> Context<T> for Result<T, E>
where
    E: Into<AppError>,
{
    fn during(self, action: &'static str) -> Result<T, ApiError> {
        self.map_err(|e| {
            let error: AppError = e.into();
            error.during(action)
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status();

        if status.is_server_error() {
            error!("Error {}: {}", self.action, self.error);
        } else {
            debug!("Error {}: {}", self.action, self.error);
        }

        let body = json!({
            "message": format!("Error {}", self.action),
            "error": self.error.to_string(),
        });

        (status, Json(body)).into_response()
    }
}
