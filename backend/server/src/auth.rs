//! # Identity Verification
//!
//! Turns an `Authorization: Bearer <token>` header into a verified [`Identity`].
//!
//! Token validation is owned by the identity platform. We only forward the token to its
//! verification endpoint and trust the decoded claim it answers with, including the `admin` flag.
//!
//! ## Verification endpoint
//! - Request: `POST` JSON `{ "token": "<token>" }`, optional `x-api-key` header
//! - 2xx: `{ "uid": "<subject>", "admin": true }` (`admin` may be absent)
//! - 400/401/403: token rejected
//! - Anything else: verifier failure, surfaced as an internal error
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::{
    error::{ApiError, AppError},
    state::State,
};

const BEARER: &str = "Bearer ";

/// Verified caller for the lifetime of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject_id: String,
    pub is_admin: bool,
}

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("token rejected")]
    Rejected,

    #[error("verification service unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("verification service answered {0}")]
    Unexpected(StatusCode),
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, VerifyError>;
}

/// Extracts the token from a `Bearer` authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or(AppError::Unauthenticated("missing token"))?
        .to_str()
        .map_err(|_| AppError::Unauthenticated("malformed authorization header"))?;

    let token = header
        .strip_prefix(BEARER)
        .ok_or(AppError::Unauthenticated("malformed authorization header"))?
        .trim();

    if token.is_empty() {
        return Err(AppError::Unauthenticated("missing token"));
    }

    Ok(token)
}

#[derive(Deserialize)]
struct DecodedToken {
    uid: String,
    admin: Option<bool>,
}

pub struct HttpVerifier {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl HttpVerifier {
    pub fn new(
        url: impl Into<String>,
        timeout: Duration,
        api_key: Option<String>,
    ) -> Result<Self, VerifyError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url: url.into(),
            api_key,
        })
    }
}

#[async_trait]
impl IdentityVerifier for HttpVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, VerifyError> {
        let mut request = self.client.post(&self.url).json(&json!({ "token": token }));
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await?;

        match response.status() {
            status if status.is_success() => {
                let decoded: DecodedToken = response.json().await?;

                if decoded.uid.is_empty() {
                    return Err(VerifyError::Rejected);
                }

                Ok(Identity {
                    subject_id: decoded.uid,
                    is_admin: decoded.admin.unwrap_or(false),
                })
            }
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(VerifyError::Rejected)
            }
            status => Err(VerifyError::Unexpected(status)),
        }
    }
}

impl FromRequestParts<Arc<State>> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<State>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).map_err(|e| e.during("authenticating request"))?;

        state
            .verifier
            .verify(token)
            .await
            .map_err(|e| AppError::from(e).during("authenticating request"))
    }
}
