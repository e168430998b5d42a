// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP error mapping. Bodies are `{"error": "..."}` with a fixed message per
//! class; lower-layer details only go to the log.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::application::tenant_resolver::ResolveError;
use crate::application::tenant_service::TenantServiceError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("tenant not found")]
    NotFound,

    #[error("{0} already exists")]
    Conflict(String),

    #[error("tenant service unavailable")]
    Unavailable,

    #[error("internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::MissingTenantCode => {
                ApiError::BadRequest("tenant code is required".to_string())
            }
            ResolveError::TenantNotFound => ApiError::NotFound,
            ResolveError::TenantUnavailable { .. } => ApiError::Unavailable,
        }
    }
}

impl From<TenantServiceError> for ApiError {
    fn from(err: TenantServiceError) -> Self {
        match err {
            TenantServiceError::Validation(message) => ApiError::BadRequest(message),
            TenantServiceError::NotFound => ApiError::NotFound,
            TenantServiceError::Conflict(_) => ApiError::Conflict("tenant".to_string()),
            TenantServiceError::Provisioning(e) => {
                error!(error = %e, "Tenant provisioning failed");
                ApiError::Unavailable
            }
            other => {
                error!(error = %other, "Tenant management request failed");
                ApiError::Internal
            }
        }
    }
}
