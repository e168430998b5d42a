// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Tenant resolution middleware.
//!
//! Every request outside the exempt control-plane paths is resolved to a
//! tenant before it reaches a handler. Handlers take the result through the
//! [`TenantContext`] extractor.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::HOST;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use sqlx::postgres::PgPool;
use tracing::error;

use crate::application::tenant_resolver::{
    is_exempt_path, resolve_tenant_code, ResolveError, TenantResolver, TENANT_HEADER,
};
use crate::domain::tenant::TenantCode;
use crate::infrastructure::pool_cache::TenantPool;
use crate::presentation::error::ApiError;

/// Resolved tenant attached to the request for downstream handlers.
#[derive(Debug, Clone)]
pub struct TenantContext<P = PgPool> {
    pub code: TenantCode,
    pub pool: P,
}

pub async fn resolve_tenant<P: TenantPool>(
    State(resolver): State<TenantResolver<P>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if is_exempt_path(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let code = {
        let headers = request.headers();
        let header = headers.get(TENANT_HEADER).and_then(|v| v.to_str().ok());
        let host = headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| request.uri().host());
        resolve_tenant_code(header, request.uri().query(), host)
    }
    .ok_or(ResolveError::MissingTenantCode)?;

    let resolved = resolver.resolve(&code).await?;
    request.extensions_mut().insert(TenantContext {
        code: resolved.code,
        pool: resolved.pool,
    });

    Ok(next.run(request).await)
}

impl<S, P> FromRequestParts<S> for TenantContext<P>
where
    S: Send + Sync,
    P: TenantPool,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TenantContext<P>>()
            .cloned()
            .ok_or_else(|| {
                error!(path = %parts.uri.path(), "Tenant context requested on an unresolved route");
                ApiError::Internal
            })
    }
}
