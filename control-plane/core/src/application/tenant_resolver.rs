// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Tenant Resolver
//!
//! Works out which tenant an inbound request targets and hands back a live
//! pool for that tenant's database.
//!
//! # Precedence
//!
//! First match wins:
//!
//! 1. `X-Tenant-Code` header
//! 2. `tenant_code` query parameter
//! 3. Leftmost label of the `Host` header (`eis.school.example` → `eis`),
//!    ignoring `www`, `api`, `localhost`, IP literals and empty hosts
//!
//! Unknown, inactive and malformed codes all resolve to
//! [`ResolveError::TenantNotFound`] so callers cannot discover which tenants
//! exist.

use sqlx::postgres::PgPool;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::repository::TenantRepository;
use crate::domain::tenant::TenantCode;
use crate::infrastructure::pool_cache::{ConnectionPoolCache, ConnectionTarget, TenantPool};

pub const TENANT_HEADER: &str = "X-Tenant-Code";
pub const TENANT_QUERY_PARAM: &str = "tenant_code";

/// Path prefixes served from the control plane without tenant resolution.
pub const EXEMPT_PATHS: &[&str] = &[
    "/health",
    "/metrics",
    "/api/v1/schools",
    "/api/v1/auth",
    "/api/v1/metrics",
    "/api/v1/readiness",
    "/api/v1/liveness",
];

const IGNORED_SUBDOMAINS: &[&str] = &["www", "api", "localhost"];

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no tenant code in request")]
    MissingTenantCode,

    #[error("tenant not found")]
    TenantNotFound,

    /// The tenant exists but its database could not be reached.
    #[error("tenant '{code}' is unavailable: {reason}")]
    TenantUnavailable { code: String, reason: String },
}

/// A tenant code paired with a live pool for its database.
#[derive(Debug, Clone)]
pub struct ResolvedTenant<P = PgPool> {
    pub code: TenantCode,
    pub pool: P,
}

/// Whether `path` is served without tenant resolution. A prefix only matches
/// whole segments, so `/healthz` is not exempt.
pub fn is_exempt_path(path: &str) -> bool {
    EXEMPT_PATHS.iter().any(|prefix| {
        path.strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    })
}

/// Leftmost label of a `Host` header value, lowercased.
pub fn extract_subdomain(host: &str) -> Option<String> {
    let host = host.trim();
    if host.is_empty() || host.starts_with('[') {
        return None;
    }

    let hostname = host.split(':').next().unwrap_or_default();
    if hostname.parse::<Ipv4Addr>().is_ok() {
        return None;
    }

    let label = hostname.split('.').next().unwrap_or_default().to_ascii_lowercase();
    if label.is_empty() || IGNORED_SUBDOMAINS.contains(&label.as_str()) {
        return None;
    }
    Some(label)
}

/// Value of the `tenant_code` parameter in a raw query string.
pub fn query_tenant_code(query: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| *key == TENANT_QUERY_PARAM)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Apply the header → query → subdomain precedence to the raw request parts.
pub fn resolve_tenant_code(
    header: Option<&str>,
    query: Option<&str>,
    host: Option<&str>,
) -> Option<String> {
    header
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .or_else(|| query.and_then(query_tenant_code))
        .or_else(|| host.and_then(extract_subdomain))
}

/// Looks tenants up in the control plane and routes them to their pool.
pub struct TenantResolver<P: TenantPool = PgPool> {
    repository: Arc<dyn TenantRepository>,
    cache: Arc<ConnectionPoolCache<P>>,
}

impl<P: TenantPool> Clone for TenantResolver<P> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<P: TenantPool> TenantResolver<P> {
    pub fn new(repository: Arc<dyn TenantRepository>, cache: Arc<ConnectionPoolCache<P>>) -> Self {
        Self { repository, cache }
    }

    /// Resolve an extracted code to an active tenant and a live pool.
    pub async fn resolve(&self, raw_code: &str) -> Result<ResolvedTenant<P>, ResolveError> {
        let code = TenantCode::parse(raw_code).map_err(|_| {
            debug!(code = raw_code, "Rejected malformed tenant code");
            ResolveError::TenantNotFound
        })?;

        let record = self
            .repository
            .find_active_by_code(code.as_str())
            .await
            .map_err(|e| {
                warn!(tenant = %code, error = %e, "Control-plane lookup failed");
                ResolveError::TenantUnavailable {
                    code: code.to_string(),
                    reason: e.to_string(),
                }
            })?;
        let Some(record) = record else {
            debug!(tenant = %code, "No active tenant for code");
            // A resolve racing a deactivation can leave a pool behind.
            if self.cache.contains(code.as_str()) {
                self.cache.close_connection(code.as_str()).await;
            }
            return Err(ResolveError::TenantNotFound);
        };

        let target = ConnectionTarget::from(&record);
        let pool = self
            .cache
            .get_connection(code.as_str(), &target, &record.db_password)
            .await
            .map_err(|e| {
                warn!(tenant = %code, error = %e, "Tenant database unavailable");
                ResolveError::TenantUnavailable {
                    code: code.to_string(),
                    reason: e.to_string(),
                }
            })?;

        Ok(ResolvedTenant { code, pool })
    }
}
