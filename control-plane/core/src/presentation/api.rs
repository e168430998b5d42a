// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP API
//!
//! | Route | Description |
//! |-------|-------------|
//! | `GET /health` | Liveness |
//! | `GET /api/v1/schools` | List tenants (`limit`, `offset`) |
//! | `POST /api/v1/schools` | Register and provision a tenant |
//! | `GET/PUT/DELETE /api/v1/schools/{id}` | Manage one tenant |
//! | `GET /api/v1/schools/{code}/stats` | Pool occupancy of a tenant |
//! | `GET /api/v1/tenant` | Resolved tenant of the request |

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

use crate::application::tenant_resolver::TenantResolver;
use crate::application::tenant_service::{RegisterTenant, TenantService};
use crate::domain::tenant::{TenantId, TenantSummary, TenantUpdate};
use crate::infrastructure::pool_cache::TenantPool;
use crate::presentation::error::ApiError;
use crate::presentation::middleware::{resolve_tenant, TenantContext};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<dyn TenantService>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(service: Arc<dyn TenantService>) -> Self {
        Self {
            service,
            started_at: Instant::now(),
        }
    }
}

pub fn router<P: TenantPool>(state: AppState, resolver: TenantResolver<P>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/schools", get(list_schools_handler).post(create_school_handler))
        .route(
            "/api/v1/schools/{id}",
            get(get_school_handler)
                .put(update_school_handler)
                .delete(delete_school_handler),
        )
        .route("/api/v1/schools/{id}/stats", get(school_stats_handler))
        .route("/api/v1/tenant", get(current_tenant_handler::<P>))
        .with_state(state)
        .layer(middleware::from_fn_with_state(resolver, resolve_tenant::<P>))
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<i64>,
    offset: Option<i64>,
}

fn parse_id(raw: &str) -> Result<TenantId, ApiError> {
    TenantId::from_string(raw).map_err(|_| ApiError::BadRequest("invalid school id".to_string()))
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

async fn list_schools_handler(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<TenantSummary>>, ApiError> {
    let tenants = state.service.list_tenants(params.limit, params.offset).await?;
    Ok(Json(tenants))
}

async fn create_school_handler(
    State(state): State<AppState>,
    Json(request): Json<RegisterTenant>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = state.service.create_tenant(request).await?;
    Ok((StatusCode::CREATED, Json(tenant)))
}

async fn get_school_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TenantSummary>, ApiError> {
    let tenant = state.service.get_tenant(parse_id(&id)?).await?;
    Ok(Json(tenant))
}

async fn update_school_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<TenantUpdate>,
) -> Result<Json<TenantSummary>, ApiError> {
    let tenant = state.service.update_tenant(parse_id(&id)?, update).await?;
    Ok(Json(tenant))
}

async fn delete_school_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Teardown keeps running after the response; it reports on its own.
    let deleted = state.service.delete_tenant(parse_id(&id)?).await?;
    Ok(Json(json!({
        "id": deleted.tenant.id,
        "code": deleted.tenant.code,
        "message": "school deleted",
    })))
}

async fn school_stats_handler(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = state.service.tenant_stats(&code).await?;
    Ok(Json(json!({
        "tenant_code": code.to_ascii_lowercase(),
        "pool": stats,
    })))
}

async fn current_tenant_handler<P: TenantPool>(tenant: TenantContext<P>) -> Json<serde_json::Value> {
    Json(json!({
        "tenant_code": tenant.code,
        "pool": tenant.pool.stats(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::tenant_service::StandardTenantService;
    use crate::domain::config::TenantDatabaseConfig;
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::pool_cache::test_support::{cipher, MockConnector, MockPool};
    use crate::infrastructure::pool_cache::ConnectionPoolCache;
    use crate::infrastructure::provisioner::test_support::{MockAdmin, MockSchema};
    use crate::infrastructure::provisioner::TenantProvisioner;
    use crate::infrastructure::repositories::InMemoryTenantRepository;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> Router {
        let cipher = cipher();
        let connector = Arc::new(MockConnector::default());
        let cache = Arc::new(ConnectionPoolCache::<MockPool>::new(cipher.clone(), connector.clone()));
        let provisioner = Arc::new(TenantProvisioner::new(
            Arc::new(MockAdmin::default()),
            connector,
            Arc::new(MockSchema::default()),
            cache.clone(),
            &TenantDatabaseConfig::default(),
            Duration::from_secs(5),
        ));
        let repository = Arc::new(InMemoryTenantRepository::new());
        let service = Arc::new(StandardTenantService::new(
            repository.clone(),
            provisioner,
            cache.clone(),
            cipher,
            EventBus::new(16),
        ));
        router(AppState::new(service), TenantResolver::new(repository, cache))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    fn create_request(code: &str) -> Request<Body> {
        let payload = json!({
            "name": "Everest International School",
            "code": code,
            "domain": format!("{code}.example.edu"),
        });
        Request::post("/api/v1/schools")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_needs_no_tenant() {
        let app = app();
        let (status, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_created_tenant_resolves_by_header() {
        let app = app();
        let (status, created) = send(&app, create_request("eis")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["db_name"], "school_eis_db");

        let request = Request::get("/api/v1/tenant")
            .header("X-Tenant-Code", "eis")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tenant_code"], "eis");

        let uri = "/api/v1/schools/eis/stats";
        let (status, body) = send(&app, Request::get(uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pool"]["total"], 3);
    }

    #[tokio::test]
    async fn test_subdomain_and_query_resolution() {
        let app = app();
        send(&app, create_request("kmc")).await;

        let by_host = Request::get("/api/v1/tenant")
            .header("host", "kmc.school.example:3011")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, by_host).await.0, StatusCode::OK);

        let by_query = Request::get("/api/v1/tenant?tenant_code=kmc")
            .header("host", "localhost")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, by_query).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_resolution_failures() {
        let app = app();

        let missing = Request::get("/api/v1/tenant")
            .header("host", "localhost:3011")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, missing).await.0, StatusCode::BAD_REQUEST);

        let unknown = Request::get("/api/v1/tenant")
            .header("X-Tenant-Code", "nope")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, unknown).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "tenant not found");
    }

    #[tokio::test]
    async fn test_school_management_routes() {
        let app = app();
        let (_, created) = send(&app, create_request("eis")).await;
        let id = created["id"].as_str().unwrap().to_string();

        let (status, _) = send(&app, create_request("eis")).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, list) = send(&app, Request::get("/api/v1/schools?limit=5").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);

        let update = Request::put(format!("/api/v1/schools/{id}"))
            .header("content-type", "application/json")
            .body(Body::from(json!({"name": "Everest Academy"}).to_string()))
            .unwrap();
        let (status, updated) = send(&app, update).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["name"], "Everest Academy");

        let (status, _) = send(&app, Request::get("/api/v1/schools/not-a-uuid").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let delete = Request::delete(format!("/api/v1/schools/{id}")).body(Body::empty()).unwrap();
        assert_eq!(send(&app, delete).await.0, StatusCode::OK);

        let (status, _) = send(&app, Request::get(format!("/api/v1/schools/{id}")).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
