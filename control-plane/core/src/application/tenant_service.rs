// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Tenant Management Use Cases
//!
//! Application service behind the `/api/v1/schools` endpoints.
//!
//! # Registration flow
//!
//! 1. Validate the request and derive role/database names from the code
//! 2. Reject a code that is already registered
//! 3. Provision role, database, grants and baseline schema
//! 4. Encrypt the database password
//! 5. Persist the record (status `active`)
//! 6. Publish `TenantProvisioned`
//!
//! Steps 3–5 run in their own task: a client that disconnects mid-request
//! cannot leave a provisioned database without a record. A failure after step
//! 3 tears the new database down again before the error is returned.
//!
//! # Deletion
//!
//! The record is removed first so resolution fails immediately; database and
//! role teardown then runs in the background and reports through logs, the
//! `tenancy_teardown_failures_total` counter and `TeardownFailed` events.
//!
//! Registrations and teardowns are tracked; [`StandardTenantService::shutdown`]
//! waits for them so a stopping process does not abandon a half-removed
//! tenant.

use async_trait::async_trait;
use chrono::Utc;
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use sqlx::postgres::PgPool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::domain::events::TenantEvent;
use crate::domain::repository::{RepositoryError, TenantRepository};
use crate::domain::tenant::{
    validate_identifier, NewTenantRecord, TenantCode, TenantId, TenantStatus, TenantSummary,
    TenantUpdate,
};
use crate::infrastructure::crypto::{CipherError, SecretCipher};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::pool_cache::{ConnectionPoolCache, PoolStats, TenantPool};
use crate::infrastructure::provisioner::{ProvisioningError, TenantProvisioner};

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;
const GENERATED_PASSWORD_LEN: usize = 24;

/// Registration request for a new school.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterTenant {
    pub name: String,
    pub code: String,
    pub domain: String,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    /// Defaults to `school_<code>_user`. Must not name an existing role.
    #[serde(default)]
    pub db_user: Option<String>,
    /// Defaults to a random alphanumeric password.
    #[serde(default)]
    pub db_password: Option<String>,
}

/// A removed tenant plus the handle of its background teardown.
#[derive(Debug)]
pub struct DeletedTenant {
    pub tenant: TenantSummary,
    pub teardown: JoinHandle<()>,
}

#[derive(Debug, thiserror::Error)]
pub enum TenantServiceError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("tenant not found")]
    NotFound,

    #[error("provisioning failed: {0}")]
    Provisioning(#[source] ProvisioningError),

    #[error("repository error: {0}")]
    Repository(#[source] RepositoryError),

    #[error("credential encryption failed: {0}")]
    Cipher(#[from] CipherError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ProvisioningError> for TenantServiceError {
    fn from(err: ProvisioningError) -> Self {
        match err {
            ProvisioningError::Conflict(what) => TenantServiceError::Conflict(what),
            ProvisioningError::InvalidIdentifier(e) => TenantServiceError::Validation(e.to_string()),
            other => TenantServiceError::Provisioning(other),
        }
    }
}

impl From<RepositoryError> for TenantServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(what) => TenantServiceError::Conflict(what),
            RepositoryError::NotFound(_) => TenantServiceError::NotFound,
            other => TenantServiceError::Repository(other),
        }
    }
}

/// Tenant management use cases
#[async_trait]
pub trait TenantService: Send + Sync {
    async fn create_tenant(&self, request: RegisterTenant) -> Result<TenantSummary, TenantServiceError>;

    /// Non-suspended tenants, newest first. `limit` defaults to 10 and is
    /// clamped to 1..=100; negative offsets count as 0.
    async fn list_tenants(
        &self,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<TenantSummary>, TenantServiceError>;

    async fn get_tenant(&self, id: TenantId) -> Result<TenantSummary, TenantServiceError>;

    async fn update_tenant(
        &self,
        id: TenantId,
        update: TenantUpdate,
    ) -> Result<TenantSummary, TenantServiceError>;

    async fn delete_tenant(&self, id: TenantId) -> Result<DeletedTenant, TenantServiceError>;

    /// Occupancy of the tenant's cached pool.
    async fn tenant_stats(&self, code: &str) -> Result<PoolStats, TenantServiceError>;
}

/// Validated registration, ready to provision.
#[derive(Debug, Clone)]
struct Registration {
    code: TenantCode,
    name: String,
    domain: String,
    logo_url: Option<String>,
    timezone: String,
    database: String,
    role: String,
    password: String,
}

impl Registration {
    fn validate(request: RegisterTenant) -> Result<Self, TenantServiceError> {
        let code = TenantCode::parse(&request.code)
            .map_err(|e| TenantServiceError::Validation(e.to_string()))?;

        let name = request.name.trim().to_string();
        validate_name(&name)?;

        let domain = request.domain.trim().to_ascii_lowercase();
        if domain.is_empty() {
            return Err(TenantServiceError::Validation("domain is required".to_string()));
        }

        let role = match request.db_user {
            Some(user) if !user.trim().is_empty() => user.trim().to_string(),
            _ => code.role_name(),
        };
        validate_identifier(&role).map_err(|e| TenantServiceError::Validation(e.to_string()))?;
        if is_reserved_role(&role) {
            return Err(TenantServiceError::Validation(format!("db_user '{role}' is reserved")));
        }

        let password = match request.db_password {
            Some(password) if !password.is_empty() => password,
            _ => generate_password(),
        };

        Ok(Self {
            database: code.database_name(),
            name,
            domain,
            logo_url: request.logo_url.filter(|url| !url.trim().is_empty()),
            timezone: request
                .timezone
                .filter(|tz| !tz.trim().is_empty())
                .unwrap_or_else(|| "UTC".to_string()),
            role,
            password,
            code,
        })
    }
}

fn validate_name(name: &str) -> Result<(), TenantServiceError> {
    let len = name.chars().count();
    if !(2..=255).contains(&len) {
        return Err(TenantServiceError::Validation(
            "name must be 2-255 characters".to_string(),
        ));
    }
    Ok(())
}

/// The bootstrap superuser and the `pg_` namespace belong to the server.
fn is_reserved_role(role: &str) -> bool {
    role == "postgres" || role.starts_with("pg_")
}

fn generate_password() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

/// Standard implementation of TenantService
pub struct StandardTenantService<P: TenantPool = PgPool> {
    repository: Arc<dyn TenantRepository>,
    provisioner: Arc<TenantProvisioner<P>>,
    cache: Arc<ConnectionPoolCache<P>>,
    cipher: Arc<SecretCipher>,
    event_bus: EventBus,
    tasks: TaskTracker,
}

impl<P: TenantPool> Clone for StandardTenantService<P> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            provisioner: self.provisioner.clone(),
            cache: self.cache.clone(),
            cipher: self.cipher.clone(),
            event_bus: self.event_bus.clone(),
            tasks: self.tasks.clone(),
        }
    }
}

impl<P: TenantPool> StandardTenantService<P> {
    pub fn new(
        repository: Arc<dyn TenantRepository>,
        provisioner: Arc<TenantProvisioner<P>>,
        cache: Arc<ConnectionPoolCache<P>>,
        cipher: Arc<SecretCipher>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            repository,
            provisioner,
            cache,
            cipher,
            event_bus,
            tasks: TaskTracker::new(),
        }
    }

    /// Wait for running registrations and teardowns to finish.
    pub async fn shutdown(&self) {
        self.tasks.close();
        if !self.tasks.is_empty() {
            info!(tasks = self.tasks.len(), "Waiting for background tenant tasks");
        }
        self.tasks.wait().await;
    }

    /// Provision, encrypt and persist. Runs detached from the request.
    async fn register(self, registration: Registration) -> Result<TenantSummary, TenantServiceError> {
        let Registration {
            code,
            name,
            domain,
            logo_url,
            timezone,
            database,
            role,
            password,
        } = registration;

        if let Err(e) = self
            .provisioner
            .create_tenant(&code, &database, &role, &password)
            .await
        {
            if !matches!(e, ProvisioningError::InvalidIdentifier(_)) {
                self.publish_rolled_back(&code, &database, &e.to_string());
            }
            return Err(e.into());
        }

        let persisted = async {
            let db_password = self.cipher.encrypt(&password)?;
            let (host, port) = self.provisioner.location();
            let record = NewTenantRecord {
                code: code.clone(),
                name,
                db_host: host.to_string(),
                db_port: port,
                db_name: database.clone(),
                db_user: role.clone(),
                db_password,
                domain,
                logo_url,
                timezone,
                status: TenantStatus::Active,
            };
            Ok::<_, TenantServiceError>(self.repository.insert(&record).await?)
        }
        .await;

        match persisted {
            Ok(record) => {
                info!(tenant = %code, id = %record.id, database = %database, "Tenant registered");
                self.event_bus.publish(TenantEvent::TenantProvisioned {
                    tenant_id: record.id,
                    code,
                    database,
                    provisioned_at: Utc::now(),
                });
                Ok(TenantSummary::from(&record))
            }
            Err(e) => {
                warn!(tenant = %code, error = %e, "Could not persist tenant record, removing its database");
                metrics::counter!("tenancy_provisioning_rollbacks_total").increment(1);
                if let Err(drop_err) = self.provisioner.drop_tenant(code.as_str(), &database).await {
                    error!(tenant = %code, database = %database, error = %drop_err, "Failed to drop database of unregistered tenant");
                }
                if let Err(drop_err) = self.provisioner.drop_role(&role).await {
                    error!(tenant = %code, role = %role, error = %drop_err, "Failed to drop role of unregistered tenant");
                }
                self.publish_rolled_back(&code, &database, &e.to_string());
                Err(e)
            }
        }
    }

    async fn teardown(&self, code: TenantCode, database: String, role: String) {
        let result = async {
            self.provisioner.drop_tenant(code.as_str(), &database).await?;
            self.provisioner.drop_role(&role).await
        }
        .await;

        match result {
            Ok(()) => {
                info!(tenant = %code, database = %database, "Tenant teardown completed");
                self.event_bus.publish(TenantEvent::TeardownCompleted {
                    code,
                    database,
                    completed_at: Utc::now(),
                });
            }
            Err(e) => {
                metrics::counter!("tenancy_teardown_failures_total").increment(1);
                error!(tenant = %code, database = %database, error = %e, "Tenant teardown failed; database or role may remain");
                self.event_bus.publish(TenantEvent::TeardownFailed {
                    code,
                    database,
                    reason: e.to_string(),
                    failed_at: Utc::now(),
                });
            }
        }
    }

    fn publish_rolled_back(&self, code: &TenantCode, database: &str, reason: &str) {
        self.event_bus.publish(TenantEvent::ProvisioningRolledBack {
            code: code.clone(),
            database: database.to_string(),
            reason: reason.to_string(),
            rolled_back_at: Utc::now(),
        });
    }
}

#[async_trait]
impl<P: TenantPool> TenantService for StandardTenantService<P> {
    async fn create_tenant(&self, request: RegisterTenant) -> Result<TenantSummary, TenantServiceError> {
        let registration = Registration::validate(request)?;
        info!(tenant = %registration.code, "Registering tenant");

        if self
            .repository
            .find_by_code(registration.code.as_str())
            .await?
            .is_some()
        {
            return Err(TenantServiceError::Conflict(format!(
                "tenant code '{}'",
                registration.code
            )));
        }

        let this = self.clone();
        self.tasks
            .spawn(async move { this.register(registration).await })
            .await
            .map_err(|e| TenantServiceError::Internal(format!("registration task failed: {}", e)))?
    }

    async fn list_tenants(
        &self,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<TenantSummary>, TenantServiceError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = offset.unwrap_or(0).max(0);

        let records = self.repository.list(limit, offset).await?;
        Ok(records.iter().map(TenantSummary::from).collect())
    }

    async fn get_tenant(&self, id: TenantId) -> Result<TenantSummary, TenantServiceError> {
        self.repository
            .find_by_id(id)
            .await?
            .map(|record| TenantSummary::from(&record))
            .ok_or(TenantServiceError::NotFound)
    }

    async fn update_tenant(
        &self,
        id: TenantId,
        mut update: TenantUpdate,
    ) -> Result<TenantSummary, TenantServiceError> {
        if update.is_empty() {
            return Err(TenantServiceError::Validation("no fields to update".to_string()));
        }
        if let Some(name) = &update.name {
            let name = name.trim().to_string();
            validate_name(&name)?;
            update.name = Some(name);
        }
        if let Some(domain) = &update.domain {
            let domain = domain.trim().to_ascii_lowercase();
            if domain.is_empty() {
                return Err(TenantServiceError::Validation("domain cannot be empty".to_string()));
            }
            update.domain = Some(domain);
        }

        let record = self
            .repository
            .update(id, &update)
            .await?
            .ok_or(TenantServiceError::NotFound)?;

        if !record.is_active() && self.cache.close_connection(record.code.as_str()).await {
            info!(tenant = %record.code, status = %record.status, "Closed pool of deactivated tenant");
            self.event_bus.publish(TenantEvent::PoolEvicted {
                code: record.code.to_string(),
                evicted_at: Utc::now(),
            });
        }

        self.event_bus.publish(TenantEvent::TenantUpdated {
            tenant_id: record.id,
            code: record.code.clone(),
            updated_at: record.updated_at,
        });
        Ok(TenantSummary::from(&record))
    }

    async fn delete_tenant(&self, id: TenantId) -> Result<DeletedTenant, TenantServiceError> {
        let record = self
            .repository
            .delete(id)
            .await?
            .ok_or(TenantServiceError::NotFound)?;
        info!(tenant = %record.code, id = %record.id, "Tenant record deleted, starting teardown");

        self.event_bus.publish(TenantEvent::TenantDeleted {
            tenant_id: record.id,
            code: record.code.clone(),
            deleted_at: Utc::now(),
        });

        let this = self.clone();
        let (code, database, role) = (record.code.clone(), record.db_name.clone(), record.db_user.clone());
        let teardown = self
            .tasks
            .spawn(async move { this.teardown(code, database, role).await });

        Ok(DeletedTenant {
            tenant: TenantSummary::from(&record),
            teardown,
        })
    }

    async fn tenant_stats(&self, code: &str) -> Result<PoolStats, TenantServiceError> {
        let code = TenantCode::parse(code).map_err(|_| TenantServiceError::NotFound)?;
        self.cache
            .stats(code.as_str())
            .ok_or(TenantServiceError::NotFound)
    }
}
