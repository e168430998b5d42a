// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Tenant Provisioner
//!
//! Creates and tears down the physical side of a tenant: its login role, its
//! database, the privilege grants and the baseline schema.
//!
//! ## Create sequence
//!
//! | # | Step | Undone on later failure by |
//! |---|------|-----------------------------|
//! | 1 | `CREATE ROLE … LOGIN PASSWORD` (an existing role is a conflict) | `DROP ROLE` |
//! | 2 | `CREATE DATABASE … TEMPLATE template0` | `DROP DATABASE … WITH (FORCE)` |
//! | 3 | `GRANT ALL PRIVILEGES ON DATABASE` | dropping the database |
//! | 4 | schema grants + default privileges, as admin | dropping the database |
//! | 5 | baseline schema, as the tenant role | dropping the database |
//!
//! The whole sequence runs under one deadline. Progress is recorded outside
//! the timed future so a timeout still rolls back whatever was created.

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::postgres::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::domain::config::TenantDatabaseConfig;
use crate::domain::tenant::{validate_identifier, IdentifierError, TenantCode};
use crate::infrastructure::pool_cache::{
    ConnectionPoolCache, ConnectionTarget, PoolConnector, TenantPool,
};

/// Administrative DDL against the tenant database server.
///
/// Callers pass identifiers that already passed [`validate_identifier`].
#[async_trait]
pub trait DatabaseAdmin: Send + Sync {
    /// Create `role` with LOGIN and `password`. A role that already exists is
    /// never altered; it is reported as [`AdminError::Duplicate`].
    async fn create_role(&self, role: &str, password: &str) -> Result<(), AdminError>;

    async fn create_database(&self, database: &str) -> Result<(), AdminError>;

    async fn grant_database(&self, database: &str, role: &str) -> Result<(), AdminError>;

    /// Schema-level grants and default privileges inside `database`.
    async fn grant_schema(&self, database: &str, role: &str) -> Result<(), AdminError>;

    /// Force-drop, disconnecting remaining sessions. Missing is not an error.
    async fn drop_database(&self, database: &str) -> Result<(), AdminError>;

    /// Missing is not an error.
    async fn drop_role(&self, role: &str) -> Result<(), AdminError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("{0} already exists")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Other(String),
}

/// Creates the baseline tables a new tenant database needs.
#[async_trait]
pub trait SchemaInitializer<P: TenantPool>: Send + Sync {
    async fn initialize(&self, pool: &P) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStep {
    CreateRole,
    CreateDatabase,
    GrantDatabase,
    GrantSchema,
    InitializeSchema,
    DropDatabase,
    DropRole,
}

impl std::fmt::Display for ProvisioningStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProvisioningStep::CreateRole => "create role",
            ProvisioningStep::CreateDatabase => "create database",
            ProvisioningStep::GrantDatabase => "grant database privileges",
            ProvisioningStep::GrantSchema => "grant schema privileges",
            ProvisioningStep::InitializeSchema => "initialize schema",
            ProvisioningStep::DropDatabase => "drop database",
            ProvisioningStep::DropRole => "drop role",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error(transparent)]
    InvalidIdentifier(#[from] IdentifierError),

    /// Not retryable.
    #[error("{0} already exists")]
    Conflict(String),

    #[error("{step} failed: {reason}")]
    Step {
        step: ProvisioningStep,
        reason: String,
    },

    #[error("provisioning did not finish within {0:?}")]
    DeadlineExceeded(Duration),
}

impl ProvisioningError {
    fn at(step: ProvisioningStep, err: AdminError) -> Self {
        match err {
            AdminError::Duplicate(what) => ProvisioningError::Conflict(what),
            other => ProvisioningError::Step {
                step,
                reason: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Progress {
    role_created: bool,
    database_owned: bool,
}

pub struct TenantProvisioner<P: TenantPool = PgPool> {
    admin: Arc<dyn DatabaseAdmin>,
    connector: Arc<dyn PoolConnector<P>>,
    schema: Arc<dyn SchemaInitializer<P>>,
    cache: Arc<ConnectionPoolCache<P>>,
    host: String,
    port: u16,
    deadline: Duration,
}

impl<P: TenantPool> TenantProvisioner<P> {
    pub fn new(
        admin: Arc<dyn DatabaseAdmin>,
        connector: Arc<dyn PoolConnector<P>>,
        schema: Arc<dyn SchemaInitializer<P>>,
        cache: Arc<ConnectionPoolCache<P>>,
        tenant_databases: &TenantDatabaseConfig,
        deadline: Duration,
    ) -> Self {
        Self {
            admin,
            connector,
            schema,
            cache,
            host: tenant_databases.host.clone(),
            port: tenant_databases.port,
            deadline,
        }
    }

    /// Host and port new tenant databases are created on.
    pub fn location(&self) -> (&str, u16) {
        (&self.host, self.port)
    }

    /// Run the create sequence, rolling back on any failure.
    pub async fn create_tenant(
        &self,
        code: &TenantCode,
        database: &str,
        role: &str,
        password: &str,
    ) -> Result<(), ProvisioningError> {
        validate_identifier(database)?;
        validate_identifier(role)?;

        info!(tenant = %code, database, role, "Provisioning tenant database");
        let progress = Mutex::new(Progress::default());

        let outcome = tokio::time::timeout(
            self.deadline,
            self.run_steps(code, database, role, password, &progress),
        )
        .await;

        let err = match outcome {
            Ok(Ok(())) => {
                info!(tenant = %code, database, "Tenant database provisioned");
                return Ok(());
            }
            Ok(Err(e)) => e,
            Err(_) => ProvisioningError::DeadlineExceeded(self.deadline),
        };

        warn!(tenant = %code, database, error = %err, "Provisioning failed, rolling back");
        let progress = *progress.lock();
        self.rollback(code, database, role, progress).await;
        Err(err)
    }

    /// Close any cached pool for `code`, then force-drop its database.
    pub async fn drop_tenant(&self, code: &str, database: &str) -> Result<(), ProvisioningError> {
        validate_identifier(database)?;

        if self.cache.close_connection(code).await {
            info!(tenant = code, "Evicted cached pool before drop");
        }
        self.admin
            .drop_database(database)
            .await
            .map_err(|e| ProvisioningError::at(ProvisioningStep::DropDatabase, e))?;
        info!(tenant = code, database, "Dropped tenant database");
        Ok(())
    }

    pub async fn drop_role(&self, role: &str) -> Result<(), ProvisioningError> {
        validate_identifier(role)?;
        self.admin
            .drop_role(role)
            .await
            .map_err(|e| ProvisioningError::at(ProvisioningStep::DropRole, e))
    }

    async fn run_steps(
        &self,
        code: &TenantCode,
        database: &str,
        role: &str,
        password: &str,
        progress: &Mutex<Progress>,
    ) -> Result<(), ProvisioningError> {
        progress.lock().role_created = true;
        if let Err(e) = self.admin.create_role(role, password).await {
            if matches!(e, AdminError::Duplicate(_)) {
                progress.lock().role_created = false;
                warn!(tenant = %code, role, "Refusing to reuse an existing role");
            }
            return Err(ProvisioningError::at(ProvisioningStep::CreateRole, e));
        }
        info!(tenant = %code, role, "Created tenant role");

        // Owned from the moment the CREATE is sent, so a timeout mid-statement
        // still drops it.
        progress.lock().database_owned = true;
        if let Err(e) = self.admin.create_database(database).await {
            if matches!(e, AdminError::Duplicate(_)) {
                progress.lock().database_owned = false;
            }
            return Err(ProvisioningError::at(ProvisioningStep::CreateDatabase, e));
        }
        info!(tenant = %code, database, "Created tenant database");

        self.admin
            .grant_database(database, role)
            .await
            .map_err(|e| ProvisioningError::at(ProvisioningStep::GrantDatabase, e))?;

        self.admin
            .grant_schema(database, role)
            .await
            .map_err(|e| ProvisioningError::at(ProvisioningStep::GrantSchema, e))?;
        info!(tenant = %code, database, "Granted tenant privileges");

        self.initialize_schema(database, role, password).await
    }

    async fn initialize_schema(
        &self,
        database: &str,
        role: &str,
        password: &str,
    ) -> Result<(), ProvisioningError> {
        let target = ConnectionTarget {
            host: self.host.clone(),
            port: self.port,
            database: database.to_string(),
            user: role.to_string(),
        };
        let step_failed = |e: anyhow::Error| ProvisioningError::Step {
            step: ProvisioningStep::InitializeSchema,
            reason: format!("{:#}", e),
        };

        let pool = self
            .connector
            .connect(&target, password)
            .await
            .map_err(step_failed)?;
        let result = self.schema.initialize(&pool).await;
        pool.close().await;
        result.map_err(step_failed)
    }

    async fn rollback(&self, code: &TenantCode, database: &str, role: &str, progress: Progress) {
        metrics::counter!("tenancy_provisioning_rollbacks_total").increment(1);

        let undo = async {
            if progress.database_owned {
                match self.admin.drop_database(database).await {
                    Ok(()) => info!(tenant = %code, database, "Rolled back tenant database"),
                    Err(e) => {
                        error!(tenant = %code, database, error = %e, "Failed to drop database during rollback")
                    }
                }
            }
            if progress.role_created {
                match self.admin.drop_role(role).await {
                    Ok(()) => info!(tenant = %code, role, "Rolled back tenant role"),
                    Err(e) => error!(tenant = %code, role, error = %e, "Failed to drop role during rollback"),
                }
            }
        };

        if tokio::time::timeout(self.deadline, undo).await.is_err() {
            error!(tenant = %code, database, "Rollback did not finish within {:?}", self.deadline);
        }
    }
}
