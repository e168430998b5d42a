// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Embedded schema migrations.
//!
//! - `migrations/`: the control-plane `schools` table, applied at startup and
//!   by `tenantd migrate`.
//! - `tenant_migrations/`: baseline tables of every tenant database, applied
//!   as the tenant role during provisioning.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPool;
use tracing::info;

use crate::infrastructure::provisioner::SchemaInitializer;

pub static CONTROL_PLANE_MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub static TENANT_MIGRATOR: Migrator = sqlx::migrate!("./tenant_migrations");

/// Migration state of a database against a migrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub applied: usize,
    pub pending: Vec<(i64, String)>,
}

/// Apply pending control-plane migrations.
pub async fn migrate_control_plane(pool: &PgPool) -> anyhow::Result<()> {
    CONTROL_PLANE_MIGRATOR
        .run(pool)
        .await
        .context("Failed to apply control-plane migrations")?;
    info!("Control-plane schema is up to date");
    Ok(())
}

/// Compare applied versions with the embedded control-plane migrations.
pub async fn control_plane_status(pool: &PgPool) -> anyhow::Result<MigrationStatus> {
    let applied: Vec<i64> = match sqlx::query_scalar("SELECT version FROM _sqlx_migrations")
        .fetch_all(pool)
        .await
    {
        Ok(versions) => versions,
        // Table is absent until the first run.
        Err(e) if is_missing_history_table(&e) => Vec::new(),
        Err(e) => return Err(e).context("Failed to read applied control-plane migrations"),
    };
    Ok(pending_against(&CONTROL_PLANE_MIGRATOR, &applied))
}

/// SQLSTATE `undefined_table`.
const UNDEFINED_TABLE: &str = "42P01";

fn is_missing_history_table(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == UNDEFINED_TABLE)
}

fn pending_against(migrator: &Migrator, applied: &[i64]) -> MigrationStatus {
    let pending = migrator
        .iter()
        .filter(|m| !applied.contains(&m.version))
        .map(|m| (m.version, m.description.to_string()))
        .collect();
    MigrationStatus {
        applied: applied.len(),
        pending,
    }
}

/// Runs [`TENANT_MIGRATOR`] against a freshly provisioned tenant database.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresSchemaInitializer;

#[async_trait]
impl SchemaInitializer<PgPool> for PostgresSchemaInitializer {
    async fn initialize(&self, pool: &PgPool) -> anyhow::Result<()> {
        TENANT_MIGRATOR
            .run(pool)
            .await
            .context("Failed to apply tenant baseline schema")?;
        Ok(())
    }
}
