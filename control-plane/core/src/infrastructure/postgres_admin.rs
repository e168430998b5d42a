// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL implementation of [`DatabaseAdmin`].
//!
//! Role and database names cannot be bound as parameters in DDL, so every
//! statement here is built by string formatting. Identifiers are re-checked
//! against the allow-list and double-quoted; the role password is emitted as a
//! single-quoted literal with embedded quotes doubled. Statement logging is
//! disabled on the admin connections because `CREATE ROLE` carries the
//! password.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::ConnectOptions;
use tracing::debug;

use crate::domain::config::TenancyConfig;
use crate::domain::tenant::validate_identifier;
use crate::infrastructure::pool_cache::pg_ssl_mode;
use crate::infrastructure::provisioner::{AdminError, DatabaseAdmin};

const DUPLICATE_OBJECT: &str = "42710";
const DUPLICATE_DATABASE: &str = "42P04";

pub struct PostgresDatabaseAdmin {
    pool: PgPool,
    options: PgConnectOptions,
}

impl PostgresDatabaseAdmin {
    /// Connect to the tenant database server's maintenance database with the
    /// provisioning credentials.
    pub async fn connect(config: &TenancyConfig) -> anyhow::Result<Self> {
        let (user, password) = config.provisioning.admin_credentials(&config.control_plane);
        let options = PgConnectOptions::new()
            .host(&config.tenant_databases.host)
            .port(config.tenant_databases.port)
            .username(&user)
            .password(&password)
            .database(&config.provisioning.admin_database)
            .ssl_mode(pg_ssl_mode(config.tenant_databases.ssl_mode))
            .disable_statement_logging();

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(config.pool.connect_timeout)
            .connect_with(options.clone())
            .await
            .with_context(|| {
                format!(
                    "connecting to {}:{} as provisioning admin",
                    config.tenant_databases.host, config.tenant_databases.port
                )
            })?;

        Ok(Self { pool, options })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn execute(&self, sql: &str) -> Result<(), AdminError> {
        sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl DatabaseAdmin for PostgresDatabaseAdmin {
    async fn create_role(&self, role: &str, password: &str) -> Result<(), AdminError> {
        let role_ident = quote_ident(role)?;
        let password = quote_literal(password)?;

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = $1)")
                .bind(role)
                .fetch_one(&self.pool)
                .await?;
        if exists {
            return Err(AdminError::Duplicate(format!("role {role}")));
        }

        let create = format!("CREATE ROLE {role_ident} WITH LOGIN PASSWORD {password}");
        match sqlx::raw_sql(&create).execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(e) if sql_state(&e).as_deref() == Some(DUPLICATE_OBJECT) => {
                debug!(role, "Role appeared between check and create");
                Err(AdminError::Duplicate(format!("role {role}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_database(&self, database: &str) -> Result<(), AdminError> {
        let sql = format!(
            "CREATE DATABASE {} ENCODING 'UTF8' TEMPLATE template0",
            quote_ident(database)?
        );
        match sqlx::raw_sql(&sql).execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(e) if sql_state(&e).as_deref() == Some(DUPLICATE_DATABASE) => {
                Err(AdminError::Duplicate(format!("database {database}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn grant_database(&self, database: &str, role: &str) -> Result<(), AdminError> {
        self.execute(&format!(
            "GRANT ALL PRIVILEGES ON DATABASE {} TO {}",
            quote_ident(database)?,
            quote_ident(role)?
        ))
        .await
    }

    async fn grant_schema(&self, database: &str, role: &str) -> Result<(), AdminError> {
        let sql = schema_grants(role)?;
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(self.options.clone().database(database))
            .await?;
        let result = sqlx::raw_sql(&sql).execute(&pool).await;
        pool.close().await;
        result?;
        Ok(())
    }

    async fn drop_database(&self, database: &str) -> Result<(), AdminError> {
        self.execute(&format!(
            "DROP DATABASE IF EXISTS {} WITH (FORCE)",
            quote_ident(database)?
        ))
        .await
    }

    async fn drop_role(&self, role: &str) -> Result<(), AdminError> {
        self.execute(&format!("DROP ROLE IF EXISTS {}", quote_ident(role)?))
            .await
    }
}

fn sql_state(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned())
}

fn quote_ident(name: &str) -> Result<String, AdminError> {
    validate_identifier(name).map_err(|e| AdminError::Other(e.to_string()))?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

fn quote_literal(value: &str) -> Result<String, AdminError> {
    if value.contains('\0') {
        return Err(AdminError::Other("password contains a NUL byte".to_string()));
    }
    Ok(format!("'{}'", value.replace('\'', "''")))
}

/// Privileges on `public`, including on objects created later by migrations.
fn schema_grants(role: &str) -> Result<String, AdminError> {
    let role = quote_ident(role)?;
    Ok(format!(
        "GRANT ALL ON SCHEMA public TO {role};\n\
         GRANT ALL PRIVILEGES ON ALL TABLES IN SCHEMA public TO {role};\n\
         GRANT ALL PRIVILEGES ON ALL SEQUENCES IN SCHEMA public TO {role};\n\
         ALTER DEFAULT PRIVILEGES IN SCHEMA public GRANT ALL ON TABLES TO {role};\n\
         ALTER DEFAULT PRIVILEGES IN SCHEMA public GRANT ALL ON SEQUENCES TO {role};"
    ))
}
