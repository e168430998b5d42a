// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # PostgreSQL Tenant Repository
//!
//! `TenantRepository` backed by the control-plane `schools` table. The table
//! is created by the embedded control-plane migrations
//! (`crate::infrastructure::schema`). Unique-constraint violations on `code`,
//! `domain`, `db_name` or `db_user` surface as [`RepositoryError::Conflict`], which is
//! what keeps several service instances from registering the same tenant.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::repository::{RepositoryError, TenantRepository};
use crate::domain::tenant::{
    EncryptedSecret, NewTenantRecord, TenantCode, TenantId, TenantRecord, TenantStatus, TenantUpdate,
};

const COLUMNS: &str = "id, code, name, db_host, db_port, db_name, db_user, db_password, \
                       domain, logo_url, timezone, status, created_at, updated_at";

pub struct PostgresTenantRepository {
    pool: PgPool,
}

impl PostgresTenantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        predicate: &str,
        bind: Bind<'_>,
    ) -> Result<Option<TenantRecord>, RepositoryError> {
        let sql = format!("SELECT {COLUMNS} FROM schools WHERE {predicate}");
        let query = sqlx::query(&sql);
        let query = match bind {
            Bind::Id(id) => query.bind(id),
            Bind::Text(text) => query.bind(text),
        };
        let row = query.fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_record).transpose()
    }
}

enum Bind<'a> {
    Id(uuid::Uuid),
    Text(&'a str),
}

fn row_to_record(row: &PgRow) -> Result<TenantRecord, RepositoryError> {
    let code: String = row.try_get("code")?;
    let status: String = row.try_get("status")?;
    let db_port: i32 = row.try_get("db_port")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    Ok(TenantRecord {
        id: TenantId(row.try_get("id")?),
        code: TenantCode::parse(&code)
            .map_err(|e| RepositoryError::Serialization(format!("stored code '{}': {}", code, e)))?,
        name: row.try_get("name")?,
        db_host: row.try_get("db_host")?,
        db_port: u16::try_from(db_port)
            .map_err(|_| RepositoryError::Serialization(format!("invalid db_port {}", db_port)))?,
        db_name: row.try_get("db_name")?,
        db_user: row.try_get("db_user")?,
        db_password: EncryptedSecret::new(row.try_get::<String, _>("db_password")?),
        domain: row.try_get("domain")?,
        logo_url: row.try_get("logo_url")?,
        timezone: row.try_get("timezone")?,
        status: status
            .parse::<TenantStatus>()
            .map_err(RepositoryError::Serialization)?,
        created_at,
        updated_at,
    })
}

#[async_trait]
impl TenantRepository for PostgresTenantRepository {
    async fn insert(&self, record: &NewTenantRecord) -> Result<TenantRecord, RepositoryError> {
        let sql = format!(
            r#"
            INSERT INTO schools (
                id, code, name, db_host, db_port, db_name, db_user, db_password,
                domain, logo_url, timezone, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(TenantId::new().0)
            .bind(record.code.as_str())
            .bind(&record.name)
            .bind(&record.db_host)
            .bind(i32::from(record.db_port))
            .bind(&record.db_name)
            .bind(&record.db_user)
            .bind(record.db_password.expose_blob())
            .bind(&record.domain)
            .bind(&record.logo_url)
            .bind(&record.timezone)
            .bind(record.status.as_str())
            .fetch_one(&self.pool)
            .await?;

        row_to_record(&row)
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<TenantRecord>, RepositoryError> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM schools
            WHERE status != 'suspended'
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn find_by_id(&self, id: TenantId) -> Result<Option<TenantRecord>, RepositoryError> {
        self.fetch_one_where("id = $1", Bind::Id(id.0)).await
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<TenantRecord>, RepositoryError> {
        self.fetch_one_where("code = $1", Bind::Text(code)).await
    }

    async fn find_active_by_code(&self, code: &str) -> Result<Option<TenantRecord>, RepositoryError> {
        self.fetch_one_where("code = $1 AND status = 'active'", Bind::Text(code))
            .await
    }

    async fn update(
        &self,
        id: TenantId,
        update: &TenantUpdate,
    ) -> Result<Option<TenantRecord>, RepositoryError> {
        let sql = format!(
            r#"
            UPDATE schools SET
                name = COALESCE($2, name),
                domain = COALESCE($3, domain),
                logo_url = COALESCE($4, logo_url),
                status = COALESCE($5, status)
            WHERE id = $1
            RETURNING {COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id.0)
            .bind(&update.name)
            .bind(&update.domain)
            .bind(&update.logo_url)
            .bind(update.status.map(|s| s.as_str()))
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn delete(&self, id: TenantId) -> Result<Option<TenantRecord>, RepositoryError> {
        let sql = format!("DELETE FROM schools WHERE id = $1 RETURNING {COLUMNS}");
        let row = sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_record).transpose()
    }
}
