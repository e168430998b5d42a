// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Control-Plane Store Contract
//!
//! Persistence contract for the tenant registry. The interface lives in the
//! domain layer and is implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `TenantRepository` | `TenantRecord` | `InMemoryTenantRepository`, `PostgresTenantRepository` |
//!
//! Uniqueness of `code`, `domain`, `db_name` and `db_user` is enforced by the store and
//! surfaces as [`RepositoryError::Conflict`].

use async_trait::async_trait;

use crate::domain::tenant::{NewTenantRecord, TenantId, TenantRecord, TenantUpdate};

/// Repository interface for tenant records.
#[async_trait]
pub trait TenantRepository: Send + Sync {
    /// Insert a new record and return it with its generated id and timestamps.
    async fn insert(&self, record: &NewTenantRecord) -> Result<TenantRecord, RepositoryError>;

    /// Non-suspended tenants, newest first.
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<TenantRecord>, RepositoryError>;

    async fn find_by_id(&self, id: TenantId) -> Result<Option<TenantRecord>, RepositoryError>;

    async fn find_by_code(&self, code: &str) -> Result<Option<TenantRecord>, RepositoryError>;

    /// Lookup used on the request path: only `active` tenants are returned.
    async fn find_active_by_code(&self, code: &str) -> Result<Option<TenantRecord>, RepositoryError>;

    /// Apply the non-empty fields of `update`. `None` if the id is unknown.
    async fn update(
        &self,
        id: TenantId,
        update: &TenantUpdate,
    ) -> Result<Option<TenantRecord>, RepositoryError>;

    /// Remove the record and return what was removed.
    async fn delete(&self, id: TenantId) -> Result<Option<TenantRecord>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                let constraint = db.constraint().unwrap_or("unique constraint").to_string();
                RepositoryError::Conflict(constraint)
            }
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}
