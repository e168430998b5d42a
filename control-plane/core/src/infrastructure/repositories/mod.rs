// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of [`TenantRepository`].
//!
//! - **PostgresTenantRepository**: the `schools` table in the control-plane
//!   database. Uniqueness comes from the table's constraints.
//! - **InMemoryTenantRepository**: HashMap-backed store for development and
//!   tests, enforcing the same uniqueness rules itself.

pub mod postgres_tenant;

pub use postgres_tenant::PostgresTenantRepository;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::repository::{RepositoryError, TenantRepository};
use crate::domain::tenant::{NewTenantRecord, TenantId, TenantRecord, TenantStatus, TenantUpdate};

#[derive(Clone, Default)]
pub struct InMemoryTenantRepository {
    tenants: Arc<RwLock<HashMap<TenantId, TenantRecord>>>,
}

impl InMemoryTenantRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn conflict(
        tenants: &HashMap<TenantId, TenantRecord>,
        skip: Option<TenantId>,
        code: Option<&str>,
        domain: Option<&str>,
        db_name: Option<&str>,
        db_user: Option<&str>,
    ) -> Option<&'static str> {
        tenants
            .values()
            .filter(|t| Some(t.id) != skip)
            .find_map(|t| {
                if code == Some(t.code.as_str()) {
                    Some("schools_code_key")
                } else if domain == Some(t.domain.as_str()) {
                    Some("schools_domain_key")
                } else if db_name == Some(t.db_name.as_str()) {
                    Some("schools_db_name_key")
                } else if db_user == Some(t.db_user.as_str()) {
                    Some("schools_db_user_key")
                } else {
                    None
                }
            })
    }
}

#[async_trait]
impl TenantRepository for InMemoryTenantRepository {
    async fn insert(&self, record: &NewTenantRecord) -> Result<TenantRecord, RepositoryError> {
        let mut tenants = self.tenants.write();
        if let Some(constraint) = Self::conflict(
            &tenants,
            None,
            Some(record.code.as_str()),
            Some(&record.domain),
            Some(&record.db_name),
            Some(&record.db_user),
        ) {
            return Err(RepositoryError::Conflict(constraint.to_string()));
        }

        let now = Utc::now();
        let stored = TenantRecord {
            id: TenantId::new(),
            code: record.code.clone(),
            name: record.name.clone(),
            db_host: record.db_host.clone(),
            db_port: record.db_port,
            db_name: record.db_name.clone(),
            db_user: record.db_user.clone(),
            db_password: record.db_password.clone(),
            domain: record.domain.clone(),
            logo_url: record.logo_url.clone(),
            timezone: record.timezone.clone(),
            status: record.status,
            created_at: now,
            updated_at: now,
        };
        tenants.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<TenantRecord>, RepositoryError> {
        let tenants = self.tenants.read();
        let mut visible: Vec<TenantRecord> = tenants
            .values()
            .filter(|t| t.status != TenantStatus::Suspended)
            .cloned()
            .collect();
        visible.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(visible
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn find_by_id(&self, id: TenantId) -> Result<Option<TenantRecord>, RepositoryError> {
        Ok(self.tenants.read().get(&id).cloned())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<TenantRecord>, RepositoryError> {
        Ok(self
            .tenants
            .read()
            .values()
            .find(|t| t.code.as_str() == code)
            .cloned())
    }

    async fn find_active_by_code(&self, code: &str) -> Result<Option<TenantRecord>, RepositoryError> {
        Ok(self
            .tenants
            .read()
            .values()
            .find(|t| t.code.as_str() == code && t.is_active())
            .cloned())
    }

    async fn update(
        &self,
        id: TenantId,
        update: &TenantUpdate,
    ) -> Result<Option<TenantRecord>, RepositoryError> {
        let mut tenants = self.tenants.write();
        if !tenants.contains_key(&id) {
            return Ok(None);
        }
        if let Some(constraint) =
            Self::conflict(&tenants, Some(id), None, update.domain.as_deref(), None, None)
        {
            return Err(RepositoryError::Conflict(constraint.to_string()));
        }

        let Some(tenant) = tenants.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = &update.name {
            tenant.name = name.clone();
        }
        if let Some(domain) = &update.domain {
            tenant.domain = domain.clone();
        }
        if let Some(logo_url) = &update.logo_url {
            tenant.logo_url = Some(logo_url.clone());
        }
        if let Some(status) = update.status {
            tenant.status = status;
        }
        tenant.updated_at = Utc::now();
        Ok(Some(tenant.clone()))
    }

    async fn delete(&self, id: TenantId) -> Result<Option<TenantRecord>, RepositoryError> {
        Ok(self.tenants.write().remove(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tenant::{EncryptedSecret, TenantCode};

    fn new_record(code: &str) -> NewTenantRecord {
        let code = TenantCode::parse(code).unwrap();
        NewTenantRecord {
            name: format!("School {code}"),
            db_host: "postgres".to_string(),
            db_port: 5432,
            db_name: code.database_name(),
            db_user: code.role_name(),
            db_password: EncryptedSecret::new("blob"),
            domain: format!("{code}.example.edu"),
            logo_url: None,
            timezone: "UTC".to_string(),
            status: TenantStatus::Active,
            code,
        }
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let repo = InMemoryTenantRepository::new();
        let stored = repo.insert(&new_record("eis")).await.unwrap();

        assert_eq!(repo.find_by_id(stored.id).await.unwrap().unwrap().code, stored.code);
        assert!(repo.find_by_code("eis").await.unwrap().is_some());
        assert!(repo.find_active_by_code("eis").await.unwrap().is_some());
        assert!(repo.find_by_code("kmc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_uniqueness_is_enforced() {
        let repo = InMemoryTenantRepository::new();
        repo.insert(&new_record("eis")).await.unwrap();

        let err = repo.insert(&new_record("eis")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(ref c) if c == "schools_code_key"));

        let mut same_domain = new_record("kmc");
        same_domain.domain = "eis.example.edu".to_string();
        let err = repo.insert(&same_domain).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(ref c) if c == "schools_domain_key"));

        let mut same_role = new_record("kmc");
        same_role.db_user = "school_eis_user".to_string();
        let err = repo.insert(&same_role).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(ref c) if c == "schools_db_user_key"));
    }

    #[tokio::test]
    async fn test_inactive_tenants_are_not_resolvable() {
        let repo = InMemoryTenantRepository::new();
        let stored = repo.insert(&new_record("eis")).await.unwrap();

        let update = TenantUpdate {
            status: Some(TenantStatus::Inactive),
            ..TenantUpdate::default()
        };
        let updated = repo.update(stored.id, &update).await.unwrap().unwrap();

        assert_eq!(updated.status, TenantStatus::Inactive);
        assert!(repo.find_by_code("eis").await.unwrap().is_some());
        assert!(repo.find_active_by_code("eis").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_excludes_suspended_and_paginates() {
        let repo = InMemoryTenantRepository::new();
        for code in ["aa", "bb", "cc", "dd"] {
            repo.insert(&new_record(code)).await.unwrap();
        }
        let dd = repo.find_by_code("dd").await.unwrap().unwrap();
        let suspend = TenantUpdate {
            status: Some(TenantStatus::Suspended),
            ..TenantUpdate::default()
        };
        repo.update(dd.id, &suspend).await.unwrap();

        let all = repo.list(10, 0).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|t| t.status != TenantStatus::Suspended));
        assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));

        assert_eq!(repo.list(2, 0).await.unwrap().len(), 2);
        assert_eq!(repo.list(2, 2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_and_delete_unknown_id() {
        let repo = InMemoryTenantRepository::new();
        let update = TenantUpdate {
            name: Some("x".to_string()),
            ..TenantUpdate::default()
        };
        assert!(repo.update(TenantId::new(), &update).await.unwrap().is_none());
        assert!(repo.delete(TenantId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_returns_removed_record() {
        let repo = InMemoryTenantRepository::new();
        let stored = repo.insert(&new_record("eis")).await.unwrap();

        let removed = repo.delete(stored.id).await.unwrap().unwrap();
        assert_eq!(removed.db_name, "school_eis_db");
        assert!(repo.find_by_code("eis").await.unwrap().is_none());
    }
}
