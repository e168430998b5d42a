// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared harness: an in-memory "database server" that the admin, connector
//! and schema doubles all act on, wired into the real service and resolver.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use schoolerp_tenancy_core::application::{StandardTenantService, TenantResolver};
use schoolerp_tenancy_core::domain::config::{KeyDerivation, TenantDatabaseConfig};
use schoolerp_tenancy_core::infrastructure::event_bus::EventBus;
use schoolerp_tenancy_core::infrastructure::pool_cache::{
    ConnectionPoolCache, ConnectionTarget, PoolConnector, PoolStats, TenantPool,
};
use schoolerp_tenancy_core::infrastructure::provisioner::{
    AdminError, DatabaseAdmin, SchemaInitializer, TenantProvisioner,
};
use schoolerp_tenancy_core::infrastructure::repositories::InMemoryTenantRepository;
use schoolerp_tenancy_core::infrastructure::SecretCipher;

pub const KEY: &str = "integration-test-encryption-key-0001";

#[derive(Default)]
pub struct FakeServer {
    roles: Mutex<HashMap<String, String>>,
    databases: Mutex<HashSet<String>>,
    tables: Mutex<HashMap<String, Vec<&'static str>>>,
}

impl FakeServer {
    pub fn has_database(&self, name: &str) -> bool {
        self.databases.lock().contains(name)
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.roles.lock().contains_key(name)
    }

    pub fn role_password(&self, name: &str) -> Option<String> {
        self.roles.lock().get(name).cloned()
    }

    pub fn tables(&self, database: &str) -> Vec<&'static str> {
        self.tables.lock().get(database).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct FakePool {
    pub database: String,
    pub user: String,
    server: Arc<FakeServer>,
    closed: Arc<AtomicBool>,
}

impl FakePool {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for FakeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeServer").finish_non_exhaustive()
    }
}

#[async_trait]
impl TenantPool for FakePool {
    async fn ping(&self) -> anyhow::Result<()> {
        if self.is_closed() {
            anyhow::bail!("pool closed");
        }
        if !self.server.has_database(&self.database) {
            anyhow::bail!("database \"{}\" does not exist", self.database);
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            total: 1,
            idle: 1,
            acquired: 0,
        }
    }
}

pub struct FakeConnector {
    server: Arc<FakeServer>,
    pub opened: AtomicUsize,
    pub delay: Duration,
}

#[async_trait]
impl PoolConnector<FakePool> for FakeConnector {
    async fn connect(&self, target: &ConnectionTarget, password: &str) -> anyhow::Result<FakePool> {
        tokio::time::sleep(self.delay).await;
        if self.server.roles.lock().get(&target.user).map(String::as_str) != Some(password) {
            anyhow::bail!("password authentication failed for user \"{}\"", target.user);
        }
        if !self.server.has_database(&target.database) {
            anyhow::bail!("database \"{}\" does not exist", target.database);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakePool {
            database: target.database.clone(),
            user: target.user.clone(),
            server: self.server.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

pub struct FakeAdmin {
    server: Arc<FakeServer>,
}

#[async_trait]
impl DatabaseAdmin for FakeAdmin {
    async fn create_role(&self, role: &str, password: &str) -> Result<(), AdminError> {
        let mut roles = self.server.roles.lock();
        if roles.contains_key(role) {
            return Err(AdminError::Duplicate(format!("role {role}")));
        }
        roles.insert(role.to_string(), password.to_string());
        Ok(())
    }

    async fn create_database(&self, database: &str) -> Result<(), AdminError> {
        if !self.server.databases.lock().insert(database.to_string()) {
            return Err(AdminError::Duplicate(format!("database {database}")));
        }
        Ok(())
    }

    async fn grant_database(&self, _database: &str, _role: &str) -> Result<(), AdminError> {
        Ok(())
    }

    async fn grant_schema(&self, _database: &str, _role: &str) -> Result<(), AdminError> {
        Ok(())
    }

    async fn drop_database(&self, database: &str) -> Result<(), AdminError> {
        self.server.databases.lock().remove(database);
        self.server.tables.lock().remove(database);
        Ok(())
    }

    async fn drop_role(&self, role: &str) -> Result<(), AdminError> {
        self.server.roles.lock().remove(role);
        Ok(())
    }
}

pub struct FakeSchema {
    server: Arc<FakeServer>,
    pub fail: AtomicBool,
}

#[async_trait]
impl SchemaInitializer<FakePool> for FakeSchema {
    async fn initialize(&self, pool: &FakePool) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("permission denied for schema public");
        }
        self.server
            .tables
            .lock()
            .insert(pool.database.clone(), vec!["users", "students", "attendance"]);
        Ok(())
    }
}

pub struct Harness {
    pub server: Arc<FakeServer>,
    pub connector: Arc<FakeConnector>,
    pub schema: Arc<FakeSchema>,
    pub cipher: Arc<SecretCipher>,
    pub repository: Arc<InMemoryTenantRepository>,
    pub cache: Arc<ConnectionPoolCache<FakePool>>,
    pub provisioner: Arc<TenantProvisioner<FakePool>>,
    pub service: StandardTenantService<FakePool>,
    pub resolver: TenantResolver<FakePool>,
    pub events: EventBus,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_connect_delay(Duration::ZERO)
    }

    pub fn with_connect_delay(delay: Duration) -> Self {
        let server = Arc::new(FakeServer::default());
        let connector = Arc::new(FakeConnector {
            server: server.clone(),
            opened: AtomicUsize::new(0),
            delay,
        });
        let schema = Arc::new(FakeSchema {
            server: server.clone(),
            fail: AtomicBool::new(false),
        });
        let cipher = Arc::new(
            SecretCipher::new(KEY, KeyDerivation::Sha256).expect("test key is valid"),
        );
        let cache = Arc::new(ConnectionPoolCache::<FakePool>::new(cipher.clone(), connector.clone()));
        let provisioner = Arc::new(TenantProvisioner::new(
            Arc::new(FakeAdmin {
                server: server.clone(),
            }),
            connector.clone(),
            schema.clone(),
            cache.clone(),
            &TenantDatabaseConfig::default(),
            Duration::from_secs(5),
        ));
        let repository = Arc::new(InMemoryTenantRepository::new());
        let events = EventBus::new(64);
        let service = StandardTenantService::new(
            repository.clone(),
            provisioner.clone(),
            cache.clone(),
            cipher.clone(),
            events.clone(),
        );
        let resolver = TenantResolver::new(repository.clone(), cache.clone());

        Self {
            server,
            connector,
            schema,
            cipher,
            repository,
            cache,
            provisioner,
            service,
            resolver,
            events,
        }
    }
}
