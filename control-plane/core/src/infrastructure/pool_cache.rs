// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Connection Pool Cache
//!
//! Process-scoped registry of live per-tenant connection pools, keyed by
//! tenant code. Constructed once at startup, shared behind an `Arc`, and
//! drained with [`ConnectionPoolCache::close_all`] on shutdown.
//!
//! ## Locking
//!
//! - The map sits behind a `parking_lot::RwLock`. The read lock covers only the
//!   lookup; liveness checks run after it is released. Inserts and evictions
//!   hold the write lock for a single map operation.
//! - Pool creation for one code is single-flight: callers take a per-code
//!   async mutex, then look the code up again before creating anything. A pool
//!   that still loses an insert race is closed and the cached one returned.
//! - Each entry carries a generation number. A failed check evicts the entry
//!   only if the generation is unchanged, so a slow checker never removes a
//!   pool that somebody else has already rebuilt.
//!
//! The cache never retries; every failure goes back to the caller.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::domain::config::{PoolConfig, SslMode};
use crate::domain::tenant::{EncryptedSecret, TenantRecord};
use crate::infrastructure::crypto::{CipherError, SecretCipher};

/// Pool occupancy snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: u32,
    pub idle: u32,
    pub acquired: u32,
}

/// A multiplexed handle to one tenant database. Clones share the same
/// underlying connections.
#[async_trait]
pub trait TenantPool: Clone + Send + Sync + 'static {
    /// Cheap round trip used as the liveness check.
    async fn ping(&self) -> anyhow::Result<()>;

    async fn close(&self);

    fn stats(&self) -> PoolStats;
}

#[async_trait]
impl TenantPool for PgPool {
    async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(self).await?;
        Ok(())
    }

    async fn close(&self) {
        sqlx::Pool::close(self).await;
    }

    fn stats(&self) -> PoolStats {
        let total = self.size();
        let idle = u32::try_from(self.num_idle()).unwrap_or(u32::MAX).min(total);
        PoolStats {
            total,
            idle,
            acquired: total - idle,
        }
    }
}

/// Where a tenant pool connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
}

impl From<&TenantRecord> for ConnectionTarget {
    fn from(record: &TenantRecord) -> Self {
        Self {
            host: record.db_host.clone(),
            port: record.db_port,
            database: record.db_name.clone(),
            user: record.db_user.clone(),
        }
    }
}

/// Opens a new pool for a target. Pool sizing lives in the implementation.
#[async_trait]
pub trait PoolConnector<P: TenantPool>: Send + Sync {
    async fn connect(&self, target: &ConnectionTarget, password: &str) -> anyhow::Result<P>;
}

pub(crate) fn pg_ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
    }
}

/// sqlx connector applying the configured pool settings.
pub struct PgPoolConnector {
    settings: PoolConfig,
    ssl_mode: SslMode,
}

impl PgPoolConnector {
    pub fn new(settings: PoolConfig, ssl_mode: SslMode) -> Self {
        Self { settings, ssl_mode }
    }
}

#[async_trait]
impl PoolConnector<PgPool> for PgPoolConnector {
    async fn connect(&self, target: &ConnectionTarget, password: &str) -> anyhow::Result<PgPool> {
        let options = PgConnectOptions::new()
            .host(&target.host)
            .port(target.port)
            .database(&target.database)
            .username(&target.user)
            .password(password)
            .ssl_mode(pg_ssl_mode(self.ssl_mode));

        let connect = PgPoolOptions::new()
            .max_connections(self.settings.max_connections)
            .min_connections(self.settings.min_connections)
            .max_lifetime(self.settings.max_lifetime)
            .acquire_timeout(self.settings.connect_timeout)
            .connect_with(options);

        let pool = tokio::time::timeout(self.settings.connect_timeout, connect)
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "timed out after {:?} connecting to {}:{}/{}",
                    self.settings.connect_timeout,
                    target.host,
                    target.port,
                    target.database
                )
            })??;
        Ok(pool)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The stored password could not be decrypted; no connection was attempted.
    #[error("stored credentials for tenant '{tenant}' could not be decrypted")]
    Credential {
        tenant: String,
        #[source]
        source: CipherError,
    },

    #[error("could not connect to the database of tenant '{tenant}': {reason}")]
    Connection { tenant: String, reason: String },
}

struct CachedPool<P> {
    pool: P,
    generation: u64,
}

type CreationLock = Arc<tokio::sync::Mutex<()>>;

pub struct ConnectionPoolCache<P: TenantPool = PgPool> {
    cipher: Arc<SecretCipher>,
    connector: Arc<dyn PoolConnector<P>>,
    pools: RwLock<HashMap<String, CachedPool<P>>>,
    in_flight: Mutex<HashMap<String, CreationLock>>,
    generation: AtomicU64,
}

/// Held while a pool for `code` is being created or removed.
struct CreationGuard<'a> {
    in_flight: &'a Mutex<HashMap<String, CreationLock>>,
    code: String,
    guard: OwnedMutexGuard<()>,
}

impl Drop for CreationGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock();
        let lock = OwnedMutexGuard::mutex(&self.guard);
        // Map entry plus this guard: nobody else is waiting on it.
        let unused = in_flight
            .get(&self.code)
            .is_some_and(|current| Arc::ptr_eq(current, lock) && Arc::strong_count(lock) == 2);
        if unused {
            in_flight.remove(&self.code);
        }
    }
}

impl<P: TenantPool> ConnectionPoolCache<P> {
    pub fn new(cipher: Arc<SecretCipher>, connector: Arc<dyn PoolConnector<P>>) -> Self {
        Self {
            cipher,
            connector,
            pools: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Return a live pool for `code`, creating one on a miss or after a failed
    /// liveness check.
    pub async fn get_connection(
        &self,
        code: &str,
        target: &ConnectionTarget,
        password: &EncryptedSecret,
    ) -> Result<P, PoolError> {
        if let Some(pool) = self.check_cached(code).await {
            metrics::counter!("tenancy_pool_cache_hits_total").increment(1);
            return Ok(pool);
        }

        let _creation = self.creation_guard(code).await;

        // Another caller may have finished creating it while we waited.
        if let Some(pool) = self.check_cached(code).await {
            metrics::counter!("tenancy_pool_cache_hits_total").increment(1);
            return Ok(pool);
        }

        metrics::counter!("tenancy_pool_cache_misses_total").increment(1);
        debug!(tenant = code, "Pool cache miss");

        let pool = self.create_pool(code, target, password).await?;
        Ok(self.insert(code, pool).await)
    }

    /// Evict and close the pool for `code`. Returns whether one was cached.
    pub async fn close_connection(&self, code: &str) -> bool {
        let _creation = self.creation_guard(code).await;
        let removed = self.pools.write().remove(code);
        match removed {
            Some(entry) => {
                entry.pool.close().await;
                info!(tenant = code, "Closed tenant connection pool");
                true
            }
            None => false,
        }
    }

    /// Drain the cache and close every pool. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<(String, CachedPool<P>)> = self.pools.write().drain().collect();
        let count = drained.len();
        futures::future::join_all(drained.into_iter().map(|(code, entry)| async move {
            entry.pool.close().await;
            debug!(tenant = %code, "Closed tenant connection pool");
        }))
        .await;
        info!("Closed {} tenant connection pool(s)", count);
        count
    }

    /// Occupancy of the cached pool, `None` if `code` is not cached.
    pub fn stats(&self, code: &str) -> Option<PoolStats> {
        self.pools.read().get(code).map(|entry| entry.pool.stats())
    }

    pub fn contains(&self, code: &str) -> bool {
        self.pools.read().contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.pools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.read().is_empty()
    }

    async fn check_cached(&self, code: &str) -> Option<P> {
        let (pool, generation) = {
            let pools = self.pools.read();
            let entry = pools.get(code)?;
            (entry.pool.clone(), entry.generation)
        };

        match pool.ping().await {
            Ok(()) => Some(pool),
            Err(e) => {
                warn!(tenant = code, error = %e, "Cached pool failed liveness check");
                self.evict_if_current(code, generation);
                None
            }
        }
    }

    fn evict_if_current(&self, code: &str, generation: u64) {
        let removed = {
            let mut pools = self.pools.write();
            match pools.get(code) {
                Some(entry) if entry.generation == generation => pools.remove(code),
                _ => None,
            }
        };

        if let Some(entry) = removed {
            metrics::counter!("tenancy_pool_evictions_total").increment(1);
            info!(tenant = code, "Evicted dead tenant connection pool");
            // Requests may still hold clones; close once they are returned.
            tokio::spawn(async move {
                entry.pool.close().await;
            });
        }
    }

    async fn creation_guard(&self, code: &str) -> CreationGuard<'_> {
        let lock = self
            .in_flight
            .lock()
            .entry(code.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        CreationGuard {
            in_flight: &self.in_flight,
            code: code.to_string(),
            guard: lock.lock_owned().await,
        }
    }

    async fn create_pool(
        &self,
        code: &str,
        target: &ConnectionTarget,
        password: &EncryptedSecret,
    ) -> Result<P, PoolError> {
        let plaintext = self.cipher.decrypt(password).map_err(|source| {
            warn!(tenant = code, error = %source, "Could not decrypt tenant credentials");
            PoolError::Credential {
                tenant: code.to_string(),
                source,
            }
        })?;

        let pool = match self.connector.connect(target, &plaintext).await {
            Ok(pool) => pool,
            Err(e) => {
                metrics::counter!("tenancy_pool_create_failures_total").increment(1);
                warn!(tenant = code, database = %target.database, error = %e, "Failed to open tenant pool");
                return Err(PoolError::Connection {
                    tenant: code.to_string(),
                    reason: format!("{:#}", e),
                });
            }
        };

        if let Err(e) = pool.ping().await {
            pool.close().await;
            metrics::counter!("tenancy_pool_create_failures_total").increment(1);
            warn!(tenant = code, database = %target.database, error = %e, "New tenant pool failed its first liveness check");
            return Err(PoolError::Connection {
                tenant: code.to_string(),
                reason: format!("{:#}", e),
            });
        }

        info!(tenant = code, database = %target.database, "Opened tenant connection pool");
        Ok(pool)
    }

    async fn insert(&self, code: &str, pool: P) -> P {
        let winner = {
            let mut pools = self.pools.write();
            match pools.get(code) {
                Some(existing) => existing.pool.clone(),
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    pools.insert(
                        code.to_string(),
                        CachedPool {
                            pool: pool.clone(),
                            generation,
                        },
                    );
                    return pool;
                }
            }
        };

        pool.close().await;
        debug!(tenant = code, "Discarded duplicate tenant pool");
        winner
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::time::Duration;

    fn cache(connector: Arc<MockConnector>) -> (ConnectionPoolCache<MockPool>, EncryptedSecret) {
        let cipher = cipher();
        let secret = cipher.encrypt("s3cr3t").unwrap();
        (ConnectionPoolCache::new(cipher, connector), secret)
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let connector = Arc::new(MockConnector::default());
        let (cache, secret) = cache(connector.clone());
        let target = target("school_eis_db");

        let first = cache.get_connection("eis", &target, &secret).await.unwrap();
        let second = cache.get_connection("eis", &target, &secret).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(connector.created(), 1);
        assert_eq!(connector.passwords.lock().as_slice(), ["s3cr3t"]);
        assert_eq!(first.target.database, "school_eis_db");
    }

    #[tokio::test]
    async fn test_concurrent_first_use_creates_one_pool() {
        let connector = Arc::new(MockConnector::with_delay(Duration::from_millis(20)));
        let (cache, secret) = cache(connector.clone());
        let target = target("school_eis_db");

        let results = futures::future::join_all(
            (0..16).map(|_| cache.get_connection("eis", &target, &secret)),
        )
        .await;

        let ids: Vec<usize> = results.into_iter().map(|r| r.unwrap().id).collect();
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(connector.created(), 1);
        assert_eq!(connector.closed(), 0);
        assert_eq!(cache.len(), 1);
        assert!(cache.in_flight.lock().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_first_use_across_tasks() {
        let connector = Arc::new(MockConnector::with_delay(Duration::from_millis(20)));
        let (cache, secret) = cache(connector.clone());
        let cache = Arc::new(cache);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let secret = secret.clone();
                tokio::spawn(async move {
                    cache
                        .get_connection("eis", &target("school_eis_db"), &secret)
                        .await
                        .map(|p| p.id)
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 0);
        }
        assert_eq!(connector.created(), 1);
    }

    #[tokio::test]
    async fn test_dead_pool_is_evicted_and_rebuilt() {
        let connector = Arc::new(MockConnector::default());
        let (cache, secret) = cache(connector.clone());
        let target = target("school_eis_db");

        let first = cache.get_connection("eis", &target, &secret).await.unwrap();
        first.kill();

        let second = cache.get_connection("eis", &target, &secret).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(connector.created(), 2);

        settle().await;
        assert!(first.is_closed());
        assert!(!second.is_closed());
    }

    #[tokio::test]
    async fn test_failed_rebuild_reports_connection_error() {
        let connector = Arc::new(MockConnector::default());
        let (cache, secret) = cache(connector.clone());
        let target = target("school_eis_db");

        let first = cache.get_connection("eis", &target, &secret).await.unwrap();
        first.kill();
        connector.refuse.store(true, Ordering::SeqCst);

        let err = cache.get_connection("eis", &target, &secret).await.unwrap_err();
        assert!(matches!(err, PoolError::Connection { ref tenant, .. } if tenant == "eis"));
        assert!(!cache.contains("eis"));
    }

    #[tokio::test]
    async fn test_undecryptable_password_never_connects() {
        let connector = Arc::new(MockConnector::default());
        let (cache, _) = cache(connector.clone());

        let bogus = EncryptedSecret::new("bm90IGEgcmVhbCBibG9iIGF0IGFsbA==");
        let err = cache
            .get_connection("eis", &target("school_eis_db"), &bogus)
            .await
            .unwrap_err();

        assert!(matches!(err, PoolError::Credential { .. }));
        assert_eq!(connector.created(), 0);
    }

    #[tokio::test]
    async fn test_pool_failing_first_check_is_closed_not_cached() {
        let connector = Arc::new(MockConnector::default());
        connector.born_dead.store(true, Ordering::SeqCst);
        let (cache, secret) = cache(connector.clone());

        let err = cache
            .get_connection("eis", &target("school_eis_db"), &secret)
            .await
            .unwrap_err();

        assert!(matches!(err, PoolError::Connection { .. }));
        assert!(cache.is_empty());
        assert_eq!(connector.closed(), 1);
    }

    #[tokio::test]
    async fn test_close_connection_and_stats() {
        let connector = Arc::new(MockConnector::default());
        let (cache, secret) = cache(connector.clone());

        assert!(cache.stats("eis").is_none());
        cache
            .get_connection("eis", &target("school_eis_db"), &secret)
            .await
            .unwrap();
        assert_eq!(
            cache.stats("eis"),
            Some(PoolStats {
                total: 3,
                idle: 2,
                acquired: 1
            })
        );

        assert!(cache.close_connection("eis").await);
        assert!(!cache.close_connection("eis").await);
        assert!(cache.stats("eis").is_none());
        assert_eq!(connector.closed(), 1);
    }

    #[tokio::test]
    async fn test_close_all_drains_every_pool() {
        let connector = Arc::new(MockConnector::default());
        let (cache, secret) = cache(connector.clone());

        for (code, db) in [("eis", "school_eis_db"), ("kmc", "school_kmc_db"), ("abc", "school_abc_db")] {
            cache.get_connection(code, &target(db), &secret).await.unwrap();
        }

        assert_eq!(cache.close_all().await, 3);
        assert!(cache.is_empty());
        assert_eq!(connector.closed(), 3);
    }

    #[tokio::test]
    async fn test_codes_are_cached_independently() {
        let connector = Arc::new(MockConnector::default());
        let (cache, secret) = cache(connector.clone());

        let a = cache.get_connection("eis", &target("school_eis_db"), &secret).await.unwrap();
        let b = cache.get_connection("kmc", &target("school_kmc_db"), &secret).await.unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(cache.len(), 2);
    }
}
