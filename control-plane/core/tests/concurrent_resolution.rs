// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::Harness;
use schoolerp_tenancy_core::application::tenant_service::{RegisterTenant, TenantService};

async fn registered(delay: Duration) -> Arc<Harness> {
    let h = Harness::with_connect_delay(delay);
    h.service
        .create_tenant(RegisterTenant {
            name: "Everest International School".to_string(),
            code: "eis".to_string(),
            domain: "eis.schoolerp.example".to_string(),
            logo_url: None,
            timezone: None,
            db_user: None,
            db_password: None,
        })
        .await
        .unwrap();
    Arc::new(h)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_requests_share_one_pool() {
    let h = registered(Duration::from_millis(25)).await;
    let before = h.connector.opened.load(Ordering::SeqCst);

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let h = h.clone();
            tokio::spawn(async move { h.resolver.resolve("eis").await })
        })
        .collect();
    let results = futures::future::join_all(tasks).await;

    for result in results {
        let resolved = result.unwrap().unwrap();
        assert!(!resolved.pool.is_closed());
    }
    assert_eq!(h.connector.opened.load(Ordering::SeqCst) - before, 1);
    assert_eq!(h.cache.len(), 1);
}

#[tokio::test]
async fn test_cancelled_request_does_not_poison_the_cache() {
    let h = registered(Duration::from_millis(50)).await;

    let abandoned = tokio::time::timeout(Duration::from_millis(5), h.resolver.resolve("eis")).await;
    assert!(abandoned.is_err());

    let resolved = h.resolver.resolve("eis").await.unwrap();
    assert_eq!(resolved.pool.database, "school_eis_db");
    assert_eq!(h.cache.len(), 1);
}

#[tokio::test]
async fn test_close_all_drains_the_cache() {
    let h = registered(Duration::ZERO).await;
    let pool = h.resolver.resolve("eis").await.unwrap().pool;

    assert_eq!(h.cache.close_all().await, 1);
    assert!(h.cache.is_empty());
    assert!(pool.is_closed());
}
