// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon HTTP server
//!
//! Wires the control-plane store, secret cipher, pool cache, provisioner and
//! resolver together and serves the tenancy API until SIGINT/SIGTERM. On
//! shutdown running registrations and teardowns finish first, then every
//! cached tenant pool is drained before the control-plane pool closes.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use schoolerp_tenancy_core::application::{StandardTenantService, TenantResolver};
use schoolerp_tenancy_core::domain::config::{MetricsConfig, TenancyConfig};
use schoolerp_tenancy_core::domain::events::TenantEvent;
use schoolerp_tenancy_core::domain::repository::TenantRepository;
use schoolerp_tenancy_core::infrastructure::db::ControlPlaneDatabase;
use schoolerp_tenancy_core::infrastructure::event_bus::{EventBusError, EventReceiver, EventBus};
use schoolerp_tenancy_core::infrastructure::pool_cache::PgPoolConnector;
use schoolerp_tenancy_core::infrastructure::postgres_admin::PostgresDatabaseAdmin;
use schoolerp_tenancy_core::infrastructure::repositories::PostgresTenantRepository;
use schoolerp_tenancy_core::infrastructure::schema::{migrate_control_plane, PostgresSchemaInitializer};
use schoolerp_tenancy_core::infrastructure::{ConnectionPoolCache, SecretCipher, TenantProvisioner};
use schoolerp_tenancy_core::presentation::{router, AppState};

const EVENT_TARGET: &str = "tenancy::events";

pub async fn run(config: TenancyConfig) -> Result<()> {
    config.validate().context("Configuration validation failed")?;
    info!(config = ?config.redacted(), "tenantd starting");

    if config.metrics.enabled {
        install_metrics_exporter(&config.metrics)?;
    }

    let cipher = Arc::new(
        SecretCipher::new(&config.security.encryption_key, config.security.key_derivation)
            .context("security.encryption_key is not usable")?,
    );

    let control_plane = ControlPlaneDatabase::connect(&config.control_plane).await?;
    migrate_control_plane(control_plane.get_pool()).await?;

    let admin = Arc::new(PostgresDatabaseAdmin::connect(&config).await?);
    let connector = Arc::new(PgPoolConnector::new(
        config.pool.clone(),
        config.tenant_databases.ssl_mode,
    ));
    let cache: Arc<ConnectionPoolCache> =
        Arc::new(ConnectionPoolCache::new(cipher.clone(), connector.clone()));
    let provisioner = Arc::new(TenantProvisioner::new(
        admin.clone(),
        connector,
        Arc::new(PostgresSchemaInitializer),
        cache.clone(),
        &config.tenant_databases,
        config.provisioning.deadline,
    ));
    let repository: Arc<dyn TenantRepository> =
        Arc::new(PostgresTenantRepository::new(control_plane.get_pool().clone()));

    let event_bus = EventBus::with_default_capacity();
    let shutdown = CancellationToken::new();
    let forwarder = tokio::spawn(forward_events(event_bus.subscribe(), shutdown.clone()));

    let service = Arc::new(StandardTenantService::new(
        repository.clone(),
        provisioner,
        cache.clone(),
        cipher,
        event_bus,
    ));
    let app = router(
        AppState::new(service.clone()),
        TenantResolver::new(repository, cache.clone()),
    );

    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("tenantd listening on {}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed");

    info!("tenantd shutting down");
    service.shutdown().await;
    shutdown.cancel();
    if let Err(e) = forwarder.await {
        warn!(error = %e, "Event forwarder ended abnormally");
    }

    let closed = cache.close_all().await;
    info!(pools = closed, "Tenant pools drained");
    admin.close().await;
    control_plane.close().await;

    served
}

fn install_metrics_exporter(config: &MetricsConfig) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!("Prometheus metrics on {}", addr);
    Ok(())
}

/// Mirror tenant events into the log so failures can be alerted on.
async fn forward_events(mut events: EventReceiver, shutdown: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => log_event(&event),
            Err(EventBusError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
}

fn log_event(event: &TenantEvent) {
    match event {
        TenantEvent::TeardownFailed { code, database, reason, .. } => error!(
            target: EVENT_TARGET,
            kind = event.kind(),
            tenant = %code,
            database = %database,
            reason = %reason,
            "Tenant teardown failed"
        ),
        TenantEvent::ProvisioningRolledBack { code, database, reason, .. } => warn!(
            target: EVENT_TARGET,
            kind = event.kind(),
            tenant = %code,
            database = %database,
            reason = %reason,
            "Tenant provisioning rolled back"
        ),
        other => info!(target: EVENT_TARGET, kind = other.kind(), event = ?other, "Tenant event"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
