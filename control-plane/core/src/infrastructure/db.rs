// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Control-Plane Connection Pool
//!
//! Wraps the `PgPool` of the control-plane database in a thin newtype that is
//! handed to `PostgresTenantRepository` and the migration runner.

use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};

use crate::domain::config::ControlPlaneConfig;

#[derive(Clone)]
pub struct ControlPlaneDatabase {
    pool: PgPool,
}

impl ControlPlaneDatabase {
    pub async fn connect(config: &ControlPlaneConfig) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_with(options)
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to control-plane database {}:{}/{}",
                    config.host, config.port, config.database
                )
            })?;

        Ok(Self { pool })
    }

    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
