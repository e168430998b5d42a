// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod crypto;
pub mod db;
pub mod event_bus;
pub mod pool_cache;
pub mod postgres_admin;
pub mod provisioner;
pub mod repositories;
pub mod schema;

pub use crypto::{CipherError, SecretCipher};
pub use pool_cache::{ConnectionPoolCache, ConnectionTarget, PoolError, PoolStats, TenantPool};
pub use provisioner::{ProvisioningError, TenantProvisioner};
