// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::tenant::{TenantCode, TenantId};

/// Tenant lifecycle events published on the in-process event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TenantEvent {
    TenantProvisioned {
        tenant_id: TenantId,
        code: TenantCode,
        database: String,
        provisioned_at: DateTime<Utc>,
    },
    /// A create failed part-way and its artifacts were removed again.
    ProvisioningRolledBack {
        code: TenantCode,
        database: String,
        reason: String,
        rolled_back_at: DateTime<Utc>,
    },
    TenantUpdated {
        tenant_id: TenantId,
        code: TenantCode,
        updated_at: DateTime<Utc>,
    },
    TenantDeleted {
        tenant_id: TenantId,
        code: TenantCode,
        deleted_at: DateTime<Utc>,
    },
    TeardownCompleted {
        code: TenantCode,
        database: String,
        completed_at: DateTime<Utc>,
    },
    /// The record is gone but the database or role may still exist.
    TeardownFailed {
        code: TenantCode,
        database: String,
        reason: String,
        failed_at: DateTime<Utc>,
    },
    PoolEvicted {
        code: String,
        evicted_at: DateTime<Utc>,
    },
}

impl TenantEvent {
    /// Short name used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            TenantEvent::TenantProvisioned { .. } => "tenant_provisioned",
            TenantEvent::ProvisioningRolledBack { .. } => "provisioning_rolled_back",
            TenantEvent::TenantUpdated { .. } => "tenant_updated",
            TenantEvent::TenantDeleted { .. } => "tenant_deleted",
            TenantEvent::TeardownCompleted { .. } => "teardown_completed",
            TenantEvent::TeardownFailed { .. } => "teardown_failed",
            TenantEvent::PoolEvicted { .. } => "pool_evicted",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TenantEvent::TeardownFailed { .. } | TenantEvent::ProvisioningRolledBack { .. }
        )
    }
}
