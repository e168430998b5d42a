// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod tenant_resolver;
pub mod tenant_service;

pub use tenant_resolver::{ResolveError, ResolvedTenant, TenantResolver};
pub use tenant_service::{
    DeletedTenant, RegisterTenant, StandardTenantService, TenantService, TenantServiceError,
};
