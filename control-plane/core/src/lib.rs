// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # School ERP Tenancy Core
//!
//! Multi-tenant database provisioning and connection routing for the School
//! ERP control plane.
//!
//! # Architecture
//!
//! - **domain:** tenant records, identifiers, events, configuration and the
//!   control-plane repository contract
//! - **application:** tenant management use cases and the tenant resolver
//! - **infrastructure:** secret cipher, connection pool cache, provisioner,
//!   PostgreSQL adapters and migrations
//! - **presentation:** axum router, tenant resolution middleware and HTTP
//!   error mapping

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
