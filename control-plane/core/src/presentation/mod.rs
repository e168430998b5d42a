// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Presentation Layer
//!
//! HTTP surface of the tenancy service. Handlers only translate requests into
//! calls on `crate::application`.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`api`] | Router, application state and the `/api/v1/schools` handlers |
//! | [`middleware`] | Tenant resolution middleware and the `TenantContext` extractor |
//! | [`error`] | Mapping of application errors to HTTP responses |

pub mod api;
pub mod error;
pub mod middleware;

pub use api::{router, AppState};
pub use error::ApiError;
pub use middleware::TenantContext;
