// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for tenantd

pub mod config;
pub mod migrate;
pub mod secret;

pub use self::config::ConfigCommand;
pub use self::migrate::MigrateCommand;
pub use self::secret::SecretCommand;
