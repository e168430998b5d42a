// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # tenantd
//!
//! Tenancy daemon of the School ERP control plane. Provisions isolated tenant
//! databases and routes tenant-scoped requests to cached connection pools.
//!
//! ## Commands
//!
//! - `tenantd serve` - Run the HTTP service (default)
//! - `tenantd migrate [--dry-run]` - Apply control-plane migrations
//! - `tenantd config show|validate|generate` - Configuration management
//! - `tenantd secret encrypt|decrypt` - Inspect or produce stored credentials

use anyhow::{Context, Result};
use clap::Parser;
use schoolerp_tenancy::{Cli, Commands, LogFormat};
use schoolerp_tenancy::commands;
use schoolerp_tenancy_core::domain::config::TenancyConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.log_format)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let config = TenancyConfig::load_or_default(cli.config)
                .context("Failed to load configuration")?;
            schoolerp_tenancy::server::run(config).await
        }
        Commands::Migrate { command } => commands::migrate::execute(command, cli.config).await,
        Commands::Config { command } => commands::config::handle_command(command, cli.config).await,
        Commands::Secret { command } => commands::secret::handle_command(command, cli.config).await,
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Compact => builder.with_target(false).compact().init(),
        LogFormat::Json => builder.with_target(true).json().init(),
    }

    Ok(())
}
