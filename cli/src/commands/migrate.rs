// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Control-Plane Migration Command
//!
//! `tenantd migrate` applies the embedded control-plane migrations (the
//! `schools` registry) to the configured database. `tenantd serve` runs the
//! same migrations at startup; this command exists for deploy pipelines that
//! migrate before rolling out new instances.
//!
//! # Usage
//!
//! ```bash
//! # Apply all pending migrations
//! tenantd migrate
//!
//! # Preview migrations without applying
//! tenantd migrate --dry-run
//! ```

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use schoolerp_tenancy_core::domain::config::TenancyConfig;
use schoolerp_tenancy_core::infrastructure::db::ControlPlaneDatabase;
use schoolerp_tenancy_core::infrastructure::schema::{control_plane_status, migrate_control_plane};

#[derive(Args)]
pub struct MigrateCommand {
    /// List pending migrations without applying them
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn execute(cmd: MigrateCommand, config_path: Option<PathBuf>) -> Result<()> {
    println!("{}", "tenantd migrate".bold().green());

    let config = TenancyConfig::load_or_default(config_path).context("Failed to load configuration")?;

    println!(
        "Connecting to {}:{}/{}...",
        config.control_plane.host, config.control_plane.port, config.control_plane.database
    );
    let database = ControlPlaneDatabase::connect(&config.control_plane).await?;

    let result = run(&database, cmd.dry_run).await;
    database.close().await;
    result
}

async fn run(database: &ControlPlaneDatabase, dry_run: bool) -> Result<()> {
    let status = control_plane_status(database.get_pool()).await?;
    println!(
        "Migration status: {} applied, {} pending.",
        status.applied,
        status.pending.len()
    );

    if status.pending.is_empty() {
        println!("{}", "✓ Control-plane schema is up to date.".green());
        return Ok(());
    }

    if dry_run {
        println!("Pending migrations (dry run):");
        for (version, description) in &status.pending {
            println!(" - {} {}", version, description);
        }
        println!("Skipping application due to --dry-run");
        return Ok(());
    }

    println!("Applying pending migrations...");
    migrate_control_plane(database.get_pool()).await?;
    println!("{}", "✓ Control-plane schema updated.".green());
    Ok(())
}
