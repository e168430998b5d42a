// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Tenancy Service Configuration
//!
//! `TenancyConfig` is loaded from YAML (`tenancy-config.yaml`) and then
//! overlaid with environment variables so container deployments can run
//! without a file at all. Durations are written in humantime form (`5s`,
//! `5m`).
//!
//! ## Discovery order
//!
//! 1. `--config <path>` (fails if missing)
//! 2. `SCHOOLERP_CONFIG_PATH`
//! 3. `./tenancy-config.yaml`
//! 4. `/etc/schoolerp/tenancy.yaml`
//! 5. built-in defaults
//!
//! ## Environment overrides
//!
//! | Variable | Field |
//! |----------|-------|
//! | `PORT` | `server.port` |
//! | `DB_HOST` / `DB_PORT` / `DB_NAME` | `control_plane.host` / `.port` / `.database` |
//! | `DB_USER` / `DB_PASSWORD` | `control_plane.user` / `.password` |
//! | `MAX_CONNECTIONS` / `MAX_IDLE_CONN` | `pool.max_connections` / `pool.min_connections` |
//! | `CONN_MAX_LIFETIME` | `pool.max_lifetime` (minutes) |
//! | `ENCRYPTION_KEY` | `security.encryption_key` |
//! | `TENANT_DB_HOST` / `TENANT_DB_PORT` | `tenant_databases.host` / `.port` |

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "SCHOOLERP_CONFIG_PATH";
const REDACTED: &str = "<redacted>";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenancyConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,
    #[serde(default)]
    pub tenant_databases: TenantDatabaseConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

/// Connection to the control-plane database that holds the `schools` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_control_plane_database")]
    pub database: String,
    #[serde(default = "default_db_user")]
    pub user: String,
    #[serde(default = "default_db_password")]
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_control_plane_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
}

/// Where tenant databases live. Stored on each new tenant record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantDatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default)]
    pub ssl_mode: SslMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
}

/// Per-tenant pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_pool_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(default = "default_max_lifetime", with = "humantime_serde")]
    pub max_lifetime: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Upper bound on a whole create-tenant operation.
    #[serde(default = "default_provisioning_deadline", with = "humantime_serde")]
    pub deadline: Duration,
    /// Superuser used for role/database DDL. Defaults to the control-plane user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_password: Option<String>,
    /// Maintenance database the admin connection opens on the tenant server.
    #[serde(default = "default_admin_database")]
    pub admin_database: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub encryption_key: String,
    #[serde(default)]
    pub key_derivation: KeyDerivation,
}

/// How the configured secret becomes a 32-byte AES key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyDerivation {
    /// Truncate to 32 bytes or right-pad with zero bytes. Needed to read rows
    /// written by earlier deployments.
    #[default]
    Legacy,
    /// SHA-256 digest of the secret.
    Sha256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
        }
    }
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            database: default_control_plane_database(),
            user: default_db_user(),
            password: default_db_password(),
            max_connections: default_max_connections(),
            connect_timeout: default_control_plane_connect_timeout(),
        }
    }
}

impl Default for TenantDatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            ssl_mode: SslMode::default(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout: default_pool_connect_timeout(),
            max_lifetime: default_max_lifetime(),
        }
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            deadline: default_provisioning_deadline(),
            admin_user: None,
            admin_password: None,
            admin_database: default_admin_database(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    3011
}

fn default_db_host() -> String {
    "postgres".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_control_plane_database() -> String {
    "school_erp".to_string()
}

fn default_db_user() -> String {
    "postgres".to_string()
}

fn default_db_password() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> u32 {
    25
}

fn default_min_connections() -> u32 {
    1
}

fn default_control_plane_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_pool_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_max_lifetime() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_provisioning_deadline() -> Duration {
    Duration::from_secs(60)
}

fn default_admin_database() -> String {
    "postgres".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}

impl ProvisioningConfig {
    /// Admin credentials for DDL, falling back to the control-plane login.
    pub fn admin_credentials(&self, control_plane: &ControlPlaneConfig) -> (String, String) {
        (
            self.admin_user.clone().unwrap_or_else(|| control_plane.user.clone()),
            self.admin_password
                .clone()
                .unwrap_or_else(|| control_plane.password.clone()),
        )
    }
}

impl TenancyConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. SCHOOLERP_CONFIG_PATH environment variable
    /// 2. ./tenancy-config.yaml (working directory)
    /// 3. /etc/schoolerp/tenancy.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        Self::search_paths().into_iter().find(|p| p.exists())
    }

    /// Standard file locations, in the order they are tried.
    pub fn search_paths() -> Vec<PathBuf> {
        vec![
            PathBuf::from("./tenancy-config.yaml"),
            PathBuf::from("/etc/schoolerp/tenancy.yaml"),
        ]
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            Self::from_yaml_file(config_path)?
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable source. Unparseable numeric
    /// values are ignored with a warning.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, raw: String) -> Option<T> {
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!("Invalid value for {}: '{}'. Ignoring.", key, raw);
                    None
                }
            }
        }

        if let Some(v) = lookup("PORT").and_then(|v| parsed("PORT", v)) {
            self.server.port = v;
        }
        if let Some(v) = lookup("DB_HOST") {
            self.control_plane.host = v;
        }
        if let Some(v) = lookup("DB_PORT").and_then(|v| parsed("DB_PORT", v)) {
            self.control_plane.port = v;
        }
        if let Some(v) = lookup("DB_NAME") {
            self.control_plane.database = v;
        }
        if let Some(v) = lookup("DB_USER") {
            self.control_plane.user = v;
        }
        if let Some(v) = lookup("DB_PASSWORD") {
            self.control_plane.password = v;
        }
        if let Some(v) = lookup("MAX_CONNECTIONS").and_then(|v| parsed("MAX_CONNECTIONS", v)) {
            self.pool.max_connections = v;
        }
        if let Some(v) = lookup("MAX_IDLE_CONN").and_then(|v| parsed("MAX_IDLE_CONN", v)) {
            self.pool.min_connections = v;
        }
        if let Some(minutes) =
            lookup("CONN_MAX_LIFETIME").and_then(|v| parsed::<u64>("CONN_MAX_LIFETIME", v))
        {
            self.pool.max_lifetime = Duration::from_secs(minutes * 60);
        }
        if let Some(v) = lookup("ENCRYPTION_KEY") {
            self.security.encryption_key = v;
        }
        if let Some(v) = lookup("TENANT_DB_HOST") {
            self.tenant_databases.host = v;
        }
        if let Some(v) = lookup("TENANT_DB_PORT").and_then(|v| parsed("TENANT_DB_PORT", v)) {
            self.tenant_databases.port = v;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.security.encryption_key.is_empty() {
            anyhow::bail!("security.encryption_key cannot be empty");
        }
        if self.security.key_derivation == KeyDerivation::Legacy
            && self.security.encryption_key.len() < 32
        {
            tracing::warn!(
                "security.encryption_key is shorter than 32 bytes and will be zero-padded; \
                 consider a longer key"
            );
        }

        if self.server.port == 0 {
            anyhow::bail!("server.port cannot be 0");
        }
        if self.metrics.enabled && self.metrics.port == 0 {
            anyhow::bail!("metrics.port cannot be 0");
        }
        if self.control_plane.port == 0 || self.tenant_databases.port == 0 {
            anyhow::bail!("database ports cannot be 0");
        }
        if self.provisioning.admin_database.is_empty() {
            anyhow::bail!("provisioning.admin_database cannot be empty");
        }
        if self.control_plane.max_connections == 0 {
            anyhow::bail!("control_plane.max_connections must be at least 1");
        }

        if self.pool.max_connections == 0 {
            anyhow::bail!("pool.max_connections must be at least 1");
        }
        if self.pool.min_connections > self.pool.max_connections {
            anyhow::bail!(
                "pool.min_connections ({}) exceeds pool.max_connections ({})",
                self.pool.min_connections,
                self.pool.max_connections
            );
        }
        if self.pool.connect_timeout.is_zero()
            || self.pool.max_lifetime.is_zero()
            || self.control_plane.connect_timeout.is_zero()
        {
            anyhow::bail!("connection timeouts and lifetimes must be non-zero");
        }
        if self.provisioning.deadline <= self.pool.connect_timeout {
            anyhow::bail!(
                "provisioning.deadline ({:?}) must exceed pool.connect_timeout ({:?})",
                self.provisioning.deadline,
                self.pool.connect_timeout
            );
        }
        Ok(())
    }

    /// Copy with every credential replaced, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.control_plane.password = REDACTED.to_string();
        if copy.provisioning.admin_password.is_some() {
            copy.provisioning.admin_password = Some(REDACTED.to_string());
        }
        if !copy.security.encryption_key.is_empty() {
            copy.security.encryption_key = REDACTED.to_string();
        }
        copy
    }
}
