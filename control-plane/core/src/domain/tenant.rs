// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Tenant Aggregate
//!
//! A tenant is one school: a row in the control-plane `schools` table that
//! points at an isolated PostgreSQL database and role. This module owns the
//! value types every other layer passes around.
//!
//! ## Identifier Safety
//!
//! Role and database names end up inside administrative DDL, which the
//! PostgreSQL protocol cannot parameterize. Every identifier is therefore
//! allow-listed here before any layer is allowed to interpolate it:
//!
//! | Value | Rule |
//! |-------|------|
//! | [`TenantCode`] | 2–20 ASCII alphanumerics, stored lowercase |
//! | database / role name | `[a-z_][a-z0-9_]{0,62}` |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TENANT_CODE_MIN_LEN: usize = 2;
pub const TENANT_CODE_MAX_LEN: usize = 20;

/// PostgreSQL truncates identifiers longer than 63 bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub Uuid);

impl TenantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    #[error("tenant code must be {min}-{max} characters, got {len}")]
    CodeLength { min: usize, max: usize, len: usize },

    #[error("tenant code may only contain ASCII letters and digits")]
    CodeCharset,

    #[error("'{0}' is not a valid database identifier")]
    InvalidIdentifier(String),
}

/// Short alphanumeric handle used in URLs, subdomains and derived database
/// names. Immutable once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TenantCode(String);

impl TenantCode {
    /// Validate and normalize (lowercase) a raw tenant code.
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        let raw = raw.trim();
        let len = raw.chars().count();
        if !(TENANT_CODE_MIN_LEN..=TENANT_CODE_MAX_LEN).contains(&len) {
            return Err(IdentifierError::CodeLength {
                min: TENANT_CODE_MIN_LEN,
                max: TENANT_CODE_MAX_LEN,
                len,
            });
        }
        if !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(IdentifierError::CodeCharset);
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `school_<code>_db`
    pub fn database_name(&self) -> String {
        format!("school_{}_db", self.0)
    }

    /// `school_<code>_user`
    pub fn role_name(&self) -> String {
        format!("school_{}_user", self.0)
    }
}

impl std::fmt::Display for TenantCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TenantCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        TenantCode::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Check that `name` is safe to splice (quoted) into DDL as a role or
/// database name.
pub fn validate_identifier(name: &str) -> Result<(), IdentifierError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_lowercase() || first == '_' => {
            name.len() <= MAX_IDENTIFIER_LEN
                && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(IdentifierError::InvalidIdentifier(name.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Inactive,
    Suspended,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Inactive => "inactive",
            TenantStatus::Suspended => "suspended",
        }
    }
}

impl std::str::FromStr for TenantStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TenantStatus::Active),
            "inactive" => Ok(TenantStatus::Inactive),
            "suspended" => Ok(TenantStatus::Suspended),
            other => Err(format!("unknown tenant status '{}'", other)),
        }
    }
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base64 AES-GCM blob as stored in `schools.db_password`. Plaintext never
/// lives in this type.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedSecret(String);

impl EncryptedSecret {
    pub fn new(blob: impl Into<String>) -> Self {
        Self(blob.into())
    }

    pub fn expose_blob(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for EncryptedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptedSecret(<redacted>)")
    }
}

/// Full control-plane row, credentials included. Never serialized to
/// clients; see [`TenantSummary`].
#[derive(Debug, Clone)]
pub struct TenantRecord {
    pub id: TenantId,
    pub code: TenantCode,
    pub name: String,
    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    pub db_password: EncryptedSecret,
    pub domain: String,
    pub logo_url: Option<String>,
    pub timezone: String,
    pub status: TenantStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenantRecord {
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }
}

/// Insert payload for the control-plane store.
#[derive(Debug, Clone)]
pub struct NewTenantRecord {
    pub code: TenantCode,
    pub name: String,
    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    pub db_password: EncryptedSecret,
    pub domain: String,
    pub logo_url: Option<String>,
    pub timezone: String,
    pub status: TenantStatus,
}

/// Mutable fields. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TenantUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub status: Option<TenantStatus>,
}

impl TenantUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.domain.is_none() && self.logo_url.is_none() && self.status.is_none()
    }
}

/// Client-facing projection of a tenant (no credentials).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantSummary {
    pub id: TenantId,
    pub name: String,
    pub code: TenantCode,
    pub db_name: String,
    pub domain: String,
    pub logo_url: Option<String>,
    pub timezone: String,
    pub status: TenantStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&TenantRecord> for TenantSummary {
    fn from(record: &TenantRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            code: record.code.clone(),
            db_name: record.db_name.clone(),
            domain: record.domain.clone(),
            logo_url: record.logo_url.clone(),
            timezone: record.timezone.clone(),
            status: record.status,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_is_normalized_to_lowercase() {
        let code = TenantCode::parse("EIS").unwrap();
        assert_eq!(code.as_str(), "eis");
        assert_eq!(code.database_name(), "school_eis_db");
        assert_eq!(code.role_name(), "school_eis_user");
    }

    #[test]
    fn test_code_rejects_injection_characters() {
        for raw in ["ei\"s", "eis;drop", "e-is", "eis db", "é1"] {
            assert!(TenantCode::parse(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn test_code_length_bounds() {
        assert!(matches!(
            TenantCode::parse("e"),
            Err(IdentifierError::CodeLength { len: 1, .. })
        ));
        assert!(TenantCode::parse("ab").is_ok());
        assert!(TenantCode::parse(&"a".repeat(20)).is_ok());
        assert!(TenantCode::parse(&"a".repeat(21)).is_err());
    }

    #[test]
    fn test_code_deserialization_validates() {
        let code: TenantCode = serde_json::from_str("\"KMC\"").unwrap();
        assert_eq!(code.as_str(), "kmc");
        assert!(serde_json::from_str::<TenantCode>("\"k'mc\"").is_err());
    }

    #[test]
    fn test_identifier_allow_list() {
        assert!(validate_identifier("school_eis_db").is_ok());
        assert!(validate_identifier("_tenant1").is_ok());
        assert!(validate_identifier("1tenant").is_err());
        assert!(validate_identifier("School").is_err());
        assert!(validate_identifier("a\"; DROP DATABASE x; --").is_err());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [TenantStatus::Active, TenantStatus::Inactive, TenantStatus::Suspended] {
            assert_eq!(status.as_str().parse::<TenantStatus>().unwrap(), status);
        }
        assert!("deleted".parse::<TenantStatus>().is_err());
    }

    #[test]
    fn test_encrypted_secret_debug_is_redacted() {
        let secret = EncryptedSecret::new("c2VjcmV0");
        assert!(!format!("{:?}", secret).contains("c2VjcmV0"));
    }
}
