//! Configuration management.
//!
//! Sources are layered in order (each overrides the previous):
//! 1. Built-in defaults
//! 2. Optional TOML file
//! 3. `VISOR__`-prefixed environment variables (`VISOR__ROLES__ADMINISTRATIVE_LEVEL_THRESHOLD=8`,
//!    list values comma-separated)
//!
//! This is the single home of the administrative-name set, the
//! financial-access allowlist and the financial-field set. Nothing else in the
//! crate hard-codes role or field names.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, Result, VisorError};
use crate::rbac::catalog::PermissionCatalog;
use crate::rbac::models::Permission;
use crate::telemetry::LoggingConfig;

/// Main engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Role classification
    #[serde(default)]
    pub roles: RolesConfig,

    /// Financial field redaction
    #[serde(default)]
    pub redaction: RedactionConfig,

    /// Permission catalog; empty means "use the built-in ERP catalog"
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolesConfig {
    /// Role names (case-insensitive) classified as Administrative
    #[serde(default = "default_administrative_names")]
    pub administrative_names: Vec<String>,

    /// Roles at or above this level are Administrative; `None` disables the level channel
    #[serde(default = "default_administrative_level_threshold")]
    pub administrative_level_threshold: Option<u32>,

    /// Role names (case-insensitive) entitled to unredacted financial fields
    #[serde(default = "default_financial_access_roles")]
    pub financial_access_roles: Vec<String>,
}

impl Default for RolesConfig {
    fn default() -> Self {
        Self {
            administrative_names: default_administrative_names(),
            administrative_level_threshold: default_administrative_level_threshold(),
            financial_access_roles: default_financial_access_roles(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionConfig {
    /// Field names (case-insensitive, exact match) treated as financial when untagged
    #[serde(default = "default_financial_fields")]
    pub financial_fields: Vec<String>,

    /// Deepest payload nesting the filter will traverse
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            financial_fields: default_financial_fields(),
            max_depth: default_max_depth(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub entries: Vec<CatalogEntryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntryConfig {
    pub resource: String,
    pub action: String,
    #[serde(default)]
    pub description: Option<String>,
}

// Default value functions
fn default_administrative_names() -> Vec<String> {
    ["admin", "super_admin", "superadmin", "administrator", "ceo", "gerente operaciones"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_administrative_level_threshold() -> Option<u32> { Some(10) }
fn default_financial_access_roles() -> Vec<String> {
    ["superadmin", "super_admin", "ceo", "owner", "cfo", "senior accountant", "contador senior"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_financial_fields() -> Vec<String> {
    [
        "amount", "cost", "price", "salary", "budget", "revenue", "expense", "total",
        "subtotal", "balance", "debit", "credit", "payment", "invoice", "wage", "compensation",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_max_depth() -> usize { 256 }

const ENV_PREFIX: &str = "VISOR";
const LIST_KEYS: [&str; 3] = [
    "roles.administrative_names",
    "roles.financial_access_roles",
    "redaction.financial_fields",
];

impl EngineConfig {
    /// Load configuration from the environment on top of defaults.
    pub fn load() -> Result<Self> {
        let cfg = Self::builder().build()?.try_deserialize::<EngineConfig>()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let cfg = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(Self::environment())
            .build()?
            .try_deserialize::<EngineConfig>()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document (no environment overrides).
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: EngineConfig = toml::from_str(s).map_err(|e| {
            VisorError::with_internal(
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
                e.to_string(),
            )
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn builder() -> config::ConfigBuilder<config::builder::DefaultState> {
        config::Config::builder().add_source(Self::environment())
    }

    fn environment() -> config::Environment {
        LIST_KEYS.iter().fold(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .try_parsing(true),
            |env, key| env.with_list_parse_key(key),
        )
    }

    /// Reject configurations the engine cannot run with safely.
    pub fn validate(&self) -> Result<()> {
        if non_blank(&self.roles.administrative_names) == 0 {
            return Err(missing("roles.administrative_names"));
        }
        if non_blank(&self.roles.financial_access_roles) == 0 {
            return Err(missing("roles.financial_access_roles"));
        }
        if non_blank(&self.redaction.financial_fields) == 0 {
            return Err(missing("redaction.financial_fields"));
        }
        if self.redaction.max_depth == 0 {
            return Err(VisorError::configuration("redaction.max_depth must be positive")
                .with_context("key", "redaction.max_depth"));
        }
        Ok(())
    }

    /// Build the permission catalog this configuration describes.
    pub fn permission_catalog(&self) -> Result<PermissionCatalog> {
        if self.catalog.entries.is_empty() {
            return Ok(PermissionCatalog::erp_defaults());
        }
        PermissionCatalog::new(self.catalog.entries.iter().map(|entry| {
            let permission = Permission::new(entry.resource.trim(), entry.action.trim());
            let description = entry
                .description
                .clone()
                .unwrap_or_else(|| permission.to_string());
            (permission, description)
        }))
    }
}

fn non_blank(values: &[String]) -> usize {
    values.iter().filter(|v| !v.trim().is_empty()).count()
}

fn missing(key: &str) -> VisorError {
    VisorError::new(ErrorCode::MissingConfiguration, format!("{key} must not be empty"))
        .with_context("key", key)
}
