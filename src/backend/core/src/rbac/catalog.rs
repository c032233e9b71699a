//! The permission catalog: every (resource, action) pair the system knows.
//!
//! The catalog is built once at startup (from configuration or the built-in
//! ERP defaults) and never mutated afterwards. It is the universe used when
//! an administrative role asks for "all capabilities" and the gate every
//! explicit grant has to pass.
//!
//! | Resource      | Actions                               |
//! |---------------|---------------------------------------|
//! | organizations | read, update                          |
//! | users         | read, create, update, delete          |
//! | roles         | read, create, update, delete          |
//! | projects      | read, create, update, delete          |
//! | tasks         | read, create, update, delete          |
//! | clients       | read, create, update, delete          |
//! | suppliers     | read, create, update, delete          |
//! | invoices      | read, create, update, delete, approve |
//! | payments      | read, create, approve                 |
//! | expenses      | read, create, update, approve         |
//! | payroll       | read, update                          |
//! | reports       | read, export                          |
//! | settings      | read, update                          |

use std::collections::{BTreeMap, BTreeSet};

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::grants::RoleGrantStore;
use super::models::{Permission, PermissionId, Role, RoleGrant};
use crate::error::{ErrorCode, Result, VisorError};

/// A catalog row: the permission's identity and a human-readable description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: PermissionId,
    pub permission: Permission,
    pub description: String,
}

/// Immutable registry of grantable capabilities.
#[derive(Debug, Clone)]
pub struct PermissionCatalog {
    entries: BTreeMap<Permission, CatalogEntry>,
}

impl PermissionCatalog {
    /// Build a catalog from `(permission, description)` pairs.
    ///
    /// Duplicates collapse to a single entry (the first description wins).
    /// An empty catalog is a configuration error.
    pub fn new(entries: impl IntoIterator<Item = (Permission, String)>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for (permission, description) in entries {
            if permission.resource.trim().is_empty() || permission.action.trim().is_empty() {
                return Err(VisorError::validation(
                    ErrorCode::MalformedPermission,
                    "Malformed catalog entry",
                )
                .with_context("permission", permission.to_string()));
            }
            map.entry(permission.clone()).or_insert_with(|| CatalogEntry {
                id: permission.id(),
                permission,
                description,
            });
        }

        if map.is_empty() {
            return Err(VisorError::new(
                ErrorCode::MissingConfiguration,
                "Permission catalog is empty",
            ));
        }

        debug!(entries = map.len(), "Permission catalog built");
        Ok(Self { entries: map })
    }

    /// The built-in ERP catalog.
    pub fn erp_defaults() -> Self {
        let entries = default_entries()
            .into_iter()
            .map(|(resource, action)| {
                let permission = Permission::new(resource, action);
                let entry = CatalogEntry {
                    id: permission.id(),
                    permission: permission.clone(),
                    description: format!("{} {}", capitalize(action), resource),
                };
                (permission, entry)
            })
            .collect();

        Self { entries }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lookups
    // ─────────────────────────────────────────────────────────────────────────

    pub fn exists(&self, resource: &str, action: &str) -> bool {
        self.entries.contains_key(&Permission::new(resource, action))
    }

    pub fn contains(&self, permission: &Permission) -> bool {
        self.entries.contains_key(permission)
    }

    pub fn get(&self, permission: &Permission) -> Option<&CatalogEntry> {
        self.entries.get(permission)
    }

    /// Return the entry or a validation error for unknown pairs.
    pub fn require(&self, permission: &Permission) -> Result<&CatalogEntry> {
        self.entries
            .get(permission)
            .ok_or_else(|| VisorError::unknown_permission(permission))
    }

    /// Every capability in the catalog.
    pub fn all(&self) -> BTreeSet<Permission> {
        self.entries.keys().cloned().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Grants
    // ─────────────────────────────────────────────────────────────────────────

    /// Grant one catalog capability to a role.
    ///
    /// Returns `true` when a new grant row was written, `false` when the role
    /// already held it.
    pub async fn grant<S>(&self, store: &S, role: &Role, permission: &Permission) -> Result<bool>
    where
        S: RoleGrantStore + ?Sized,
    {
        role.validate()?;
        self.require(permission)?;
        let inserted = store
            .insert_if_absent(&RoleGrant::new(role.id.clone(), permission.clone()))
            .await?;
        if inserted {
            counter!("visor_grants_inserted_total").increment(1);
            info!(role_id = %role.id, permission = %permission, "Granted capability");
        }
        Ok(inserted)
    }

    /// Remove one grant from a role. Returns `true` if the role held it.
    pub async fn revoke<S>(&self, store: &S, role: &Role, permission: &Permission) -> Result<bool>
    where
        S: RoleGrantStore + ?Sized,
    {
        role.validate()?;
        self.require(permission)?;
        let removed = store
            .remove(&RoleGrant::new(role.id.clone(), permission.clone()))
            .await?;
        if removed {
            info!(role_id = %role.id, permission = %permission, "Revoked capability");
        }
        Ok(removed)
    }

    /// Ensure every catalog capability is linked to `role`.
    ///
    /// Safe to run repeatedly and concurrently: the store's insert-if-absent
    /// write means a pair is never stored twice and duplicates never raise.
    /// Returns the number of grant rows newly written by this call.
    pub async fn grant_all<S>(&self, store: &S, role: &Role) -> Result<usize>
    where
        S: RoleGrantStore + ?Sized,
    {
        role.validate()?;
        let permissions: Vec<Permission> = self.entries.keys().cloned().collect();
        let inserted = store.insert_many_if_absent(&role.id, &permissions).await?;
        counter!("visor_grants_inserted_total").increment(inserted as u64);
        info!(
            role_id = %role.id,
            catalog_size = permissions.len(),
            inserted,
            "Granted full catalog to role"
        );
        Ok(inserted)
    }
}

impl Default for PermissionCatalog {
    fn default() -> Self {
        Self::erp_defaults()
    }
}

fn default_entries() -> Vec<(&'static str, &'static str)> {
    const CRUD: [&str; 4] = ["read", "create", "update", "delete"];

    let mut entries = vec![
        ("organizations", "read"),
        ("organizations", "update"),
        ("invoices", "approve"),
        ("payments", "read"),
        ("payments", "create"),
        ("payments", "approve"),
        ("expenses", "read"),
        ("expenses", "create"),
        ("expenses", "update"),
        ("expenses", "approve"),
        ("payroll", "read"),
        ("payroll", "update"),
        ("reports", "read"),
        ("reports", "export"),
        ("settings", "read"),
        ("settings", "update"),
    ];
    for resource in ["users", "roles", "projects", "tasks", "clients", "suppliers", "invoices"] {
        entries.extend(CRUD.iter().map(|action| (resource, *action)));
    }
    entries
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
