//! Role-Based Access Control (RBAC) and multi-tenancy foundations.
//!
//! This module provides:
//! - **Models**: users, roles, permissions, organizations and the request context
//! - **Catalog**: the fixed universe of grantable `resource:action` pairs
//! - **Grants**: idempotent role-grant storage (in-memory, cached, Postgres)
//! - **Resolver**: role tiers, effective capabilities and capability checks
//! - **Assignment**: organization-scoped role reassignment
//!
//! # Usage
//!
//! ```rust,ignore
//! use visor_core::rbac::{AuthContext, PermissionCatalog, RoleRef, RoleResolver};
//!
//! let resolver = RoleResolver::new(&config.roles, Arc::new(PermissionCatalog::erp_defaults()))?;
//! let ctx = AuthContext::new("u1", "org1", RoleRef::new("Staff", 1));
//!
//! if resolver.can(&ctx, "tasks", "update").is_allowed() {
//!     // ...
//! }
//! ```

pub mod assignment;
pub mod catalog;
pub mod grants;
pub mod models;
pub mod resolver;

pub use assignment::RoleAssignment;
pub use catalog::{CatalogEntry, PermissionCatalog};
pub use grants::{CachedGrantStore, InMemoryGrantStore, PgGrantStore, RoleGrantStore};
pub use models::{
    normalize_role_name, AuthContext, Organization, OrganizationId, Permission, PermissionId,
    Role, RoleGrant, RoleId, RoleLike, RoleRef, User, UserId,
};
pub use resolver::{PolicyDecision, RoleResolver, RoleTier};
