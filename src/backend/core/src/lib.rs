#![allow(clippy::result_large_err)]
//! # Visor Core
//!
//! Authorization and data-visibility engine for multi-tenant business
//! applications.
//!
//! ## Architecture
//!
//! - **Scope**: binds every data operation to the authenticated organization
//! - **RBAC**: permission catalog, role tiers, capability checks and grants
//! - **Visibility**: storage-independent predicates over owned and shared records
//! - **Redaction**: removes financial fields for roles without financial access
//! - **Config**: layered configuration for role names, field sets and logging
//! - **Telemetry**: structured logging setup
//!
//! Each request flows through the scope guard, then the visibility policy,
//! and finally the redaction filter on the way out. The authenticated context
//! is always passed explicitly; nothing is read from global state.

pub mod config;
pub mod engine;
pub mod error;
pub mod rbac;
pub mod redaction;
pub mod scope;
pub mod telemetry;
pub mod visibility;

pub use engine::Engine;
pub use error::{ErrorCode, ErrorDetails, ErrorKind, ErrorSeverity, Result, VisorError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{EngineConfig, RedactionConfig, RolesConfig};
    pub use crate::engine::Engine;
    pub use crate::error::{ErrorCode, ErrorKind, Result, VisorError, NOT_PERMITTED};
    pub use crate::rbac::{
        AuthContext, CachedGrantStore, InMemoryGrantStore, OrganizationId, Permission,
        PermissionCatalog, PgGrantStore, PolicyDecision, Role, RoleAssignment, RoleGrantStore,
        RoleId, RoleLike, RoleRef, RoleResolver, RoleTier, User, UserId,
    };
    pub use crate::redaction::{FieldRedactionFilter, FieldSchema, FieldTag, Node};
    pub use crate::scope::{DataRequest, OrganizationScopeGuard, ScopedRequest};
    pub use crate::visibility::{
        Field, Predicate, Project, Relation, SqlMapping, Task, VisibilityPolicy, VisibilityRecord,
    };
}
