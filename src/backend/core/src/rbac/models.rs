//! RBAC data models: identifiers, Permission, Role, RoleGrant, User,
//! Organization, and the authenticated request context.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{ErrorCode, Result, VisorError};

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Blank identifiers never match anything; callers treat them as missing.
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Strongly-typed user identifier.
    UserId
);
string_id!(
    /// Strongly-typed role identifier.
    RoleId
);
string_id!(
    /// Strongly-typed organization (tenant) identifier.
    OrganizationId
);
string_id!(
    /// Catalog identity of a permission, e.g. `"projects:read"`.
    PermissionId
);

impl OrganizationId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Permission
// ═══════════════════════════════════════════════════════════════════════════════

/// A capability: an action on a resource type.
///
/// Written `resource:action`, for example `projects:read`, `tasks:update`,
/// `invoices:approve`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Permission {
    /// The resource type (e.g. "projects", "tasks", "invoices").
    pub resource: String,
    /// The action (e.g. "read", "create", "update", "delete").
    pub action: String,
}

impl Permission {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// Parse a permission from a colon-separated string like `"projects:read"`.
    pub fn parse(s: &str) -> Option<Self> {
        let (resource, action) = s.split_once(':')?;
        let (resource, action) = (resource.trim(), action.trim());
        if resource.is_empty() || action.is_empty() || action.contains(':') {
            return None;
        }
        Some(Self::new(resource, action))
    }

    /// Like [`Permission::parse`] but reports malformed input as a validation error.
    pub fn try_parse(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| {
            VisorError::validation(ErrorCode::MalformedPermission, "Malformed permission")
                .with_context("input", s)
        })
    }

    /// Canonical catalog identity, `resource:action`.
    pub fn id(&self) -> PermissionId {
        PermissionId::new(self.to_string())
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Organization
// ═══════════════════════════════════════════════════════════════════════════════

/// A tenant. Every scoped record belongs to exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
}

impl Organization {
    pub fn new(id: impl Into<OrganizationId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Role
// ═══════════════════════════════════════════════════════════════════════════════

/// Anything that carries a role name and seniority level.
///
/// Classification only ever looks at these two fields, so persisted roles and
/// the lightweight role reference inside a request context share one code path.
pub trait RoleLike {
    fn role_name(&self) -> &str;
    fn role_level(&self) -> u32;
}

/// An organization-scoped role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    /// Roles are scoped to one organization; there are no global roles.
    pub organization_id: OrganizationId,
    /// Free text; compared case-insensitively after trimming.
    pub name: String,
    /// Monotonic seniority proxy.
    pub level: u32,
    /// Explicit grants. Administrative roles are not expected to carry any.
    #[serde(default)]
    pub grants: HashSet<Permission>,
}

impl Role {
    pub fn new(
        id: impl Into<RoleId>,
        organization_id: impl Into<OrganizationId>,
        name: impl Into<String>,
        level: u32,
    ) -> Self {
        Self {
            id: id.into(),
            organization_id: organization_id.into(),
            name: name.into(),
            level,
            grants: HashSet::new(),
        }
    }

    pub fn with_grants(mut self, grants: impl IntoIterator<Item = Permission>) -> Self {
        self.grants.extend(grants);
        self
    }

    /// Reject roles that cannot be classified safely.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_blank() || self.organization_id.is_blank() || self.name.trim().is_empty() {
            return Err(VisorError::validation(ErrorCode::MalformedRole, "Malformed role")
                .with_context("role_id", self.id.as_str()));
        }
        Ok(())
    }

    /// Lightweight reference for embedding in an [`AuthContext`].
    pub fn to_ref(&self) -> RoleRef {
        RoleRef {
            id: Some(self.id.clone()),
            name: self.name.clone(),
            level: self.level,
        }
    }
}

impl RoleLike for Role {
    fn role_name(&self) -> &str {
        &self.name
    }

    fn role_level(&self) -> u32 {
        self.level
    }
}

/// Normalized form of a role name: trimmed, case-folded, inner whitespace collapsed.
pub fn normalize_role_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Role Grant
// ═══════════════════════════════════════════════════════════════════════════════

/// Links a role to one catalog permission. A pair exists at most once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleGrant {
    pub role_id: RoleId,
    pub permission: Permission,
}

impl RoleGrant {
    pub fn new(role_id: RoleId, permission: Permission) -> Self {
        Self { role_id, permission }
    }

    /// Reject grants with a blank role, resource or action.
    pub fn validate(&self) -> Result<()> {
        if self.role_id.is_blank()
            || self.permission.resource.trim().is_empty()
            || self.permission.action.trim().is_empty()
        {
            return Err(VisorError::validation(ErrorCode::MalformedGrant, "Malformed grant")
                .with_context("role_id", self.role_id.as_str())
                .with_context("permission", self.permission.to_string()));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// User
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Immutable after creation.
    pub organization_id: OrganizationId,
    pub role_id: RoleId,
    pub active: bool,
}

impl User {
    pub fn new(
        id: impl Into<UserId>,
        organization_id: impl Into<OrganizationId>,
        role_id: impl Into<RoleId>,
    ) -> Self {
        Self {
            id: id.into(),
            organization_id: organization_id.into(),
            role_id: role_id.into(),
            active: true,
        }
    }

    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Authenticated Context
// ═══════════════════════════════════════════════════════════════════════════════

/// Role as carried by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RoleId>,
    pub name: String,
    #[serde(default)]
    pub level: u32,
}

impl RoleRef {
    pub fn new(name: impl Into<String>, level: u32) -> Self {
        Self {
            id: None,
            name: name.into(),
            level,
        }
    }
}

impl RoleLike for RoleRef {
    fn role_name(&self) -> &str {
        &self.name
    }

    fn role_level(&self) -> u32 {
        self.level
    }
}

/// The authenticated request context supplied by the authentication layer.
///
/// This engine never issues or verifies credentials; it trusts this value and
/// threads it explicitly through every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    pub user_id: UserId,
    pub organization_id: OrganizationId,
    pub role: RoleRef,
    #[serde(default)]
    pub granted_capabilities: HashSet<Permission>,
}

impl AuthContext {
    pub fn new(
        user_id: impl Into<UserId>,
        organization_id: impl Into<OrganizationId>,
        role: RoleRef,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            organization_id: organization_id.into(),
            role,
            granted_capabilities: HashSet::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Permission>) -> Self {
        self.granted_capabilities.extend(capabilities);
        self
    }

    /// Build a context for a stored user and their role.
    ///
    /// Refuses inactive users and roles that do not belong to the user (or to
    /// the user's organization).
    pub fn for_user(user: &User, role: &Role) -> Result<Self> {
        if !user.active {
            return Err(VisorError::forbidden(
                ErrorCode::InactiveUser,
                format!("user {} is inactive", user.id),
            ));
        }
        role.validate()?;
        if role.id != user.role_id || role.organization_id != user.organization_id {
            return Err(VisorError::validation(
                ErrorCode::MalformedRole,
                "Role does not belong to user",
            )
            .with_context("user_id", user.id.as_str())
            .with_context("role_id", role.id.as_str()));
        }
        Ok(Self {
            user_id: user.id.clone(),
            organization_id: user.organization_id.clone(),
            role: role.to_ref(),
            granted_capabilities: role.grants.clone(),
        })
    }

    /// Fail-closed sanity check run by every component before deciding anything.
    pub fn ensure_complete(&self) -> Result<()> {
        if self.user_id.is_blank() {
            return Err(VisorError::missing_context("context has no user id"));
        }
        if self.organization_id.is_blank() {
            return Err(VisorError::missing_context("context has no organization id"));
        }
        if self.role.name.trim().is_empty() {
            return Err(VisorError::missing_context("context has no role"));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
