//! Role classification and capability checks.
//!
//! The resolver answers two questions for every other component:
//! "is this role administrative?" and "may this context perform
//! `resource:action`?". It is the only place that interprets role names or
//! levels, so visibility, redaction and explicit checks all agree.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use super::catalog::PermissionCatalog;
use super::models::{normalize_role_name, AuthContext, Permission, Role, RoleLike};
use crate::config::RolesConfig;
use crate::error::{ErrorCode, Result, VisorError};

// ═══════════════════════════════════════════════════════════════════════════════
// Tier & Decision
// ═══════════════════════════════════════════════════════════════════════════════

/// Role tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoleTier {
    /// Regular role; sees only what it is related to, holds only explicit grants.
    Standard,
    /// Implicitly holds every catalog capability within its organization.
    Administrative,
}

/// Result of a capability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    /// Denied, with a reason meant for logs.
    Deny(String),
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Deny(_))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Resolver
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct RoleResolver {
    administrative_names: HashSet<String>,
    level_threshold: Option<u32>,
    financial_access_roles: HashSet<String>,
    catalog: Arc<PermissionCatalog>,
}

impl RoleResolver {
    /// Build a resolver. Empty name sets are configuration errors.
    pub fn new(config: &RolesConfig, catalog: Arc<PermissionCatalog>) -> Result<Self> {
        let administrative_names = normalized_set(&config.administrative_names);
        if administrative_names.is_empty() {
            return Err(VisorError::new(
                ErrorCode::MissingConfiguration,
                "roles.administrative_names must not be empty",
            ));
        }
        let financial_access_roles = normalized_set(&config.financial_access_roles);
        if financial_access_roles.is_empty() {
            return Err(VisorError::new(
                ErrorCode::MissingConfiguration,
                "roles.financial_access_roles must not be empty",
            ));
        }

        Ok(Self {
            administrative_names,
            level_threshold: config.administrative_level_threshold,
            financial_access_roles,
            catalog,
        })
    }

    pub fn catalog(&self) -> &PermissionCatalog {
        &self.catalog
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Classification
    // ─────────────────────────────────────────────────────────────────────────

    /// Classify a role by name or by level. Either channel is sufficient.
    pub fn classify<R: RoleLike + ?Sized>(&self, role: &R) -> RoleTier {
        let name = normalize_role_name(role.role_name());
        if name.is_empty() {
            return RoleTier::Standard;
        }
        let by_name = self.administrative_names.contains(&name);
        let by_level = self
            .level_threshold
            .is_some_and(|threshold| role.role_level() >= threshold);

        if by_name || by_level {
            RoleTier::Administrative
        } else {
            RoleTier::Standard
        }
    }

    pub fn is_administrative<R: RoleLike + ?Sized>(&self, role: &R) -> bool {
        self.classify(role) == RoleTier::Administrative
    }

    /// Whether a role may see financial fields unredacted.
    ///
    /// Decided by the financial-access allowlist alone; being administrative
    /// does not imply it. A missing role never has access.
    pub fn has_financial_access<R: RoleLike + ?Sized>(&self, role: Option<&R>) -> bool {
        role.map(|role| normalize_role_name(role.role_name()))
            .is_some_and(|name| !name.is_empty() && self.financial_access_roles.contains(&name))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Capabilities
    // ─────────────────────────────────────────────────────────────────────────

    /// Effective capabilities of a stored role. Grants missing from the
    /// catalog are ignored, matching [`RoleResolver::can`].
    pub fn capabilities(&self, role: &Role) -> BTreeSet<Permission> {
        self.effective(self.classify(role), &role.grants)
    }

    /// Effective capabilities of the role carried in a request context.
    pub fn context_capabilities(&self, ctx: &AuthContext) -> BTreeSet<Permission> {
        if ctx.ensure_complete().is_err() {
            return BTreeSet::new();
        }
        self.effective(self.classify(&ctx.role), &ctx.granted_capabilities)
    }

    fn effective(&self, tier: RoleTier, grants: &HashSet<Permission>) -> BTreeSet<Permission> {
        match tier {
            RoleTier::Administrative => self.catalog.all(),
            RoleTier::Standard => grants
                .iter()
                .filter(|permission| self.catalog.contains(permission))
                .cloned()
                .collect(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Checks
    // ─────────────────────────────────────────────────────────────────────────

    /// Can the context perform `resource:action`?
    ///
    /// Incomplete contexts and pairs missing from the catalog are denied.
    pub fn can(&self, ctx: &AuthContext, resource: &str, action: &str) -> PolicyDecision {
        self.check(ctx, &Permission::new(resource, action))
    }

    pub fn check(&self, ctx: &AuthContext, permission: &Permission) -> PolicyDecision {
        let decision = self.decide(ctx, permission);
        let outcome = if decision.is_allowed() { "allow" } else { "deny" };
        counter!("visor_decisions_total", "outcome" => outcome).increment(1);
        decision
    }

    fn decide(&self, ctx: &AuthContext, permission: &Permission) -> PolicyDecision {
        if let Err(e) = ctx.ensure_complete() {
            return PolicyDecision::Deny(e.internal_message().unwrap_or("incomplete context").to_string());
        }
        if !self.catalog.contains(permission) {
            warn!(user_id = %ctx.user_id, permission = %permission, "Check against unknown permission");
            return PolicyDecision::Deny(format!("{permission} is not in the catalog"));
        }
        if self.is_administrative(&ctx.role) {
            debug!(user_id = %ctx.user_id, permission = %permission, "Allowed by administrative role");
            return PolicyDecision::Allow;
        }
        if ctx.granted_capabilities.contains(permission) {
            debug!(user_id = %ctx.user_id, permission = %permission, "Allowed by grant");
            return PolicyDecision::Allow;
        }
        PolicyDecision::Deny(format!(
            "user {} (role {}) lacks {} in organization {}",
            ctx.user_id, ctx.role.name, permission, ctx.organization_id
        ))
    }

    /// Returns `Ok(())` if allowed.
    ///
    /// Unknown pairs surface as validation errors, everything else denied as
    /// an authorization error with the generic user message.
    pub fn enforce(&self, ctx: &AuthContext, permission: &Permission) -> Result<()> {
        self.try_enforce(ctx, permission).inspect_err(VisorError::log)
    }

    fn try_enforce(&self, ctx: &AuthContext, permission: &Permission) -> Result<()> {
        ctx.ensure_complete()?;
        self.catalog.require(permission)?;
        match self.check(ctx, permission) {
            PolicyDecision::Allow => Ok(()),
            PolicyDecision::Deny(reason) => {
                Err(VisorError::forbidden(ErrorCode::CapabilityDenied, reason))
            }
        }
    }

    /// Returns `Allow` only if ALL permissions are granted. An empty list or an
    /// incomplete context is denied.
    pub fn check_all(&self, ctx: &AuthContext, permissions: &[Permission]) -> PolicyDecision {
        if let Err(e) = ctx.ensure_complete() {
            return PolicyDecision::Deny(e.internal_message().unwrap_or("incomplete context").to_string());
        }
        if permissions.is_empty() {
            return PolicyDecision::Deny("no permissions requested".to_string());
        }
        for permission in permissions {
            let decision = self.check(ctx, permission);
            if decision.is_denied() {
                return decision;
            }
        }
        PolicyDecision::Allow
    }

    /// Returns `Allow` if ANY permission is granted. An empty list is denied.
    pub fn check_any(&self, ctx: &AuthContext, permissions: &[Permission]) -> PolicyDecision {
        if permissions.iter().any(|p| self.check(ctx, p).is_allowed()) {
            return PolicyDecision::Allow;
        }
        PolicyDecision::Deny(format!(
            "user {} holds none of the required permissions",
            ctx.user_id
        ))
    }
}

fn normalized_set(names: &[String]) -> HashSet<String> {
    names
        .iter()
        .map(|name| normalize_role_name(name))
        .filter(|name| !name.is_empty())
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::models::RoleRef;

    fn resolver() -> RoleResolver {
        RoleResolver::new(&RolesConfig::default(), Arc::new(PermissionCatalog::erp_defaults())).unwrap()
    }

    fn ctx(role: &str, level: u32) -> AuthContext {
        AuthContext::new("u1", "org1", RoleRef::new(role, level))
    }

    #[test]
    fn test_classify_by_name_is_case_insensitive() {
        let r = resolver();
        assert_eq!(r.classify(&RoleRef::new("Admin", 1)), RoleTier::Administrative);
        assert_eq!(r.classify(&RoleRef::new("  SUPERADMIN ", 1)), RoleTier::Administrative);
        assert_eq!(r.classify(&RoleRef::new("Gerente  Operaciones", 1)), RoleTier::Administrative);
        assert_eq!(r.classify(&RoleRef::new("CEO", 0)), RoleTier::Administrative);
        assert_eq!(r.classify(&RoleRef::new("Staff", 1)), RoleTier::Standard);
    }

    #[test]
    fn test_classify_by_level() {
        let r = resolver();
        assert_eq!(r.classify(&RoleRef::new("Director", 10)), RoleTier::Administrative);
        assert_eq!(r.classify(&RoleRef::new("Director", 11)), RoleTier::Administrative);
        assert_eq!(r.classify(&RoleRef::new("CFO", 9)), RoleTier::Standard);
    }

    #[test]
    fn test_level_channel_can_be_disabled() {
        let config = RolesConfig {
            administrative_level_threshold: None,
            ..RolesConfig::default()
        };
        let r = RoleResolver::new(&config, Arc::new(PermissionCatalog::erp_defaults())).unwrap();
        assert_eq!(r.classify(&RoleRef::new("Director", 99)), RoleTier::Standard);
    }

    #[test]
    fn test_blank_role_is_standard() {
        let r = resolver();
        assert_eq!(r.classify(&RoleRef::new("   ", 1)), RoleTier::Standard);
        assert!(!r.has_financial_access(Some(&RoleRef::new("", 1))));
    }

    #[test]
    fn test_empty_admin_names_is_configuration_error() {
        let config = RolesConfig {
            administrative_names: vec![],
            ..RolesConfig::default()
        };
        let err = RoleResolver::new(&config, Arc::new(PermissionCatalog::erp_defaults())).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_financial_access_is_separate_from_admin() {
        let r = resolver();
        assert!(r.has_financial_access(Some(&RoleRef::new("CFO", 9))));
        assert!(r.has_financial_access(Some(&RoleRef::new("ceo", 1))));
        assert!(!r.has_financial_access(Some(&RoleRef::new("Admin", 1))));
        assert!(!r.has_financial_access(Some(&RoleRef::new("Staff", 1))));
        assert!(!r.has_financial_access::<RoleRef>(None));
    }

    #[test]
    fn test_admin_capabilities_are_full_catalog() {
        let r = resolver();
        let role = Role::new("admin", "org1", "Admin", 1);
        assert!(role.grants.is_empty());
        assert_eq!(r.capabilities(&role), r.catalog().all());
    }

    #[test]
    fn test_standard_capabilities_are_explicit_grants() {
        let r = resolver();
        let role = Role::new("staff", "org1", "Staff", 1).with_grants([
            Permission::new("tasks", "read"),
            Permission::new("projects", "read"),
        ]);
        let caps = r.capabilities(&role);
        assert_eq!(caps.len(), 2);
        assert!(caps.contains(&Permission::new("tasks", "read")));
    }

    #[test]
    fn test_can() {
        let r = resolver();
        let staff = ctx("Staff", 1).with_capabilities([Permission::new("tasks", "read")]);
        assert!(r.can(&staff, "tasks", "read").is_allowed());
        assert!(r.can(&staff, "tasks", "delete").is_denied());

        let admin = ctx("Admin", 1);
        assert!(r.can(&admin, "invoices", "approve").is_allowed());
    }

    #[test]
    fn test_unknown_permission_denied_even_for_admin() {
        let r = resolver();
        let admin = ctx("Admin", 1);
        assert!(r.can(&admin, "rockets", "launch").is_denied());

        let err = r.enforce(&admin, &Permission::new("rockets", "launch")).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_incomplete_context_denied() {
        let r = resolver();
        let anonymous = AuthContext::new("", "org1", RoleRef::new("Admin", 99));
        assert!(r.can(&anonymous, "tasks", "read").is_denied());
        assert!(r.context_capabilities(&anonymous).is_empty());

        let err = r.enforce(&anonymous, &Permission::new("tasks", "read")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingContext);
    }

    #[test]
    fn test_enforce_denial_is_generic() {
        let r = resolver();
        let staff = ctx("Staff", 1);
        let err = r.enforce(&staff, &Permission::new("payroll", "read")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CapabilityDenied);
        assert_eq!(err.user_message(), crate::error::NOT_PERMITTED);
    }

    #[test]
    fn test_check_all_and_any() {
        let r = resolver();
        let staff = ctx("Staff", 1).with_capabilities([Permission::new("tasks", "read")]);
        let read = Permission::new("tasks", "read");
        let update = Permission::new("tasks", "update");

        assert!(r.check_all(&staff, &[read.clone()]).is_allowed());
        assert!(r.check_all(&staff, &[read.clone(), update.clone()]).is_denied());
        assert!(r.check_any(&staff, &[update.clone(), read]).is_allowed());
        assert!(r.check_any(&staff, &[update]).is_denied());
        assert!(r.check_any(&staff, &[]).is_denied());
        assert!(r.check_all(&staff, &[]).is_denied());
    }

    #[test]
    fn test_check_all_denies_null_context() {
        let r = resolver();
        let null = AuthContext::new("", "", RoleRef::new("", 0));
        assert!(r.check_all(&null, &[]).is_denied());
        assert!(r.check_all(&null, &[Permission::new("tasks", "read")]).is_denied());

        let admin = AuthContext::new("", "org1", RoleRef::new("Admin", 1));
        assert!(r.check_all(&admin, &[Permission::new("tasks", "read")]).is_denied());
    }

    #[test]
    fn test_capabilities_ignore_grants_outside_catalog() {
        let r = resolver();
        let role = Role::new("staff", "org1", "Staff", 1).with_grants([
            Permission::new("tasks", "read"),
            Permission::new("rockets", "launch"),
        ]);
        let caps = r.capabilities(&role);
        assert_eq!(caps.len(), 1);
        assert!(!caps.contains(&Permission::new("rockets", "launch")));

        let ctx = ctx("Staff", 1).with_capabilities(role.grants.iter().cloned());
        assert!(r.can(&ctx, "rockets", "launch").is_denied());
        assert_eq!(r.context_capabilities(&ctx), caps);
    }
}
