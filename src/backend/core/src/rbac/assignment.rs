//! Changing a user's role.
//!
//! Reassignment is an organization-scoped write, so it has to pass tenancy,
//! capability and escalation checks before anything changes. A successful
//! reassignment returns the updated user; callers rebuild that user's
//! [`AuthContext`] on the next request, so no cached decision outlives the
//! old role.

use std::sync::Arc;

use tracing::info;

use super::models::{AuthContext, Permission, Role, RoleLike, User};
use super::resolver::{RoleResolver, RoleTier};
use crate::error::{ErrorCode, Result, VisorError};

/// Capability a standard actor needs to reassign roles.
const REASSIGN_PERMISSION: (&str, &str) = ("users", "update");

#[derive(Debug, Clone)]
pub struct RoleAssignment {
    resolver: Arc<RoleResolver>,
}

impl RoleAssignment {
    pub fn new(resolver: Arc<RoleResolver>) -> Self {
        Self { resolver }
    }

    /// Move `user` onto `new_role` on behalf of `actor`.
    ///
    /// Rules:
    /// - actor, user and role all share the actor's organization
    /// - the actor is administrative or holds `users:update`
    /// - the actor cannot hand out a role above their own tier or level
    /// - a standard actor cannot hand out capabilities they do not hold
    /// - nobody changes their own role to a more privileged one
    pub fn reassign(&self, actor: &AuthContext, user: &User, new_role: &Role) -> Result<User> {
        actor.ensure_complete()?;
        new_role.validate()?;

        if user.organization_id != actor.organization_id {
            return Err(VisorError::organization_mismatch(
                &actor.organization_id,
                &user.organization_id,
            ));
        }
        if new_role.organization_id != actor.organization_id {
            return Err(VisorError::organization_mismatch(
                &actor.organization_id,
                &new_role.organization_id,
            ));
        }

        let (resource, action) = REASSIGN_PERMISSION;
        let permission = Permission::new(resource, action);
        if self.resolver.check(actor, &permission).is_denied() {
            return Err(VisorError::capability_denied(&actor.user_id, &permission));
        }

        let actor_tier = self.resolver.classify(&actor.role);
        let target_tier = self.resolver.classify(new_role);
        let escalates = target_tier > actor_tier
            || (actor_tier == RoleTier::Standard && new_role.role_level() > actor.role.role_level());
        if escalates {
            return Err(VisorError::forbidden(
                ErrorCode::SelfEscalation,
                format!(
                    "user {} cannot assign role {} ({:?}, level {})",
                    actor.user_id, new_role.name, target_tier, new_role.level
                ),
            ));
        }

        if actor_tier == RoleTier::Standard {
            let held = self.resolver.context_capabilities(actor);
            let missing: Vec<String> = self
                .resolver
                .capabilities(new_role)
                .difference(&held)
                .map(ToString::to_string)
                .collect();
            if !missing.is_empty() {
                return Err(VisorError::forbidden(
                    ErrorCode::SelfEscalation,
                    format!(
                        "user {} cannot assign role {} carrying {}",
                        actor.user_id,
                        new_role.name,
                        missing.join(", ")
                    ),
                ));
            }
        }

        if user.id == actor.user_id && new_role.level > actor.role.level {
            return Err(VisorError::forbidden(
                ErrorCode::SelfEscalation,
                format!("user {} cannot raise their own role level", actor.user_id),
            ));
        }

        info!(
            actor_id = %actor.user_id,
            user_id = %user.id,
            from_role = %user.role_id,
            to_role = %new_role.id,
            "Role reassigned"
        );

        Ok(User {
            role_id: new_role.id.clone(),
            ..user.clone()
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RolesConfig;
    use crate::rbac::catalog::PermissionCatalog;
    use crate::rbac::models::RoleRef;

    fn assignment() -> RoleAssignment {
        let resolver =
            RoleResolver::new(&RolesConfig::default(), Arc::new(PermissionCatalog::erp_defaults()))
                .unwrap();
        RoleAssignment::new(Arc::new(resolver))
    }

    fn admin() -> AuthContext {
        AuthContext::new("boss", "org1", RoleRef::new("Admin", 5))
    }

    fn manager() -> AuthContext {
        AuthContext::new("mgr", "org1", RoleRef::new("Manager", 4))
            .with_capabilities([Permission::new("users", "update")])
    }

    #[test]
    fn test_admin_reassigns_within_org() {
        let user = User::new("u1", "org1", "staff");
        let role = Role::new("lead", "org1", "Lead", 3);

        let updated = assignment().reassign(&admin(), &user, &role).unwrap();
        assert_eq!(updated.role_id.as_str(), "lead");
        assert_eq!(updated.organization_id, user.organization_id);
    }

    #[test]
    fn test_cross_org_reassignment_denied() {
        let user = User::new("u1", "org2", "staff");
        let role = Role::new("lead", "org1", "Lead", 3);
        let err = assignment().reassign(&admin(), &user, &role).unwrap_err();
        assert_eq!(err.code(), ErrorCode::OrganizationMismatch);

        let user = User::new("u1", "org1", "staff");
        let foreign_role = Role::new("lead", "org2", "Lead", 3);
        let err = assignment().reassign(&admin(), &user, &foreign_role).unwrap_err();
        assert_eq!(err.code(), ErrorCode::OrganizationMismatch);
    }

    #[test]
    fn test_actor_without_capability_denied() {
        let actor = AuthContext::new("u9", "org1", RoleRef::new("Staff", 1));
        let user = User::new("u1", "org1", "staff");
        let role = Role::new("intern", "org1", "Intern", 0);

        let err = assignment().reassign(&actor, &user, &role).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CapabilityDenied);
        assert_eq!(err.user_message(), crate::error::NOT_PERMITTED);
    }

    #[test]
    fn test_standard_actor_cannot_grant_admin() {
        let user = User::new("u1", "org1", "staff");
        let role = Role::new("admin", "org1", "Admin", 1);

        let err = assignment().reassign(&manager(), &user, &role).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SelfEscalation);
    }

    #[test]
    fn test_standard_actor_cannot_grant_higher_level() {
        let user = User::new("u1", "org1", "staff");
        let role = Role::new("director", "org1", "Director", 6);

        let err = assignment().reassign(&manager(), &user, &role).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SelfEscalation);

        let peer = Role::new("coordinator", "org1", "Coordinator", 4);
        assert!(assignment().reassign(&manager(), &user, &peer).is_ok());
    }

    #[test]
    fn test_standard_actor_cannot_hand_out_unheld_capabilities() {
        let clerk = AuthContext::new("clerk", "org1", RoleRef::new("HR Clerk", 4))
            .with_capabilities([Permission::new("users", "update")]);
        let accountant = Role::new("accountant", "org1", "Accountant", 4).with_grants([
            Permission::new("payroll", "read"),
            Permission::new("invoices", "approve"),
            Permission::new("payments", "approve"),
        ]);

        let me = User::new("clerk", "org1", "hr_clerk");
        let err = assignment().reassign(&clerk, &me, &accountant).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SelfEscalation);
        assert_eq!(err.user_message(), crate::error::NOT_PERMITTED);

        let other = User::new("u1", "org1", "staff");
        let err = assignment().reassign(&clerk, &other, &accountant).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SelfEscalation);

        let clerk_role = Role::new("hr_clerk", "org1", "HR Clerk", 4)
            .with_grants([Permission::new("users", "update")]);
        assert!(assignment().reassign(&clerk, &other, &clerk_role).is_ok());
    }

    #[test]
    fn test_admin_may_hand_out_any_capabilities() {
        let user = User::new("u1", "org1", "staff");
        let accountant = Role::new("accountant", "org1", "Accountant", 4)
            .with_grants([Permission::new("payroll", "read")]);
        assert!(assignment().reassign(&admin(), &user, &accountant).is_ok());
    }

    #[test]
    fn test_self_escalation_denied() {
        let me = User::new("boss", "org1", "admin");
        let higher = Role::new("owner", "org1", "Admin", 8);

        let err = assignment().reassign(&admin(), &me, &higher).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SelfEscalation);
    }
}
