//! Organization scoping.
//!
//! Every data operation passes through [`OrganizationScopeGuard::bind`]
//! before anything else looks at it. The guard takes the organization from
//! the authenticated context, never from request input, and produces a
//! [`ScopedRequest`] whose organization filter cannot be changed afterwards.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, VisorError};
use crate::rbac::models::{AuthContext, OrganizationId};
use crate::visibility::predicate::{Field, Predicate};
use crate::visibility::record::VisibilityRecord;

/// An unscoped data-access request as it arrives from a handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRequest {
    /// Resource type being read, e.g. `projects`.
    pub resource: String,
    /// Organization named by client input, if any. It may only repeat the
    /// context's organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<OrganizationId>,
    /// Extra caller filter, ANDed with the organization filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Predicate>,
}

impl DataRequest {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            organization_id: None,
            filter: None,
        }
    }

    pub fn for_organization(mut self, organization_id: impl Into<OrganizationId>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn with_filter(mut self, filter: Predicate) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// A request bound to exactly one organization.
///
/// Only the guard constructs these; fields are read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedRequest {
    resource: String,
    organization_id: OrganizationId,
    filter: Option<Predicate>,
}

impl ScopedRequest {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn organization_id(&self) -> &OrganizationId {
        &self.organization_id
    }

    pub fn filter(&self) -> Option<&Predicate> {
        self.filter.as_ref()
    }

    /// The mandatory organization filter ANDed with the caller's filter.
    pub fn predicate(&self) -> Predicate {
        let tenancy = Predicate::eq(Field::OrganizationId, self.organization_id.as_str());
        match &self.filter {
            Some(filter) => tenancy.and(filter.clone()),
            None => tenancy,
        }
    }
}

/// The tenancy choke point.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrganizationScopeGuard;

impl OrganizationScopeGuard {
    pub fn new() -> Self {
        Self
    }

    /// Bind `request` to the context's organization.
    ///
    /// Fails with an authorization error when the request names a different
    /// organization, either directly or inside its filter.
    pub fn bind(&self, ctx: &AuthContext, request: DataRequest) -> Result<ScopedRequest> {
        ctx.ensure_complete()?;

        if let Some(requested) = request.organization_id.as_ref().filter(|id| !id.is_blank()) {
            if requested != &ctx.organization_id {
                warn!(
                    user_id = %ctx.user_id,
                    context_org = %ctx.organization_id,
                    requested_org = %requested,
                    resource = %request.resource,
                    "Rejected request for foreign organization"
                );
                return Err(VisorError::organization_mismatch(&ctx.organization_id, requested));
            }
        }

        if let Some(filter) = &request.filter {
            if let Some(foreign) = filter
                .organization_ids()
                .into_iter()
                .find(|id| *id != ctx.organization_id.as_str())
            {
                warn!(
                    user_id = %ctx.user_id,
                    context_org = %ctx.organization_id,
                    requested_org = foreign,
                    resource = %request.resource,
                    "Rejected filter naming foreign organization"
                );
                return Err(VisorError::organization_mismatch(&ctx.organization_id, foreign));
            }
        }

        Ok(ScopedRequest {
            resource: request.resource,
            organization_id: ctx.organization_id.clone(),
            filter: request.filter,
        })
    }

    /// Fail if `record` belongs to a different organization than `ctx`.
    pub fn check_record<R: VisibilityRecord + ?Sized>(&self, ctx: &AuthContext, record: &R) -> Result<()> {
        ctx.ensure_complete()?;
        if record.organization_id() != &ctx.organization_id {
            return Err(VisorError::organization_mismatch(
                &ctx.organization_id,
                record.organization_id(),
            ));
        }
        Ok(())
    }

    /// Keep only records of the context's organization.
    ///
    /// Foreign records are dropped and logged. An incomplete context yields an
    /// error and no records.
    pub fn retain<R, I>(&self, ctx: &AuthContext, records: I) -> Result<Vec<R>>
    where
        R: VisibilityRecord,
        I: IntoIterator<Item = R>,
    {
        ctx.ensure_complete()?;
        let mut dropped = 0usize;
        let kept: Vec<R> = records
            .into_iter()
            .filter(|record| {
                let same = record.organization_id() == &ctx.organization_id;
                if !same {
                    dropped += 1;
                }
                same
            })
            .collect();

        if dropped > 0 {
            warn!(
                user_id = %ctx.user_id,
                organization_id = %ctx.organization_id,
                dropped,
                "Dropped records from foreign organizations"
            );
        }
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, NOT_PERMITTED};
    use crate::rbac::models::RoleRef;
    use crate::visibility::record::Project;

    fn ctx() -> AuthContext {
        AuthContext::new("u1", "org1", RoleRef::new("Staff", 1))
    }

    #[test]
    fn test_bind_uses_context_org() {
        let scoped = OrganizationScopeGuard::new()
            .bind(&ctx(), DataRequest::new("projects"))
            .unwrap();
        assert_eq!(scoped.organization_id().as_str(), "org1");
        assert_eq!(scoped.resource(), "projects");
        assert_eq!(scoped.predicate(), Predicate::eq(Field::OrganizationId, "org1"));
    }

    #[test]
    fn test_bind_accepts_matching_org() {
        let request = DataRequest::new("projects").for_organization("org1");
        assert!(OrganizationScopeGuard::new().bind(&ctx(), request).is_ok());
    }

    #[test]
    fn test_bind_rejects_conflicting_org() {
        let request = DataRequest::new("projects").for_organization("org2");
        let err = OrganizationScopeGuard::new().bind(&ctx(), request).unwrap_err();
        assert_eq!(err.code(), ErrorCode::OrganizationMismatch);
        assert_eq!(err.user_message(), NOT_PERMITTED);
        assert!(!err.user_message().contains("org2"));
    }

    #[test]
    fn test_bind_rejects_org_smuggled_in_filter() {
        let filter = Predicate::any([
            Predicate::eq(Field::OwnerId, "u1"),
            Predicate::eq(Field::OrganizationId, "org2"),
        ]);
        let request = DataRequest::new("projects").with_filter(filter);
        let err = OrganizationScopeGuard::new().bind(&ctx(), request).unwrap_err();
        assert_eq!(err.code(), ErrorCode::OrganizationMismatch);
    }

    #[test]
    fn test_filter_is_anded_with_tenancy() {
        let request = DataRequest::new("projects").with_filter(Predicate::eq(Field::OwnerId, "u1"));
        let scoped = OrganizationScopeGuard::new().bind(&ctx(), request).unwrap();
        let predicate = scoped.predicate();

        assert!(predicate.evaluate(&Project::new("p1", "org1").owned_by("u1")));
        assert!(!predicate.evaluate(&Project::new("p1", "org2").owned_by("u1")));
    }

    #[test]
    fn test_bind_requires_complete_context() {
        let anonymous = AuthContext::new("u1", "", RoleRef::new("Staff", 1));
        let err = OrganizationScopeGuard::new()
            .bind(&anonymous, DataRequest::new("projects"))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingContext);
    }

    #[test]
    fn test_retain_drops_foreign_records() {
        let records = vec![
            Project::new("p1", "org1"),
            Project::new("p2", "org2"),
            Project::new("p3", "org1"),
        ];
        let kept = OrganizationScopeGuard::new().retain(&ctx(), records).unwrap();
        let ids: Vec<_> = kept.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p3"]);
    }

    #[test]
    fn test_check_record() {
        let guard = OrganizationScopeGuard::new();
        assert!(guard.check_record(&ctx(), &Project::new("p1", "org1")).is_ok());
        assert!(guard.check_record(&ctx(), &Project::new("p1", "org2")).unwrap_err().is_authorization());
    }
}
