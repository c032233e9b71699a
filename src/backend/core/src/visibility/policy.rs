//! Per-request visibility decisions.

use std::sync::Arc;

use tracing::{debug, error};

use super::predicate::{Field, Predicate, Relation};
use super::record::VisibilityRecord;
use crate::error::{Result, VisorError};
use crate::rbac::models::AuthContext;
use crate::rbac::resolver::{RoleResolver, RoleTier};
use crate::scope::ScopedRequest;

/// Computes which records a context may see.
///
/// Nothing is cached: the predicate is rebuilt from the context on every
/// call, so ownership and membership changes apply on the next request.
#[derive(Debug, Clone)]
pub struct VisibilityPolicy {
    resolver: Arc<RoleResolver>,
}

impl VisibilityPolicy {
    pub fn new(resolver: Arc<RoleResolver>) -> Self {
        Self { resolver }
    }

    /// Visibility predicate for any visibility-relevant record type.
    ///
    /// Administrative: every live record of the organization. Standard: live
    /// records of the organization the user owns, co-owns, is a member of or
    /// has an assigned task on.
    pub fn visible(&self, ctx: &AuthContext) -> Result<Predicate> {
        ctx.ensure_complete()?;

        let base = [
            Predicate::eq(Field::OrganizationId, ctx.organization_id.as_str()),
            Predicate::is_null(Field::DeletedAt),
        ];

        let tier = self.resolver.classify(&ctx.role);
        let predicate = match tier {
            RoleTier::Administrative => Predicate::all(base),
            RoleTier::Standard => {
                let user = ctx.user_id.as_str();
                let related = Predicate::any([
                    Predicate::eq(Field::OwnerId, user),
                    Predicate::related(Relation::CoOwners, user),
                    Predicate::related(Relation::Members, user),
                    Predicate::related(Relation::TaskAssignees, user),
                ]);
                Predicate::all(base.into_iter().chain([related]))
            }
        };

        debug!(
            user_id = %ctx.user_id,
            organization_id = %ctx.organization_id,
            tier = ?tier,
            predicate = %predicate,
            "Computed visibility predicate"
        );
        Ok(predicate)
    }

    pub fn visible_projects(&self, ctx: &AuthContext) -> Result<Predicate> {
        self.visible(ctx)
    }

    /// Like [`visible`](Self::visible) but collapses failures to `False`.
    pub fn visible_or_nothing(&self, ctx: &AuthContext) -> Predicate {
        self.visible(ctx).unwrap_or(Predicate::False)
    }

    /// Whether `record` is visible to `ctx`.
    pub fn can_see<R: VisibilityRecord + ?Sized>(&self, ctx: &AuthContext, record: &R) -> bool {
        record.organization_id() == &ctx.organization_id && self.visible_or_nothing(ctx).evaluate(record)
    }

    /// Filter a candidate record set in memory.
    ///
    /// The request must have been scoped to the context's organization.
    /// Tenancy is checked a second time per record, independently of the
    /// predicate. On error nothing is returned.
    pub fn filter<R, I>(&self, ctx: &AuthContext, scoped: &ScopedRequest, records: I) -> Result<Vec<R>>
    where
        R: VisibilityRecord,
        I: IntoIterator<Item = R>,
    {
        if scoped.organization_id() != &ctx.organization_id {
            return Err(VisorError::organization_mismatch(
                &ctx.organization_id,
                scoped.organization_id(),
            ));
        }

        let predicate = scoped.predicate().and(self.visible(ctx)?);
        let mut visible = Vec::new();
        for record in records {
            if !predicate.evaluate(&record) {
                continue;
            }
            if record.organization_id() != &ctx.organization_id {
                error!(
                    user_id = %ctx.user_id,
                    organization_id = %ctx.organization_id,
                    record_org = %record.organization_id(),
                    "Predicate accepted a foreign record; dropped"
                );
                continue;
            }
            visible.push(record);
        }

        debug!(
            user_id = %ctx.user_id,
            resource = scoped.resource(),
            visible = visible.len(),
            "Filtered records"
        );
        Ok(visible)
    }
}
