//! The assembled authorization engine.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::config::EngineConfig;
use crate::error::{Result, VisorError};
use crate::rbac::assignment::RoleAssignment;
use crate::rbac::catalog::PermissionCatalog;
use crate::rbac::models::AuthContext;
use crate::rbac::resolver::RoleResolver;
use crate::redaction::{FieldRedactionFilter, FieldSchema};
use crate::scope::{DataRequest, OrganizationScopeGuard};
use crate::visibility::{VisibilityPolicy, VisibilityRecord};

/// Every component wired from one configuration.
///
/// Holds no per-request state; share it behind an `Arc` and call it from any
/// number of tasks.
#[derive(Debug, Clone)]
pub struct Engine {
    /// Validated configuration
    config: EngineConfig,

    /// Grantable capabilities
    catalog: Arc<PermissionCatalog>,

    /// Role classification and capability checks
    resolver: Arc<RoleResolver>,

    /// Tenancy choke point
    guard: OrganizationScopeGuard,

    /// Record visibility
    visibility: VisibilityPolicy,

    /// Output shaping
    redaction: FieldRedactionFilter,

    /// Role reassignment
    assignment: RoleAssignment,
}

impl Engine {
    /// Build every component; fails on an unusable configuration.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let catalog = Arc::new(config.permission_catalog()?);
        let resolver = Arc::new(RoleResolver::new(&config.roles, Arc::clone(&catalog))?);
        let redaction = FieldRedactionFilter::new(&config.redaction, Arc::clone(&resolver))?;

        info!(
            catalog_size = catalog.len(),
            administrative_names = config.roles.administrative_names.len(),
            financial_fields = config.redaction.financial_fields.len(),
            "Authorization engine initialized"
        );

        Ok(Self {
            visibility: VisibilityPolicy::new(Arc::clone(&resolver)),
            assignment: RoleAssignment::new(Arc::clone(&resolver)),
            guard: OrganizationScopeGuard::new(),
            config,
            catalog,
            resolver,
            redaction,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &PermissionCatalog {
        &self.catalog
    }

    pub fn resolver(&self) -> &RoleResolver {
        &self.resolver
    }

    pub fn guard(&self) -> &OrganizationScopeGuard {
        &self.guard
    }

    pub fn visibility(&self) -> &VisibilityPolicy {
        &self.visibility
    }

    pub fn redaction(&self) -> &FieldRedactionFilter {
        &self.redaction
    }

    pub fn assignment(&self) -> &RoleAssignment {
        &self.assignment
    }

    /// Scope `request` to the context's organization, then keep the visible
    /// records.
    pub fn visible_records<R, I>(&self, ctx: &AuthContext, request: DataRequest, records: I) -> Result<Vec<R>>
    where
        R: VisibilityRecord,
        I: IntoIterator<Item = R>,
    {
        self.guard
            .bind(ctx, request)
            .and_then(|scoped| self.visibility.filter(ctx, &scoped, records))
            .inspect_err(VisorError::log)
    }

    /// Shape an outgoing JSON payload for the context's role.
    pub fn redact_response(&self, ctx: &AuthContext, payload: Value, schema: &FieldSchema) -> Result<Value> {
        let role = ctx.ensure_complete().ok().map(|_| &ctx.role);
        self.redaction
            .redact_json_with_schema(payload, schema, role)
            .inspect_err(VisorError::log)
    }
}
