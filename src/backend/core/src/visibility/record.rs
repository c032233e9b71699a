//! Visibility-relevant record shapes.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::predicate::{Field, Relation};
use crate::rbac::models::{OrganizationId, UserId};

/// A record whose visibility is decided by tenancy, soft deletion, ownership
/// and membership.
///
/// Implement this for any entity that exposes owner/co-owner/member/assignee
/// relations and the same predicates apply to it.
pub trait VisibilityRecord {
    fn organization_id(&self) -> &OrganizationId;

    fn deleted_at(&self) -> Option<&DateTime<Utc>>;

    fn owner_id(&self) -> Option<&UserId>;

    /// Whether `user` appears in `relation`.
    fn in_relation(&self, relation: Relation, user: &str) -> bool;

    fn is_deleted(&self) -> bool {
        self.deleted_at().is_some()
    }

    /// Value of a scalar field as a predicate sees it; `None` is SQL `NULL`.
    fn field_value(&self, field: Field) -> Option<Cow<'_, str>> {
        match field {
            Field::OrganizationId => Some(Cow::Borrowed(self.organization_id().as_str())),
            Field::DeletedAt => self.deleted_at().map(|at| Cow::Owned(at.to_rfc3339())),
            Field::OwnerId => self.owner_id().map(|id| Cow::Borrowed(id.as_str())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<UserId>,
}

impl Task {
    pub fn assigned_to(user: impl Into<UserId>) -> Self {
        Self {
            assignee_id: Some(user.into()),
        }
    }

    pub fn unassigned() -> Self {
        Self { assignee_id: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub organization_id: OrganizationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<UserId>,
    #[serde(default)]
    pub co_owner_ids: Vec<UserId>,
    #[serde(default)]
    pub member_ids: Vec<UserId>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Project {
    pub fn new(id: impl Into<String>, organization_id: impl Into<OrganizationId>) -> Self {
        Self {
            id: id.into(),
            organization_id: organization_id.into(),
            deleted_at: None,
            owner_id: None,
            co_owner_ids: Vec::new(),
            member_ids: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn owned_by(mut self, user: impl Into<UserId>) -> Self {
        self.owner_id = Some(user.into());
        self
    }

    pub fn with_co_owner(mut self, user: impl Into<UserId>) -> Self {
        self.co_owner_ids.push(user.into());
        self
    }

    pub fn with_member(mut self, user: impl Into<UserId>) -> Self {
        self.member_ids.push(user.into());
        self
    }

    pub fn with_task_assignee(mut self, user: impl Into<UserId>) -> Self {
        self.tasks.push(Task::assigned_to(user));
        self
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn deleted(mut self, at: DateTime<Utc>) -> Self {
        self.deleted_at = Some(at);
        self
    }

    pub fn deleted_now(self) -> Self {
        self.deleted(Utc::now())
    }
}

impl VisibilityRecord for Project {
    fn organization_id(&self) -> &OrganizationId {
        &self.organization_id
    }

    fn deleted_at(&self) -> Option<&DateTime<Utc>> {
        self.deleted_at.as_ref()
    }

    fn owner_id(&self) -> Option<&UserId> {
        self.owner_id.as_ref()
    }

    fn in_relation(&self, relation: Relation, user: &str) -> bool {
        match relation {
            Relation::CoOwners => self.co_owner_ids.iter().any(|id| id.as_str() == user),
            Relation::Members => self.member_ids.iter().any(|id| id.as_str() == user),
            Relation::TaskAssignees => self
                .tasks
                .iter()
                .filter_map(|t| t.assignee_id.as_ref())
                .any(|id| id.as_str() == user),
        }
    }
}
