//! Storage-independent visibility predicates.
//!
//! A [`Predicate`] is a small boolean expression tree over named record
//! fields and membership relations. The same tree is evaluated in memory
//! against a [`VisibilityRecord`] and rendered to a parameterized SQL
//! `WHERE` fragment, so both paths accept exactly the same records.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::record::VisibilityRecord;

// ═══════════════════════════════════════════════════════════════════════════════
// Fields & Relations
// ═══════════════════════════════════════════════════════════════════════════════

/// Scalar fields a visibility predicate can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    OrganizationId,
    DeletedAt,
    OwnerId,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrganizationId => write!(f, "organization_id"),
            Self::DeletedAt => write!(f, "deleted_at"),
            Self::OwnerId => write!(f, "owner_id"),
        }
    }
}

/// Many-valued user relations of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    CoOwners,
    Members,
    /// Assignees of the record's dependent tasks.
    TaskAssignees,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CoOwners => write!(f, "co_owners"),
            Self::Members => write!(f, "members"),
            Self::TaskAssignees => write!(f, "task_assignees"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Predicate
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    True,
    False,
    /// `field == value`. A missing field never equals anything.
    Eq { field: Field, value: String },
    /// `field IS NULL`.
    IsNull(Field),
    /// `value IN relation`.
    Related { relation: Relation, value: String },
    /// Conjunction; empty is `True`.
    And(Vec<Predicate>),
    /// Disjunction; empty is `False`.
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(field: Field, value: impl Into<String>) -> Self {
        Self::Eq {
            field,
            value: value.into(),
        }
    }

    pub fn is_null(field: Field) -> Self {
        Self::IsNull(field)
    }

    pub fn related(relation: Relation, value: impl Into<String>) -> Self {
        Self::Related {
            relation,
            value: value.into(),
        }
    }

    /// Conjunction of `parts`, flattening nested conjunctions.
    pub fn all(parts: impl IntoIterator<Item = Predicate>) -> Self {
        let mut flat = Vec::new();
        for part in parts {
            match part {
                Self::And(inner) => flat.extend(inner),
                Self::True => {}
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Self::True,
            1 => flat.remove(0),
            _ => Self::And(flat),
        }
    }

    /// Disjunction of `parts`, flattening nested disjunctions.
    pub fn any(parts: impl IntoIterator<Item = Predicate>) -> Self {
        let mut flat = Vec::new();
        for part in parts {
            match part {
                Self::Or(inner) => flat.extend(inner),
                Self::False => {}
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Self::False,
            1 => flat.remove(0),
            _ => Self::Or(flat),
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        Self::all([self, other])
    }

    /// Evaluate against a record in memory.
    pub fn evaluate<R: VisibilityRecord + ?Sized>(&self, record: &R) -> bool {
        match self {
            Self::True => true,
            Self::False => false,
            Self::Eq { field, value } => record
                .field_value(*field)
                .is_some_and(|actual| actual == value.as_str()),
            Self::IsNull(field) => record.field_value(*field).is_none(),
            Self::Related { relation, value } => record.in_relation(*relation, value),
            Self::And(parts) => parts.iter().all(|p| p.evaluate(record)),
            Self::Or(parts) => parts.iter().any(|p| p.evaluate(record)),
        }
    }

    /// Every organization id this predicate compares against.
    pub fn organization_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Self::Eq {
                    field: Field::OrganizationId,
                    value,
                } => ids.push(value.as_str()),
                Self::And(parts) | Self::Or(parts) => stack.extend(parts.iter()),
                _ => {}
            }
        }
        ids
    }

    // ─────────────────────────────────────────────────────────────────────────
    // SQL Rendering
    // ─────────────────────────────────────────────────────────────────────────

    /// Render as a parameterized `WHERE` fragment with placeholders from `$1`.
    pub fn to_sql(&self, mapping: &SqlMapping) -> SqlFragment {
        self.to_sql_with_offset(mapping, 0)
    }

    /// Render with placeholders starting after `params_offset` existing binds.
    pub fn to_sql_with_offset(&self, mapping: &SqlMapping, params_offset: usize) -> SqlFragment {
        let mut binds = Vec::new();
        let sql = self.render(mapping, params_offset, &mut binds);
        SqlFragment { sql, binds }
    }

    fn render(&self, mapping: &SqlMapping, offset: usize, binds: &mut Vec<String>) -> String {
        match self {
            Self::True => "TRUE".to_string(),
            Self::False => "FALSE".to_string(),
            Self::Eq { field, value } => {
                let column = mapping.column(*field);
                format!("{} = {}", column, placeholder(value, offset, binds))
            }
            Self::IsNull(field) => format!("{} IS NULL", mapping.column(*field)),
            Self::Related { relation, value } => {
                let rel = mapping.relation(*relation);
                format!(
                    "EXISTS (SELECT 1 FROM {rt} WHERE {rt}.{parent} = {table}.{key} AND {rt}.{member} = {p})",
                    rt = rel.table,
                    parent = rel.parent_column,
                    table = mapping.table,
                    key = mapping.key_column,
                    member = rel.member_column,
                    p = placeholder(value, offset, binds),
                )
            }
            Self::And(parts) => Self::render_joined(parts, " AND ", "TRUE", mapping, offset, binds),
            Self::Or(parts) => Self::render_joined(parts, " OR ", "FALSE", mapping, offset, binds),
        }
    }

    fn render_joined(
        parts: &[Predicate],
        separator: &str,
        empty: &str,
        mapping: &SqlMapping,
        offset: usize,
        binds: &mut Vec<String>,
    ) -> String {
        if parts.is_empty() {
            return empty.to_string();
        }
        let rendered: Vec<String> = parts
            .iter()
            .map(|part| {
                let sql = part.render(mapping, offset, binds);
                if matches!(part, Self::And(_) | Self::Or(_)) {
                    format!("({sql})")
                } else {
                    sql
                }
            })
            .collect();
        rendered.join(separator)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
            Self::Eq { field, value } => write!(f, "{field} == {value:?}"),
            Self::IsNull(field) => write!(f, "{field} is null"),
            Self::Related { relation, value } => write!(f, "{value:?} in {relation}"),
            Self::And(parts) | Self::Or(parts) => {
                let separator = if matches!(self, Self::And(_)) { " and " } else { " or " };
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(separator)?;
                    }
                    if matches!(part, Self::And(_) | Self::Or(_)) {
                        write!(f, "({part})")?;
                    } else {
                        write!(f, "{part}")?;
                    }
                }
                Ok(())
            }
        }
    }
}

fn placeholder(value: &str, offset: usize, binds: &mut Vec<String>) -> String {
    binds.push(value.to_string());
    format!("${}", offset + binds.len())
}

// ═══════════════════════════════════════════════════════════════════════════════
// SQL Mapping
// ═══════════════════════════════════════════════════════════════════════════════

/// A rendered `WHERE` fragment and its positional bind values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlFragment {
    pub sql: String,
    pub binds: Vec<String>,
}

/// Join table backing one [`Relation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationMapping {
    pub table: String,
    /// Column referencing the parent record's key.
    pub parent_column: String,
    /// Column holding the related user id.
    pub member_column: String,
}

impl RelationMapping {
    pub fn new(
        table: impl Into<String>,
        parent_column: impl Into<String>,
        member_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            parent_column: parent_column.into(),
            member_column: member_column.into(),
        }
    }
}

/// How predicate fields and relations map onto tables and columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlMapping {
    pub table: String,
    pub key_column: String,
    pub organization_column: String,
    pub deleted_at_column: String,
    pub owner_column: String,
    pub co_owners: RelationMapping,
    pub members: RelationMapping,
    pub task_assignees: RelationMapping,
}

impl SqlMapping {
    /// Default layout of the `projects` table and its relations.
    pub fn projects() -> Self {
        Self {
            table: "projects".to_string(),
            key_column: "id".to_string(),
            organization_column: "organization_id".to_string(),
            deleted_at_column: "deleted_at".to_string(),
            owner_column: "owner_id".to_string(),
            co_owners: RelationMapping::new("project_co_owners", "project_id", "user_id"),
            members: RelationMapping::new("project_members", "project_id", "user_id"),
            task_assignees: RelationMapping::new("tasks", "project_id", "assignee_id"),
        }
    }

    fn column(&self, field: Field) -> String {
        let column = match field {
            Field::OrganizationId => &self.organization_column,
            Field::DeletedAt => &self.deleted_at_column,
            Field::OwnerId => &self.owner_column,
        };
        format!("{}.{}", self.table, column)
    }

    fn relation(&self, relation: Relation) -> &RelationMapping {
        match relation {
            Relation::CoOwners => &self.co_owners,
            Relation::Members => &self.members,
            Relation::TaskAssignees => &self.task_assignees,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
