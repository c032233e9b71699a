//! Financial field redaction.
//!
//! Runs last, on the assembled response, independently of the visibility
//! decision. Roles on the financial-access allowlist get payloads back
//! untouched; everyone else gets every financial field removed at every
//! depth.
//!
//! A field is financial when its [`FieldTag`] says so. Untagged fields fall
//! back to case-insensitive matching against the configured field-name set.
//! The name set is the weaker of the two: a task-count `total` is stripped
//! unless a schema tags it `General`.

use std::collections::HashSet;
use std::sync::Arc;

use metrics::counter;
use serde_json::Value;
use tracing::debug;

use super::node::{too_deep, Entry, FieldSchema, FieldTag, Node};
use crate::config::RedactionConfig;
use crate::error::{ErrorCode, Result, VisorError};
use crate::rbac::models::RoleLike;
use crate::rbac::resolver::RoleResolver;

#[derive(Debug, Clone)]
pub struct FieldRedactionFilter {
    resolver: Arc<RoleResolver>,
    financial_fields: HashSet<String>,
    max_depth: usize,
}

impl FieldRedactionFilter {
    pub fn new(config: &RedactionConfig, resolver: Arc<RoleResolver>) -> Result<Self> {
        let financial_fields: HashSet<String> = config
            .financial_fields
            .iter()
            .map(|name| name.trim().to_lowercase())
            .filter(|name| !name.is_empty())
            .collect();
        if financial_fields.is_empty() {
            return Err(VisorError::new(
                ErrorCode::MissingConfiguration,
                "redaction.financial_fields must not be empty",
            ));
        }
        if config.max_depth == 0 {
            return Err(VisorError::configuration("redaction.max_depth must be positive"));
        }

        Ok(Self {
            resolver,
            financial_fields,
            max_depth: config.max_depth,
        })
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Whether a mapping entry must be removed for non-financial roles.
    pub fn is_financial(&self, entry: &Entry) -> bool {
        match entry.tag {
            Some(FieldTag::Financial) => true,
            Some(FieldTag::General) => false,
            None => self.financial_fields.contains(&entry.key.to_lowercase()),
        }
    }

    /// Redact `node` for `role`.
    ///
    /// A missing role is treated as having no financial access. Trees nested
    /// deeper than `max_depth` fail with a traversal error before anything
    /// is removed, including subtrees under financial keys.
    pub fn redact<R: RoleLike + ?Sized>(&self, node: Node, role: Option<&R>) -> Result<Node> {
        if self.resolver.has_financial_access(role) {
            return Ok(node);
        }
        if node.depth() > self.max_depth {
            return Err(too_deep(self.max_depth));
        }

        let mut removed = 0u64;
        let redacted = self.visit(node, &mut removed);
        if removed > 0 {
            counter!("visor_fields_redacted_total").increment(removed);
            debug!(
                role = role.map(|r| r.role_name()).unwrap_or("<none>"),
                removed,
                "Redacted financial fields"
            );
        }
        Ok(redacted)
    }

    /// Redact a JSON payload using name matching only.
    pub fn redact_json<R: RoleLike + ?Sized>(&self, value: Value, role: Option<&R>) -> Result<Value> {
        self.redact_json_with_schema(value, &FieldSchema::default(), role)
    }

    /// Redact a JSON payload, deciding tagged fields by `schema`.
    pub fn redact_json_with_schema<R: RoleLike + ?Sized>(
        &self,
        value: Value,
        schema: &FieldSchema,
        role: Option<&R>,
    ) -> Result<Value> {
        if self.resolver.has_financial_access(role) {
            return Ok(value);
        }
        let node = schema.annotate(value, self.max_depth)?;
        self.redact(node, role).map(Value::from)
    }

    /// Depth is already bounded by `redact`.
    fn visit(&self, node: Node, removed: &mut u64) -> Node {
        match node {
            Node::Sequence(items) => Node::Sequence(
                items
                    .into_iter()
                    .map(|item| self.visit(item, removed))
                    .collect(),
            ),
            Node::Mapping(entries) => {
                let mut kept = Vec::with_capacity(entries.len());
                for entry in entries {
                    if self.is_financial(&entry) {
                        *removed += 1;
                        continue;
                    }
                    let value = self.visit(entry.value, removed);
                    kept.push(Entry { value, ..entry });
                }
                Node::Mapping(kept)
            }
            leaf => leaf,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RolesConfig;
    use crate::rbac::catalog::PermissionCatalog;
    use crate::rbac::models::RoleRef;
    use serde_json::json;

    fn filter() -> FieldRedactionFilter {
        filter_with(RedactionConfig::default())
    }

    fn filter_with(config: RedactionConfig) -> FieldRedactionFilter {
        let resolver =
            RoleResolver::new(&RolesConfig::default(), Arc::new(PermissionCatalog::erp_defaults()))
                .unwrap();
        FieldRedactionFilter::new(&config, Arc::new(resolver)).unwrap()
    }

    fn staff() -> RoleRef {
        RoleRef::new("Staff", 1)
    }

    #[test]
    fn test_staff_loses_financial_fields() {
        let out = filter()
            .redact_json(json!({"id": 1, "amount": 500, "note": "ok"}), Some(&staff()))
            .unwrap();
        assert_eq!(out, json!({"id": 1, "note": "ok"}));
    }

    #[test]
    fn test_cfo_sees_everything() {
        let payload = json!({"id": 1, "amount": 500, "note": "ok"});
        let out = filter()
            .redact_json(payload.clone(), Some(&RoleRef::new("CFO", 9)))
            .unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn test_admin_without_financial_access_is_redacted() {
        let out = filter()
            .redact_json(json!({"salary": 1, "name": "x"}), Some(&RoleRef::new("Admin", 99)))
            .unwrap();
        assert_eq!(out, json!({"name": "x"}));
    }

    #[test]
    fn test_missing_role_redacts() {
        let out = filter()
            .redact_json::<RoleRef>(json!({"Budget": 10, "name": "x"}), None)
            .unwrap();
        assert_eq!(out, json!({"name": "x"}));
    }

    #[test]
    fn test_nested_and_sequences() {
        let payload = json!({
            "project": {
                "name": "Tower",
                "Budget": 1000,
                "tasks": [
                    {"title": "a", "cost": 5},
                    {"title": "b", "lines": [{"PRICE": 1, "qty": 2}]}
                ]
            },
            "items": [1, null, "x"]
        });
        let out = filter().redact_json(payload, Some(&staff())).unwrap();
        assert_eq!(
            out,
            json!({
                "project": {
                    "name": "Tower",
                    "tasks": [
                        {"title": "a"},
                        {"title": "b", "lines": [{"qty": 2}]}
                    ]
                },
                "items": [1, null, "x"]
            })
        );
    }

    #[test]
    fn test_scalars_and_null_pass_through() {
        let f = filter();
        assert_eq!(f.redact_json(Value::Null, Some(&staff())).unwrap(), Value::Null);
        assert_eq!(f.redact_json(json!("amount"), Some(&staff())).unwrap(), json!("amount"));
        assert_eq!(f.redact_json(json!(42), Some(&staff())).unwrap(), json!(42));
    }

    #[test]
    fn test_names_match_exactly_not_by_substring() {
        let out = filter()
            .redact_json(json!({"total_tasks": 3, "discount": 1}), Some(&staff()))
            .unwrap();
        assert_eq!(out, json!({"total_tasks": 3, "discount": 1}));
    }

    #[test]
    fn test_schema_tags_override_names() {
        let schema = FieldSchema::new().general("total").financial("fee");
        let out = filter()
            .redact_json_with_schema(json!({"total": 3, "fee": 10, "cost": 1}), &schema, Some(&staff()))
            .unwrap();
        assert_eq!(out, json!({"total": 3}));
    }

    #[test]
    fn test_depth_limit_is_surfaced() {
        let f = filter_with(RedactionConfig {
            max_depth: 3,
            ..RedactionConfig::default()
        });
        assert!(f.redact_json(json!({"a": {"b": {"c": 1}}}), Some(&staff())).is_ok());

        let err = f
            .redact_json(json!({"a": {"b": {"c": {"d": 1}}}}), Some(&staff()))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TraversalFailed);
    }

    #[test]
    fn test_node_and_json_paths_agree_on_deep_financial_subtrees() {
        let f = filter_with(RedactionConfig {
            max_depth: 3,
            ..RedactionConfig::default()
        });
        let payload = json!({"a": {"amount": {"b": {"c": 1}}}});

        let err = f.redact_json(payload.clone(), Some(&staff())).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TraversalFailed);

        let node = Node::from_json(payload, 8).unwrap();
        let err = f.redact(node, Some(&staff())).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TraversalFailed);

        let shallow = Node::from_json(json!({"a": {"amount": 1, "b": 2}}), 8).unwrap();
        let out = f.redact(shallow, Some(&staff())).unwrap();
        assert_eq!(Value::from(out), json!({"a": {"b": 2}}));
    }

    #[test]
    fn test_empty_field_set_rejected() {
        let resolver =
            RoleResolver::new(&RolesConfig::default(), Arc::new(PermissionCatalog::erp_defaults()))
                .unwrap();
        let config = RedactionConfig {
            financial_fields: vec![" ".to_string()],
            ..RedactionConfig::default()
        };
        let err = FieldRedactionFilter::new(&config, Arc::new(resolver)).unwrap_err();
        assert!(err.is_configuration());
    }
}
