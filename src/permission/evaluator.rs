use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use super::error::GrammarError;
use super::parser::{self, ActionPattern, ParsedPermission};
use crate::types::Action;

/// One conjunction of row filter clauses taken from a single permission:
/// every field must match one of its values. Values compare as strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterGroup(pub BTreeMap<String, BTreeSet<String>>);

impl FilterGroup {
    pub fn matches(&self, row: &Map<String, Value>) -> bool {
        self.0.iter().all(|(field, values)| {
            row.get(field)
                .and_then(value_text)
                .map_or(false, |text| values.contains(&text))
        })
    }
}

/// Row-level restriction attached to an allowed action.
///
/// `include: None` means unconditional; `Some(groups)` is the OR of the
/// groups. `exclude` groups are subtracted (AND NOT) regardless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowConstraint {
    pub include: Option<Vec<FilterGroup>>,
    pub exclude: Vec<FilterGroup>,
}

impl RowConstraint {
    pub fn unconstrained() -> Self {
        Self { include: None, exclude: Vec::new() }
    }

    pub fn is_unconstrained(&self) -> bool {
        self.include.is_none() && self.exclude.is_empty()
    }

    /// In-process check, used on the fetch-then-check path for single-row
    /// lookups.
    pub fn matches(&self, row: &Map<String, Value>) -> bool {
        let included = match &self.include {
            None => true,
            Some(groups) => groups.iter().any(|g| g.matches(row)),
        };
        included && !self.exclude.iter().any(|g| g.matches(row))
    }
}

/// Outcome of an access decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Denied,
    Allowed(RowConstraint),
}

impl Access {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Access::Allowed(_))
    }

    pub fn constraint(&self) -> Option<&RowConstraint> {
        match self {
            Access::Denied => None,
            Access::Allowed(c) => Some(c),
        }
    }
}

/// A principal's parsed permissions, partitioned into grants and denials.
/// Built once per session, never mutated; every decision is a pure
/// function of the set and the target.
#[derive(Debug, Clone)]
pub struct PermissionSet {
    scope: String,
    grants: Vec<ParsedPermission>,
    denials: Vec<ParsedPermission>,
}

impl PermissionSet {
    /// Parse a batch of permission strings, failing fast on the first
    /// malformed one. Strings carrying a different scope belong to another
    /// application and are skipped.
    pub fn parse<I, S>(scope: &str, strings: I) -> Result<Self, GrammarError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut grants = Vec::new();
        let mut denials = Vec::new();
        for s in strings {
            let parsed = parser::parse(s.as_ref())?;
            if parsed.scope != scope {
                tracing::debug!(permission = s.as_ref(), scope, "skipping out-of-scope permission");
                continue;
            }
            if parsed.negated {
                denials.push(parsed);
            } else {
                grants.push(parsed);
            }
        }
        Ok(Self { scope: scope.to_string(), grants, denials })
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty() && self.denials.is_empty()
    }

    /// Decide an action on a resource, independent of any field or row.
    ///
    /// Only permissions without a field segment participate: a field-scoped
    /// grant or denial affects that field, never the action as a whole.
    pub fn action_access(&self, resource: &str, action: Action) -> Access {
        let grants: Vec<&ParsedPermission> = self
            .grants
            .iter()
            .filter(|p| {
                p.field.is_any() && p.resource.matches(resource) && p.action.matches(action)
            })
            .collect();
        let denials: Vec<&ParsedPermission> = self
            .denials
            .iter()
            .filter(|p| {
                p.field.is_any() && p.resource.matches(resource) && p.action.matches(action)
            })
            .collect();
        compose(&grants, &denials, false)
    }

    /// Decide an action on one field of a resource. A permission without a
    /// field segment matches every field.
    pub fn field_access(&self, resource: &str, field: &str, action: Action) -> Access {
        let grants: Vec<&ParsedPermission> = self
            .grants
            .iter()
            .filter(|p| {
                p.resource.matches(resource) && p.field.matches(field) && p.action.matches(action)
            })
            .collect();
        let denials: Vec<&ParsedPermission> = self
            .denials
            .iter()
            .filter(|p| {
                p.resource.matches(resource) && p.field.matches(field) && p.action.matches(action)
            })
            .collect();
        compose(&grants, &denials, true)
    }

    /// Convenience: whether a field is readable on a specific row.
    pub fn field_visible(&self, resource: &str, field: &str, row: &Map<String, Value>) -> bool {
        match self.field_access(resource, field, Action::View) {
            Access::Denied => false,
            Access::Allowed(constraint) => constraint.matches(row),
        }
    }
}

/// Segment exactness, ordered resource > field > action. A named segment
/// is narrower than `*`; comparing these tuples lexicographically ranks
/// how tightly a permission is scoped to the target.
fn specificity(p: &ParsedPermission, with_field: bool) -> (u8, u8, u8) {
    (
        u8::from(!p.resource.is_any()),
        u8::from(with_field && !p.field.is_any()),
        u8::from(matches!(p.action, ActionPattern::Is(_))),
    )
}

/// Composition rules, in order:
/// - zero matching grants is a deny (default closed);
/// - only the most narrowly scoped grants count: a grant naming the
///   resource (or field/action) replaces broader ones, filters included;
/// - a denial wins over grants at equal-or-broader scope, so it is
///   discarded only when some effective grant is scoped more narrowly;
/// - surviving filtered grants union via OR, surviving filtered denials
///   subtract via AND NOT, and a surviving unconditional denial denies
///   outright.
fn compose(grants: &[&ParsedPermission], denials: &[&ParsedPermission], with_field: bool) -> Access {
    let Some(max_grant) = grants.iter().map(|g| specificity(g, with_field)).max() else {
        return Access::Denied;
    };
    let effective: Vec<&&ParsedPermission> =
        grants.iter().filter(|g| specificity(g, with_field) == max_grant).collect();
    let relevant: Vec<&&ParsedPermission> =
        denials.iter().filter(|d| specificity(d, with_field) >= max_grant).collect();

    if relevant.iter().any(|d| d.is_unconditional()) {
        return Access::Denied;
    }

    let unconditional_grant = effective.iter().any(|g| g.is_unconditional());
    let include = if unconditional_grant {
        None
    } else {
        Some(effective.iter().map(|g| FilterGroup(g.filters.clone())).collect())
    };
    let exclude = relevant.iter().map(|d| FilterGroup(d.filters.clone())).collect();

    Access::Allowed(RowConstraint { include, exclude })
}

/// Filter values are compared as strings on both evaluation paths, so row
/// scalars are rendered to text the same way the SQL side casts columns.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set(strings: &[&str]) -> PermissionSet {
        PermissionSet::parse("admin", strings.iter().copied()).unwrap()
    }

    fn row(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn default_closed() {
        let perms = set(&[]);
        assert_eq!(perms.action_access("posts", Action::View), Access::Denied);
    }

    #[test]
    fn broad_grant_allows_everything() {
        let perms = set(&["admin.*"]);
        for action in Action::all() {
            assert!(perms.action_access("posts", action).is_allowed());
            assert!(perms.field_access("posts", "title", action).is_allowed());
        }
    }

    #[test]
    fn negation_wins_regardless_of_order() {
        for strings in [
            &["admin.*", "~admin.posts.*"][..],
            &["~admin.posts.*", "admin.*"][..],
        ] {
            let perms = PermissionSet::parse("admin", strings.iter().copied()).unwrap();
            for action in Action::all() {
                assert_eq!(perms.action_access("posts", action), Access::Denied);
            }
            // other resources stay granted
            assert!(perms.action_access("comments", Action::View).is_allowed());
        }
    }

    #[test]
    fn filtered_grants_union() {
        let perms = set(&["admin.posts.view|id=1|id=2", "admin.posts.view|id=7"]);
        match perms.action_access("posts", Action::View) {
            Access::Allowed(constraint) => {
                let include = constraint.include.as_ref().unwrap();
                assert_eq!(include.len(), 2);
                assert!(constraint.matches(&row(&[("id", json!(1))])));
                assert!(constraint.matches(&row(&[("id", json!(7))])));
                assert!(!constraint.matches(&row(&[("id", json!(3))])));
            }
            Access::Denied => panic!("expected filtered allow"),
        }
    }

    #[test]
    fn specific_filtered_grant_overrides_broad_grant() {
        // the resource-exact grant replaces the wildcard one, filters and all
        let perms = set(&["admin.*", "admin.posts.*|id=1|id=2"]);
        match perms.action_access("posts", Action::View) {
            Access::Allowed(constraint) => {
                assert!(constraint.matches(&row(&[("id", json!(1))])));
                assert!(!constraint.matches(&row(&[("id", json!(3))])));
            }
            Access::Denied => panic!("expected filtered allow"),
        }
        // unrelated resources still ride the broad grant
        assert!(perms.action_access("comments", Action::View).is_allowed());
    }

    #[test]
    fn more_specific_grant_defeats_broader_denial() {
        let perms = set(&["admin.*", "~admin.posts.msg.*", "admin.posts.msg.view|id=1"]);
        // the action-exact grant outranks the action-wildcard denial
        assert!(perms.field_access("posts", "msg", Action::View).is_allowed());
        // for other actions only the denial remains in range
        assert_eq!(perms.field_access("posts", "msg", Action::Edit), Access::Denied);
    }

    #[test]
    fn unconditional_grant_with_filtered_denial_subtracts() {
        let perms = set(&["admin.posts.*", "~admin.posts.delete|locked=true"]);
        match perms.action_access("posts", Action::Delete) {
            Access::Allowed(constraint) => {
                assert!(constraint.include.is_none());
                assert!(constraint.matches(&row(&[("locked", json!(false))])));
                assert!(!constraint.matches(&row(&[("locked", json!(true))])));
            }
            Access::Denied => panic!("filtered denial must not deny outright"),
        }
    }

    #[test]
    fn field_denial_does_not_deny_action() {
        let perms = set(&["admin.posts.*", "~admin.posts.secret.*"]);
        assert!(perms.action_access("posts", Action::View).is_allowed());
        assert_eq!(perms.field_access("posts", "secret", Action::View), Access::Denied);
        assert!(perms.field_access("posts", "title", Action::View).is_allowed());
    }

    #[test]
    fn row_scoped_field_visibility() {
        let perms = set(&["admin.posts.*", "~admin.posts.msg.*", "admin.posts.msg.view|id=1"]);
        assert!(perms.field_visible("posts", "msg", &row(&[("id", json!(1))])));
        assert!(!perms.field_visible("posts", "msg", &row(&[("id", json!(3))])));
    }

    #[test]
    fn clauses_on_different_fields_conjoin() {
        let perms = set(&[r#"admin.posts.view|status=draft|author=alice"#]);
        let constraint = match perms.action_access("posts", Action::View) {
            Access::Allowed(c) => c,
            Access::Denied => panic!("expected allow"),
        };
        assert!(constraint.matches(&row(&[
            ("status", json!("draft")),
            ("author", json!("alice")),
        ])));
        assert!(!constraint.matches(&row(&[
            ("status", json!("draft")),
            ("author", json!("bob")),
        ])));
    }

    #[test]
    fn numbers_compare_as_strings() {
        let perms = set(&["admin.posts.view|id=1"]);
        let constraint = match perms.action_access("posts", Action::View) {
            Access::Allowed(c) => c,
            Access::Denied => panic!("expected allow"),
        };
        assert!(constraint.matches(&row(&[("id", json!(1))])));
        assert!(constraint.matches(&row(&[("id", json!("1"))])));
    }

    #[test]
    fn evaluation_is_deterministic() {
        let perms = set(&["admin.*", "admin.posts.view|id=1", "~admin.posts.edit|id=2"]);
        let first = perms.action_access("posts", Action::Edit);
        let second = perms.action_access("posts", Action::Edit);
        assert_eq!(first, second);
    }

    #[test]
    fn out_of_scope_permissions_are_skipped() {
        let perms = PermissionSet::parse("admin", ["crm.*", "admin.posts.view"]).unwrap();
        assert!(perms.action_access("posts", Action::View).is_allowed());
        assert_eq!(perms.action_access("posts", Action::Edit), Access::Denied);
    }

    #[test]
    fn malformed_string_fails_fast() {
        assert!(PermissionSet::parse("admin", ["admin.posts.view", "admin.posts"]).is_err());
    }
}
