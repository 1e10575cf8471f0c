//! Compiles caller-supplied filters and permission row constraints into one
//! parameterized WHERE clause.
//!
//! Row filter values are defined to compare as strings, and caller filters
//! go through the same path so both evaluation sites agree: columns are
//! compared as `CAST("col" AS TEXT)` against text parameters.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::permission::evaluator::value_text;
use crate::permission::{FilterGroup, RowConstraint};
use crate::schema::ResourceDescriptor;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("unknown field '{0}' in filter")]
    UnknownField(String),

    #[error("unknown field '{0}' in sort")]
    UnknownSortField(String),

    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("invalid operator data for field '{0}'")]
    InvalidOperatorData(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    pub fn parse(s: &str) -> SortDirection {
        if s.eq_ignore_ascii_case("desc") {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }
}

#[derive(Debug, Clone)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

/// A rendered WHERE clause plus its bind parameters.
#[derive(Debug, Clone)]
pub struct SqlPredicate {
    pub clause: String,
    pub params: Vec<Value>,
}

impl SqlPredicate {
    pub fn is_empty(&self) -> bool {
        self.clause.is_empty()
    }
}

/// Accumulates AND'd conditions with `$n` parameters. An offset lets the
/// clause follow earlier binds (e.g. the SET list of an UPDATE).
pub struct PredicateBuilder {
    conditions: Vec<String>,
    params: Vec<Value>,
    offset: usize,
}

impl PredicateBuilder {
    pub fn new() -> Self {
        Self::with_offset(0)
    }

    pub fn with_offset(offset: usize) -> Self {
        Self { conditions: Vec::new(), params: Vec::new(), offset }
    }

    fn param(&mut self, value: Value) -> String {
        self.params.push(value);
        format!("${}", self.offset + self.params.len())
    }

    fn text_param(&mut self, field: &str, value: &Value) -> Result<String, FilterError> {
        let text = value_text(value)
            .ok_or_else(|| FilterError::InvalidOperatorData(field.to_string()))?;
        Ok(self.param(Value::String(text)))
    }

    /// Caller filter mapping: scalar is equality, array is containment,
    /// `{"$contains": ...}` is substring. Unknown fields are an error so a
    /// typo cannot silently widen a result set.
    pub fn user_filter(
        &mut self,
        descriptor: &ResourceDescriptor,
        filter: &Map<String, Value>,
    ) -> Result<&mut Self, FilterError> {
        for (field, value) in filter {
            if !descriptor.has_column(field) {
                return Err(FilterError::UnknownField(field.clone()));
            }
            let condition = match value {
                Value::Null => format!("{} IS NULL", quote_ident(field)),
                Value::Array(values) => self.containment(field, values)?,
                Value::Object(spec) => self.operator_condition(field, spec)?,
                scalar => {
                    let p = self.text_param(field, scalar)?;
                    format!("{} = {}", cast_text(field), p)
                }
            };
            self.conditions.push(condition);
        }
        Ok(self)
    }

    fn operator_condition(
        &mut self,
        field: &str,
        spec: &Map<String, Value>,
    ) -> Result<String, FilterError> {
        let mut parts = Vec::with_capacity(spec.len());
        for (op, data) in spec {
            let condition = match op.as_str() {
                "$eq" => {
                    let p = self.text_param(field, data)?;
                    format!("{} = {}", cast_text(field), p)
                }
                "$in" => match data {
                    Value::Array(values) => self.containment(field, values)?,
                    _ => return Err(FilterError::InvalidOperatorData(field.to_string())),
                },
                "$contains" => match data {
                    Value::String(s) => {
                        let p = self.param(Value::String(format!("%{}%", s)));
                        format!("{} ILIKE {}", cast_text(field), p)
                    }
                    _ => return Err(FilterError::InvalidOperatorData(field.to_string())),
                },
                other => return Err(FilterError::UnsupportedOperator(other.to_string())),
            };
            parts.push(condition);
        }
        if parts.is_empty() {
            return Err(FilterError::InvalidOperatorData(field.to_string()));
        }
        Ok(parts.join(" AND "))
    }

    fn containment(&mut self, field: &str, values: &[Value]) -> Result<String, FilterError> {
        if values.is_empty() {
            return Ok("1=0".to_string());
        }
        let mut params = Vec::with_capacity(values.len());
        for value in values {
            params.push(self.text_param(field, value)?);
        }
        Ok(format!("{} IN ({})", cast_text(field), params.join(", ")))
    }

    /// Primary key membership for get_many / bulk writes.
    pub fn ids(&mut self, primary_key: &str, ids: &[Value]) -> Result<&mut Self, FilterError> {
        let condition = self.containment(primary_key, ids)?;
        self.conditions.push(condition);
        Ok(self)
    }

    /// The permission-derived row constraint: include groups OR'd, exclude
    /// groups subtracted.
    pub fn constraint(&mut self, constraint: &RowConstraint) -> &mut Self {
        if let Some(groups) = &constraint.include {
            let rendered: Vec<String> = groups.iter().map(|g| self.group(g)).collect();
            if rendered.is_empty() {
                self.conditions.push("1=0".to_string());
            } else {
                self.conditions.push(format!("({})", rendered.join(" OR ")));
            }
        }
        for group in &constraint.exclude {
            let rendered = self.group(group);
            self.conditions.push(format!("NOT ({})", rendered));
        }
        self
    }

    fn group(&mut self, group: &FilterGroup) -> String {
        if group.0.is_empty() {
            return "1=1".to_string();
        }
        let parts: Vec<String> = group
            .0
            .iter()
            .map(|(field, values)| {
                if values.len() == 1 {
                    let only = values.iter().next().map(|v| v.clone()).unwrap_or_default();
                    let p = self.param(Value::String(only));
                    format!("{} = {}", cast_text(field), p)
                } else {
                    let params: Vec<String> =
                        values.iter().map(|v| self.param(Value::String(v.clone()))).collect();
                    format!("{} IN ({})", cast_text(field), params.join(", "))
                }
            })
            .collect();
        format!("({})", parts.join(" AND "))
    }

    pub fn finish(self) -> SqlPredicate {
        let clause = if self.conditions.is_empty() {
            String::new()
        } else {
            self.conditions.join(" AND ")
        };
        SqlPredicate { clause, params: self.params }
    }
}

impl Default for PredicateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn build_order(
    descriptor: &ResourceDescriptor,
    sort: Option<&SortSpec>,
) -> Result<String, FilterError> {
    match sort {
        None => Ok(format!("ORDER BY {} ASC", quote_ident(&descriptor.primary_key))),
        Some(spec) => {
            if !descriptor.has_column(&spec.field) {
                return Err(FilterError::UnknownSortField(spec.field.clone()));
            }
            Ok(format!("ORDER BY {} {}", quote_ident(&spec.field), spec.direction.to_sql()))
        }
    }
}

/// Identifiers are validated at registration/parse time; quoting is enough.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name)
}

fn cast_text(name: &str) -> String {
    format!("CAST({} AS TEXT)", quote_ident(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::PermissionSet;
    use crate::schema::{ColumnKind, ColumnMeta, ResourceDescriptor, TableMeta};
    use crate::types::Action;
    use serde_json::json;

    fn descriptor() -> ResourceDescriptor {
        let meta = TableMeta::new("posts")
            .column(ColumnMeta::new("id", ColumnKind::Integer).primary_key().autoincrement())
            .column(ColumnMeta::new("title", ColumnKind::Text).not_null())
            .column(ColumnMeta::new("status", ColumnKind::Text));
        ResourceDescriptor::derive(&meta).unwrap()
    }

    fn filter(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn scalar_equality_and_array_containment() {
        let mut builder = PredicateBuilder::new();
        builder
            .user_filter(&descriptor(), &filter(json!({"status": "draft", "id": [1, 2]})))
            .unwrap();
        let predicate = builder.finish();
        assert_eq!(
            predicate.clause,
            r#"CAST("id" AS TEXT) IN ($1, $2) AND CAST("status" AS TEXT) = $3"#
        );
        assert_eq!(predicate.params, vec![json!("1"), json!("2"), json!("draft")]);
    }

    #[test]
    fn substring_operator() {
        let mut builder = PredicateBuilder::new();
        builder
            .user_filter(&descriptor(), &filter(json!({"title": {"$contains": "intro"}})))
            .unwrap();
        let predicate = builder.finish();
        assert_eq!(predicate.clause, r#"CAST("title" AS TEXT) ILIKE $1"#);
        assert_eq!(predicate.params, vec![json!("%intro%")]);
    }

    #[test]
    fn unknown_field_is_an_error() {
        let mut builder = PredicateBuilder::new();
        assert!(matches!(
            builder.user_filter(&descriptor(), &filter(json!({"nope": 1}))),
            Err(FilterError::UnknownField(_))
        ));
    }

    #[test]
    fn unsupported_operator_is_an_error() {
        let mut builder = PredicateBuilder::new();
        assert!(matches!(
            builder.user_filter(&descriptor(), &filter(json!({"id": {"$gt": 3}}))),
            Err(FilterError::UnsupportedOperator(_))
        ));
    }

    #[test]
    fn empty_containment_matches_nothing() {
        let mut builder = PredicateBuilder::new();
        builder.ids("id", &[]).unwrap();
        assert_eq!(builder.finish().clause, "1=0");
    }

    #[test]
    fn constraint_include_and_exclude() {
        let perms = PermissionSet::parse(
            "admin",
            ["admin.posts.view|id=1|id=2", "~admin.posts.view|status=hidden"],
        )
        .unwrap();
        let constraint = match perms.action_access("posts", Action::View) {
            crate::permission::Access::Allowed(c) => c,
            crate::permission::Access::Denied => panic!("expected allow"),
        };

        let mut builder = PredicateBuilder::new();
        builder.constraint(&constraint);
        let predicate = builder.finish();
        assert_eq!(
            predicate.clause,
            r#"((CAST("id" AS TEXT) IN ($1, $2))) AND NOT ((CAST("status" AS TEXT) = $3))"#
        );
        assert_eq!(predicate.params, vec![json!("1"), json!("2"), json!("hidden")]);
    }

    #[test]
    fn offset_numbers_follow_earlier_binds() {
        let mut builder = PredicateBuilder::with_offset(2);
        builder
            .user_filter(&descriptor(), &filter(json!({"status": "draft"})))
            .unwrap();
        let predicate = builder.finish();
        assert_eq!(predicate.clause, r#"CAST("status" AS TEXT) = $3"#);
    }

    #[test]
    fn sort_validates_field() {
        let spec = SortSpec { field: "nope".to_string(), direction: SortDirection::Asc };
        assert!(matches!(
            build_order(&descriptor(), Some(&spec)),
            Err(FilterError::UnknownSortField(_))
        ));
        let order = build_order(&descriptor(), None).unwrap();
        assert_eq!(order, r#"ORDER BY "id" ASC"#);
    }
}
