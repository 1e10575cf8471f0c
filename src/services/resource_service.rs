//! The CRUD facade: every operation resolves the caller's permissions
//! first, pushes row predicates into the storage query for bulk paths, and
//! fetches-then-checks on single-id paths so forbidden and not-found stay
//! distinct outcomes.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::config;
use crate::database::predicate::{build_order, PredicateBuilder, SortSpec};
use crate::database::{query, DatabaseError};
use crate::error::ApiError;
use crate::permission::evaluator::value_text;
use crate::permission::{Access, PermissionSet, RowConstraint};
use crate::schema::{ResourceDescriptor, ValidatorDirective};
use crate::types::Action;

#[derive(Debug, Clone)]
pub struct ListParams {
    pub page: u32,
    pub per_page: u32,
    pub sort: Option<SortSpec>,
    pub filter: Map<String, Value>,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: config::CONFIG.api.default_page_size,
            sort: None,
            filter: Map::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListResult {
    pub rows: Vec<Map<String, Value>>,
    pub total: i64,
}

/// Permission-enforcing data access for one registered resource.
#[derive(Clone)]
pub struct ResourceService {
    descriptor: Arc<ResourceDescriptor>,
    pool: PgPool,
}

impl ResourceService {
    pub fn new(descriptor: Arc<ResourceDescriptor>, pool: PgPool) -> Self {
        Self { descriptor, pool }
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    fn authorize(
        &self,
        perms: &PermissionSet,
        action: Action,
    ) -> Result<RowConstraint, ApiError> {
        match perms.action_access(&self.descriptor.name, action) {
            Access::Denied => Err(ApiError::forbidden(format!(
                "not allowed to {} {}",
                action, self.descriptor.name
            ))),
            Access::Allowed(constraint) => Ok(constraint),
        }
    }

    pub async fn get_list(
        &self,
        perms: &PermissionSet,
        params: ListParams,
    ) -> Result<ListResult, ApiError> {
        let constraint = self.authorize(perms, Action::View)?;

        let page = params.page.max(1);
        let per_page = params.per_page.clamp(1, config::CONFIG.api.max_page_size);

        let mut builder = PredicateBuilder::new();
        builder.user_filter(&self.descriptor, &params.filter)?;
        builder.constraint(&constraint);
        let predicate = builder.finish();
        let order = build_order(&self.descriptor, params.sort.as_ref())?;

        let limit = per_page as i64;
        let offset = (page as i64 - 1) * limit;
        let sql = query::select_sql(
            &self.descriptor.table,
            &predicate.clause,
            &order,
            Some((limit, offset)),
        );
        let rows = query::fetch_rows(&self.pool, &sql, &predicate.params)
            .await
            .map_err(ApiError::from)?;

        // total matching count, unpaginated
        let count_sql = query::count_sql(&self.descriptor.table, &predicate.clause);
        let total = query::fetch_count(&self.pool, &count_sql, &predicate.params)
            .await
            .map_err(ApiError::from)?;

        let rows = rows
            .into_iter()
            .map(|row| shape_row(&self.descriptor.name, perms, row))
            .collect();
        Ok(ListResult { rows, total })
    }

    pub async fn get_one(
        &self,
        perms: &PermissionSet,
        id: &Value,
    ) -> Result<Map<String, Value>, ApiError> {
        let constraint = self.authorize(perms, Action::View)?;
        let row = self.fetch_by_id(id).await?;
        if !constraint.matches(&row) {
            return Err(self.forbidden_row(id));
        }
        Ok(shape_row(&self.descriptor.name, perms, row))
    }

    pub async fn get_many(
        &self,
        perms: &PermissionSet,
        ids: &[Value],
    ) -> Result<Vec<Map<String, Value>>, ApiError> {
        let constraint = self.authorize(perms, Action::View)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = PredicateBuilder::new();
        builder.ids(&self.descriptor.primary_key, ids)?;
        builder.constraint(&constraint);
        let predicate = builder.finish();

        let sql = query::select_sql(&self.descriptor.table, &predicate.clause, "", None);
        let rows = query::fetch_rows(&self.pool, &sql, &predicate.params)
            .await
            .map_err(ApiError::from)?;
        if rows.is_empty() {
            return Err(self.bulk_empty_error(ids).await);
        }

        Ok(rows
            .into_iter()
            .map(|row| shape_row(&self.descriptor.name, perms, row))
            .collect())
    }

    pub async fn create(
        &self,
        perms: &PermissionSet,
        data: &Map<String, Value>,
    ) -> Result<Map<String, Value>, ApiError> {
        let constraint = self.authorize(perms, Action::Add)?;
        // the incoming payload is the row-to-be, so field grants with row
        // filters are checked against it
        let payload = writable_payload(&self.descriptor, perms, Action::Add, data, Some(data))?;
        validate_required(&self.descriptor, &payload)?;
        if !constraint.matches(&payload) {
            return Err(ApiError::forbidden(format!(
                "row values fall outside the permitted {} rows",
                self.descriptor.name
            )));
        }

        let (columns, values) = split_payload(payload);
        let sql = query::insert_sql(&self.descriptor.table, &columns);

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        let mut rows = query::fetch_rows(&mut *tx, &sql, &values).await?;
        let row = rows
            .pop()
            .ok_or_else(|| ApiError::internal_server_error("insert returned no row"))?;
        tx.commit().await.map_err(DatabaseError::from)?;

        Ok(shape_row(&self.descriptor.name, perms, row))
    }

    pub async fn update(
        &self,
        perms: &PermissionSet,
        id: &Value,
        data: &Map<String, Value>,
    ) -> Result<Map<String, Value>, ApiError> {
        let constraint = self.authorize(perms, Action::Edit)?;
        let current = self.fetch_by_id(id).await?;
        if !constraint.matches(&current) {
            return Err(self.forbidden_row(id));
        }

        let payload =
            writable_payload(&self.descriptor, perms, Action::Edit, data, Some(&current))?;
        validate_no_null_required(&self.descriptor, &payload)?;

        let (columns, values) = split_payload(payload);
        let mut builder = PredicateBuilder::with_offset(values.len());
        builder.ids(&self.descriptor.primary_key, std::slice::from_ref(id))?;
        let predicate = builder.finish();
        let sql = query::update_sql(&self.descriptor.table, &columns, &predicate.clause);

        let mut params = values;
        params.extend(predicate.params);

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        let mut rows = query::fetch_rows(&mut *tx, &sql, &params).await?;
        let row = rows.pop().ok_or_else(|| self.not_found(id))?;
        tx.commit().await.map_err(DatabaseError::from)?;

        Ok(shape_row(&self.descriptor.name, perms, row))
    }

    pub async fn update_many(
        &self,
        perms: &PermissionSet,
        ids: &[Value],
        data: &Map<String, Value>,
    ) -> Result<Vec<Value>, ApiError> {
        let constraint = self.authorize(perms, Action::Edit)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let payload = writable_payload(&self.descriptor, perms, Action::Edit, data, None)?;
        validate_no_null_required(&self.descriptor, &payload)?;

        let (columns, values) = split_payload(payload);
        let mut builder = PredicateBuilder::with_offset(values.len());
        builder.ids(&self.descriptor.primary_key, ids)?;
        builder.constraint(&constraint);
        let predicate = builder.finish();
        let sql = query::update_sql(&self.descriptor.table, &columns, &predicate.clause);

        let mut params = values;
        params.extend(predicate.params);

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        let rows = query::fetch_rows(&mut *tx, &sql, &params).await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        if rows.is_empty() {
            return Err(self.bulk_empty_error(ids).await);
        }
        Ok(self.affected_ids(ids, &rows))
    }

    pub async fn delete(
        &self,
        perms: &PermissionSet,
        id: &Value,
    ) -> Result<Map<String, Value>, ApiError> {
        let constraint = self.authorize(perms, Action::Delete)?;
        let current = self.fetch_by_id(id).await?;
        if !constraint.matches(&current) {
            return Err(self.forbidden_row(id));
        }

        let mut builder = PredicateBuilder::new();
        builder.ids(&self.descriptor.primary_key, std::slice::from_ref(id))?;
        let predicate = builder.finish();
        let sql = query::delete_sql(&self.descriptor.table, &predicate.clause);

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        let mut rows = query::fetch_rows(&mut *tx, &sql, &predicate.params).await?;
        let row = rows.pop().ok_or_else(|| self.not_found(id))?;
        tx.commit().await.map_err(DatabaseError::from)?;

        Ok(shape_row(&self.descriptor.name, perms, row))
    }

    pub async fn delete_many(
        &self,
        perms: &PermissionSet,
        ids: &[Value],
    ) -> Result<Vec<Value>, ApiError> {
        let constraint = self.authorize(perms, Action::Delete)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = PredicateBuilder::new();
        builder.ids(&self.descriptor.primary_key, ids)?;
        builder.constraint(&constraint);
        let predicate = builder.finish();
        let sql = query::delete_sql(&self.descriptor.table, &predicate.clause);

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        let rows = query::fetch_rows(&mut *tx, &sql, &predicate.params).await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        if rows.is_empty() {
            return Err(self.bulk_empty_error(ids).await);
        }
        Ok(self.affected_ids(ids, &rows))
    }

    /// Unconditional fetch by primary key. Not-found here is a true
    /// absence; permission is decided by the caller afterwards.
    async fn fetch_by_id(&self, id: &Value) -> Result<Map<String, Value>, ApiError> {
        let mut builder = PredicateBuilder::new();
        builder.ids(&self.descriptor.primary_key, std::slice::from_ref(id))?;
        let predicate = builder.finish();

        let sql = query::select_sql(&self.descriptor.table, &predicate.clause, "", None);
        let mut rows = query::fetch_rows(&self.pool, &sql, &predicate.params)
            .await
            .map_err(ApiError::from)?;
        rows.pop().ok_or_else(|| self.not_found(id))
    }

    /// A bulk operation that matched nothing: forbidden when the requested
    /// rows exist but are all excluded by the row predicate, not-found when
    /// they are absent from storage.
    async fn bulk_empty_error(&self, ids: &[Value]) -> ApiError {
        let mut builder = PredicateBuilder::new();
        if builder.ids(&self.descriptor.primary_key, ids).is_err() {
            return self.not_found_many(ids);
        }
        let predicate = builder.finish();
        let sql = query::count_sql(&self.descriptor.table, &predicate.clause);
        match query::fetch_count(&self.pool, &sql, &predicate.params).await {
            Ok(existing) if existing > 0 => ApiError::forbidden(format!(
                "none of the requested {} rows are permitted",
                self.descriptor.name
            )),
            Ok(_) => self.not_found_many(ids),
            Err(e) => ApiError::from(e),
        }
    }

    /// Affected ids in the caller's requested order.
    fn affected_ids(&self, requested: &[Value], rows: &[Map<String, Value>]) -> Vec<Value> {
        let affected: Vec<Option<String>> = rows
            .iter()
            .map(|row| row.get(&self.descriptor.primary_key).and_then(value_text))
            .collect();
        requested
            .iter()
            .filter(|id| {
                let text = value_text(id);
                text.is_some() && affected.iter().any(|a| *a == text)
            })
            .cloned()
            .collect()
    }

    fn not_found(&self, id: &Value) -> ApiError {
        ApiError::not_found(format!("{} {} not found", self.descriptor.name, display_id(id)))
    }

    fn not_found_many(&self, ids: &[Value]) -> ApiError {
        let rendered: Vec<String> = ids.iter().map(display_id).collect();
        ApiError::not_found(format!(
            "no {} rows found for ids [{}]",
            self.descriptor.name,
            rendered.join(", ")
        ))
    }

    fn forbidden_row(&self, id: &Value) -> ApiError {
        ApiError::forbidden(format!(
            "access to {} {} is denied",
            self.descriptor.name,
            display_id(id)
        ))
    }
}

fn display_id(id: &Value) -> String {
    value_text(id).unwrap_or_else(|| id.to_string())
}

fn split_payload(payload: Map<String, Value>) -> (Vec<String>, Vec<Value>) {
    let mut columns = Vec::with_capacity(payload.len());
    let mut values = Vec::with_capacity(payload.len());
    for (column, value) in payload {
        columns.push(column);
        values.push(value);
    }
    (columns, values)
}

/// Drop every denied field from a returned row. Denied fields are absent,
/// never nulled; row-filtered field grants are re-evaluated per row.
pub(crate) fn shape_row(
    resource: &str,
    perms: &PermissionSet,
    row: Map<String, Value>,
) -> Map<String, Value> {
    row.iter()
        .filter(|(field, _)| perms.field_visible(resource, field, &row))
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect()
}

/// Validate and permission-trim a write payload. Unknown fields are a
/// client error; denied fields are dropped; a payload with nothing left is
/// rejected distinctly from a successful empty write.
pub(crate) fn writable_payload(
    descriptor: &ResourceDescriptor,
    perms: &PermissionSet,
    action: Action,
    data: &Map<String, Value>,
    row_context: Option<&Map<String, Value>>,
) -> Result<Map<String, Value>, ApiError> {
    if data.is_empty() {
        return Err(ApiError::validation_error("empty data payload", None));
    }

    for field in data.keys() {
        if descriptor.input(field).is_none() {
            return Err(ApiError::field_error(
                "unknown field in data payload",
                field.clone(),
                "not a writable field",
            ));
        }
    }

    let mut payload = Map::new();
    for (field, value) in data {
        let allowed = match perms.field_access(&descriptor.name, field, action) {
            Access::Denied => false,
            Access::Allowed(constraint) => match row_context {
                Some(row) => constraint.matches(row),
                // bulk writes have no single row context; the action-level
                // predicate still restricts which rows are touched
                None => true,
            },
        };
        if allowed {
            payload.insert(field.clone(), value.clone());
        } else {
            tracing::debug!(resource = %descriptor.name, field = %field, "dropping denied field from write");
        }
    }

    if payload.is_empty() {
        return Err(ApiError::forbidden(format!(
            "no permitted fields to modify on {}",
            descriptor.name
        )));
    }
    Ok(payload)
}

/// Create-time required check, run after permission trimming.
pub(crate) fn validate_required(
    descriptor: &ResourceDescriptor,
    payload: &Map<String, Value>,
) -> Result<(), ApiError> {
    let mut field_errors = HashMap::new();
    for input in &descriptor.inputs {
        if !input.validators.contains(&ValidatorDirective::Required) {
            continue;
        }
        match payload.get(&input.name) {
            None | Some(Value::Null) => {
                field_errors.insert(input.name.clone(), "This field is required".to_string());
            }
            Some(_) => {}
        }
    }
    if field_errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::validation_error("Missing required fields", Some(field_errors)))
    }
}

/// Update-time check: a partial update may omit required fields but must
/// not null them.
pub(crate) fn validate_no_null_required(
    descriptor: &ResourceDescriptor,
    payload: &Map<String, Value>,
) -> Result<(), ApiError> {
    let mut field_errors = HashMap::new();
    for (field, value) in payload {
        if !value.is_null() {
            continue;
        }
        if let Some(input) = descriptor.input(field) {
            if input.validators.contains(&ValidatorDirective::Required) {
                field_errors.insert(field.clone(), "This field cannot be null".to_string());
            }
        }
    }
    if field_errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::validation_error("Invalid null values", Some(field_errors)))
    }
}
