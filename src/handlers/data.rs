//! Thin transport shell over the resource facade: deserialize structured
//! parameters, call the operation, wrap the result as {"data": ...}.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::app::App;
use crate::database::predicate::{SortDirection, SortSpec};
use crate::error::ApiError;
use crate::middleware::auth::AuthUser;
use crate::permission::PermissionSet;
use crate::services::{ListParams, ResourceService};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    #[serde(rename = "perPage")]
    pub per_page: Option<u32>,
    pub sort: Option<String>,
    pub order: Option<String>,
    /// JSON-encoded filter object, e.g. `{"status":"draft","id":[1,2]}`
    pub filter: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IdsBody {
    pub ids: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateManyBody {
    pub ids: Vec<Value>,
    pub data: Value,
}

fn service_for(app: &App, resource: &str) -> Result<ResourceService, ApiError> {
    app.service(resource)
        .ok_or_else(|| ApiError::not_found(format!("unknown resource '{}'", resource)))
}

async fn permissions_for(app: &App, user: &AuthUser) -> Result<Arc<PermissionSet>, ApiError> {
    app.sessions().resolve(user.session_id, &user.principal).await
}

fn object_payload(value: Value) -> Result<Map<String, Value>, ApiError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ApiError::validation_error("data payload must be a JSON object", None)),
    }
}

fn parse_filter(text: Option<&str>) -> Result<Map<String, Value>, ApiError> {
    match text {
        None => Ok(Map::new()),
        Some(raw) => {
            let value: Value = serde_json::from_str(raw).map_err(|e| {
                ApiError::validation_error(format!("filter is not valid JSON: {}", e), None)
            })?;
            object_payload(value)
                .map_err(|_| ApiError::validation_error("filter must be a JSON object", None))
        }
    }
}

/// GET /api/:resource - paginated, sorted, filtered list.
pub async fn list(
    State(app): State<App>,
    Extension(user): Extension<AuthUser>,
    Path(resource): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let service = service_for(&app, &resource)?;
    let perms = permissions_for(&app, &user).await?;

    let sort = query.sort.map(|field| SortSpec {
        field,
        direction: query
            .order
            .as_deref()
            .map(SortDirection::parse)
            .unwrap_or(SortDirection::Asc),
    });
    let params = ListParams {
        page: query.page.unwrap_or(1),
        per_page: query.per_page.unwrap_or(crate::config::CONFIG.api.default_page_size),
        sort,
        filter: parse_filter(query.filter.as_deref())?,
    };

    let result = service.get_list(&perms, params).await?;
    Ok(Json(json!({ "data": result.rows, "total": result.total })))
}

/// GET /api/:resource/:id
pub async fn get_one(
    State(app): State<App>,
    Extension(user): Extension<AuthUser>,
    Path((resource, id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let service = service_for(&app, &resource)?;
    let perms = permissions_for(&app, &user).await?;
    let row = service.get_one(&perms, &Value::String(id)).await?;
    Ok(Json(json!({ "data": row })))
}

/// POST /api/:resource/_many - fetch a set of rows by id.
pub async fn get_many(
    State(app): State<App>,
    Extension(user): Extension<AuthUser>,
    Path(resource): Path<String>,
    Json(body): Json<IdsBody>,
) -> Result<Json<Value>, ApiError> {
    let service = service_for(&app, &resource)?;
    let perms = permissions_for(&app, &user).await?;
    let rows = service.get_many(&perms, &body.ids).await?;
    Ok(Json(json!({ "data": rows })))
}

/// POST /api/:resource
pub async fn create(
    State(app): State<App>,
    Extension(user): Extension<AuthUser>,
    Path(resource): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let service = service_for(&app, &resource)?;
    let perms = permissions_for(&app, &user).await?;
    let data = object_payload(payload)?;
    let row = service.create(&perms, &data).await?;
    Ok(Json(json!({ "data": row })))
}

/// PUT /api/:resource/:id
pub async fn update(
    State(app): State<App>,
    Extension(user): Extension<AuthUser>,
    Path((resource, id)): Path<(String, String)>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let service = service_for(&app, &resource)?;
    let perms = permissions_for(&app, &user).await?;
    let data = object_payload(payload)?;
    let row = service.update(&perms, &Value::String(id), &data).await?;
    Ok(Json(json!({ "data": row })))
}

/// PUT /api/:resource/_many
pub async fn update_many(
    State(app): State<App>,
    Extension(user): Extension<AuthUser>,
    Path(resource): Path<String>,
    Json(body): Json<UpdateManyBody>,
) -> Result<Json<Value>, ApiError> {
    let service = service_for(&app, &resource)?;
    let perms = permissions_for(&app, &user).await?;
    let data = object_payload(body.data)?;
    let ids = service.update_many(&perms, &body.ids, &data).await?;
    Ok(Json(json!({ "data": ids })))
}

/// DELETE /api/:resource/:id
pub async fn delete_one(
    State(app): State<App>,
    Extension(user): Extension<AuthUser>,
    Path((resource, id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let service = service_for(&app, &resource)?;
    let perms = permissions_for(&app, &user).await?;
    let row = service.delete(&perms, &Value::String(id)).await?;
    Ok(Json(json!({ "data": row })))
}

/// DELETE /api/:resource/_many
pub async fn delete_many(
    State(app): State<App>,
    Extension(user): Extension<AuthUser>,
    Path(resource): Path<String>,
    Json(body): Json<IdsBody>,
) -> Result<Json<Value>, ApiError> {
    let service = service_for(&app, &resource)?;
    let perms = permissions_for(&app, &user).await?;
    let ids = service.delete_many(&perms, &body.ids).await?;
    Ok(Json(json!({ "data": ids })))
}
