//! UI-facing resource metadata: the single-page admin client renders its
//! tables and forms from these descriptors.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde_json::{json, Value};

use crate::app::App;
use crate::error::ApiError;
use crate::middleware::auth::AuthUser;
use crate::permission::Access;
use crate::types::Action;

/// GET /describe - resources the caller may act on at all.
pub async fn list(
    State(app): State<App>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, ApiError> {
    let perms = app.sessions().resolve(user.session_id, &user.principal).await?;

    let names: Vec<&str> = app
        .resource_names()
        .into_iter()
        .filter(|name| {
            Action::all().iter().any(|action| perms.action_access(name, *action).is_allowed())
        })
        .collect();
    Ok(Json(json!({ "data": names })))
}

/// GET /describe/:resource - the field/input descriptors, trimmed to what
/// the caller may see or write.
pub async fn resource(
    State(app): State<App>,
    Extension(user): Extension<AuthUser>,
    Path(resource): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let descriptor = app
        .resource(&resource)
        .ok_or_else(|| ApiError::not_found(format!("unknown resource '{}'", resource)))?;
    let perms = app.sessions().resolve(user.session_id, &user.principal).await?;

    if !perms.action_access(&resource, Action::View).is_allowed() {
        return Err(ApiError::forbidden(format!("not allowed to view {}", resource)));
    }

    let fields: Vec<_> = descriptor
        .fields
        .iter()
        .filter(|f| !matches!(perms.field_access(&resource, &f.name, Action::View), Access::Denied))
        .collect();
    let inputs: Vec<_> = descriptor
        .inputs
        .iter()
        .filter(|i| !matches!(perms.field_access(&resource, &i.name, Action::Add), Access::Denied))
        .collect();

    Ok(Json(json!({
        "data": {
            "name": descriptor.name,
            "primaryKey": descriptor.primary_key,
            "fingerprint": descriptor.fingerprint,
            "fields": fields,
            "inputs": inputs,
        }
    })))
}
