use axum::extract::State;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::app::App;
use crate::auth::{generate_jwt, Claims};
use crate::error::ApiError;
use crate::middleware::auth::AuthUser;

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
}

/// POST /auth/login - verify credentials, open a session, issue a token.
pub async fn login(
    State(app): State<App>,
    Json(body): Json<LoginBody>,
) -> Result<Json<Value>, ApiError> {
    let principal = app
        .sessions()
        .provider()
        .authenticate(&body.username, &body.password)
        .await
        .map_err(|e| {
            tracing::error!("authentication backend error: {}", e);
            ApiError::service_unavailable("authentication backend unavailable")
        })?
        .ok_or_else(|| ApiError::unauthorized("invalid credentials"))?;

    let session_id = Uuid::new_v4();
    // prime the permission cache so malformed grants fail at login, not on
    // the first data request
    app.sessions().resolve(session_id, &principal).await?;

    let token = generate_jwt(Claims::new(principal.clone(), session_id)).map_err(|e| {
        tracing::error!("token generation failed: {}", e);
        ApiError::internal_server_error("failed to issue token")
    })?;

    Ok(Json(json!({ "data": { "token": token, "principal": principal } })))
}

/// POST /auth/logout - invalidate the session's cached permission set.
pub async fn logout(
    State(app): State<App>,
    Extension(user): Extension<AuthUser>,
) -> Json<Value> {
    app.sessions().invalidate(user.session_id).await;
    Json(json!({ "data": { "loggedOut": true } }))
}

/// GET /auth/whoami
pub async fn whoami(Extension(user): Extension<AuthUser>) -> Json<Value> {
    Json(json!({
        "data": { "principal": user.principal, "session": user.session_id }
    }))
}
