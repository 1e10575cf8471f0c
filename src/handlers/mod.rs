pub mod auth;
pub mod data;
pub mod describe;

use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::app::App;

pub fn router(app: App) -> Router {
    let public = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/auth/login", post(auth::login));

    let protected = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/whoami", get(auth::whoami))
        .route("/describe", get(describe::list))
        .route("/describe/:resource", get(describe::resource))
        .route("/api/:resource", get(data::list).post(data::create))
        .route(
            "/api/:resource/_many",
            post(data::get_many).put(data::update_many).delete(data::delete_many),
        )
        .route(
            "/api/:resource/:id",
            get(data::get_one).put(data::update).delete(data::delete_one),
        )
        .layer(axum_middleware::from_fn(crate::middleware::auth::require_auth));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(app)
}

async fn root() -> Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    Json(json!({
        "data": {
            "name": "panel-api",
            "version": version,
            "description": "Schema-driven admin panel backend with permission-scoped CRUD",
            "endpoints": {
                "login": "POST /auth/login (public)",
                "logout": "POST /auth/logout",
                "describe": "GET /describe[/:resource]",
                "list": "GET /api/:resource?page=&perPage=&sort=&order=&filter=",
                "record": "GET|PUT|DELETE /api/:resource/:id",
                "bulk": "POST|PUT|DELETE /api/:resource/_many",
            }
        }
    }))
}

async fn health(
    axum::extract::State(app): axum::extract::State<App>,
) -> (axum::http::StatusCode, Json<Value>) {
    let now = chrono::Utc::now();

    match sqlx::query("SELECT 1").execute(app.pool()).await {
        Ok(_) => (
            axum::http::StatusCode::OK,
            Json(json!({
                "data": { "status": "ok", "timestamp": now, "database": "ok" }
            })),
        ),
        Err(e) => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": true,
                "message": "database unavailable",
                "data": { "status": "degraded", "timestamp": now, "database_error": e.to_string() }
            })),
        ),
    }
}
