use std::sync::Arc;

use anyhow::Context;

use panel_api::app::AppBuilder;
use panel_api::database;
use panel_api::handlers;
use panel_api::services::StaticIdentity;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "panel_api=info,tower_http=info".into()),
        )
        .init();

    let config = panel_api::config::config();
    tracing::info!("starting panel-api in {:?} mode", config.environment);

    let pool = database::connect_pool().await.context("connecting to database")?;

    let scope = std::env::var("PANEL_SCOPE").unwrap_or_else(|_| "admin".to_string());
    let admin_user = std::env::var("PANEL_ADMIN_USER").unwrap_or_else(|_| "admin".to_string());
    let admin_password = match std::env::var("PANEL_ADMIN_PASSWORD") {
        Ok(p) => p,
        Err(_) => {
            tracing::warn!("PANEL_ADMIN_PASSWORD not set; using the default dev password");
            "admin".to_string()
        }
    };
    let provider = Arc::new(
        StaticIdentity::new().user(&admin_user, &admin_password, [format!("{}.*", scope)]),
    );

    let mut builder = AppBuilder::new(&scope, pool.clone(), provider);
    let tables = std::env::var("PANEL_RESOURCES").unwrap_or_default();
    for table in tables.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        builder = builder
            .register_table(table)
            .await
            .with_context(|| format!("registering resource '{}'", table))?;
    }

    let app = builder.build();

    // periodically drop expired permission cache entries
    let sweeper = app.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            sweeper.sessions().purge_expired().await;
        }
    });

    let router = handlers::router(app);

    let port = std::env::var("PANEL_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(3000);

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;

    tracing::info!("panel-api listening on http://{}", bind_addr);
    axum::serve(listener, router).await.context("server")?;
    Ok(())
}
