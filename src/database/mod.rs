pub mod predicate;
pub mod query;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;

use crate::config;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("database error: {0}")]
    Sqlx(sqlx::Error),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(e: sqlx::Error) -> Self {
        // SQLSTATE class 23 = integrity constraint violation; those are
        // client input problems, not server faults
        if let Some(db) = e.as_database_error() {
            if db.code().map_or(false, |code| code.starts_with("23")) {
                return DatabaseError::Integrity(db.message().to_string());
            }
        }
        DatabaseError::Sqlx(e)
    }
}

/// Connection pool from DATABASE_URL, sized by config. Pooling, timeouts
/// and retries are the engine client's concern.
pub async fn connect_pool() -> Result<PgPool, DatabaseError> {
    let url = std::env::var("DATABASE_URL")
        .map_err(|_| DatabaseError::Query("DATABASE_URL is not set".to_string()))?;
    let cfg = &config::CONFIG.database;
    let pool = PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .acquire_timeout(Duration::from_secs(cfg.connect_timeout_secs))
        .connect(&url)
        .await?;
    Ok(pool)
}
