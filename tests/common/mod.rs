#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use panel_api::app::{App, AppBuilder};
use panel_api::permission::PermissionSet;
use panel_api::services::{ResourceService, StaticIdentity};

/// Connect to the test database, or skip: database-backed tests pass
/// trivially when no database is reachable (expected in plain CI).
pub async fn try_pool() -> Option<PgPool> {
    let url = std::env::var("PANEL_TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()?;

    match PgPoolOptions::new()
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(3))
        .connect(&url)
        .await
    {
        Ok(pool) => Some(pool),
        Err(e) => {
            eprintln!("skipping database-backed test (no database): {}", e);
            None
        }
    }
}

/// A uniquely-named seeded table so parallel tests never collide.
///
/// Schema: id (bigserial pk), title (text, not null, unique, min length 3),
/// msg (text), votes (bigint, default 1, 1 <= votes < 6).
/// Seeded rows: (1, "first post", "hello", 3), (2, "second post", "world", 4),
/// (3, "third post", "secret", 5).
pub struct TestTable {
    pub name: String,
    pool: PgPool,
}

impl TestTable {
    pub async fn create(pool: &PgPool) -> anyhow::Result<Self> {
        let name = format!("t_{}", Uuid::new_v4().simple());
        let ddl = format!(
            r#"
            CREATE TABLE "{name}" (
                id BIGSERIAL PRIMARY KEY,
                title TEXT NOT NULL UNIQUE CHECK (char_length(title) >= 3),
                msg TEXT,
                votes BIGINT NOT NULL DEFAULT 1,
                CHECK (votes >= 1 AND votes < 6)
            )
            "#,
            name = name
        );
        sqlx::query(&ddl).execute(pool).await?;

        let seed = format!(
            r#"
            INSERT INTO "{name}" (id, title, msg, votes) VALUES
                (1, 'first post', 'hello', 3),
                (2, 'second post', 'world', 4),
                (3, 'third post', 'secret', 5)
            "#,
            name = name
        );
        sqlx::query(&seed).execute(pool).await?;

        // keep the sequence clear of the seeded ids
        let bump = format!(
            "SELECT setval(pg_get_serial_sequence('\"{name}\"', 'id'), 100)",
            name = name
        );
        sqlx::query(&bump).execute(pool).await?;

        Ok(Self { name, pool: pool.clone() })
    }

    pub async fn drop(&self) -> anyhow::Result<()> {
        let ddl = format!("DROP TABLE IF EXISTS \"{}\"", self.name);
        sqlx::query(&ddl).execute(&self.pool).await?;
        Ok(())
    }

    /// Register this table (via live introspection) and return its
    /// permission-enforcing service.
    pub async fn service(&self) -> anyhow::Result<ResourceService> {
        let app = self.app().await?;
        app.service(&self.name)
            .ok_or_else(|| anyhow::anyhow!("resource '{}' not registered", self.name))
    }

    pub async fn app(&self) -> anyhow::Result<App> {
        let provider = Arc::new(StaticIdentity::new());
        let builder = AppBuilder::new("admin", self.pool.clone(), provider)
            .register_table(&self.name)
            .await?;
        Ok(builder.build())
    }

    /// Permission strings templated with this table's resource name:
    /// "{r}" expands to the table name.
    pub fn perms(&self, templates: &[&str]) -> PermissionSet {
        let strings: Vec<String> =
            templates.iter().map(|t| t.replace("{r}", &self.name)).collect();
        PermissionSet::parse("admin", &strings).expect("test permissions parse")
    }
}

pub fn admin_perms() -> PermissionSet {
    PermissionSet::parse("admin", ["admin.*"]).expect("test permissions parse")
}
