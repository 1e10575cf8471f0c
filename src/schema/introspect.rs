//! Loads `TableMeta` straight from a running Postgres instance, so
//! resources can be registered off an existing database without hand-built
//! metadata.

use std::collections::HashMap;

use sqlx::{PgPool, Row};

use super::{ColumnKind, ColumnMeta, ForeignKeyMeta, RegistryError, RelationMeta, TableMeta};

fn query_error(e: sqlx::Error) -> RegistryError {
    RegistryError::Introspection(e.to_string())
}

/// Introspect one table in the public schema: columns, primary/foreign
/// keys, check constraints, enum labels, and reverse foreign keys as
/// to-many relations.
pub async fn load_table(pool: &PgPool, table: &str) -> Result<TableMeta, RegistryError> {
    let pk_columns = primary_key_columns(pool, table).await?;
    let foreign_keys = foreign_keys(pool, table).await?;

    let rows = sqlx::query(
        r#"
        SELECT column_name, data_type, udt_name, is_nullable, column_default, is_identity
        FROM information_schema.columns
        WHERE table_schema = 'public' AND table_name = $1
        ORDER BY ordinal_position
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(query_error)?;

    if rows.is_empty() {
        return Err(RegistryError::Introspection(format!("table '{}' does not exist", table)));
    }

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        let name: String = row.try_get("column_name").map_err(query_error)?;
        let data_type: String = row.try_get("data_type").map_err(query_error)?;
        let udt_name: String = row.try_get("udt_name").map_err(query_error)?;
        let is_nullable: String = row.try_get("is_nullable").map_err(query_error)?;
        let column_default: Option<String> = row.try_get("column_default").map_err(query_error)?;
        let is_identity: String = row.try_get("is_identity").map_err(query_error)?;

        let mut enum_values = Vec::new();
        let kind = match data_type.as_str() {
            "ARRAY" => {
                let element = udt_name.trim_start_matches('_');
                ColumnKind::from_storage_type(element)
                    .map(|k| ColumnKind::Array(Box::new(k)))
                    .ok_or_else(|| RegistryError::UnsupportedType {
                        resource: table.to_string(),
                        column: name.clone(),
                        storage_type: format!("{}[]", element),
                    })?
            }
            "USER-DEFINED" => {
                enum_values = enum_labels(pool, &udt_name).await?;
                if enum_values.is_empty() {
                    return Err(RegistryError::UnsupportedType {
                        resource: table.to_string(),
                        column: name,
                        storage_type: udt_name,
                    });
                }
                ColumnKind::Enumerated
            }
            other => ColumnKind::from_storage_type(other).ok_or_else(|| {
                RegistryError::UnsupportedType {
                    resource: table.to_string(),
                    column: name.clone(),
                    storage_type: other.to_string(),
                }
            })?,
        };

        let autoincrement = is_identity == "YES"
            || column_default.as_deref().map_or(false, |d| d.starts_with("nextval("));

        columns.push(ColumnMeta {
            name: name.clone(),
            kind,
            nullable: is_nullable == "YES",
            has_default: false,
            has_server_default: column_default.is_some(),
            primary_key: pk_columns.contains(&name),
            autoincrement,
            foreign_key: foreign_keys.get(&name).cloned(),
            enum_values,
        });
    }

    Ok(TableMeta {
        name: table.to_string(),
        columns,
        checks: check_clauses(pool, table).await?,
        relations: reverse_relations(pool, table).await?,
    })
}

async fn primary_key_columns(pool: &PgPool, table: &str) -> Result<Vec<String>, RegistryError> {
    let rows = sqlx::query(
        r#"
        SELECT kcu.column_name
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
          ON kcu.constraint_name = tc.constraint_name
         AND kcu.table_schema = tc.table_schema
        WHERE tc.table_schema = 'public'
          AND tc.table_name = $1
          AND tc.constraint_type = 'PRIMARY KEY'
        ORDER BY kcu.ordinal_position
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(query_error)?;

    rows.iter()
        .map(|r| r.try_get::<String, _>("column_name").map_err(query_error))
        .collect()
}

async fn foreign_keys(
    pool: &PgPool,
    table: &str,
) -> Result<HashMap<String, ForeignKeyMeta>, RegistryError> {
    let rows = sqlx::query(
        r#"
        SELECT kcu.column_name, ccu.table_name AS foreign_table, ccu.column_name AS foreign_column
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
          ON kcu.constraint_name = tc.constraint_name
         AND kcu.table_schema = tc.table_schema
        JOIN information_schema.constraint_column_usage ccu
          ON ccu.constraint_name = tc.constraint_name
         AND ccu.table_schema = tc.table_schema
        WHERE tc.table_schema = 'public'
          AND tc.table_name = $1
          AND tc.constraint_type = 'FOREIGN KEY'
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(query_error)?;

    let mut out = HashMap::new();
    for row in rows {
        let column: String = row.try_get("column_name").map_err(query_error)?;
        let resource: String = row.try_get("foreign_table").map_err(query_error)?;
        let target: String = row.try_get("foreign_column").map_err(query_error)?;
        out.insert(column, ForeignKeyMeta { resource, column: target });
    }
    Ok(out)
}

async fn check_clauses(pool: &PgPool, table: &str) -> Result<Vec<String>, RegistryError> {
    let rows = sqlx::query(
        r#"
        SELECT cc.check_clause
        FROM information_schema.table_constraints tc
        JOIN information_schema.check_constraints cc
          ON cc.constraint_name = tc.constraint_name
         AND cc.constraint_schema = tc.table_schema
        WHERE tc.table_schema = 'public'
          AND tc.table_name = $1
          AND tc.constraint_type = 'CHECK'
        ORDER BY cc.constraint_name
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(query_error)?;

    let mut out = Vec::new();
    for row in rows {
        let clause: String = row.try_get("check_clause").map_err(query_error)?;
        // engine-generated NOT NULL checks duplicate column nullability
        if clause.contains("IS NOT NULL") {
            continue;
        }
        out.push(clause);
    }
    Ok(out)
}

/// Tables holding a foreign key into `table` become reference-many
/// relations. Display sub-fields stay empty here; registration may fill
/// them in.
async fn reverse_relations(pool: &PgPool, table: &str) -> Result<Vec<RelationMeta>, RegistryError> {
    let rows = sqlx::query(
        r#"
        SELECT tc.table_name AS child_table,
               kcu.column_name AS child_column,
               ccu.column_name AS local_column
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
          ON kcu.constraint_name = tc.constraint_name
         AND kcu.table_schema = tc.table_schema
        JOIN information_schema.constraint_column_usage ccu
          ON ccu.constraint_name = tc.constraint_name
         AND ccu.table_schema = tc.table_schema
        WHERE tc.table_schema = 'public'
          AND tc.constraint_type = 'FOREIGN KEY'
          AND ccu.table_name = $1
        ORDER BY tc.table_name
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(query_error)?;

    let mut out = Vec::new();
    for row in rows {
        let child_table: String = row.try_get("child_table").map_err(query_error)?;
        let child_column: String = row.try_get("child_column").map_err(query_error)?;
        let local_column: String = row.try_get("local_column").map_err(query_error)?;
        out.push(RelationMeta {
            name: child_table.clone(),
            resource: child_table,
            local_column,
            remote_column: child_column,
            display_fields: Vec::new(),
        });
    }
    Ok(out)
}

async fn enum_labels(pool: &PgPool, type_name: &str) -> Result<Vec<String>, RegistryError> {
    let rows = sqlx::query(
        r#"
        SELECT e.enumlabel
        FROM pg_type t
        JOIN pg_enum e ON e.enumtypid = t.oid
        WHERE t.typname = $1
        ORDER BY e.enumsortorder
        "#,
    )
    .bind(type_name)
    .fetch_all(pool)
    .await
    .map_err(query_error)?;

    rows.iter()
        .map(|r| r.try_get::<String, _>("enumlabel").map_err(query_error))
        .collect()
}
