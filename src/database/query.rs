//! SQL assembly and execution over dynamic tables.
//!
//! Every statement funnels its row output through `row_to_json(..) AS row`
//! so results come back as plain JSON maps regardless of column types.

use serde_json::{Map, Value};
use sqlx::postgres::PgArguments;
use sqlx::{Executor, Postgres, Row};

use super::predicate::quote_ident;
use super::DatabaseError;

pub fn select_sql(
    table: &str,
    where_clause: &str,
    order_clause: &str,
    page: Option<(i64, i64)>,
) -> String {
    let mut inner = format!("SELECT * FROM {}", quote_ident(table));
    if !where_clause.is_empty() {
        inner.push_str(&format!(" WHERE {}", where_clause));
    }
    if !order_clause.is_empty() {
        inner.push_str(&format!(" {}", order_clause));
    }
    if let Some((limit, offset)) = page {
        inner.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
    }
    format!("SELECT row_to_json(t) AS row FROM ({}) t", inner)
}

pub fn count_sql(table: &str, where_clause: &str) -> String {
    if where_clause.is_empty() {
        format!("SELECT COUNT(*) AS count FROM {}", quote_ident(table))
    } else {
        format!("SELECT COUNT(*) AS count FROM {} WHERE {}", quote_ident(table), where_clause)
    }
}

pub fn insert_sql(table: &str, columns: &[String]) -> String {
    let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
    format!(
        "INSERT INTO {} AS x ({}) VALUES ({}) RETURNING row_to_json(x) AS row",
        quote_ident(table),
        column_list.join(", "),
        placeholders.join(", ")
    )
}

pub fn update_sql(table: &str, columns: &[String], where_clause: &str) -> String {
    let assignments: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ${}", quote_ident(c), i + 1))
        .collect();
    format!(
        "UPDATE {} AS x SET {} WHERE {} RETURNING row_to_json(x) AS row",
        quote_ident(table),
        assignments.join(", "),
        where_clause
    )
}

pub fn delete_sql(table: &str, where_clause: &str) -> String {
    format!(
        "DELETE FROM {} AS x WHERE {} RETURNING row_to_json(x) AS row",
        quote_ident(table),
        where_clause
    )
}

/// Run a statement that yields `row_to_json(..) AS row` rows.
pub async fn fetch_rows<'e, E>(
    executor: E,
    sql: &str,
    params: &[Value],
) -> Result<Vec<Map<String, Value>>, DatabaseError>
where
    E: Executor<'e, Database = Postgres>,
{
    let mut query = sqlx::query(sql);
    for param in params {
        query = bind_value(query, param);
    }
    let rows = query.fetch_all(executor).await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let value: Value = row.try_get("row")?;
        match value {
            Value::Object(map) => out.push(map),
            other => {
                return Err(DatabaseError::Query(format!(
                    "expected a JSON object row, got {}",
                    other
                )))
            }
        }
    }
    Ok(out)
}

pub async fn fetch_count<'e, E>(
    executor: E,
    sql: &str,
    params: &[Value],
) -> Result<i64, DatabaseError>
where
    E: Executor<'e, Database = Postgres>,
{
    let mut query = sqlx::query(sql);
    for param in params {
        query = bind_value(query, param);
    }
    let row = query.fetch_one(executor).await?;
    let count: i64 = row.try_get("count")?;
    Ok(count)
}

/// Bind one JSON value with a reasonable Postgres mapping; arrays and
/// objects go over as JSONB.
pub fn bind_value<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    value: &'q Value,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => {
            let none: Option<String> = None;
            query.bind(none)
        }
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else if let Some(u) = n.as_u64() {
                // Postgres has no u64; narrow when safe
                query.bind(u as i64)
            } else if let Some(f) = n.as_f64() {
                query.bind(f)
            } else {
                query.bind(n.to_string())
            }
        }
        Value::String(s) => query.bind(s),
        Value::Array(_) | Value::Object(_) => query.bind(value.clone()),
    }
}
