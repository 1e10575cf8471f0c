//! Facade scenarios against a live database. Each test provisions its own
//! uniquely-named table and passes trivially when no database is reachable.

mod common;

use anyhow::Result;
use serde_json::{json, Map, Value};

use panel_api::schema::ValidatorDirective;
use panel_api::services::ListParams;

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

fn ids_of(rows: &[Map<String, Value>]) -> Vec<i64> {
    let mut ids: Vec<i64> =
        rows.iter().filter_map(|r| r.get("id").and_then(Value::as_i64)).collect();
    ids.sort_unstable();
    ids
}

#[tokio::test]
async fn introspection_derives_validators_from_live_constraints() -> Result<()> {
    let Some(pool) = common::try_pool().await else { return Ok(()) };
    let table = common::TestTable::create(&pool).await?;

    let service = table.service().await?;
    let descriptor = service.descriptor();

    let votes = descriptor.field("votes").unwrap();
    assert_eq!(
        votes.validators,
        vec![ValidatorDirective::MinValue(1), ValidatorDirective::MaxValue(5)]
    );

    let title = descriptor.field("title").unwrap();
    assert!(title.validators.contains(&ValidatorDirective::Required));
    assert!(title.validators.contains(&ValidatorDirective::MinLength(3)));

    // bigserial pk: displayed but not an input
    assert!(descriptor.field("id").is_some());
    assert!(descriptor.input("id").is_none());

    table.drop().await
}

#[tokio::test]
async fn registration_is_idempotent_against_live_metadata() -> Result<()> {
    let Some(pool) = common::try_pool().await else { return Ok(()) };
    let table = common::TestTable::create(&pool).await?;

    let first = table.service().await?.descriptor().clone();
    let second = table.service().await?.descriptor().clone();
    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(first, second);

    table.drop().await
}

#[tokio::test]
async fn row_filtered_grant_restricts_get_list() -> Result<()> {
    let Some(pool) = common::try_pool().await else { return Ok(()) };
    let table = common::TestTable::create(&pool).await?;
    let service = table.service().await?;

    // the resource-exact filtered grant overrides the broad wildcard grant
    let perms = table.perms(&["admin.*", "admin.{r}.*|id=1|id=2"]);
    let result = service.get_list(&perms, ListParams::default()).await?;

    assert_eq!(ids_of(&result.rows), vec![1, 2]);
    assert_eq!(result.total, 2);

    table.drop().await
}

#[tokio::test]
async fn caller_filters_compose_with_the_permission_predicate() -> Result<()> {
    let Some(pool) = common::try_pool().await else { return Ok(()) };
    let table = common::TestTable::create(&pool).await?;
    let service = table.service().await?;

    let perms = table.perms(&["admin.{r}.*|id=1|id=2"]);
    let params = ListParams {
        filter: object(json!({"title": {"$contains": "second"}})),
        ..Default::default()
    };
    let result = service.get_list(&perms, params).await?;
    assert_eq!(ids_of(&result.rows), vec![2]);

    // a filter matching only forbidden rows yields an empty page
    let params = ListParams {
        filter: object(json!({"title": {"$contains": "third"}})),
        ..Default::default()
    };
    let result = service.get_list(&perms, params).await?;
    assert!(result.rows.is_empty());
    assert_eq!(result.total, 0);

    table.drop().await
}

#[tokio::test]
async fn pagination_reports_unpaginated_total() -> Result<()> {
    let Some(pool) = common::try_pool().await else { return Ok(()) };
    let table = common::TestTable::create(&pool).await?;
    let service = table.service().await?;

    let perms = common::admin_perms();
    let params = ListParams { page: 1, per_page: 2, ..Default::default() };
    let result = service.get_list(&perms, params).await?;
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.total, 3);

    let params = ListParams { page: 2, per_page: 2, ..Default::default() };
    let result = service.get_list(&perms, params).await?;
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.total, 3);

    table.drop().await
}

#[tokio::test]
async fn sorting_by_field_and_direction() -> Result<()> {
    let Some(pool) = common::try_pool().await else { return Ok(()) };
    let table = common::TestTable::create(&pool).await?;
    let service = table.service().await?;

    use panel_api::database::predicate::{SortDirection, SortSpec};
    let params = ListParams {
        sort: Some(SortSpec { field: "votes".to_string(), direction: SortDirection::Desc }),
        ..Default::default()
    };
    let result = service.get_list(&common::admin_perms(), params).await?;
    let votes: Vec<i64> =
        result.rows.iter().filter_map(|r| r.get("votes").and_then(Value::as_i64)).collect();
    assert_eq!(votes, vec![5, 4, 3]);

    table.drop().await
}

#[tokio::test]
async fn field_denial_omits_the_key_per_row() -> Result<()> {
    let Some(pool) = common::try_pool().await else { return Ok(()) };
    let table = common::TestTable::create(&pool).await?;
    let service = table.service().await?;

    let perms =
        table.perms(&["admin.{r}.*", "~admin.{r}.msg.*", "admin.{r}.msg.view|id=1"]);

    let visible = service.get_one(&perms, &json!(1)).await?;
    assert_eq!(visible.get("msg"), Some(&json!("hello")));

    // denied field is absent, not nulled
    let hidden = service.get_one(&perms, &json!(3)).await?;
    assert!(!hidden.contains_key("msg"));
    assert_eq!(hidden.get("title"), Some(&json!("third post")));

    table.drop().await
}

#[tokio::test]
async fn single_lookup_distinguishes_not_found_from_forbidden() -> Result<()> {
    let Some(pool) = common::try_pool().await else { return Ok(()) };
    let table = common::TestTable::create(&pool).await?;
    let service = table.service().await?;

    let perms = table.perms(&["admin.{r}.*|id=1|id=2"]);

    let missing = service.get_one(&perms, &json!(999)).await.unwrap_err();
    assert_eq!(missing.status_code(), 404);

    let excluded = service.get_one(&perms, &json!(3)).await.unwrap_err();
    assert_eq!(excluded.status_code(), 403);

    table.drop().await
}

#[tokio::test]
async fn get_many_excludes_silently_and_resolves_empty_results() -> Result<()> {
    let Some(pool) = common::try_pool().await else { return Ok(()) };
    let table = common::TestTable::create(&pool).await?;
    let service = table.service().await?;

    let perms = table.perms(&["admin.{r}.*|id=1|id=2"]);

    let rows = service.get_many(&perms, &[json!(1), json!(2), json!(3)]).await?;
    assert_eq!(ids_of(&rows), vec![1, 2]);

    // rows exist but are excluded -> forbidden
    let err = service.get_many(&perms, &[json!(3)]).await.unwrap_err();
    assert_eq!(err.status_code(), 403);

    // rows absent -> not found
    let err = service.get_many(&perms, &[json!(998), json!(999)]).await.unwrap_err();
    assert_eq!(err.status_code(), 404);

    // nothing requested -> nothing returned
    let rows = service.get_many(&perms, &[]).await?;
    assert!(rows.is_empty());

    table.drop().await
}

#[tokio::test]
async fn create_returns_the_stored_row() -> Result<()> {
    let Some(pool) = common::try_pool().await else { return Ok(()) };
    let table = common::TestTable::create(&pool).await?;
    let service = table.service().await?;

    let perms = common::admin_perms();
    let row = service
        .create(&perms, &object(json!({"title": "fourth post", "msg": "fresh", "votes": 2})))
        .await?;

    assert!(row.get("id").and_then(Value::as_i64).is_some());
    assert_eq!(row.get("title"), Some(&json!("fourth post")));
    assert_eq!(row.get("votes"), Some(&json!(2)));

    let listed = service.get_list(&perms, ListParams::default()).await?;
    assert_eq!(listed.total, 4);

    table.drop().await
}

#[tokio::test]
async fn create_with_every_field_denied_fails_distinctly() -> Result<()> {
    let Some(pool) = common::try_pool().await else { return Ok(()) };
    let table = common::TestTable::create(&pool).await?;
    let service = table.service().await?;

    let perms = table.perms(&[
        "admin.{r}.add",
        "~admin.{r}.title.*",
        "~admin.{r}.msg.*",
        "~admin.{r}.votes.*",
    ]);
    let err = service
        .create(&perms, &object(json!({"title": "fourth post", "msg": "x"})))
        .await
        .unwrap_err();

    // "no permitted fields", not a silently created empty row
    assert_eq!(err.status_code(), 403);
    let count = service
        .get_list(&common::admin_perms(), ListParams::default())
        .await?
        .total;
    assert_eq!(count, 3);

    table.drop().await
}

#[tokio::test]
async fn create_validates_required_fields_with_detail() -> Result<()> {
    let Some(pool) = common::try_pool().await else { return Ok(()) };
    let table = common::TestTable::create(&pool).await?;
    let service = table.service().await?;

    let err = service
        .create(&common::admin_perms(), &object(json!({"msg": "no title"})))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert_eq!(err.to_json()["field_errors"]["title"], json!("This field is required"));

    table.drop().await
}

#[tokio::test]
async fn integrity_violations_surface_as_client_errors() -> Result<()> {
    let Some(pool) = common::try_pool().await else { return Ok(()) };
    let table = common::TestTable::create(&pool).await?;
    let service = table.service().await?;

    // title is unique and 'first post' is seeded
    let err = service
        .create(&common::admin_perms(), &object(json!({"title": "first post"})))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 409);

    table.drop().await
}

#[tokio::test]
async fn update_drops_denied_fields_and_persists_the_rest() -> Result<()> {
    let Some(pool) = common::try_pool().await else { return Ok(()) };
    let table = common::TestTable::create(&pool).await?;
    let service = table.service().await?;

    let perms = table.perms(&["admin.{r}.*", "~admin.{r}.title.edit"]);
    let row = service
        .update(&perms, &json!(1), &object(json!({"title": "hacked", "msg": "edited"})))
        .await?;

    assert_eq!(row.get("msg"), Some(&json!("edited")));
    assert_eq!(row.get("title"), Some(&json!("first post")));

    table.drop().await
}

#[tokio::test]
async fn update_on_excluded_row_is_forbidden_not_missing() -> Result<()> {
    let Some(pool) = common::try_pool().await else { return Ok(()) };
    let table = common::TestTable::create(&pool).await?;
    let service = table.service().await?;

    let perms = table.perms(&["admin.{r}.*|id=1|id=2"]);

    let err = service
        .update(&perms, &json!(3), &object(json!({"msg": "nope"})))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);

    let err = service
        .update(&perms, &json!(999), &object(json!({"msg": "nope"})))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);

    table.drop().await
}

#[tokio::test]
async fn update_many_affects_only_permitted_rows() -> Result<()> {
    let Some(pool) = common::try_pool().await else { return Ok(()) };
    let table = common::TestTable::create(&pool).await?;
    let service = table.service().await?;

    let perms = table.perms(&["admin.{r}.*|id=1|id=2"]);

    let affected = service
        .update_many(&perms, &[json!(1), json!(2), json!(3)], &object(json!({"msg": "bulk"})))
        .await?;
    assert_eq!(affected, vec![json!(1), json!(2)]);

    // row 3 kept its original value
    let row3 = service.get_one(&common::admin_perms(), &json!(3)).await?;
    assert_eq!(row3.get("msg"), Some(&json!("secret")));

    // zero permitted targets among requested -> forbidden
    let err = service
        .update_many(&perms, &[json!(3)], &object(json!({"msg": "bulk"})))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);

    // absent targets -> not found
    let err = service
        .update_many(&perms, &[json!(999)], &object(json!({"msg": "bulk"})))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);

    table.drop().await
}

#[tokio::test]
async fn delete_returns_the_removed_row() -> Result<()> {
    let Some(pool) = common::try_pool().await else { return Ok(()) };
    let table = common::TestTable::create(&pool).await?;
    let service = table.service().await?;

    let perms = common::admin_perms();
    let row = service.delete(&perms, &json!(2)).await?;
    assert_eq!(row.get("title"), Some(&json!("second post")));

    let err = service.get_one(&perms, &json!(2)).await.unwrap_err();
    assert_eq!(err.status_code(), 404);

    table.drop().await
}

#[tokio::test]
async fn delete_many_applies_the_row_predicate() -> Result<()> {
    let Some(pool) = common::try_pool().await else { return Ok(()) };
    let table = common::TestTable::create(&pool).await?;
    let service = table.service().await?;

    let perms = table.perms(&["admin.{r}.*|id=1|id=2"]);
    let removed = service.delete_many(&perms, &[json!(1), json!(2), json!(3)]).await?;
    assert_eq!(removed, vec![json!(1), json!(2)]);

    let remaining = service
        .get_list(&common::admin_perms(), ListParams::default())
        .await?;
    assert_eq!(ids_of(&remaining.rows), vec![3]);

    table.drop().await
}
