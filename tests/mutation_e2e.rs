//! End-to-end mutation tests: insert/update/upsert/delete through the
//! synthesized mutation fields, including audit columns and soft delete.

mod common;

use async_graphql::Request;
use bifrostql::UserContext;
use serde_json::json;

fn soft_delete_config() -> bifrostql::config::BifrostConfig {
    let mut config = common::test_config();
    config.metadata.extend([
        "*.users|has(deletedOn) { delete-type: soft }".to_string(),
        "*.users.deletedOn { populate: deleted-on }".to_string(),
        "*.users.deletedBy { populate: deleted-by }".to_string(),
    ]);
    config
}

#[tokio::test]
async fn insert_returns_last_inserted_id() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    let data = common::run(
        &schema,
        r#"mutation { users(action: insert, data: {name: "Erin"}) }"#,
    )
    .await;
    assert_eq!(data, json!({"users": 5}));

    let check = common::run(
        &schema,
        r#"{ users(filter: {id: {_eq: 5}}) { data { name } } }"#,
    )
    .await;
    assert_eq!(check["users"]["data"], json!([{"name": "Erin"}]));
}

#[tokio::test]
async fn insert_populates_audit_columns_from_user_context() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    let mut user = UserContext::default();
    user.0.insert("sub".to_string(), json!("alice"));

    let request =
        Request::new(r#"mutation { users(action: insert, data: {name: "Frank"}) }"#).data(user);
    let response = schema.execute(request).await;
    assert!(response.errors.is_empty(), "{:?}", response.errors);

    let check = common::run(
        &schema,
        r#"{ users(filter: {name: {_eq: "Frank"}}) { data { createdOn createdBy } } }"#,
    )
    .await;
    let row = &check["users"]["data"][0];
    assert_eq!(row["createdBy"], json!("alice"));
    assert!(row["createdOn"].is_string(), "createdOn stamped: {row:?}");
}

#[tokio::test]
async fn client_cannot_supply_audit_columns() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    // createdOn is populate-managed, so it is absent from the insert
    // input type and the document fails validation.
    let response = schema
        .execute(r#"mutation { users(action: insert, data: {name: "X", createdOn: "1999"}) }"#)
        .await;
    assert!(!response.errors.is_empty());
}

#[tokio::test]
async fn update_requires_full_primary_key() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    let code = common::run_err(
        &schema,
        r#"mutation { users(action: update, data: {name: "Zed"}) }"#,
    )
    .await;
    assert_eq!(code, "MISSING_PK");
}

#[tokio::test]
async fn update_is_idempotent() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    let mutation =
        r#"mutation { users(action: update, data: {name: "Bobby"}, where: {id: 2}) }"#;
    let first = common::run(&schema, mutation).await;
    assert_eq!(first, json!({"users": 1}));

    let state = common::run(
        &schema,
        r#"{ users(filter: {id: {_eq: 2}}) { data { id name deptId } } }"#,
    )
    .await;

    let second = common::run(&schema, mutation).await;
    assert_eq!(second, json!({"users": 1}));

    let state_again = common::run(
        &schema,
        r#"{ users(filter: {id: {_eq: 2}}) { data { id name deptId } } }"#,
    )
    .await;
    assert_eq!(state, state_again);
}

#[tokio::test]
async fn upsert_updates_when_key_exists() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    let data = common::run(
        &schema,
        r#"mutation { users(action: upsert, data: {name: "Carmen"}, where: {id: 3}) }"#,
    )
    .await;
    assert_eq!(data, json!({"users": 1}));

    let check = common::run(
        &schema,
        r#"{ users(filter: {id: {_eq: 3}}) { data { name } } }"#,
    )
    .await;
    assert_eq!(check["users"]["data"], json!([{"name": "Carmen"}]));
}

#[tokio::test]
async fn upsert_inserts_when_update_matches_nothing() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    let data = common::run(
        &schema,
        r#"mutation { users(action: upsert, data: {name: "Grace"}, where: {id: 99}) }"#,
    )
    .await;
    // Fell through to an insert; the identity is the new row's id.
    assert_eq!(data, json!({"users": 5}));

    let check = common::run(
        &schema,
        r#"{ users(filter: {name: {_eq: "Grace"}}) { data { id } } }"#,
    )
    .await;
    assert_eq!(check["users"]["data"], json!([{"id": 5}]));
}

#[tokio::test]
async fn hard_delete_removes_the_row() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    let data = common::run(&schema, r#"mutation { users(action: delete, where: {id: 4}) }"#).await;
    assert_eq!(data, json!({"users": 1}));

    let check = common::run(&schema, r#"{ users { total data { id } } }"#).await;
    assert_eq!(check["users"]["total"], json!(3));
}

#[tokio::test]
async fn soft_delete_rewrites_to_update() {
    let pool = common::pool().await;
    let schema = common::schema_with(soft_delete_config(), &pool).await;

    let mut user = UserContext::default();
    user.0.insert("sub".to_string(), json!("alice"));
    let request =
        Request::new(r#"mutation { users(action: delete, where: {id: 2}) }"#).data(user);
    let response = schema.execute(request).await;
    assert!(response.errors.is_empty(), "{:?}", response.errors);

    // The row survives, stamped with the deletion marker columns.
    let check = common::run(
        &schema,
        r#"{ users(filter: {id: {_eq: 2}}) { data { name deletedOn deletedBy } } }"#,
    )
    .await;
    let row = &check["users"]["data"][0];
    assert_eq!(row["name"], json!("Bob"));
    assert!(row["deletedOn"].is_string());
    assert_eq!(row["deletedBy"], json!("alice"));
}

#[tokio::test]
async fn delete_with_incomplete_key_is_rejected() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    let code = common::run_err(&schema, r#"mutation { users(action: delete) }"#).await;
    assert_eq!(code, "MISSING_PK");
}
