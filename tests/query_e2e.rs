//! End-to-end query tests against in-memory SQLite: plan, emit, execute,
//! assemble, all through the public schema surface.

mod common;

use serde_json::json;

#[tokio::test]
async fn sorted_and_limited_list() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    let data = common::run(
        &schema,
        r#"{ users(limit: 2, sort: "-id") { data { id name } } }"#,
    )
    .await;

    assert_eq!(
        data,
        json!({"users": {"data": [
            {"id": 4, "name": "Dave"},
            {"id": 3, "name": "Carol"}
        ]}})
    );
}

#[tokio::test]
async fn wrapper_exposes_total_offset_limit() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    let data = common::run(
        &schema,
        r#"{ users(limit: 2, offset: 1) { total offset limit data { id } } }"#,
    )
    .await;

    assert_eq!(data["users"]["total"], json!(4));
    assert_eq!(data["users"]["offset"], json!(1));
    assert_eq!(data["users"]["limit"], json!(2));
    assert_eq!(data["users"]["data"], json!([{"id": 2}, {"id": 3}]));
}

#[tokio::test]
async fn single_join_resolves_row_or_null() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    let data = common::run(
        &schema,
        r#"{ users(sort: "id") { data { name department { name } } } }"#,
    )
    .await;

    assert_eq!(
        data["users"]["data"],
        json!([
            {"name": "Alice", "department": {"name": "Engineering"}},
            {"name": "Bob", "department": {"name": "Engineering"}},
            {"name": "Carol", "department": {"name": "Sales"}},
            {"name": "Dave", "department": null}
        ])
    );
}

#[tokio::test]
async fn many_join_groups_children_by_parent_key() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    let data = common::run(
        &schema,
        r#"{ departments(sort: "id") {
            data { name members(filter: {name: {_contains: "a"}}, sort: "id") { id } }
        } }"#,
    )
    .await;

    assert_eq!(
        data["departments"]["data"],
        json!([
            {"name": "Engineering", "members": [{"id": 1}]},
            {"name": "Sales", "members": [{"id": 3}]},
            {"name": "Marketing", "members": []}
        ])
    );
}

#[tokio::test]
async fn filter_through_join() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    let data = common::run(
        &schema,
        r#"{ users(filter: {_or: [
            {name: {_eq: "Alice"}},
            {department: {name: {_eq: "Sales"}}}
        ]}) { data { id } } }"#,
    )
    .await;

    assert_eq!(data["users"]["data"], json!([{"id": 1}, {"id": 3}]));
}

#[tokio::test]
async fn many_to_many_join_through_link_table() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    let data = common::run(
        &schema,
        r#"{ users(sort: "id") { data { name tags(sort: "id") { name } } } }"#,
    )
    .await;

    assert_eq!(
        data["users"]["data"],
        json!([
            {"name": "Alice", "tags": [{"name": "admin"}, {"name": "oncall"}]},
            {"name": "Bob", "tags": []},
            {"name": "Carol", "tags": [{"name": "oncall"}]},
            {"name": "Dave", "tags": []}
        ])
    );
}

#[tokio::test]
async fn aliased_joins_resolve_independently() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    let data = common::run(
        &schema,
        r#"{ users(filter: {id: {_eq: 1}}) {
            data { d1: department { name } d2: department { id } }
        } }"#,
    )
    .await;

    assert_eq!(
        data["users"]["data"],
        json!([{"d1": {"name": "Engineering"}, "d2": {"id": 1}}])
    );
}

#[tokio::test]
async fn nested_join_subtree() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    // Two levels deep: users -> department -> members.
    let data = common::run(
        &schema,
        r#"{ users(filter: {id: {_eq: 3}}) {
            data { name department { name members(sort: "id") { name } } }
        } }"#,
    )
    .await;

    assert_eq!(
        data["users"]["data"],
        json!([{
            "name": "Carol",
            "department": {"name": "Sales", "members": [{"name": "Carol"}]}
        }])
    );
}

#[tokio::test]
async fn in_and_null_filters() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    let data = common::run(
        &schema,
        r#"{ users(filter: {id: {_in: [1, 4]}}) { data { id } } }"#,
    )
    .await;
    assert_eq!(data["users"]["data"], json!([{"id": 1}, {"id": 4}]));

    let data = common::run(
        &schema,
        r#"{ users(filter: {deptId: {_is_null: true}}) { data { name } } }"#,
    )
    .await;
    assert_eq!(data["users"]["data"], json!([{"name": "Dave"}]));
}

#[tokio::test]
async fn pagination_is_deterministic() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    let query = r#"{ users(filter: {deptId: {_is_null: false}}, limit: 2, offset: 1) { data { id } } }"#;
    let first = common::run(&schema, query).await;
    let second = common::run(&schema, query).await;
    assert_eq!(first, second);
    assert_eq!(first["users"]["data"], json!([{"id": 2}, {"id": 3}]));
}

#[tokio::test]
async fn unbounded_limit_returns_everything() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    let data = common::run(&schema, r#"{ users(limit: -1) { data { id } } }"#).await;
    assert_eq!(
        data["users"]["data"],
        json!([{"id": 1}, {"id": 2}, {"id": 3}, {"id": 4}])
    );
}

#[tokio::test]
async fn unknown_filter_operator_reports_invalid_filter() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    // `_contains` exists on strings only; `id` is an Int column.
    let code = common::run_err(
        &schema,
        r#"{ users(filter: {id: {_contains: "1"}}) { data { id } } }"#,
    )
    .await;
    assert_eq!(code, "INVALID_FILTER");
}

#[tokio::test]
async fn unknown_sort_column_reports_invalid_query() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    let code = common::run_err(&schema, r#"{ users(sort: "-missing") { data { id } } }"#).await;
    assert_eq!(code, "INVALID_QUERY");
}

#[tokio::test]
async fn hidden_tables_are_absent_but_usable_as_link() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    let sdl = schema.sdl();
    assert!(!sdl.contains("user_tags"));
    // The many-to-many join through the hidden link table still works
    // (exercised above); the link table has no root field.
    let response = schema.execute("{ user_tags { data { user_id } } }").await;
    assert!(!response.errors.is_empty());
}

#[tokio::test]
async fn db_schema_exposes_catalog() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    let data = common::run(
        &schema,
        r#"{ _dbSchema {
            name kind primary_keys
            columns { name is_primary_key is_identity graphql_type }
            joins { name kind dest_table link_table }
        } }"#,
    )
    .await;

    let tables = data["_dbSchema"].as_array().unwrap();
    let users = tables
        .iter()
        .find(|t| t["name"] == json!("users"))
        .expect("users table exposed");
    assert_eq!(users["kind"], json!("table"));
    assert_eq!(users["primary_keys"], json!(["id"]));

    let id_col = users["columns"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["name"] == json!("id"))
        .unwrap();
    assert_eq!(id_col["is_primary_key"], json!(true));
    assert_eq!(id_col["is_identity"], json!(true));
    assert_eq!(id_col["graphql_type"], json!("Int"));

    let tags_join = users["joins"]
        .as_array()
        .unwrap()
        .iter()
        .find(|j| j["name"] == json!("tags"))
        .expect("declared many-to-many join exposed");
    assert_eq!(tags_join["kind"], json!("many-to-many"));
    assert_eq!(tags_join["link_table"], json!("user_tags"));
}

#[tokio::test]
async fn two_roots_in_one_request() {
    let pool = common::pool().await;
    let schema = common::schema(&pool).await;

    let data = common::run(
        &schema,
        r#"{
            users(limit: 1) { data { id } }
            departments(limit: 1) { data { id } }
        }"#,
    )
    .await;
    assert_eq!(data["users"]["data"], json!([{"id": 1}]));
    assert_eq!(data["departments"]["data"], json!([{"id": 1}]));
}
