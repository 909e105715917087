//! Shared fixture for the end-to-end tests: an in-memory SQLite database
//! with the users/departments/tags catalog, fronted by a synthesized
//! schema.
#![allow(dead_code)]

use std::sync::Arc;

use async_graphql::dynamic::Schema;
use bifrostql::BifrostQL;
use bifrostql::config::BifrostConfig;
use sqlx::AnyPool;

pub async fn pool() -> AnyPool {
    sqlx::any::install_default_drivers();
    // One connection: every statement sees the same in-memory database.
    let pool = sqlx::pool::PoolOptions::<sqlx::Any>::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");

    let ddl = [
        "CREATE TABLE departments (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        "CREATE TABLE users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            deptId INTEGER REFERENCES departments(id),
            createdOn TEXT,
            createdBy TEXT,
            deletedOn TEXT,
            deletedBy TEXT
        )",
        "CREATE TABLE tags (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        "CREATE TABLE user_tags (
            user_id INTEGER NOT NULL REFERENCES users(id),
            tag_id INTEGER NOT NULL REFERENCES tags(id),
            PRIMARY KEY (user_id, tag_id)
        )",
        "INSERT INTO departments (id, name) VALUES (1, 'Engineering'), (2, 'Sales'), (3, 'Marketing')",
        "INSERT INTO users (id, name, deptId) VALUES
            (1, 'Alice', 1), (2, 'Bob', 1), (3, 'Carol', 2), (4, 'Dave', NULL)",
        "INSERT INTO tags (id, name) VALUES (1, 'admin'), (2, 'oncall')",
        "INSERT INTO user_tags (user_id, tag_id) VALUES (1, 1), (1, 2), (3, 2)",
    ];
    for statement in ddl {
        sqlx::query(statement).execute(&pool).await.expect(statement);
    }

    pool
}

pub fn test_config() -> BifrostConfig {
    let mut config = BifrostConfig::default();
    config.database.dialect = "sqlite".to_string();
    config.metadata = vec![
        "*.departments { join: members many users(id -> deptId) }".to_string(),
        "*.users { join: tags many-to-many tags(id -> id) via user_tags(user_id -> tag_id) }"
            .to_string(),
        "*.user_tags { visibility: hidden }".to_string(),
        "*.users.createdOn { populate: created-on }".to_string(),
        "*.users.createdBy { populate: created-by }".to_string(),
    ];
    config
}

pub async fn schema_with(config: BifrostConfig, pool: &AnyPool) -> Schema {
    let gateway = BifrostQL::new(config);
    let catalog = Arc::new(gateway.introspect(pool).await.expect("introspect"));
    gateway
        .build_schema(catalog, pool.clone())
        .expect("schema build")
}

pub async fn schema(pool: &AnyPool) -> Schema {
    schema_with(test_config(), pool).await
}

pub async fn run(schema: &Schema, query: &str) -> serde_json::Value {
    let response = schema.execute(query).await;
    assert!(
        response.errors.is_empty(),
        "unexpected errors: {:?}",
        response.errors
    );
    response.data.into_json().expect("json data")
}

/// Executes a query expected to fail and returns the first error's
/// `extensions.code`.
pub async fn run_err(schema: &Schema, query: &str) -> String {
    let response = schema.execute(query).await;
    let error = response.errors.first().expect("expected an error");
    error
        .extensions
        .as_ref()
        .and_then(|ext| ext.get("code"))
        .map(|code| code.to_string().trim_matches('"').to_string())
        .unwrap_or_default()
}
