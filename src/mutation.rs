use async_graphql::Value;
use async_graphql::dynamic::{FieldFuture, ResolverContext};
use chrono::{SecondsFormat, Utc};
use sqlx::AnyPool;
use tracing::debug;

use crate::GatewayContext;
use crate::catalog::{PopulateRule, TableMeta};
use crate::dialect::Dialect;
use crate::error::{BifrostError, Result};
use crate::execute::bind_value;
use crate::resolvers::user_context;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationAction {
    Insert,
    Update,
    Upsert,
    Delete,
}

impl MutationAction {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "upsert" => Ok(Self::Upsert),
            "delete" => Ok(Self::Delete),
            other => Err(BifrostError::invalid_query(format!(
                "unknown mutation action '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledStatement {
    pub sql: String,
    pub params: Vec<serde_json::Value>,
}

type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Mutation field resolver: `t(action:, data:, where:)`. Returns the new
/// identity for inserts (when the table has one) and the affected row
/// count otherwise.
pub fn table_mutation_resolver(gql_name: String, ctx: ResolverContext<'_>) -> FieldFuture<'_> {
    FieldFuture::new(async move {
        let gateway = ctx.data::<GatewayContext>()?;
        let pool = ctx.data::<AnyPool>()?;
        let catalog = gateway.catalog.clone();

        let table = catalog
            .table_by_gql_name(&gql_name)
            .ok_or_else(|| BifrostError::invalid_query(format!("unknown table '{gql_name}'")))?;
        if !table.is_editable() {
            return Err(BifrostError::MutationNotAllowed(table.gql_name.clone()).into());
        }

        let action = MutationAction::parse(ctx.args.try_get("action")?.enum_name()?)?;
        let data = argument_map(&ctx, "data")?;
        let where_ = argument_map(&ctx, "where")?;

        let user = user_context(&ctx);
        let user_value = user.get(&gateway.options.audit_user_key).cloned();
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        let outcome = tokio::time::timeout(
            gateway.options.request_timeout,
            execute_action(
                pool,
                gateway.dialect,
                table,
                action,
                data,
                where_,
                user_value,
                now,
            ),
        )
        .await
        .map_err(|_| BifrostError::Timeout)??;

        Ok(Some(Value::from(outcome)))
    })
}

fn argument_map(ctx: &ResolverContext<'_>, name: &str) -> Result<JsonMap> {
    let Some(accessor) = ctx.args.get(name) else {
        return Ok(JsonMap::new());
    };
    if accessor.is_null() {
        return Ok(JsonMap::new());
    }
    let value = accessor
        .object()
        .map_err(|e| BifrostError::invalid_query(e.message))?;
    let mut map = JsonMap::new();
    for (key, entry) in value.iter() {
        let json: serde_json::Value = entry.deserialize().map_err(|_| {
            BifrostError::invalid_query(format!("unrepresentable value for '{key}'"))
        })?;
        map.insert(key.to_string(), json);
    }
    Ok(map)
}

#[allow(clippy::too_many_arguments)]
async fn execute_action(
    pool: &AnyPool,
    dialect: &'static dyn Dialect,
    table: &TableMeta,
    action: MutationAction,
    data: JsonMap,
    where_: JsonMap,
    user: Option<serde_json::Value>,
    now: String,
) -> Result<i64> {
    let mut conn = pool.acquire().await?;

    match action {
        MutationAction::Insert => {
            let statements = compile_insert(dialect, table, &data, user.as_ref(), &now)?;
            run_insert(&mut conn, &statements).await
        }
        MutationAction::Update => {
            let statement = compile_update(dialect, table, &data, &where_, user.as_ref(), &now)?;
            Ok(exec_statement(&mut conn, &statement).await? as i64)
        }
        MutationAction::Delete => {
            let statement = compile_delete(dialect, table, &where_, user.as_ref(), &now)?;
            Ok(exec_statement(&mut conn, &statement).await? as i64)
        }
        MutationAction::Upsert => {
            // All primary keys present in the data: try the update first
            // and fall back to an insert when nothing matched, on the same
            // connection.
            let mut key = where_;
            if key.is_empty() {
                for pk in &table.primary_keys {
                    if let Some(value) = data.get(pk) {
                        key.insert(pk.clone(), value.clone());
                    }
                }
            }
            if key.len() == table.primary_keys.len() {
                let update_data: JsonMap = data
                    .iter()
                    .filter(|(name, _)| !table.primary_keys.contains(name))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                if !update_data.is_empty() {
                    let statement =
                        compile_update(dialect, table, &update_data, &key, user.as_ref(), &now)?;
                    let affected = exec_statement(&mut conn, &statement).await?;
                    if affected > 0 {
                        return Ok(affected as i64);
                    }
                }
            }
            let statements = compile_insert(dialect, table, &data, user.as_ref(), &now)?;
            run_insert(&mut conn, &statements).await
        }
    }
}

async fn exec_statement(
    conn: &mut sqlx::pool::PoolConnection<sqlx::Any>,
    statement: &CompiledStatement,
) -> Result<u64> {
    debug!(sql = %statement.sql, "mutation statement");
    let mut query = sqlx::query(&statement.sql);
    for param in &statement.params {
        query = bind_value(query, param);
    }
    Ok(query.execute(&mut **conn).await?.rows_affected())
}

/// Runs the INSERT then, when present, the identity-retrieval SELECT on
/// the same connection; the identity wins as the mutation result.
async fn run_insert(
    conn: &mut sqlx::pool::PoolConnection<sqlx::Any>,
    statements: &[CompiledStatement],
) -> Result<i64> {
    let mut identity = None;
    let mut affected = 0;
    for statement in statements {
        if statement.sql.starts_with("SELECT") {
            debug!(sql = %statement.sql, "mutation statement");
            let row: (i64,) = sqlx::query_as::<_, (i64,)>(&statement.sql)
                .fetch_one(&mut **conn)
                .await?;
            identity = Some(row.0);
        } else {
            affected = exec_statement(conn, statement).await?;
        }
    }
    Ok(identity.unwrap_or(affected as i64))
}

/// INSERT plus, when the table has an identity column, the dialect's
/// last-inserted-id retrieval. Identity, read-only, and audit columns are
/// never taken from the client.
pub fn compile_insert(
    dialect: &dyn Dialect,
    table: &TableMeta,
    data: &JsonMap,
    user: Option<&serde_json::Value>,
    now: &str,
) -> Result<Vec<CompiledStatement>> {
    let mut columns = Vec::new();
    let mut params = Vec::new();

    for (name, value) in data {
        let column = table
            .column(name)
            .ok_or_else(|| BifrostError::invalid_query(format!("unknown column '{name}'")))?;
        if column.is_identity || column.is_read_only || column.populate.is_some() {
            continue;
        }
        columns.push(dialect.quote(&column.name));
        params.push(value.clone());
    }

    for column in &table.columns {
        match column.populate {
            Some(PopulateRule::CreatedOn | PopulateRule::UpdatedOn) => {
                columns.push(dialect.quote(&column.name));
                params.push(serde_json::Value::from(now));
            }
            Some(PopulateRule::CreatedBy | PopulateRule::UpdatedBy) => {
                columns.push(dialect.quote(&column.name));
                params.push(user.cloned().unwrap_or(serde_json::Value::Null));
            }
            _ => {}
        }
    }

    if columns.is_empty() {
        return Err(BifrostError::invalid_query("no insertable columns"));
    }

    let placeholders = (1..=params.len())
        .map(|n| dialect.placeholder(n))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        dialect.table_ref(&table.schema, &table.name),
        columns.join(", "),
        placeholders
    );

    let mut statements = vec![CompiledStatement { sql, params }];
    if table.identity_column.is_some() {
        statements.push(CompiledStatement {
            sql: dialect.last_insert_id_sql().to_string(),
            params: vec![],
        });
    }
    Ok(statements)
}

pub fn compile_update(
    dialect: &dyn Dialect,
    table: &TableMeta,
    data: &JsonMap,
    where_: &JsonMap,
    user: Option<&serde_json::Value>,
    now: &str,
) -> Result<CompiledStatement> {
    let mut params = Vec::new();
    let mut sets = Vec::new();

    for (name, value) in data {
        let column = table
            .column(name)
            .ok_or_else(|| BifrostError::invalid_query(format!("unknown column '{name}'")))?;
        if column.is_identity || column.is_read_only || column.populate.is_some() {
            continue;
        }
        params.push(value.clone());
        sets.push(format!(
            "{} = {}",
            dialect.quote(&column.name),
            dialect.placeholder(params.len())
        ));
    }

    for column in &table.columns {
        match column.populate {
            Some(PopulateRule::UpdatedOn) => {
                params.push(serde_json::Value::from(now));
                sets.push(format!(
                    "{} = {}",
                    dialect.quote(&column.name),
                    dialect.placeholder(params.len())
                ));
            }
            Some(PopulateRule::UpdatedBy) => {
                params.push(user.cloned().unwrap_or(serde_json::Value::Null));
                sets.push(format!(
                    "{} = {}",
                    dialect.quote(&column.name),
                    dialect.placeholder(params.len())
                ));
            }
            _ => {}
        }
    }

    if sets.is_empty() {
        return Err(BifrostError::invalid_query("no updatable columns"));
    }

    let where_sql = primary_key_where(dialect, table, where_, &mut params)?;
    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        dialect.table_ref(&table.schema, &table.name),
        sets.join(", "),
        where_sql
    );
    Ok(CompiledStatement { sql, params })
}

/// DELETE, or the soft-delete rewrite: an UPDATE stamping the configured
/// deleted-on/by columns. The WHERE is taken unchanged, so a key matching
/// several rows soft-deletes all of them.
pub fn compile_delete(
    dialect: &dyn Dialect,
    table: &TableMeta,
    where_: &JsonMap,
    user: Option<&serde_json::Value>,
    now: &str,
) -> Result<CompiledStatement> {
    let mut params = Vec::new();

    if table.soft_delete {
        if let Some(deleted_on) = table.deleted_on_column() {
            let mut sets = Vec::new();
            params.push(serde_json::Value::from(now));
            sets.push(format!(
                "{} = {}",
                dialect.quote(&deleted_on.name),
                dialect.placeholder(params.len())
            ));
            if let Some(deleted_by) = table.deleted_by_column() {
                params.push(user.cloned().unwrap_or(serde_json::Value::Null));
                sets.push(format!(
                    "{} = {}",
                    dialect.quote(&deleted_by.name),
                    dialect.placeholder(params.len())
                ));
            }
            let where_sql = primary_key_where(dialect, table, where_, &mut params)?;
            let sql = format!(
                "UPDATE {} SET {} WHERE {}",
                dialect.table_ref(&table.schema, &table.name),
                sets.join(", "),
                where_sql
            );
            return Ok(CompiledStatement { sql, params });
        }
    }

    let where_sql = primary_key_where(dialect, table, where_, &mut params)?;
    let sql = format!(
        "DELETE FROM {} WHERE {}",
        dialect.table_ref(&table.schema, &table.name),
        where_sql
    );
    Ok(CompiledStatement { sql, params })
}

/// Renders the `where` argument into a conjunction over the full primary
/// key. Incomplete keys are rejected, unknown keys too.
fn primary_key_where(
    dialect: &dyn Dialect,
    table: &TableMeta,
    where_: &JsonMap,
    params: &mut Vec<serde_json::Value>,
) -> Result<String> {
    if table.primary_keys.is_empty() {
        return Err(BifrostError::MutationNotAllowed(table.gql_name.clone()));
    }
    for key in where_.keys() {
        if !table.primary_keys.contains(key) {
            return Err(BifrostError::invalid_query(format!(
                "'{key}' is not a primary key column of '{}'",
                table.gql_name
            )));
        }
    }

    let mut terms = Vec::new();
    for pk in &table.primary_keys {
        let value = where_
            .get(pk)
            .ok_or_else(|| BifrostError::MissingPk(format!("{}.{}", table.gql_name, pk)))?;
        params.push(value.clone());
        terms.push(format!(
            "{} = {}",
            dialect.quote(pk),
            dialect.placeholder(params.len())
        ));
    }
    Ok(terms.join(" AND "))
}
