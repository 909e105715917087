use std::sync::Arc;

use async_graphql::dynamic::{FieldFuture, FieldValue, ResolverContext};
use async_graphql::{Context, QueryPathSegment, Value};
use sqlx::AnyPool;
use tracing::debug;

use crate::catalog::JoinKind;
use crate::emit::{Emitter, src_id};
use crate::error::BifrostError;
use crate::execute::{ResultSet, run_batch};
use crate::plan::{Planner, TableSelection};
use crate::typemap::GqlScalar;
use crate::{GatewayContext, UserContext};

/// Wrapper cursor for one executed root selection; resolves the
/// `data` / `total` / `offset` / `limit` fields of `t_result`.
pub struct TableCursor {
    pub results: Arc<ResultSet>,
    pub selection: Arc<TableSelection>,
}

/// Cursor over one row of a slab. Join fields hop from here to the child
/// slab; scalar fields read the row directly.
pub struct RowCursor {
    pub results: Arc<ResultSet>,
    pub selection: Arc<TableSelection>,
    pub slab_key: String,
    pub row: usize,
}

/// The response key (alias if the query gave one) of the field currently
/// being resolved.
fn response_key(ctx: &Context<'_>) -> Result<String, BifrostError> {
    let mut node = ctx
        .path_node
        .as_ref()
        .ok_or_else(|| BifrostError::internal("resolver called outside a query path"))?;
    loop {
        match &node.segment {
            QueryPathSegment::Name(name) => return Ok(name.to_string()),
            QueryPathSegment::Index(_) => {
                node = node.parent.ok_or_else(|| {
                    BifrostError::internal("query path has no named segment")
                })?;
            }
        }
    }
}

/// Root table field: plan the selection subtree, emit the fragment batch,
/// execute it, and hand the slabs to the cursor layer. The pooled
/// connection is released inside `run_batch`, before serialization.
pub fn table_query_resolver(gql_name: String, ctx: ResolverContext<'_>) -> FieldFuture<'_> {
    FieldFuture::new(async move {
        let gateway = ctx.data::<GatewayContext>()?;
        let pool = ctx.data::<AnyPool>()?;
        let catalog = gateway.catalog.clone();
        debug!(table = %gql_name, phase = "parsed", "query accepted");

        let table = catalog
            .table_by_gql_name(&gql_name)
            .ok_or_else(|| BifrostError::invalid_query(format!("unknown table '{gql_name}'")))?;

        let key = response_key(&ctx)?;
        let lookahead = ctx.look_ahead();
        let fields = lookahead.selection_fields();
        let field = fields
            .first()
            .ok_or_else(|| BifrostError::internal("missing selection for table field"))?;

        let planner = Planner::new(&catalog, gateway.options.default_limit);
        let selection = Arc::new(planner.plan_root(table, field, &key)?);
        debug!(key = %selection.key, phase = "transformed", "plan built");

        let fragments = Emitter::new(gateway.dialect).emit(&selection)?;
        debug!(fragments = fragments.len(), phase = "before_execute", "executing batch");

        let results = tokio::time::timeout(
            gateway.options.request_timeout,
            run_batch(pool, &fragments),
        )
        .await
        .map_err(|_| BifrostError::Timeout)??;
        debug!(key = %selection.key, phase = "after_execute", "batch complete");

        Ok(Some(FieldValue::owned_any(TableCursor {
            results: Arc::new(results),
            selection,
        })))
    })
}

pub fn result_data_resolver(ctx: ResolverContext<'_>) -> FieldFuture<'_> {
    FieldFuture::new(async move {
        let cursor = downcast_table(&ctx)?;
        let slab_key = cursor.selection.data_key();
        let slab = cursor
            .results
            .slab(&slab_key)
            .ok_or_else(|| BifrostError::internal(format!("missing slab '{slab_key}'")))?;

        let rows = (0..slab.row_count()).map(|row| {
            FieldValue::owned_any(RowCursor {
                results: cursor.results.clone(),
                selection: cursor.selection.clone(),
                slab_key: slab_key.clone(),
                row,
            })
        });
        Ok(Some(FieldValue::list(rows)))
    })
}

pub fn result_total_resolver(ctx: ResolverContext<'_>) -> FieldFuture<'_> {
    FieldFuture::new(async move {
        let cursor = downcast_table(&ctx)?;
        Ok(cursor
            .results
            .total(&cursor.selection.count_key())
            .map(Value::from))
    })
}

pub fn result_offset_resolver(ctx: ResolverContext<'_>) -> FieldFuture<'_> {
    FieldFuture::new(async move {
        let cursor = downcast_table(&ctx)?;
        Ok(Some(Value::from(cursor.selection.offset)))
    })
}

pub fn result_limit_resolver(ctx: ResolverContext<'_>) -> FieldFuture<'_> {
    FieldFuture::new(async move {
        let cursor = downcast_table(&ctx)?;
        Ok(cursor.selection.limit.map(Value::from))
    })
}

/// Scalar column field on a row type. The slab keeps raw driver values;
/// database null becomes GraphQL null here, exactly once.
pub fn column_resolver(
    column: String,
    scalar: GqlScalar,
    ctx: ResolverContext<'_>,
) -> FieldFuture<'_> {
    FieldFuture::new(async move {
        let cursor = downcast_row(&ctx)?;
        let slab = cursor.results.slab(&cursor.slab_key).ok_or_else(|| {
            BifrostError::internal(format!("missing slab '{}'", cursor.slab_key))
        })?;
        let raw = slab.value(cursor.row, &column).ok_or_else(|| {
            BifrostError::internal(format!(
                "projected column '{column}' absent from result set"
            ))
        })?;
        Ok(scalar_value(raw, scalar))
    })
}

/// Join field on a row type: locate the child slab by result key, match
/// the parent key tuple against the child's `src_id` columns, and return
/// the linked rows. Single joins take the first match.
pub fn join_resolver(ctx: ResolverContext<'_>) -> FieldFuture<'_> {
    FieldFuture::new(async move {
        let cursor = downcast_row(&ctx)?;
        let key = response_key(&ctx)?;
        let join = cursor
            .selection
            .joins
            .iter()
            .find(|j| j.key_segment() == key)
            .ok_or_else(|| {
                BifrostError::internal(format!("join '{key}' missing from plan"))
            })?;

        let parent_slab = cursor.results.slab(&cursor.slab_key).ok_or_else(|| {
            BifrostError::internal(format!("missing slab '{}'", cursor.slab_key))
        })?;
        let child_slab = cursor.results.slab(&join.child.key).ok_or_else(|| {
            BifrostError::internal(format!("missing slab '{}'", join.child.key))
        })?;

        let width = join.parent_columns.len();
        let mut tuple = Vec::with_capacity(width);
        for column in &join.parent_columns {
            let value = parent_slab.value(cursor.row, column).ok_or_else(|| {
                BifrostError::internal(format!(
                    "join parent column '{column}' absent from result set"
                ))
            })?;
            tuple.push(value.clone());
        }

        // A null key component never matches, mirroring SQL `=` semantics.
        let null_key = tuple.iter().any(|v| v.is_null());

        let matches = move |row: usize| -> bool {
            (0..width).all(|k| child_slab.value(row, &src_id(k, width)) == Some(&tuple[k]))
        };

        match join.kind {
            JoinKind::Single => {
                if null_key {
                    return Ok(None);
                }
                let found = (0..child_slab.row_count()).find(|&row| matches(row));
                Ok(found.map(|row| {
                    FieldValue::owned_any(RowCursor {
                        results: cursor.results.clone(),
                        selection: join.child.clone(),
                        slab_key: join.child.key.clone(),
                        row,
                    })
                }))
            }
            JoinKind::Many | JoinKind::ManyToMany => {
                let rows: Vec<FieldValue> = if null_key {
                    Vec::new()
                } else {
                    (0..child_slab.row_count())
                        .filter(|&row| matches(row))
                        .map(|row| {
                            FieldValue::owned_any(RowCursor {
                                results: cursor.results.clone(),
                                selection: join.child.clone(),
                                slab_key: join.child.key.clone(),
                                row,
                            })
                        })
                        .collect()
                };
                Ok(Some(FieldValue::list(rows)))
            }
        }
    })
}

fn downcast_table<'a>(ctx: &'a ResolverContext<'_>) -> Result<&'a TableCursor, BifrostError> {
    ctx.parent_value
        .try_downcast_ref::<TableCursor>()
        .map_err(|_| BifrostError::internal("expected a table cursor parent"))
}

fn downcast_row<'a>(ctx: &'a ResolverContext<'_>) -> Result<&'a RowCursor, BifrostError> {
    ctx.parent_value
        .try_downcast_ref::<RowCursor>()
        .map_err(|_| BifrostError::internal("expected a row cursor parent"))
}

/// Converts a raw slab value into the declared GraphQL scalar. Engines
/// without native booleans hand back 0/1 integers, folded here.
pub fn scalar_value(raw: &serde_json::Value, scalar: GqlScalar) -> Option<Value> {
    match raw {
        serde_json::Value::Null => None,
        other => {
            let value = match scalar {
                GqlScalar::Boolean => match other {
                    serde_json::Value::Bool(b) => Value::from(*b),
                    serde_json::Value::Number(n) => Value::from(n.as_i64().unwrap_or(0) != 0),
                    serde_json::Value::String(s) => Value::from(s == "true" || s == "1"),
                    _ => Value::from_json(other.clone()).ok()?,
                },
                GqlScalar::Float => match other {
                    serde_json::Value::Number(n) => Value::from(n.as_f64().unwrap_or(0.0)),
                    _ => Value::from_json(other.clone()).ok()?,
                },
                _ => Value::from_json(other.clone()).ok()?,
            };
            Some(value)
        }
    }
}

/// Read the per-request user context, defaulting to anonymous/empty.
pub fn user_context(ctx: &Context<'_>) -> UserContext {
    ctx.data_opt::<UserContext>().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_value_translates_null_once() {
        assert_eq!(scalar_value(&serde_json::Value::Null, GqlScalar::Int), None);
        assert_eq!(
            scalar_value(&serde_json::json!(7), GqlScalar::Int),
            Some(Value::from(7))
        );
    }

    #[test]
    fn scalar_value_folds_integer_booleans() {
        assert_eq!(
            scalar_value(&serde_json::json!(1), GqlScalar::Boolean),
            Some(Value::from(true))
        );
        assert_eq!(
            scalar_value(&serde_json::json!(0), GqlScalar::Boolean),
            Some(Value::from(false))
        );
        assert_eq!(
            scalar_value(&serde_json::json!("true"), GqlScalar::Boolean),
            Some(Value::from(true))
        );
    }

    #[test]
    fn scalar_value_widens_int_to_float() {
        assert_eq!(
            scalar_value(&serde_json::json!(3), GqlScalar::Float),
            Some(Value::from(3.0))
        );
    }
}
