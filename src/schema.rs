use async_graphql::Value;
use async_graphql::dynamic::{
    Enum, Field, FieldFuture, FieldValue, InputObject, InputValue, Object, TypeRef,
};
use tracing::{debug, warn};

use crate::GatewayContext;
use crate::catalog::{Catalog, ColumnMeta, JoinKind, JoinMeta, TableKind, TableMeta};
use crate::dialect::DialectKind;
use crate::error::{BifrostError, Result};
use crate::mutation::table_mutation_resolver;
use crate::resolvers::{
    column_resolver, join_resolver, result_data_resolver, result_limit_resolver,
    result_offset_resolver, result_total_resolver, table_query_resolver,
};
use crate::typemap::{GqlScalar, insert_scalar_for};
use crate::utils::is_valid_graphql_identifier;

/// Everything synthesized from one catalog snapshot, ready to be
/// registered on a schema builder.
pub struct SynthesizedSchema {
    pub query: Object,
    pub mutation: Option<Object>,
    pub objects: Vec<Object>,
    pub inputs: Vec<InputObject>,
    pub enums: Vec<Enum>,
}

fn node_type(table: &TableMeta) -> String {
    format!("{}_node", table.gql_name)
}

fn result_type(table: &TableMeta) -> String {
    format!("{}_result", table.gql_name)
}

fn filter_type(table: &TableMeta) -> String {
    format!("{}_filter", table.gql_name)
}

fn insert_input_type(table: &TableMeta) -> String {
    format!("{}_insert_input", table.gql_name)
}

fn pk_input_type(table: &TableMeta) -> String {
    format!("{}_pk_input", table.gql_name)
}

fn ops_input_name(scalar: GqlScalar) -> &'static str {
    match scalar {
        GqlScalar::String => "string_filter_ops",
        GqlScalar::Int => "int_filter_ops",
        GqlScalar::Float => "float_filter_ops",
        GqlScalar::Boolean => "boolean_filter_ops",
    }
}

/// Builds the full dynamic schema surface for one catalog snapshot.
pub fn synthesize(catalog: &Catalog, dialect: DialectKind) -> Result<SynthesizedSchema> {
    let mut query = Object::new("Query");
    let mut mutation = Object::new("Mutation");
    let mut has_mutations = false;

    let mut objects = Vec::new();
    let mut inputs = filter_ops_inputs();
    let mut enums = Vec::new();

    // Join fields may only reference tables that actually get types.
    let built: std::collections::HashSet<String> = catalog
        .visible_tables()
        .filter(|t| !usable_columns(t).is_empty())
        .map(|t| t.gql_name.clone())
        .collect();

    for table in catalog.visible_tables() {
        let columns = usable_columns(table);
        if columns.is_empty() {
            warn!(table = %table.name, "table has no GraphQL-safe columns, skipping");
            continue;
        }
        debug!(table = %table.name, "synthesizing GraphQL types");

        objects.push(build_node(catalog, table, &columns, &built));
        objects.push(build_result(table));
        inputs.push(build_filter_input(catalog, table, &columns, &built));
        query = query.field(build_query_field(table));

        if table.is_editable() {
            if let Some((insert_input, pk_input, field)) =
                build_mutation(table, &columns, dialect)
            {
                inputs.push(insert_input);
                inputs.push(pk_input);
                mutation = mutation.field(field);
                has_mutations = true;
            }
        }
    }

    query = query.field(db_schema_field());
    objects.extend(db_schema_objects());

    if has_mutations {
        enums.push(mutation_action_enum());
    }

    Ok(SynthesizedSchema {
        query,
        mutation: has_mutations.then_some(mutation),
        objects,
        inputs,
        enums,
    })
}

/// Columns whose names survive as GraphQL identifiers; the rest are
/// dropped from the synthesized types (with a warning) rather than
/// failing the schema build.
fn usable_columns(table: &TableMeta) -> Vec<ColumnMeta> {
    table
        .columns
        .iter()
        .filter(|col| {
            let ok = is_valid_graphql_identifier(&col.name);
            if !ok {
                warn!(table = %table.name, column = %col.name, "column name is not GraphQL-safe, dropping");
            }
            ok
        })
        .cloned()
        .collect()
}

fn scalar_type_ref(scalar: GqlScalar, non_null: bool) -> TypeRef {
    if non_null {
        TypeRef::named_nn(scalar.type_name())
    } else {
        TypeRef::named(scalar.type_name())
    }
}

fn build_node(
    catalog: &Catalog,
    table: &TableMeta,
    columns: &[ColumnMeta],
    built: &std::collections::HashSet<String>,
) -> Object {
    let mut node = Object::new(node_type(table));

    for col in columns {
        let column = col.name.clone();
        let scalar = col.scalar;
        node = node.field(Field::new(
            &col.name,
            scalar_type_ref(col.scalar, !col.nullable),
            move |ctx| column_resolver(column.clone(), scalar, ctx),
        ));
    }

    for join in &table.joins {
        let Some(dest) = visible_join_dest(catalog, join) else {
            continue;
        };
        if !built.contains(&dest.gql_name) {
            continue;
        }
        if !is_valid_graphql_identifier(&join.name) {
            warn!(table = %table.name, join = %join.name, "join name is not GraphQL-safe, dropping");
            continue;
        }
        if columns.iter().any(|c| c.name == join.name) {
            warn!(table = %table.name, join = %join.name, "join name shadows a column, dropping");
            continue;
        }
        let field = match join.kind {
            // Single joins are nullable: an orphaned key resolves to null.
            JoinKind::Single => Field::new(
                &join.name,
                TypeRef::named(node_type(dest)),
                join_resolver,
            ),
            JoinKind::Many | JoinKind::ManyToMany => Field::new(
                &join.name,
                TypeRef::named_nn_list_nn(node_type(dest)),
                join_resolver,
            )
            .argument(InputValue::new("filter", TypeRef::named(filter_type(dest))))
            .argument(InputValue::new("limit", TypeRef::named(TypeRef::INT)))
            .argument(InputValue::new("offset", TypeRef::named(TypeRef::INT)))
            // `[+-]column` strings or `column_asc`/`column_desc`.
            .argument(InputValue::new(
                "sort",
                TypeRef::named_nn_list(TypeRef::STRING),
            )),
        };
        node = node.field(field);
    }

    node
}

fn build_result(table: &TableMeta) -> Object {
    Object::new(result_type(table))
        .field(Field::new(
            "data",
            TypeRef::named_nn_list_nn(node_type(table)),
            result_data_resolver,
        ))
        .field(Field::new(
            "total",
            TypeRef::named(TypeRef::INT),
            result_total_resolver,
        ))
        .field(Field::new(
            "offset",
            TypeRef::named(TypeRef::INT),
            result_offset_resolver,
        ))
        .field(Field::new(
            "limit",
            TypeRef::named(TypeRef::INT),
            result_limit_resolver,
        ))
}

fn build_filter_input(
    catalog: &Catalog,
    table: &TableMeta,
    columns: &[ColumnMeta],
    built: &std::collections::HashSet<String>,
) -> InputObject {
    let name = filter_type(table);
    let mut input = InputObject::new(&name)
        .field(InputValue::new("_and", TypeRef::named_nn_list(&name)))
        .field(InputValue::new("_or", TypeRef::named_nn_list(&name)))
        .field(InputValue::new("_not", TypeRef::named(&name)));

    for col in columns {
        input = input.field(InputValue::new(
            &col.name,
            TypeRef::named(ops_input_name(col.scalar)),
        ));
    }

    // Filter-through-join: the join field takes the destination's filter.
    for join in &table.joins {
        let Some(dest) = visible_join_dest(catalog, join) else {
            continue;
        };
        if built.contains(&dest.gql_name)
            && is_valid_graphql_identifier(&join.name)
            && !columns.iter().any(|c| c.name == join.name)
        {
            input = input.field(InputValue::new(
                &join.name,
                TypeRef::named(filter_type(dest)),
            ));
        }
    }

    input
}

fn build_query_field(table: &TableMeta) -> Field {
    let gql_name = table.gql_name.clone();
    Field::new(
        &table.gql_name,
        TypeRef::named_nn(result_type(table)),
        move |ctx| table_query_resolver(gql_name.clone(), ctx),
    )
    .argument(InputValue::new("filter", TypeRef::named(filter_type(table))))
    .argument(InputValue::new("limit", TypeRef::named(TypeRef::INT)))
    .argument(InputValue::new("offset", TypeRef::named(TypeRef::INT)))
    // `[+-]column` strings or `column_asc`/`column_desc`.
    .argument(InputValue::new(
        "sort",
        TypeRef::named_nn_list(TypeRef::STRING),
    ))
}

fn build_mutation(
    table: &TableMeta,
    columns: &[ColumnMeta],
    dialect: DialectKind,
) -> Option<(InputObject, InputObject, Field)> {
    let mut insert_input = InputObject::new(insert_input_type(table));
    let mut insertable = 0;
    for col in columns {
        if col.is_identity || col.is_read_only || col.populate.is_some() {
            continue;
        }
        let scalar = insert_scalar_for(dialect, &col.data_type);
        insert_input = insert_input.field(InputValue::new(
            &col.name,
            scalar_type_ref(scalar, !col.nullable && !col.has_default),
        ));
        insertable += 1;
    }
    if insertable == 0 {
        warn!(table = %table.name, "no insertable columns, skipping mutation field");
        return None;
    }

    let mut pk_input = InputObject::new(pk_input_type(table));
    for pk in &table.primary_keys {
        let scalar = columns.iter().find(|c| &c.name == pk).map(|c| c.scalar)?;
        pk_input = pk_input.field(InputValue::new(pk, TypeRef::named_nn(scalar.type_name())));
    }

    let gql_name = table.gql_name.clone();
    let field = Field::new(
        &table.gql_name,
        TypeRef::named(TypeRef::INT),
        move |ctx| table_mutation_resolver(gql_name.clone(), ctx),
    )
    .argument(InputValue::new(
        "action",
        TypeRef::named_nn("mutation_action"),
    ))
    .argument(InputValue::new(
        "data",
        TypeRef::named(insert_input_type(table)),
    ))
    .argument(InputValue::new(
        "where",
        TypeRef::named(pk_input_type(table)),
    ));

    Some((insert_input, pk_input, field))
}

fn visible_join_dest<'a>(catalog: &'a Catalog, join: &JoinMeta) -> Option<&'a TableMeta> {
    catalog
        .join_dest(join)
        .filter(|dest| dest.visibility == crate::catalog::Visibility::Visible)
}

fn mutation_action_enum() -> Enum {
    Enum::new("mutation_action")
        .item("insert")
        .item("update")
        .item("upsert")
        .item("delete")
}

/// The per-scalar operator inputs shared by every table filter.
fn filter_ops_inputs() -> Vec<InputObject> {
    let comparable = |name: &str, scalar: &str| {
        InputObject::new(name)
            .field(InputValue::new("_eq", TypeRef::named(scalar)))
            .field(InputValue::new("_neq", TypeRef::named(scalar)))
            .field(InputValue::new("_gt", TypeRef::named(scalar)))
            .field(InputValue::new("_gte", TypeRef::named(scalar)))
            .field(InputValue::new("_lt", TypeRef::named(scalar)))
            .field(InputValue::new("_lte", TypeRef::named(scalar)))
            .field(InputValue::new("_in", TypeRef::named_nn_list(scalar)))
            .field(InputValue::new("_nin", TypeRef::named_nn_list(scalar)))
            .field(InputValue::new("_is_null", TypeRef::named(TypeRef::BOOLEAN)))
    };

    let string_ops = comparable("string_filter_ops", TypeRef::STRING)
        .field(InputValue::new("_contains", TypeRef::named(TypeRef::STRING)))
        .field(InputValue::new(
            "_starts_with",
            TypeRef::named(TypeRef::STRING),
        ))
        .field(InputValue::new(
            "_ends_with",
            TypeRef::named(TypeRef::STRING),
        ));

    let boolean_ops = InputObject::new("boolean_filter_ops")
        .field(InputValue::new("_eq", TypeRef::named(TypeRef::BOOLEAN)))
        .field(InputValue::new("_neq", TypeRef::named(TypeRef::BOOLEAN)))
        .field(InputValue::new("_is_null", TypeRef::named(TypeRef::BOOLEAN)));

    vec![
        string_ops,
        comparable("int_filter_ops", TypeRef::INT),
        comparable("float_filter_ops", TypeRef::FLOAT),
        boolean_ops,
    ]
}

// --- `_dbSchema` catalog exposure ----------------------------------------

fn db_schema_field() -> Field {
    Field::new(
        "_dbSchema",
        TypeRef::named_nn_list_nn("db_table"),
        |ctx| {
            FieldFuture::new(async move {
                let gateway = ctx.data::<GatewayContext>()?;
                let tables: Vec<FieldValue> = gateway
                    .catalog
                    .visible_tables()
                    .map(|t| FieldValue::owned_any(t.clone()))
                    .collect();
                Ok(Some(FieldValue::list(tables)))
            })
        },
    )
}

fn db_schema_objects() -> Vec<Object> {
    let table_obj = Object::new("db_table")
        .field(Field::new("schema", TypeRef::named(TypeRef::STRING), |ctx| {
            FieldFuture::new(async move {
                let t = downcast_table_meta(&ctx)?;
                Ok((!t.schema.is_empty()).then(|| Value::from(t.schema.clone())))
            })
        }))
        .field(Field::new("name", TypeRef::named_nn(TypeRef::STRING), |ctx| {
            FieldFuture::new(async move {
                let t = downcast_table_meta(&ctx)?;
                Ok(Some(Value::from(t.name.clone())))
            })
        }))
        .field(Field::new("kind", TypeRef::named_nn(TypeRef::STRING), |ctx| {
            FieldFuture::new(async move {
                let t = downcast_table_meta(&ctx)?;
                let kind = match t.kind {
                    TableKind::BaseTable => "table",
                    TableKind::View => "view",
                };
                Ok(Some(Value::from(kind)))
            })
        }))
        .field(Field::new(
            "label_column",
            TypeRef::named(TypeRef::STRING),
            |ctx| {
                FieldFuture::new(async move {
                    let t = downcast_table_meta(&ctx)?;
                    Ok(t.label_column.clone().map(Value::from))
                })
            },
        ))
        .field(Field::new(
            "primary_keys",
            TypeRef::named_nn_list_nn(TypeRef::STRING),
            |ctx| {
                FieldFuture::new(async move {
                    let t = downcast_table_meta(&ctx)?;
                    Ok(Some(Value::List(
                        t.primary_keys.iter().map(|k| Value::from(k.clone())).collect(),
                    )))
                })
            },
        ))
        .field(Field::new(
            "columns",
            TypeRef::named_nn_list_nn("db_column"),
            |ctx| {
                FieldFuture::new(async move {
                    let t = downcast_table_meta(&ctx)?;
                    let cols: Vec<FieldValue> = t
                        .columns
                        .iter()
                        .map(|c| FieldValue::owned_any(c.clone()))
                        .collect();
                    Ok(Some(FieldValue::list(cols)))
                })
            },
        ))
        .field(Field::new(
            "joins",
            TypeRef::named_nn_list_nn("db_join"),
            |ctx| {
                FieldFuture::new(async move {
                    let t = downcast_table_meta(&ctx)?;
                    let joins: Vec<FieldValue> = t
                        .joins
                        .iter()
                        .map(|j| FieldValue::owned_any(j.clone()))
                        .collect();
                    Ok(Some(FieldValue::list(joins)))
                })
            },
        ));

    let column_obj = Object::new("db_column")
        .field(Field::new("name", TypeRef::named_nn(TypeRef::STRING), |ctx| {
            FieldFuture::new(async move {
                let c = downcast_column_meta(&ctx)?;
                Ok(Some(Value::from(c.name.clone())))
            })
        }))
        .field(Field::new(
            "db_type",
            TypeRef::named_nn(TypeRef::STRING),
            |ctx| {
                FieldFuture::new(async move {
                    let c = downcast_column_meta(&ctx)?;
                    Ok(Some(Value::from(c.data_type.clone())))
                })
            },
        ))
        .field(Field::new(
            "graphql_type",
            TypeRef::named_nn(TypeRef::STRING),
            |ctx| {
                FieldFuture::new(async move {
                    let c = downcast_column_meta(&ctx)?;
                    Ok(Some(Value::from(c.scalar.type_name())))
                })
            },
        ))
        .field(Field::new(
            "nullable",
            TypeRef::named_nn(TypeRef::BOOLEAN),
            |ctx| {
                FieldFuture::new(async move {
                    let c = downcast_column_meta(&ctx)?;
                    Ok(Some(Value::from(c.nullable)))
                })
            },
        ))
        .field(Field::new(
            "is_primary_key",
            TypeRef::named_nn(TypeRef::BOOLEAN),
            |ctx| {
                FieldFuture::new(async move {
                    let c = downcast_column_meta(&ctx)?;
                    Ok(Some(Value::from(c.is_primary_key)))
                })
            },
        ))
        .field(Field::new(
            "is_identity",
            TypeRef::named_nn(TypeRef::BOOLEAN),
            |ctx| {
                FieldFuture::new(async move {
                    let c = downcast_column_meta(&ctx)?;
                    Ok(Some(Value::from(c.is_identity)))
                })
            },
        ))
        .field(Field::new(
            "is_read_only",
            TypeRef::named_nn(TypeRef::BOOLEAN),
            |ctx| {
                FieldFuture::new(async move {
                    let c = downcast_column_meta(&ctx)?;
                    Ok(Some(Value::from(c.is_read_only)))
                })
            },
        ));

    let join_obj = Object::new("db_join")
        .field(Field::new("name", TypeRef::named_nn(TypeRef::STRING), |ctx| {
            FieldFuture::new(async move {
                let j = downcast_join_meta(&ctx)?;
                Ok(Some(Value::from(j.name.clone())))
            })
        }))
        .field(Field::new("kind", TypeRef::named_nn(TypeRef::STRING), |ctx| {
            FieldFuture::new(async move {
                let j = downcast_join_meta(&ctx)?;
                Ok(Some(Value::from(j.kind.as_str())))
            })
        }))
        .field(Field::new(
            "dest_table",
            TypeRef::named_nn(TypeRef::STRING),
            |ctx| {
                FieldFuture::new(async move {
                    let j = downcast_join_meta(&ctx)?;
                    Ok(Some(Value::from(j.dest_table.clone())))
                })
            },
        ))
        .field(Field::new(
            "source_columns",
            TypeRef::named_nn_list_nn(TypeRef::STRING),
            |ctx| {
                FieldFuture::new(async move {
                    let j = downcast_join_meta(&ctx)?;
                    Ok(Some(Value::List(
                        j.source_columns.iter().map(|c| Value::from(c.clone())).collect(),
                    )))
                })
            },
        ))
        .field(Field::new(
            "dest_columns",
            TypeRef::named_nn_list_nn(TypeRef::STRING),
            |ctx| {
                FieldFuture::new(async move {
                    let j = downcast_join_meta(&ctx)?;
                    Ok(Some(Value::List(
                        j.dest_columns.iter().map(|c| Value::from(c.clone())).collect(),
                    )))
                })
            },
        ))
        .field(Field::new(
            "link_table",
            TypeRef::named(TypeRef::STRING),
            |ctx| {
                FieldFuture::new(async move {
                    let j = downcast_join_meta(&ctx)?;
                    Ok(j.link_table.clone().map(Value::from))
                })
            },
        ));

    vec![table_obj, column_obj, join_obj]
}

fn downcast_table_meta<'a>(
    ctx: &'a async_graphql::dynamic::ResolverContext<'_>,
) -> Result<&'a TableMeta> {
    ctx.parent_value
        .try_downcast_ref::<TableMeta>()
        .map_err(|_| BifrostError::internal("expected a table meta parent"))
}

fn downcast_column_meta<'a>(
    ctx: &'a async_graphql::dynamic::ResolverContext<'_>,
) -> Result<&'a ColumnMeta> {
    ctx.parent_value
        .try_downcast_ref::<ColumnMeta>()
        .map_err(|_| BifrostError::internal("expected a column meta parent"))
}

fn downcast_join_meta<'a>(
    ctx: &'a async_graphql::dynamic::ResolverContext<'_>,
) -> Result<&'a JoinMeta> {
    ctx.parent_value
        .try_downcast_ref::<JoinMeta>()
        .map_err(|_| BifrostError::internal("expected a join meta parent"))
}
