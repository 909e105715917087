use std::sync::Arc;

use async_graphql::SelectionField;
use tracing::debug;

use crate::catalog::{Catalog, JoinKind, JoinMeta, TableMeta};
use crate::dialect::FilterOp;
use crate::error::{BifrostError, Result};
use crate::typemap::GqlScalar;
use crate::utils::{SortDir, parse_sort_entry};

/// Recursive filter expression, shaped like the `t_filter` input it was
/// parsed from.
#[derive(Debug, Clone)]
pub enum FilterExpr {
    Column {
        column: String,
        op: FilterOp,
        value: serde_json::Value,
    },
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
    /// A filter that pierces into a related table; the join carries the
    /// paired columns and (for many-to-many) the intermediate table.
    Join {
        join: JoinMeta,
        sub: Box<FilterExpr>,
    },
}

/// One node of the per-request plan tree: the selection against a single
/// table, restricted to what the GraphQL selection set asked for.
#[derive(Debug, Clone)]
pub struct TableSelection {
    pub schema: String,
    pub table: String,
    /// Result-key segment: GraphQL alias if given, field name otherwise.
    pub key: String,
    pub filter: Option<FilterExpr>,
    pub sort: Vec<(String, SortDir)>,
    /// `None` means unbounded (`limit: -1`).
    pub limit: Option<i64>,
    pub offset: i64,
    pub include_total: bool,
    /// Ordered, deduplicated column list; always contains the primary keys
    /// and every child join's parent columns.
    pub projection: Vec<String>,
    pub joins: Vec<TableJoin>,
}

/// Link between a parent selection and a child selection. The parent is
/// reachable as the node owning this join during emission; no back
/// pointer is stored (the join graph over tables is cyclic).
#[derive(Debug, Clone)]
pub struct TableJoin {
    pub name: String,
    pub alias: Option<String>,
    pub kind: JoinKind,
    pub parent_columns: Vec<String>,
    pub child_columns: Vec<String>,
    pub link_table: Option<String>,
    pub link_parent_columns: Vec<String>,
    pub link_child_columns: Vec<String>,
    /// Shared so result cursors can hold the child node without cloning
    /// the subtree.
    pub child: Arc<TableSelection>,
}

impl TableJoin {
    pub fn key_segment(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

impl TableSelection {
    pub fn data_key(&self) -> String {
        format!("{}.data", self.key)
    }

    pub fn count_key(&self) -> String {
        format!("{}.count", self.key)
    }
}

pub struct Planner<'a> {
    catalog: &'a Catalog,
    default_limit: i64,
}

impl<'a> Planner<'a> {
    pub fn new(catalog: &'a Catalog, default_limit: i64) -> Self {
        Self {
            catalog,
            default_limit,
        }
    }

    /// Plans one root table field. The field's children are the
    /// `data`/`total` wrapper selections.
    pub fn plan_root(
        &self,
        table: &TableMeta,
        field: &SelectionField<'_>,
        response_key: &str,
    ) -> Result<TableSelection> {
        let args = field_arguments(field)?;

        let mut row_fields = Vec::new();
        let mut include_total = false;
        for child in field.selection_set() {
            match child.name() {
                "data" => row_fields.extend(child.selection_set()),
                "total" => include_total = true,
                // offset/limit echo the applied paging; nothing to plan.
                _ => {}
            }
        }

        let mut selection =
            self.plan_table(table, &args, row_fields, response_key.to_string(), true)?;
        selection.include_total = include_total;
        debug!(table = %table.name, key = %selection.key, "planned root selection");
        Ok(selection)
    }

    fn plan_table(
        &self,
        table: &TableMeta,
        args: &[(String, async_graphql::Value)],
        row_fields: Vec<SelectionField<'_>>,
        key: String,
        root: bool,
    ) -> Result<TableSelection> {
        // Join fragments span every parent group, so a default row cap only
        // applies at the root; children stay unbounded unless asked.
        let default_limit = if root {
            Some(table.default_limit.unwrap_or(self.default_limit))
        } else {
            None
        };
        let mut selection = TableSelection {
            schema: table.schema.clone(),
            table: table.name.clone(),
            key,
            filter: None,
            sort: Vec::new(),
            limit: default_limit,
            offset: 0,
            include_total: false,
            projection: Vec::new(),
            joins: Vec::new(),
        };

        for (name, value) in args {
            if matches!(value, async_graphql::Value::Null) {
                continue;
            }
            match name.as_str() {
                "filter" => selection.filter = Some(self.build_filter(table, value)?),
                "limit" => {
                    let limit = value_as_i64(value).ok_or_else(|| {
                        BifrostError::invalid_query("limit must be an integer")
                    })?;
                    selection.limit = if limit < 0 { None } else { Some(limit) };
                }
                "offset" => {
                    selection.offset = value_as_i64(value)
                        .filter(|n| *n >= 0)
                        .ok_or_else(|| {
                            BifrostError::invalid_query("offset must be a non-negative integer")
                        })?;
                }
                "sort" => selection.sort = parse_sort(table, value)?,
                other => {
                    return Err(BifrostError::invalid_query(format!(
                        "unknown argument '{other}' on '{}'",
                        table.gql_name
                    )));
                }
            }
        }

        for field in row_fields {
            let name = field.name();
            if name.starts_with("__") {
                continue;
            }
            if let Some(join) = table.join(name) {
                self.push_join(&mut selection, table, join.clone(), &field)?;
            } else if table.column(name).is_some() {
                push_unique(&mut selection.projection, name);
            } else {
                return Err(BifrostError::invalid_query(format!(
                    "unknown field '{}' on '{}'",
                    name, table.gql_name
                )));
            }
        }

        self.close_projection(table, &mut selection);
        inject_pk_tiebreak(table, &mut selection);
        Ok(selection)
    }

    fn push_join(
        &self,
        selection: &mut TableSelection,
        table: &TableMeta,
        join: JoinMeta,
        field: &SelectionField<'_>,
    ) -> Result<()> {
        let dest = self.catalog.join_dest(&join).ok_or_else(|| {
            BifrostError::invalid_query(format!(
                "join '{}' on '{}' references unknown table '{}'",
                join.name, table.gql_name, join.dest_table
            ))
        })?;

        let alias = field.alias().map(|a| a.to_string());
        let segment = alias.as_deref().unwrap_or(&join.name).to_string();
        if selection
            .joins
            .iter()
            .any(|j| j.key_segment() == segment)
        {
            return Err(BifrostError::invalid_query(format!(
                "duplicate join selection '{segment}' on '{}'; alias one of them",
                table.gql_name
            )));
        }

        let child_key = format!("{}+{}", selection.key, segment);
        let child_args = field_arguments(field)?;
        let child = self.plan_table(
            dest,
            &child_args,
            field.selection_set().collect(),
            child_key,
            false,
        )?;

        selection.joins.push(TableJoin {
            name: join.name,
            alias,
            kind: join.kind,
            parent_columns: join.source_columns,
            child_columns: join.dest_columns,
            link_table: join.link_table,
            link_parent_columns: join.link_source_columns,
            link_child_columns: join.link_dest_columns,
            child: Arc::new(child),
        });
        Ok(())
    }

    /// Projection closure: primary keys, every child join's parent
    /// columns, and every filter anchor column are always read.
    fn close_projection(&self, table: &TableMeta, selection: &mut TableSelection) {
        for pk in &table.primary_keys {
            push_unique(&mut selection.projection, pk);
        }
        let join_cols: Vec<String> = selection
            .joins
            .iter()
            .flat_map(|j| j.parent_columns.iter().cloned())
            .collect();
        for col in join_cols {
            push_unique(&mut selection.projection, &col);
        }
        let mut anchors = Vec::new();
        if let Some(filter) = &selection.filter {
            collect_filter_anchors(filter, &mut anchors);
        }
        for col in anchors {
            push_unique(&mut selection.projection, &col);
        }
    }

    pub fn build_filter(
        &self,
        table: &TableMeta,
        value: &async_graphql::Value,
    ) -> Result<FilterExpr> {
        let async_graphql::Value::Object(map) = value else {
            return Err(BifrostError::invalid_filter(format!(
                "filter for '{}' must be an object",
                table.gql_name
            )));
        };

        let mut terms = Vec::new();
        for (name, entry) in map {
            match name.as_str() {
                "_and" => terms.push(FilterExpr::And(self.build_filter_list(table, entry)?)),
                "_or" => terms.push(FilterExpr::Or(self.build_filter_list(table, entry)?)),
                "_not" => {
                    terms.push(FilterExpr::Not(Box::new(self.build_filter(table, entry)?)));
                }
                field => {
                    if let Some(column) = table.column(field) {
                        terms.push(self.build_column_filter(table, column.name.clone(), column.scalar, entry)?);
                    } else if let Some(join) = table.join(field) {
                        let dest = self.catalog.join_dest(join).ok_or_else(|| {
                            BifrostError::invalid_filter(format!(
                                "filter join '{}' references unknown table '{}'",
                                field, join.dest_table
                            ))
                        })?;
                        terms.push(FilterExpr::Join {
                            join: join.clone(),
                            sub: Box::new(self.build_filter(dest, entry)?),
                        });
                    } else {
                        return Err(BifrostError::invalid_filter(format!(
                            "unknown filter field '{}' on '{}'",
                            field, table.gql_name
                        )));
                    }
                }
            }
        }

        Ok(match terms.len() {
            0 => FilterExpr::And(vec![]),
            1 => terms.into_iter().next().expect("len checked"),
            _ => FilterExpr::And(terms),
        })
    }

    fn build_filter_list(
        &self,
        table: &TableMeta,
        value: &async_graphql::Value,
    ) -> Result<Vec<FilterExpr>> {
        let async_graphql::Value::List(items) = value else {
            return Err(BifrostError::invalid_filter(
                "_and/_or expect a list of filters",
            ));
        };
        items.iter().map(|v| self.build_filter(table, v)).collect()
    }

    fn build_column_filter(
        &self,
        table: &TableMeta,
        column: String,
        scalar: GqlScalar,
        value: &async_graphql::Value,
    ) -> Result<FilterExpr> {
        let async_graphql::Value::Object(ops) = value else {
            return Err(BifrostError::invalid_filter(format!(
                "filter for column '{column}' must be an operator object"
            )));
        };

        let mut terms = Vec::new();
        for (op_name, op_value) in ops {
            let op = FilterOp::from_graphql(op_name.as_str()).ok_or_else(|| {
                BifrostError::invalid_filter(format!(
                    "unknown operator '{op_name}' on '{}.{column}'",
                    table.gql_name
                ))
            })?;
            if !op_allowed(op, scalar) {
                return Err(BifrostError::invalid_filter(format!(
                    "operator '{op_name}' is not valid for {} column '{column}'",
                    scalar.type_name()
                )));
            }
            let json = op_value.clone().into_json().map_err(|_| {
                BifrostError::invalid_filter(format!("unrepresentable value for '{op_name}'"))
            })?;
            match op {
                FilterOp::In | FilterOp::NotIn => {
                    if !json.is_array() {
                        return Err(BifrostError::invalid_filter(format!(
                            "'{op_name}' on '{column}' expects a list"
                        )));
                    }
                }
                FilterOp::IsNull => {
                    if !json.is_boolean() {
                        return Err(BifrostError::invalid_filter(format!(
                            "'_is_null' on '{column}' expects a boolean"
                        )));
                    }
                }
                _ => {}
            }
            terms.push(FilterExpr::Column {
                column: column.clone(),
                op,
                value: json,
            });
        }

        Ok(match terms.len() {
            0 => FilterExpr::And(vec![]),
            1 => terms.into_iter().next().expect("len checked"),
            _ => FilterExpr::And(terms),
        })
    }
}

pub fn op_allowed(op: FilterOp, scalar: GqlScalar) -> bool {
    match scalar {
        GqlScalar::String => true,
        GqlScalar::Int | GqlScalar::Float => !op.is_like(),
        GqlScalar::Boolean => matches!(
            op,
            FilterOp::Eq | FilterOp::Neq | FilterOp::IsNull
        ),
    }
}

/// Appends the primary keys (ascending) to the sort whenever ordering
/// matters, so identical inputs give identical row order on every engine
/// and SQL Server paging always has its ORDER BY.
fn inject_pk_tiebreak(table: &TableMeta, selection: &mut TableSelection) {
    let paging = selection.limit.is_some() || selection.offset > 0;
    if !paging && selection.sort.is_empty() {
        return;
    }
    for pk in &table.primary_keys {
        if !selection.sort.iter().any(|(col, _)| col == pk) {
            selection.sort.push((pk.clone(), SortDir::Asc));
        }
    }
}

fn parse_sort(
    table: &TableMeta,
    value: &async_graphql::Value,
) -> Result<Vec<(String, SortDir)>> {
    let entries: Vec<&async_graphql::Value> = match value {
        async_graphql::Value::List(items) => items.iter().collect(),
        other => vec![other],
    };

    let mut sort = Vec::new();
    for entry in entries {
        let raw = match entry {
            async_graphql::Value::Enum(name) => name.as_str().to_string(),
            async_graphql::Value::String(s) => s.clone(),
            other => {
                return Err(BifrostError::invalid_query(format!(
                    "sort entries must be enum values or strings, got {other}"
                )));
            }
        };
        let (column, dir) = parse_sort_entry(&raw).ok_or_else(|| {
            BifrostError::invalid_query(format!("malformed sort entry '{raw}'"))
        })?;
        if table.column(&column).is_none() {
            return Err(BifrostError::invalid_query(format!(
                "unknown sort column '{column}' on '{}'",
                table.gql_name
            )));
        }
        sort.push((column, dir));
    }
    Ok(sort)
}

fn field_arguments(field: &SelectionField<'_>) -> Result<Vec<(String, async_graphql::Value)>> {
    let args = field
        .arguments()
        .map_err(|e| BifrostError::invalid_query(e.message))?;
    Ok(args
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect())
}

fn value_as_i64(value: &async_graphql::Value) -> Option<i64> {
    match value {
        async_graphql::Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

fn push_unique(list: &mut Vec<String>, item: &str) {
    if !list.iter().any(|existing| existing == item) {
        list.push(item.to_string());
    }
}

pub fn collect_filter_anchors(filter: &FilterExpr, out: &mut Vec<String>) {
    match filter {
        FilterExpr::Column { column, .. } => out.push(column.clone()),
        FilterExpr::And(children) | FilterExpr::Or(children) => {
            for child in children {
                collect_filter_anchors(child, out);
            }
        }
        FilterExpr::Not(child) => collect_filter_anchors(child, out),
        FilterExpr::Join { join, .. } => {
            out.extend(join.source_columns.iter().cloned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures;
    use serde_json::json;

    fn gql(value: serde_json::Value) -> async_graphql::Value {
        async_graphql::Value::from_json(value).unwrap()
    }

    fn users_planner_filter(
        filter: serde_json::Value,
    ) -> crate::error::Result<FilterExpr> {
        let catalog = fixtures::users_departments();
        let planner = Planner::new(&catalog, 100);
        let users = catalog.table_named("users").unwrap();
        planner.build_filter(users, &gql(filter))
    }

    #[test]
    fn column_filter_leaf() {
        let expr = users_planner_filter(json!({"name": {"_eq": "A"}})).unwrap();
        match expr {
            FilterExpr::Column { column, op, value } => {
                assert_eq!(column, "name");
                assert_eq!(op, FilterOp::Eq);
                assert_eq!(value, json!("A"));
            }
            other => panic!("expected column filter, got {other:?}"),
        }
    }

    #[test]
    fn and_or_nesting() {
        let expr = users_planner_filter(json!({
            "_or": [
                {"name": {"_eq": "A"}},
                {"department": {"name": {"_eq": "D"}}}
            ]
        }))
        .unwrap();
        let FilterExpr::Or(children) = expr else {
            panic!("expected Or");
        };
        assert_eq!(children.len(), 2);
        assert!(matches!(children[0], FilterExpr::Column { .. }));
        assert!(matches!(children[1], FilterExpr::Join { .. }));
    }

    #[test]
    fn join_filter_resolves_pairing() {
        let expr = users_planner_filter(json!({"department": {"name": {"_eq": "D"}}})).unwrap();
        let FilterExpr::Join { join, .. } = expr else {
            panic!("expected Join");
        };
        assert_eq!(join.source_columns, vec!["deptId"]);
        assert_eq!(join.dest_columns, vec!["id"]);
    }

    #[test]
    fn unknown_operator_is_invalid_filter() {
        let err = users_planner_filter(json!({"name": {"_almost": "A"}})).unwrap_err();
        assert_eq!(err.code(), "INVALID_FILTER");
    }

    #[test]
    fn like_on_int_column_is_invalid_filter() {
        let err = users_planner_filter(json!({"id": {"_contains": "1"}})).unwrap_err();
        assert_eq!(err.code(), "INVALID_FILTER");
    }

    #[test]
    fn unknown_filter_field_is_invalid_filter() {
        let err = users_planner_filter(json!({"nope": {"_eq": 1}})).unwrap_err();
        assert_eq!(err.code(), "INVALID_FILTER");
    }

    #[test]
    fn in_requires_list_and_is_null_requires_bool() {
        assert!(users_planner_filter(json!({"id": {"_in": 3}})).is_err());
        assert!(users_planner_filter(json!({"id": {"_is_null": "yes"}})).is_err());
        assert!(users_planner_filter(json!({"id": {"_in": [1, 2]}})).is_ok());
        assert!(users_planner_filter(json!({"id": {"_is_null": true}})).is_ok());
    }

    #[test]
    fn tiebreak_appended_when_paging() {
        let catalog = fixtures::users_departments();
        let users = catalog.table_named("users").unwrap();
        let mut selection = TableSelection {
            schema: String::new(),
            table: "users".into(),
            key: "users".into(),
            filter: None,
            sort: vec![("name".into(), SortDir::Desc)],
            limit: Some(10),
            offset: 0,
            include_total: false,
            projection: vec![],
            joins: vec![],
        };
        inject_pk_tiebreak(users, &mut selection);
        assert_eq!(
            selection.sort,
            vec![
                ("name".to_string(), SortDir::Desc),
                ("id".to_string(), SortDir::Asc)
            ]
        );

        // Already sorting by the key: nothing to add.
        let mut by_id = TableSelection {
            sort: vec![("id".into(), SortDir::Desc)],
            ..selection.clone()
        };
        inject_pk_tiebreak(users, &mut by_id);
        assert_eq!(by_id.sort.len(), 1);
    }

    #[test]
    fn sort_parsing_accepts_enum_and_string_forms() {
        let catalog = fixtures::users_departments();
        let users = catalog.table_named("users").unwrap();

        let sort = parse_sort(users, &gql(json!("-id"))).unwrap();
        assert_eq!(sort, vec![("id".to_string(), SortDir::Desc)]);

        let sort = parse_sort(users, &gql(json!(["name_desc", "+id"]))).unwrap();
        assert_eq!(
            sort,
            vec![
                ("name".to_string(), SortDir::Desc),
                ("id".to_string(), SortDir::Asc)
            ]
        );

        assert!(parse_sort(users, &gql(json!("-missing"))).is_err());
    }
}
