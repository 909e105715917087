use tracing::debug;

use crate::catalog::JoinKind;
use crate::dialect::{Dialect, FilterOp};
use crate::error::{BifrostError, Result};
use crate::plan::{FilterExpr, TableJoin, TableSelection};

/// One SQL statement of the batch, addressed by its result key. Parameter
/// placeholders are numbered per fragment starting at 1; `params` is the
/// ordered list bound at execution, values are never interpolated.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub key: String,
    pub sql: String,
    pub params: Vec<serde_json::Value>,
}

pub struct Emitter {
    dialect: &'static dyn Dialect,
}

impl Emitter {
    pub fn new(dialect: &'static dyn Dialect) -> Self {
        Self { dialect }
    }

    /// Renders the plan tree to fragments in dependency order: the node's
    /// data (and count) first, then each join subtree depth-first.
    pub fn emit(&self, selection: &TableSelection) -> Result<Vec<Fragment>> {
        let mut fragments = Vec::new();

        fragments.push(self.data_fragment(selection)?);
        if selection.include_total {
            fragments.push(self.count_fragment(selection)?);
        }
        self.emit_joins(selection, &mut fragments)?;

        for fragment in &fragments {
            debug!(key = %fragment.key, sql = %fragment.sql, "emitted fragment");
        }
        Ok(fragments)
    }

    fn emit_joins(&self, parent: &TableSelection, out: &mut Vec<Fragment>) -> Result<()> {
        for join in &parent.joins {
            out.push(self.join_fragment(parent, join)?);
            self.emit_joins(&join.child, out)?;
        }
        Ok(())
    }

    fn data_fragment(&self, selection: &TableSelection) -> Result<Fragment> {
        let d = self.dialect;
        let table_ref = d.table_ref(&selection.schema, &selection.table);
        let cols = selection
            .projection
            .iter()
            .map(|c| d.quote(c))
            .collect::<Vec<_>>()
            .join(", ");

        let mut params = Vec::new();
        let mut sql = format!("SELECT {cols} FROM {table_ref}");
        if let Some(clause) = self.where_clause(selection, None, &table_ref, &mut params)? {
            sql.push_str(&clause);
        }
        sql.push_str(&self.order_and_paging(selection, None)?);

        Ok(Fragment {
            key: selection.data_key(),
            sql,
            params,
        })
    }

    fn count_fragment(&self, selection: &TableSelection) -> Result<Fragment> {
        let table_ref = self
            .dialect
            .table_ref(&selection.schema, &selection.table);
        let mut params = Vec::new();
        let mut sql = format!("SELECT COUNT(*) FROM {table_ref}");
        if let Some(clause) = self.where_clause(selection, None, &table_ref, &mut params)? {
            sql.push_str(&clause);
        }
        Ok(Fragment {
            key: selection.count_key(),
            sql,
            params,
        })
    }

    /// Join fragment: the child joined against the parent's filtered but
    /// unpaged key set. `JoinId`/`src_id` are literal identifiers the
    /// assembler matches on.
    fn join_fragment(&self, parent: &TableSelection, join: &TableJoin) -> Result<Fragment> {
        let d = self.dialect;
        let child = &join.child;
        let parent_ref = d.table_ref(&parent.schema, &parent.table);
        let child_ref = d.table_ref(&child.schema, &child.table);
        let mut params = Vec::new();

        // (SELECT DISTINCT <parentCols> AS JoinId... FROM parent WHERE ...)
        let key_cols = join
            .parent_columns
            .iter()
            .enumerate()
            .map(|(i, col)| format!("{} AS {}", d.quote(col), join_id(i, join.parent_columns.len())))
            .collect::<Vec<_>>()
            .join(", ");
        let mut keyset = format!("SELECT DISTINCT {key_cols} FROM {parent_ref}");
        if let Some(clause) = self.where_clause(parent, None, &parent_ref, &mut params)? {
            keyset.push_str(&clause);
        }

        let src_cols = (0..join.parent_columns.len())
            .map(|i| {
                format!(
                    "a.{} AS {}",
                    join_id(i, join.parent_columns.len()),
                    src_id(i, join.parent_columns.len())
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        let child_cols = child
            .projection
            .iter()
            .map(|c| format!("b.{}", d.quote(c)))
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!("SELECT {src_cols}, {child_cols} FROM ({keyset}) a");

        match join.kind {
            JoinKind::Single | JoinKind::Many => {
                let on = join
                    .child_columns
                    .iter()
                    .enumerate()
                    .map(|(i, col)| {
                        format!(
                            "a.{} = b.{}",
                            join_id(i, join.child_columns.len()),
                            d.quote(col)
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(" AND ");
                sql.push_str(&format!(" INNER JOIN {child_ref} b ON {on}"));
            }
            JoinKind::ManyToMany => {
                let link = join.link_table.as_deref().ok_or_else(|| {
                    BifrostError::internal(format!(
                        "many-to-many join '{}' lost its link table",
                        join.name
                    ))
                })?;
                let link_ref = d.table_ref(&parent.schema, link);
                let on_link = join
                    .link_parent_columns
                    .iter()
                    .enumerate()
                    .map(|(i, col)| {
                        format!(
                            "a.{} = l.{}",
                            join_id(i, join.link_parent_columns.len()),
                            d.quote(col)
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(" AND ");
                let on_child = join
                    .link_child_columns
                    .iter()
                    .zip(&join.child_columns)
                    .map(|(link_col, child_col)| {
                        format!("l.{} = b.{}", d.quote(link_col), d.quote(child_col))
                    })
                    .collect::<Vec<_>>()
                    .join(" AND ");
                sql.push_str(&format!(
                    " INNER JOIN {link_ref} l ON {on_link} INNER JOIN {child_ref} b ON {on_child}"
                ));
            }
        }

        if let Some(clause) = self.where_clause(child, Some("b"), &child_ref, &mut params)? {
            sql.push_str(&clause);
        }

        // Single joins resolve to at most one row per parent; paging is
        // meaningless there and the assembler takes the first match.
        if join.kind != JoinKind::Single {
            sql.push_str(&self.order_and_paging(child, Some("b"))?);
        }

        Ok(Fragment {
            key: child.key.clone(),
            sql,
            params,
        })
    }

    fn where_clause(
        &self,
        selection: &TableSelection,
        qualifier: Option<&str>,
        parent_ref: &str,
        params: &mut Vec<serde_json::Value>,
    ) -> Result<Option<String>> {
        match &selection.filter {
            Some(filter) => {
                let rendered = self.render_filter(filter, qualifier, parent_ref, params)?;
                Ok(Some(format!(" WHERE {rendered}")))
            }
            None => Ok(None),
        }
    }

    fn order_and_paging(
        &self,
        selection: &TableSelection,
        qualifier: Option<&str>,
    ) -> Result<String> {
        let d = self.dialect;
        let paging = selection.limit.is_some() || selection.offset > 0;

        let mut sort = selection.sort.clone();
        if sort.is_empty() && paging && d.requires_order_for_paging() {
            // No sort and no primary key to tie-break on: fall back to the
            // first projected column so the engine accepts the paging.
            if let Some(first) = selection.projection.first() {
                sort.push((first.clone(), crate::utils::SortDir::Asc));
            }
        }

        let mut out = String::new();
        if !sort.is_empty() {
            let rendered = sort
                .iter()
                .map(|(col, dir)| match qualifier {
                    Some(q) => format!("{q}.{} {}", d.quote(col), dir.sql()),
                    None => format!("{} {}", d.quote(col), dir.sql()),
                })
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!(" ORDER BY {rendered}"));
        }
        if paging {
            out.push(' ');
            out.push_str(&d.paging_clause(selection.limit, selection.offset));
        }
        Ok(out)
    }

    fn render_filter(
        &self,
        expr: &FilterExpr,
        qualifier: Option<&str>,
        parent_ref: &str,
        params: &mut Vec<serde_json::Value>,
    ) -> Result<String> {
        let d = self.dialect;
        let col_ref = |col: &str| match qualifier {
            Some(q) => format!("{q}.{}", d.quote(col)),
            None => d.quote(col),
        };

        match expr {
            FilterExpr::And(children) if children.is_empty() => Ok("1 = 1".to_string()),
            FilterExpr::Or(children) if children.is_empty() => Ok("1 = 0".to_string()),
            FilterExpr::And(children) | FilterExpr::Or(children) => {
                let sep = if matches!(expr, FilterExpr::And(_)) {
                    " AND "
                } else {
                    " OR "
                };
                let parts = children
                    .iter()
                    .map(|c| self.render_filter(c, qualifier, parent_ref, params))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("({})", parts.join(sep)))
            }
            FilterExpr::Not(child) => {
                let inner = self.render_filter(child, qualifier, parent_ref, params)?;
                Ok(format!("NOT ({inner})"))
            }
            FilterExpr::Column { column, op, value } => {
                self.render_column_op(&col_ref(column), *op, value, params)
            }
            FilterExpr::Join { join, sub } => {
                let dest_ref = d.table_ref(&join.dest_schema, &join.dest_table);
                if join.source_columns.len() == 1 && join.link_table.is_none() {
                    let sub_sql = self.render_filter(sub, None, &dest_ref, params)?;
                    Ok(format!(
                        "{} IN (SELECT {} FROM {} WHERE {})",
                        col_ref(&join.source_columns[0]),
                        d.quote(&join.dest_columns[0]),
                        dest_ref,
                        sub_sql
                    ))
                } else if join.source_columns.len() == 1 && join.link_table.is_some() {
                    // Pierce through the intermediate table.
                    let link = join.link_table.as_deref().expect("checked above");
                    let link_ref = d.table_ref(&join.dest_schema, link);
                    let sub_sql = self.render_filter(sub, Some("jd"), &dest_ref, params)?;
                    let on = join
                        .link_dest_columns
                        .iter()
                        .zip(&join.dest_columns)
                        .map(|(l, c)| format!("jl.{} = jd.{}", d.quote(l), d.quote(c)))
                        .collect::<Vec<_>>()
                        .join(" AND ");
                    Ok(format!(
                        "{} IN (SELECT jl.{} FROM {} jl INNER JOIN {} jd ON {} WHERE {})",
                        col_ref(&join.source_columns[0]),
                        d.quote(&join.link_source_columns[0]),
                        link_ref,
                        dest_ref,
                        on,
                        sub_sql
                    ))
                } else {
                    if join.link_table.is_some() {
                        return Err(BifrostError::invalid_filter(format!(
                            "filtering through multi-column many-to-many join '{}' is not supported",
                            join.name
                        )));
                    }
                    // Multi-column joins correlate on every key part.
                    let sub_sql = self.render_filter(sub, Some("jd"), &dest_ref, params)?;
                    let correlate = join
                        .source_columns
                        .iter()
                        .zip(&join.dest_columns)
                        .map(|(src, dst)| {
                            let parent_col = match qualifier {
                                Some(q) => format!("{q}.{}", d.quote(src)),
                                None => format!("{parent_ref}.{}", d.quote(src)),
                            };
                            format!("jd.{} = {}", d.quote(dst), parent_col)
                        })
                        .collect::<Vec<_>>()
                        .join(" AND ");
                    Ok(format!(
                        "EXISTS (SELECT 1 FROM {dest_ref} jd WHERE {correlate} AND ({sub_sql}))"
                    ))
                }
            }
        }
    }

    fn render_column_op(
        &self,
        col_ref: &str,
        op: FilterOp,
        value: &serde_json::Value,
        params: &mut Vec<serde_json::Value>,
    ) -> Result<String> {
        let d = self.dialect;
        match op {
            FilterOp::IsNull => {
                if value.as_bool().unwrap_or(true) {
                    Ok(format!("{col_ref} IS NULL"))
                } else {
                    Ok(format!("{col_ref} IS NOT NULL"))
                }
            }
            FilterOp::In | FilterOp::NotIn => {
                let items = value.as_array().cloned().unwrap_or_default();
                if items.is_empty() {
                    return Ok(if op == FilterOp::In {
                        "1 = 0".to_string()
                    } else {
                        "1 = 1".to_string()
                    });
                }
                let placeholders = items
                    .iter()
                    .map(|item| {
                        params.push(item.clone());
                        d.placeholder(params.len())
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                Ok(format!("{col_ref} {} ({placeholders})", d.op_sql(op)))
            }
            op if op.is_like() => {
                params.push(value.clone());
                let placeholder = d.placeholder(params.len());
                Ok(format!(
                    "{col_ref} LIKE {}",
                    d.like_pattern(op, &placeholder)
                ))
            }
            op => {
                params.push(value.clone());
                let placeholder = d.placeholder(params.len());
                Ok(format!("{col_ref} {} {placeholder}", d.op_sql(op)))
            }
        }
    }
}

fn join_id(i: usize, total: usize) -> String {
    if total == 1 {
        "JoinId".to_string()
    } else {
        format!("JoinId{i}")
    }
}

/// Child-slab column name(s) carrying the parent key; the assembler reads
/// these literally.
pub fn src_id(i: usize, total: usize) -> String {
    if total == 1 {
        "src_id".to_string()
    } else {
        format!("src_id{i}")
    }
}
