use std::collections::HashMap;

use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, ColumnMeta, JoinKind, JoinMeta, TableKind, TableMeta, Visibility};
use crate::dialect::{Dialect, DialectKind};
use crate::error::Result;
use crate::metadata::{self, Directive};
use crate::typemap::scalar_for;
use crate::utils::{sanitize_graphql_name, strip_id_suffix};

/// Raw foreign key as reported by the engine: ordered (from, to) column
/// pairs against one destination table.
struct RawFk {
    name: Option<String>,
    dest_schema: String,
    dest_table: String,
    pairs: Vec<(String, String)>,
}

struct RawTable {
    catalog: String,
    schema: String,
    name: String,
    kind: TableKind,
    columns: Vec<ColumnMeta>,
    primary_keys: Vec<String>,
    fks: Vec<RawFk>,
}

/// Loads the full catalog: engine metadata, join inference, then the
/// configured metadata pass. Idempotent; the returned snapshot atomically
/// replaces the previous one at the call site.
pub async fn load_catalog(
    pool: &AnyPool,
    dialect: &'static dyn Dialect,
    directives: &[Directive],
) -> Result<Catalog> {
    info!(dialect = dialect.name(), "loading database catalog");

    let raw = match dialect.kind() {
        DialectKind::Sqlite => load_sqlite(pool).await?,
        DialectKind::Postgres => load_postgres(pool).await?,
        DialectKind::Mysql => load_mysql(pool).await?,
        DialectKind::SqlServer => load_sql_server(pool).await?,
    };

    let mut tables: Vec<TableMeta> = raw
        .iter()
        .map(|t| TableMeta {
            catalog: t.catalog.clone(),
            schema: t.schema.clone(),
            name: t.name.clone(),
            kind: t.kind,
            columns: t.columns.clone(),
            primary_keys: t.primary_keys.clone(),
            identity_column: t.columns.iter().find(|c| c.is_identity).map(|c| c.name.clone()),
            label_column: None,
            visibility: Visibility::Visible,
            default_limit: None,
            soft_delete: false,
            joins: Vec::new(),
            gql_name: sanitize_graphql_name(&t.name),
        })
        .collect();

    infer_joins(&mut tables, &raw);

    for table in &mut tables {
        metadata::apply(directives, table);
    }

    prune_invalid_joins(&mut tables);

    info!(tables = tables.len(), "catalog loaded");
    Ok(Catalog::new(tables))
}

/// Derives joins from FK metadata plus the column-name heuristic. Forward
/// `single` joins take the singularized destination table name; the reverse
/// `many` join on the destination takes the referencing table's name.
fn infer_joins(tables: &mut [TableMeta], raw: &[RawTable]) {
    let index: HashMap<(String, String), usize> = tables
        .iter()
        .enumerate()
        .map(|(i, t)| (t.key(), i))
        .collect();
    let name_index: HashMap<String, usize> = tables
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.to_lowercase(), i))
        .collect();

    let mut pending: Vec<(usize, JoinMeta)> = Vec::new();

    for (src_idx, raw_table) in raw.iter().enumerate() {
        // Engine-declared foreign keys.
        for fk in &raw_table.fks {
            let dest_idx = index
                .get(&(fk.dest_schema.to_lowercase(), fk.dest_table.to_lowercase()))
                .or_else(|| name_index.get(&fk.dest_table.to_lowercase()));
            let Some(&dest_idx) = dest_idx else {
                continue;
            };
            let dest = &tables[dest_idx];
            let forward_name =
                sanitize_graphql_name(&pluralizer::pluralize(&dest.name, 1, false));
            pending.push((
                src_idx,
                JoinMeta {
                    name: forward_name,
                    kind: JoinKind::Single,
                    dest_schema: dest.schema.clone(),
                    dest_table: dest.name.clone(),
                    source_columns: fk.pairs.iter().map(|(f, _)| f.clone()).collect(),
                    dest_columns: fk.pairs.iter().map(|(_, t)| t.clone()).collect(),
                    link_table: None,
                    link_source_columns: vec![],
                    link_dest_columns: vec![],
                    foreign_key: fk.name.clone(),
                },
            ));
            let src = &tables[src_idx];
            pending.push((
                dest_idx,
                JoinMeta {
                    name: src.gql_name.clone(),
                    kind: JoinKind::Many,
                    dest_schema: src.schema.clone(),
                    dest_table: src.name.clone(),
                    source_columns: fk.pairs.iter().map(|(_, t)| t.clone()).collect(),
                    dest_columns: fk.pairs.iter().map(|(f, _)| f.clone()).collect(),
                    link_table: None,
                    link_source_columns: vec![],
                    link_dest_columns: vec![],
                    foreign_key: fk.name.clone(),
                },
            ));
        }

        // Name heuristic for columns no FK covers: `deptId` in `users`
        // joins `departments`.`id` when such a table exists.
        for column in &raw_table.columns {
            if raw_table
                .fks
                .iter()
                .any(|fk| fk.pairs.iter().any(|(f, _)| f == &column.name))
            {
                continue;
            }
            let Some(stem) = strip_id_suffix(&column.name) else {
                continue;
            };
            let stem_lower = stem.to_lowercase();
            let plural = pluralizer::pluralize(&stem_lower, 2, false);
            let dest_idx = name_index
                .get(&stem_lower)
                .or_else(|| name_index.get(&plural.to_lowercase()));
            let Some(&dest_idx) = dest_idx else {
                continue;
            };
            if dest_idx == src_idx {
                continue;
            }
            let dest = &tables[dest_idx];
            if dest.primary_keys.len() != 1 {
                continue;
            }
            let dest_pk = dest.primary_keys[0].clone();
            let forward_name =
                sanitize_graphql_name(&pluralizer::pluralize(&dest.name, 1, false));
            pending.push((
                src_idx,
                JoinMeta {
                    name: forward_name,
                    kind: JoinKind::Single,
                    dest_schema: dest.schema.clone(),
                    dest_table: dest.name.clone(),
                    source_columns: vec![column.name.clone()],
                    dest_columns: vec![dest_pk.clone()],
                    link_table: None,
                    link_source_columns: vec![],
                    link_dest_columns: vec![],
                    foreign_key: None,
                },
            ));
            let src = &tables[src_idx];
            pending.push((
                dest_idx,
                JoinMeta {
                    name: src.gql_name.clone(),
                    kind: JoinKind::Many,
                    dest_schema: src.schema.clone(),
                    dest_table: src.name.clone(),
                    source_columns: vec![dest_pk],
                    dest_columns: vec![column.name.clone()],
                    link_table: None,
                    link_source_columns: vec![],
                    link_dest_columns: vec![],
                    foreign_key: None,
                },
            ));
        }
    }

    for (idx, join) in pending {
        let table = &mut tables[idx];
        let taken = table.joins.iter().any(|j| j.name == join.name)
            || table.columns.iter().any(|c| c.name == join.name);
        if taken {
            debug!(
                table = %table.name,
                join = %join.name,
                "skipping inferred join, name already taken"
            );
            continue;
        }
        table.joins.push(join);
    }
}

/// Drops joins whose column pairs do not hold up against the loaded
/// columns. Runs after the metadata pass so declared joins are checked too.
fn prune_invalid_joins(tables: &mut Vec<TableMeta>) {
    let column_sets: HashMap<String, Vec<String>> = tables
        .iter()
        .map(|t| {
            (
                t.name.to_lowercase(),
                t.columns.iter().map(|c| c.name.clone()).collect(),
            )
        })
        .collect();

    for table in tables.iter_mut() {
        let own: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
        table.joins.retain(|join| {
            let paired = !join.source_columns.is_empty()
                && join.source_columns.len() == join.dest_columns.len();
            let src_ok = join.source_columns.iter().all(|c| own.contains(c));
            let dest_ok = column_sets
                .get(&join.dest_table.to_lowercase())
                .map(|cols| join.dest_columns.iter().all(|c| cols.contains(c)))
                .unwrap_or(false);
            let link_ok = match &join.link_table {
                Some(link) => column_sets
                    .get(&link.to_lowercase())
                    .map(|cols| {
                        join.link_source_columns.iter().all(|c| cols.contains(c))
                            && join.link_dest_columns.iter().all(|c| cols.contains(c))
                    })
                    .unwrap_or(false),
                None => true,
            };
            let keep = paired && src_ok && dest_ok && link_ok;
            if !keep {
                warn!(table = %table.name, join = %join.name, "dropping unresolvable join");
            }
            keep
        });
    }
}

// --- engine loaders -------------------------------------------------------

fn get_str(row: &AnyRow, name: &str) -> String {
    row.try_get::<String, _>(name).unwrap_or_default()
}

fn get_opt_str(row: &AnyRow, name: &str) -> Option<String> {
    row.try_get::<Option<String>, _>(name).ok().flatten()
}

fn get_i64(row: &AnyRow, name: &str) -> i64 {
    row.try_get::<i64, _>(name)
        .or_else(|_| row.try_get::<i32, _>(name).map(i64::from))
        .unwrap_or_default()
}

async fn load_sqlite(pool: &AnyPool) -> Result<Vec<RawTable>> {
    let table_rows = sqlx::query(
        "SELECT name, type FROM sqlite_master \
         WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    let mut tables = Vec::new();

    for table_row in &table_rows {
        let name = get_str(table_row, "name");
        let kind = if get_str(table_row, "type") == "view" {
            TableKind::View
        } else {
            TableKind::BaseTable
        };

        let column_rows = sqlx::query(
            "SELECT cid, name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?)",
        )
        .bind(&name)
        .fetch_all(pool)
        .await?;

        let mut columns = Vec::new();
        let mut primary_keys: Vec<(i64, String)> = Vec::new();

        for row in &column_rows {
            let col_name = get_str(row, "name");
            let data_type = get_str(row, "type");
            let pk_ord = get_i64(row, "pk");
            let is_pk = pk_ord > 0;
            if is_pk {
                primary_keys.push((pk_ord, col_name.clone()));
            }
            columns.push(ColumnMeta {
                scalar: scalar_for(DialectKind::Sqlite, &data_type),
                name: col_name,
                nullable: get_i64(row, "notnull") == 0 && !is_pk,
                has_default: get_opt_str(row, "dflt_value").is_some(),
                ordinal: get_i64(row, "cid") as i32,
                is_primary_key: is_pk,
                is_identity: false,
                is_read_only: kind == TableKind::View,
                populate: None,
                data_type,
            });
        }

        primary_keys.sort_by_key(|(ord, _)| *ord);
        let primary_keys: Vec<String> = primary_keys.into_iter().map(|(_, c)| c).collect();

        // A lone INTEGER PRIMARY KEY is the rowid alias.
        if primary_keys.len() == 1 {
            if let Some(col) = columns.iter_mut().find(|c| c.name == primary_keys[0]) {
                if is_integer_type(&col.data_type) {
                    col.is_identity = true;
                }
            }
        }

        let fk_rows = sqlx::query(
            "SELECT id, seq, \"table\", \"from\", \"to\" FROM pragma_foreign_key_list(?) \
             ORDER BY id, seq",
        )
        .bind(&name)
        .fetch_all(pool)
        .await?;

        let mut fks: Vec<RawFk> = Vec::new();
        let mut last_id: Option<i64> = None;
        for row in &fk_rows {
            let id = get_i64(row, "id");
            let pair = (get_str(row, "from"), get_str(row, "to"));
            if last_id == Some(id) {
                if let Some(fk) = fks.last_mut() {
                    fk.pairs.push(pair);
                }
            } else {
                fks.push(RawFk {
                    name: None,
                    dest_schema: String::new(),
                    dest_table: get_str(row, "table"),
                    pairs: vec![pair],
                });
                last_id = Some(id);
            }
        }

        tables.push(RawTable {
            catalog: String::new(),
            schema: String::new(),
            name,
            kind,
            columns,
            primary_keys,
            fks,
        });
    }

    Ok(tables)
}

fn is_integer_type(data_type: &str) -> bool {
    matches!(
        data_type.trim().to_ascii_lowercase().as_str(),
        "integer" | "int"
    )
}

async fn load_postgres(pool: &AnyPool) -> Result<Vec<RawTable>> {
    let table_rows = sqlx::query(
        "SELECT table_catalog, table_schema, table_name, table_type \
         FROM information_schema.tables \
         WHERE table_schema NOT IN ('pg_catalog', 'information_schema') \
         ORDER BY table_schema, table_name",
    )
    .fetch_all(pool)
    .await?;

    let column_rows = sqlx::query(
        "SELECT table_schema, table_name, column_name, data_type, is_nullable, \
                column_default, ordinal_position, is_identity, is_generated \
         FROM information_schema.columns \
         WHERE table_schema NOT IN ('pg_catalog', 'information_schema') \
         ORDER BY table_schema, table_name, ordinal_position",
    )
    .fetch_all(pool)
    .await?;

    let pk_rows = sqlx::query(
        "SELECT kcu.table_schema, kcu.table_name, kcu.column_name, kcu.ordinal_position \
         FROM information_schema.table_constraints tc \
         JOIN information_schema.key_column_usage kcu \
           ON kcu.constraint_name = tc.constraint_name \
          AND kcu.constraint_schema = tc.constraint_schema \
         WHERE tc.constraint_type = 'PRIMARY KEY' \
         ORDER BY kcu.table_schema, kcu.table_name, kcu.ordinal_position",
    )
    .fetch_all(pool)
    .await?;

    let fk_rows = sqlx::query(
        "SELECT tc.constraint_name, kcu.table_schema, kcu.table_name, kcu.column_name, \
                ccu.table_schema AS dest_schema, ccu.table_name AS dest_table, \
                ccu.column_name AS dest_column, kcu.ordinal_position \
         FROM information_schema.table_constraints tc \
         JOIN information_schema.key_column_usage kcu \
           ON kcu.constraint_name = tc.constraint_name \
          AND kcu.constraint_schema = tc.constraint_schema \
         JOIN information_schema.constraint_column_usage ccu \
           ON ccu.constraint_name = tc.constraint_name \
          AND ccu.constraint_schema = tc.constraint_schema \
         WHERE tc.constraint_type = 'FOREIGN KEY' \
         ORDER BY tc.constraint_name, kcu.ordinal_position",
    )
    .fetch_all(pool)
    .await?;

    Ok(assemble_information_schema(
        DialectKind::Postgres,
        &table_rows,
        &column_rows,
        &pk_rows,
        &fk_rows,
        |row| {
            get_str(row, "is_identity") == "YES"
                || get_opt_str(row, "column_default")
                    .map(|d| d.starts_with("nextval("))
                    .unwrap_or(false)
        },
        |row| get_str(row, "is_generated") == "ALWAYS",
    ))
}

async fn load_mysql(pool: &AnyPool) -> Result<Vec<RawTable>> {
    let table_rows = sqlx::query(
        "SELECT table_catalog, table_schema, table_name, table_type \
         FROM information_schema.tables WHERE table_schema = DATABASE() \
         ORDER BY table_name",
    )
    .fetch_all(pool)
    .await?;

    let column_rows = sqlx::query(
        "SELECT table_schema, table_name, column_name, data_type, is_nullable, \
                column_default, ordinal_position, extra \
         FROM information_schema.columns WHERE table_schema = DATABASE() \
         ORDER BY table_name, ordinal_position",
    )
    .fetch_all(pool)
    .await?;

    let pk_rows = sqlx::query(
        "SELECT table_schema, table_name, column_name, ordinal_position \
         FROM information_schema.key_column_usage \
         WHERE table_schema = DATABASE() AND constraint_name = 'PRIMARY' \
         ORDER BY table_name, ordinal_position",
    )
    .fetch_all(pool)
    .await?;

    let fk_rows = sqlx::query(
        "SELECT constraint_name, table_schema, table_name, column_name, \
                referenced_table_schema AS dest_schema, \
                referenced_table_name AS dest_table, \
                referenced_column_name AS dest_column, ordinal_position \
         FROM information_schema.key_column_usage \
         WHERE table_schema = DATABASE() AND referenced_table_name IS NOT NULL \
         ORDER BY constraint_name, ordinal_position",
    )
    .fetch_all(pool)
    .await?;

    Ok(assemble_information_schema(
        DialectKind::Mysql,
        &table_rows,
        &column_rows,
        &pk_rows,
        &fk_rows,
        |row| get_str(row, "extra").contains("auto_increment"),
        |row| get_str(row, "extra").contains("GENERATED"),
    ))
}

async fn load_sql_server(pool: &AnyPool) -> Result<Vec<RawTable>> {
    let table_rows = sqlx::query(
        "SELECT TABLE_CATALOG AS table_catalog, TABLE_SCHEMA AS table_schema, \
                TABLE_NAME AS table_name, TABLE_TYPE AS table_type \
         FROM INFORMATION_SCHEMA.TABLES ORDER BY TABLE_SCHEMA, TABLE_NAME",
    )
    .fetch_all(pool)
    .await?;

    let column_rows = sqlx::query(
        "SELECT TABLE_SCHEMA AS table_schema, TABLE_NAME AS table_name, \
                COLUMN_NAME AS column_name, DATA_TYPE AS data_type, \
                IS_NULLABLE AS is_nullable, COLUMN_DEFAULT AS column_default, \
                ORDINAL_POSITION AS ordinal_position, \
                COLUMNPROPERTY(OBJECT_ID(QUOTENAME(TABLE_SCHEMA) + '.' + QUOTENAME(TABLE_NAME)), \
                               COLUMN_NAME, 'IsIdentity') AS is_identity, \
                COLUMNPROPERTY(OBJECT_ID(QUOTENAME(TABLE_SCHEMA) + '.' + QUOTENAME(TABLE_NAME)), \
                               COLUMN_NAME, 'IsComputed') AS is_computed \
         FROM INFORMATION_SCHEMA.COLUMNS \
         ORDER BY TABLE_SCHEMA, TABLE_NAME, ORDINAL_POSITION",
    )
    .fetch_all(pool)
    .await?;

    let pk_rows = sqlx::query(
        "SELECT kcu.TABLE_SCHEMA AS table_schema, kcu.TABLE_NAME AS table_name, \
                kcu.COLUMN_NAME AS column_name, kcu.ORDINAL_POSITION AS ordinal_position \
         FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
         JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu \
           ON kcu.CONSTRAINT_NAME = tc.CONSTRAINT_NAME \
          AND kcu.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA \
         WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY' \
         ORDER BY kcu.TABLE_SCHEMA, kcu.TABLE_NAME, kcu.ORDINAL_POSITION",
    )
    .fetch_all(pool)
    .await?;

    let fk_rows = sqlx::query(
        "SELECT rc.CONSTRAINT_NAME AS constraint_name, \
                kcu.TABLE_SCHEMA AS table_schema, kcu.TABLE_NAME AS table_name, \
                kcu.COLUMN_NAME AS column_name, \
                kcu2.TABLE_SCHEMA AS dest_schema, kcu2.TABLE_NAME AS dest_table, \
                kcu2.COLUMN_NAME AS dest_column, kcu.ORDINAL_POSITION AS ordinal_position \
         FROM INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS rc \
         JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu \
           ON kcu.CONSTRAINT_NAME = rc.CONSTRAINT_NAME \
          AND kcu.CONSTRAINT_SCHEMA = rc.CONSTRAINT_SCHEMA \
         JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu2 \
           ON kcu2.CONSTRAINT_NAME = rc.UNIQUE_CONSTRAINT_NAME \
          AND kcu2.CONSTRAINT_SCHEMA = rc.UNIQUE_CONSTRAINT_SCHEMA \
          AND kcu2.ORDINAL_POSITION = kcu.ORDINAL_POSITION \
         ORDER BY rc.CONSTRAINT_NAME, kcu.ORDINAL_POSITION",
    )
    .fetch_all(pool)
    .await?;

    Ok(assemble_information_schema(
        DialectKind::SqlServer,
        &table_rows,
        &column_rows,
        &pk_rows,
        &fk_rows,
        |row| get_i64(row, "is_identity") == 1,
        |row| get_i64(row, "is_computed") == 1,
    ))
}

/// Groups the flat information_schema row sets into [`RawTable`]s. The
/// same shape serves Postgres, MySQL, and SQL Server.
fn assemble_information_schema(
    dialect: DialectKind,
    table_rows: &[AnyRow],
    column_rows: &[AnyRow],
    pk_rows: &[AnyRow],
    fk_rows: &[AnyRow],
    is_identity: impl Fn(&AnyRow) -> bool,
    is_generated: impl Fn(&AnyRow) -> bool,
) -> Vec<RawTable> {
    let mut tables: Vec<RawTable> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for row in table_rows {
        let schema = get_str(row, "table_schema");
        let name = get_str(row, "table_name");
        let kind = if get_str(row, "table_type").to_uppercase().contains("VIEW") {
            TableKind::View
        } else {
            TableKind::BaseTable
        };
        index.insert((schema.to_lowercase(), name.to_lowercase()), tables.len());
        tables.push(RawTable {
            catalog: get_str(row, "table_catalog"),
            schema,
            name,
            kind,
            columns: Vec::new(),
            primary_keys: Vec::new(),
            fks: Vec::new(),
        });
    }

    let key_of = |row: &AnyRow| {
        (
            get_str(row, "table_schema").to_lowercase(),
            get_str(row, "table_name").to_lowercase(),
        )
    };

    for row in pk_rows {
        if let Some(&idx) = index.get(&key_of(row)) {
            tables[idx].primary_keys.push(get_str(row, "column_name"));
        }
    }

    for row in column_rows {
        let Some(&idx) = index.get(&key_of(row)) else {
            continue;
        };
        let table = &mut tables[idx];
        let name = get_str(row, "column_name");
        let data_type = get_str(row, "data_type");
        let is_pk = table.primary_keys.contains(&name);
        table.columns.push(ColumnMeta {
            scalar: scalar_for(dialect, &data_type),
            nullable: get_str(row, "is_nullable") == "YES",
            has_default: get_opt_str(row, "column_default").is_some(),
            ordinal: get_i64(row, "ordinal_position") as i32,
            is_primary_key: is_pk,
            is_identity: is_identity(row),
            is_read_only: table.kind == TableKind::View || is_generated(row),
            populate: None,
            name,
            data_type,
        });
    }

    let mut last_constraint: Option<(usize, String)> = None;
    for row in fk_rows {
        let Some(&idx) = index.get(&key_of(row)) else {
            continue;
        };
        let constraint = get_str(row, "constraint_name");
        let pair = (get_str(row, "column_name"), get_str(row, "dest_column"));
        let same = matches!(&last_constraint, Some((i, c)) if *i == idx && *c == constraint);
        if same {
            if let Some(fk) = tables[idx].fks.last_mut() {
                fk.pairs.push(pair);
            }
        } else {
            tables[idx].fks.push(RawFk {
                name: Some(constraint.clone()),
                dest_schema: get_str(row, "dest_schema"),
                dest_table: get_str(row, "dest_table"),
                pairs: vec![pair],
            });
            last_constraint = Some((idx, constraint));
        }
    }

    tables
}
