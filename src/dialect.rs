use serde::Deserialize;

use crate::error::{BifrostError, Result};

/// Filter operators accepted in `*_filter_ops` inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    IsNull,
}

impl FilterOp {
    pub fn from_graphql(name: &str) -> Option<Self> {
        Some(match name {
            "_eq" => Self::Eq,
            "_neq" => Self::Neq,
            "_gt" => Self::Gt,
            "_gte" => Self::Gte,
            "_lt" => Self::Lt,
            "_lte" => Self::Lte,
            "_contains" => Self::Contains,
            "_starts_with" => Self::StartsWith,
            "_ends_with" => Self::EndsWith,
            "_in" => Self::In,
            "_nin" => Self::NotIn,
            "_is_null" => Self::IsNull,
            _ => return None,
        })
    }

    pub fn graphql_name(&self) -> &'static str {
        match self {
            Self::Eq => "_eq",
            Self::Neq => "_neq",
            Self::Gt => "_gt",
            Self::Gte => "_gte",
            Self::Lt => "_lt",
            Self::Lte => "_lte",
            Self::Contains => "_contains",
            Self::StartsWith => "_starts_with",
            Self::EndsWith => "_ends_with",
            Self::In => "_in",
            Self::NotIn => "_nin",
            Self::IsNull => "_is_null",
        }
    }

    /// LIKE-family operators only make sense for text columns.
    pub fn is_like(&self) -> bool {
        matches!(self, Self::Contains | Self::StartsWith | Self::EndsWith)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DialectKind {
    SqlServer,
    Postgres,
    Mysql,
    Sqlite,
}

impl DialectKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "sql-server" | "mssql" => Ok(Self::SqlServer),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" => Ok(Self::Mysql),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(BifrostError::invalid_query(format!(
                "unknown dialect '{other}'"
            ))),
        }
    }
}

/// The narrow capability set every engine must provide. Implementations are
/// stateless unit structs selected once at startup.
pub trait Dialect: Send + Sync {
    fn kind(&self) -> DialectKind;

    fn name(&self) -> &'static str;

    /// Quote a single identifier.
    fn quote(&self, ident: &str) -> String;

    /// Fully qualified table reference. `schema` is empty for engines
    /// without schema namespaces (SQLite).
    fn table_ref(&self, schema: &str, table: &str) -> String {
        if schema.is_empty() {
            self.quote(table)
        } else {
            format!("{}.{}", self.quote(schema), self.quote(table))
        }
    }

    /// Positional parameter placeholder, 1-based.
    fn placeholder(&self, n: usize) -> String;

    /// Paging clause appended after ORDER BY. `limit` of `None` means
    /// unbounded. Engines where paging is illegal without ORDER BY report
    /// that through [`Dialect::requires_order_for_paging`].
    fn paging_clause(&self, limit: Option<i64>, offset: i64) -> String;

    fn requires_order_for_paging(&self) -> bool {
        false
    }

    /// Render a LIKE pattern expression around an already-numbered
    /// placeholder, e.g. `'%' || $1 || '%'`.
    fn like_pattern(&self, op: FilterOp, placeholder: &str) -> String;

    /// Plain comparison operators. LIKE-family and null checks are rendered
    /// by the emitter via [`Dialect::like_pattern`] / IS NULL.
    fn op_sql(&self, op: FilterOp) -> &'static str {
        match op {
            FilterOp::Eq => "=",
            FilterOp::Neq => "<>",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::In => "IN",
            FilterOp::NotIn => "NOT IN",
            FilterOp::Contains | FilterOp::StartsWith | FilterOp::EndsWith => "LIKE",
            FilterOp::IsNull => "IS NULL",
        }
    }

    /// Expression yielding the identity generated by the last INSERT on the
    /// current connection.
    fn last_insert_id_sql(&self) -> &'static str;
}

pub struct SqlServerDialect;
pub struct PostgresDialect;
pub struct MysqlDialect;
pub struct SqliteDialect;

impl Dialect for SqlServerDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::SqlServer
    }

    fn name(&self) -> &'static str {
        "sql-server"
    }

    fn quote(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn placeholder(&self, n: usize) -> String {
        format!("@p{n}")
    }

    fn paging_clause(&self, limit: Option<i64>, offset: i64) -> String {
        match limit {
            Some(limit) => format!("OFFSET {offset} ROWS FETCH NEXT {limit} ROWS ONLY"),
            None => format!("OFFSET {offset} ROWS"),
        }
    }

    fn requires_order_for_paging(&self) -> bool {
        true
    }

    fn like_pattern(&self, op: FilterOp, placeholder: &str) -> String {
        match op {
            FilterOp::Contains => format!("'%' + {placeholder} + '%'"),
            FilterOp::StartsWith => format!("{placeholder} + '%'"),
            FilterOp::EndsWith => format!("'%' + {placeholder}"),
            _ => placeholder.to_string(),
        }
    }

    fn last_insert_id_sql(&self) -> &'static str {
        "SELECT SCOPE_IDENTITY()"
    }
}

impl Dialect for PostgresDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn placeholder(&self, n: usize) -> String {
        format!("${n}")
    }

    fn paging_clause(&self, limit: Option<i64>, offset: i64) -> String {
        match (limit, offset) {
            (Some(limit), 0) => format!("LIMIT {limit}"),
            (Some(limit), offset) => format!("LIMIT {limit} OFFSET {offset}"),
            (None, offset) => format!("OFFSET {offset}"),
        }
    }

    fn like_pattern(&self, op: FilterOp, placeholder: &str) -> String {
        concat_like(op, placeholder)
    }

    fn last_insert_id_sql(&self) -> &'static str {
        "SELECT lastval()"
    }
}

impl Dialect for MysqlDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Mysql
    }

    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn placeholder(&self, _n: usize) -> String {
        "?".to_string()
    }

    fn paging_clause(&self, limit: Option<i64>, offset: i64) -> String {
        match (limit, offset) {
            (Some(limit), 0) => format!("LIMIT {limit}"),
            (Some(limit), offset) => format!("LIMIT {limit} OFFSET {offset}"),
            // MySQL has no offset-without-limit form.
            (None, offset) => format!("LIMIT 18446744073709551615 OFFSET {offset}"),
        }
    }

    fn like_pattern(&self, op: FilterOp, placeholder: &str) -> String {
        match op {
            FilterOp::Contains => format!("CONCAT('%', {placeholder}, '%')"),
            FilterOp::StartsWith => format!("CONCAT({placeholder}, '%')"),
            FilterOp::EndsWith => format!("CONCAT('%', {placeholder})"),
            _ => placeholder.to_string(),
        }
    }

    fn last_insert_id_sql(&self) -> &'static str {
        "SELECT LAST_INSERT_ID()"
    }
}

impl Dialect for SqliteDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn placeholder(&self, _n: usize) -> String {
        "?".to_string()
    }

    fn paging_clause(&self, limit: Option<i64>, offset: i64) -> String {
        match (limit, offset) {
            (Some(limit), 0) => format!("LIMIT {limit}"),
            (Some(limit), offset) => format!("LIMIT {limit} OFFSET {offset}"),
            (None, offset) => format!("LIMIT -1 OFFSET {offset}"),
        }
    }

    fn like_pattern(&self, op: FilterOp, placeholder: &str) -> String {
        concat_like(op, placeholder)
    }

    fn last_insert_id_sql(&self) -> &'static str {
        "SELECT last_insert_rowid()"
    }
}

fn concat_like(op: FilterOp, placeholder: &str) -> String {
    match op {
        FilterOp::Contains => format!("'%' || {placeholder} || '%'"),
        FilterOp::StartsWith => format!("{placeholder} || '%'"),
        FilterOp::EndsWith => format!("'%' || {placeholder}"),
        _ => placeholder.to_string(),
    }
}

static SQL_SERVER: SqlServerDialect = SqlServerDialect;
static POSTGRES: PostgresDialect = PostgresDialect;
static MYSQL: MysqlDialect = MysqlDialect;
static SQLITE: SqliteDialect = SqliteDialect;

pub fn dialect_for(kind: DialectKind) -> &'static dyn Dialect {
    match kind {
        DialectKind::SqlServer => &SQL_SERVER,
        DialectKind::Postgres => &POSTGRES,
        DialectKind::Mysql => &MYSQL,
        DialectKind::Sqlite => &SQLITE,
    }
}
