use crate::dialect::DialectKind;

/// GraphQL scalar a database column maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GqlScalar {
    Int,
    Float,
    String,
    Boolean,
}

impl GqlScalar {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int => "Int",
            Self::Float => "Float",
            Self::String => "String",
            Self::Boolean => "Boolean",
        }
    }
}

/// Maps a dialect-native data type string to a GraphQL scalar. Unknown
/// types fall back to `String`, the safe default. Side-effect free.
pub fn scalar_for(dialect: DialectKind, db_type: &str) -> GqlScalar {
    let folded = normalize(db_type);
    let ty = folded.as_str();

    // Shared across engines.
    match ty {
        "int" | "integer" | "bigint" | "smallint" | "tinyint" | "mediumint" | "int2" | "int4"
        | "int8" | "serial" | "bigserial" | "smallserial" => return GqlScalar::Int,
        "real" | "float" | "double" | "double precision" | "numeric" | "decimal" | "money"
        | "smallmoney" | "float4" | "float8" => return GqlScalar::Float,
        "bool" | "boolean" => return GqlScalar::Boolean,
        _ => {}
    }

    match dialect {
        DialectKind::SqlServer => match ty {
            "bit" => GqlScalar::Boolean,
            _ => GqlScalar::String,
        },
        DialectKind::Mysql => match ty {
            // MySQL's bit(1)/tinyint(1) conventions read as booleans.
            "bit" => GqlScalar::Boolean,
            _ => GqlScalar::String,
        },
        DialectKind::Postgres | DialectKind::Sqlite => GqlScalar::String,
    }
}

/// Scalar accepted on insert/update inputs. Temporal types read back as
/// `String` already; the only divergence from [`scalar_for`] is that every
/// temporal input is ISO-8601 text even on engines with native types.
pub fn insert_scalar_for(dialect: DialectKind, db_type: &str) -> GqlScalar {
    if is_temporal(db_type) {
        return GqlScalar::String;
    }
    scalar_for(dialect, db_type)
}

pub fn is_temporal(db_type: &str) -> bool {
    let folded = normalize(db_type);
    matches!(
        folded.as_str(),
        "date"
            | "time"
            | "datetime"
            | "datetime2"
            | "smalldatetime"
            | "datetimeoffset"
            | "timestamp"
            | "timestamp with time zone"
            | "timestamp without time zone"
            | "timestamptz"
    )
}

/// Case-fold, trim, and drop any parenthesized length/precision suffix
/// (`varchar(255)` -> `varchar`, `tinyint(1)` -> `tinyint`).
fn normalize(db_type: &str) -> String {
    let trimmed = db_type.trim();
    let base = match trimmed.find('(') {
        Some(idx) => &trimmed[..idx],
        None => trimmed,
    };
    base.trim().to_ascii_lowercase()
}
