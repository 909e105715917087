use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose;
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Column, Row};
use tracing::debug;

use crate::emit::Fragment;
use crate::error::Result;

/// One materialized result set: a column-name index plus raw rows. Values
/// stay as the driver returned them; database null is translated to the
/// response null later, exactly once, at scalar read.
#[derive(Debug, Default)]
pub struct Slab {
    columns: HashMap<String, usize>,
    rows: Vec<Vec<serde_json::Value>>,
}

impl Slab {
    fn from_rows(rows: &[AnyRow]) -> Self {
        let mut columns = HashMap::new();
        if let Some(first) = rows.first() {
            for column in first.columns() {
                columns.insert(column.name().to_string(), column.ordinal());
            }
        }
        let rows = rows
            .iter()
            .map(|row| (0..row.len()).map(|idx| any_value(row, idx)).collect())
            .collect();
        Self { columns, rows }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.get(name).copied()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&serde_json::Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }

    pub fn value_at(&self, row: usize, idx: usize) -> Option<&serde_json::Value> {
        self.rows.get(row)?.get(idx)
    }
}

/// All slabs of one request, keyed by fragment result key.
#[derive(Debug, Default)]
pub struct ResultSet {
    slabs: HashMap<String, Slab>,
}

impl ResultSet {
    pub fn slab(&self, key: &str) -> Option<&Slab> {
        self.slabs.get(key)
    }

    /// Reads a `<key>.count` slab: single row, single COUNT(*) column.
    pub fn total(&self, key: &str) -> Option<i64> {
        self.slabs
            .get(key)
            .and_then(|slab| slab.value_at(0, 0))
            .and_then(|v| v.as_i64())
    }
}

/// Executes the fragments in planner-declared order on a single pooled
/// connection and materializes every result set. The connection is
/// returned to the pool when this completes, before any response
/// serialization starts.
pub async fn run_batch(pool: &AnyPool, fragments: &[Fragment]) -> Result<ResultSet> {
    let mut conn = pool.acquire().await?;
    let mut slabs = HashMap::new();

    for fragment in fragments {
        let mut query = sqlx::query(&fragment.sql);
        for param in &fragment.params {
            query = bind_value(query, param);
        }
        let rows = query.fetch_all(&mut *conn).await?;
        debug!(key = %fragment.key, rows = rows.len(), "fragment materialized");
        slabs.insert(fragment.key.clone(), Slab::from_rows(&rows));
    }

    Ok(ResultSet { slabs })
}

pub fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>,
    value: &serde_json::Value,
) -> sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>> {
    match value {
        serde_json::Value::Null => query.bind(None::<String>),
        serde_json::Value::Bool(b) => query.bind(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => query.bind(s.clone()),
        // Lists are expanded by the emitter; anything else round-trips as
        // its JSON text.
        other => query.bind(other.to_string()),
    }
}

/// Decodes one cell from the Any driver without knowing the declared type:
/// integers, floats, text, booleans, then raw bytes (as base64 text).
fn any_value(row: &AnyRow, idx: usize) -> serde_json::Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return match v {
            Some(v) => serde_json::Value::from(v),
            None => serde_json::Value::Null,
        };
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return match v {
            Some(v) => serde_json::Value::from(v),
            None => serde_json::Value::Null,
        };
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return match v {
            Some(v) => serde_json::Value::from(v),
            None => serde_json::Value::Null,
        };
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return match v {
            Some(v) => serde_json::Value::from(v),
            None => serde_json::Value::Null,
        };
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return match v {
            Some(v) => serde_json::Value::from(general_purpose::STANDARD.encode(v)),
            None => serde_json::Value::Null,
        };
    }
    serde_json::Value::Null
}
