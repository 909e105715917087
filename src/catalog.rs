use std::collections::HashMap;

use crate::typemap::GqlScalar;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    BaseTable,
    View,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Single,
    Many,
    ManyToMany,
}

impl JoinKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Many => "many",
            Self::ManyToMany => "many-to-many",
        }
    }
}

/// Audit-populate directives attached to columns via metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulateRule {
    CreatedOn,
    CreatedBy,
    UpdatedOn,
    UpdatedBy,
    DeletedOn,
    DeletedBy,
}

impl PopulateRule {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "created-on" => Self::CreatedOn,
            "created-by" => Self::CreatedBy,
            "updated-on" => Self::UpdatedOn,
            "updated-by" => Self::UpdatedBy,
            "deleted-on" => Self::DeletedOn,
            "deleted-by" => Self::DeletedBy,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub name: String,
    /// Dialect-native type string as reported by the engine.
    pub data_type: String,
    pub scalar: GqlScalar,
    pub nullable: bool,
    pub has_default: bool,
    pub ordinal: i32,
    pub is_primary_key: bool,
    pub is_identity: bool,
    pub is_read_only: bool,
    pub populate: Option<PopulateRule>,
}

/// A join edge. Tables are referenced by (schema, name) lookup keys, never
/// by owning pointers; the join graph is cyclic.
#[derive(Debug, Clone)]
pub struct JoinMeta {
    pub name: String,
    pub kind: JoinKind,
    pub dest_schema: String,
    pub dest_table: String,
    pub source_columns: Vec<String>,
    pub dest_columns: Vec<String>,
    /// Intermediate table for many-to-many joins.
    pub link_table: Option<String>,
    pub link_source_columns: Vec<String>,
    pub link_dest_columns: Vec<String>,
    /// FK constraint that anchored an inferred join, when known.
    pub foreign_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TableMeta {
    pub catalog: String,
    pub schema: String,
    pub name: String,
    pub kind: TableKind,
    pub columns: Vec<ColumnMeta>,
    pub primary_keys: Vec<String>,
    pub identity_column: Option<String>,
    pub label_column: Option<String>,
    pub visibility: Visibility,
    pub default_limit: Option<i64>,
    pub soft_delete: bool,
    pub joins: Vec<JoinMeta>,
    /// GraphQL-safe name used for the root field and derived type names.
    pub gql_name: String,
}

impl TableMeta {
    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn join(&self, name: &str) -> Option<&JoinMeta> {
        self.joins.iter().find(|j| j.name == name)
    }

    pub fn key(&self) -> (String, String) {
        (self.schema.to_lowercase(), self.name.to_lowercase())
    }

    /// Editable means mutations get synthesized: a visible base table with
    /// at least one primary key.
    pub fn is_editable(&self) -> bool {
        self.kind == TableKind::BaseTable
            && self.visibility == Visibility::Visible
            && !self.primary_keys.is_empty()
    }

    pub fn deleted_on_column(&self) -> Option<&ColumnMeta> {
        self.columns
            .iter()
            .find(|c| c.populate == Some(PopulateRule::DeletedOn))
    }

    pub fn deleted_by_column(&self) -> Option<&ColumnMeta> {
        self.columns
            .iter()
            .find(|c| c.populate == Some(PopulateRule::DeletedBy))
    }
}

/// Immutable snapshot of everything known about the database. Built at
/// startup and on explicit reload; requests capture an `Arc` of it.
#[derive(Debug, Default)]
pub struct Catalog {
    pub tables: Vec<TableMeta>,
    by_key: HashMap<(String, String), usize>,
    by_gql_name: HashMap<String, usize>,
}

impl Catalog {
    pub fn new(tables: Vec<TableMeta>) -> Self {
        let mut by_key = HashMap::new();
        let mut by_gql_name = HashMap::new();
        for (idx, table) in tables.iter().enumerate() {
            by_key.insert(table.key(), idx);
            by_gql_name.insert(table.gql_name.clone(), idx);
        }
        Self {
            tables,
            by_key,
            by_gql_name,
        }
    }

    pub fn table(&self, schema: &str, name: &str) -> Option<&TableMeta> {
        self.by_key
            .get(&(schema.to_lowercase(), name.to_lowercase()))
            .map(|&idx| &self.tables[idx])
    }

    /// Name-only lookup, for engines without schema namespaces and for
    /// metadata-declared joins that omit the schema.
    pub fn table_named(&self, name: &str) -> Option<&TableMeta> {
        let lowered = name.to_lowercase();
        self.tables.iter().find(|t| t.name.to_lowercase() == lowered)
    }

    pub fn table_by_gql_name(&self, name: &str) -> Option<&TableMeta> {
        self.by_gql_name.get(name).map(|&idx| &self.tables[idx])
    }

    /// Tables that appear in the synthesized schema.
    pub fn visible_tables(&self) -> impl Iterator<Item = &TableMeta> {
        self.tables
            .iter()
            .filter(|t| t.visibility == Visibility::Visible)
    }

    /// Resolve a join's destination table.
    pub fn join_dest(&self, join: &JoinMeta) -> Option<&TableMeta> {
        if join.dest_schema.is_empty() {
            self.table_named(&join.dest_table)
        } else {
            self.table(&join.dest_schema, &join.dest_table)
                .or_else(|| self.table_named(&join.dest_table))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let catalog = fixtures::users_departments();
        assert!(catalog.table("", "USERS").is_some());
        assert!(catalog.table_named("Departments").is_some());
        assert!(catalog.table("", "nope").is_none());
    }

    #[test]
    fn join_dest_resolves_by_name() {
        let catalog = fixtures::users_departments();
        let users = catalog.table_named("users").unwrap();
        let dest = catalog.join_dest(users.join("department").unwrap()).unwrap();
        assert_eq!(dest.name, "departments");
    }

    #[test]
    fn editability_requires_pk_and_base_table() {
        let catalog = fixtures::users_departments();
        assert!(catalog.table_named("users").unwrap().is_editable());

        let mut view = catalog.table_named("users").unwrap().clone();
        view.kind = TableKind::View;
        assert!(!view.is_editable());

        let mut no_pk = catalog.table_named("users").unwrap().clone();
        no_pk.primary_keys.clear();
        assert!(!no_pk.is_editable());
    }
}
