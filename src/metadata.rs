use globset::{GlobBuilder, GlobMatcher};
use tracing::warn;

use crate::catalog::{JoinKind, JoinMeta, PopulateRule, TableMeta, Visibility};
use crate::error::{BifrostError, Result};

/// One configured metadata line:
/// `<schemaPat>.<tablePat>[.<colPat>][|has(<col>)] { key: value; ... }`.
/// Directives apply in configuration order; later ones override earlier.
pub struct Directive {
    pub raw: String,
    schema_pat: GlobMatcher,
    table_pat: GlobMatcher,
    column_pat: Option<GlobMatcher>,
    predicate: Option<Predicate>,
    attrs: Vec<(String, String)>,
}

enum Predicate {
    HasColumn(String),
}

fn glob(pat: &str) -> Result<GlobMatcher> {
    GlobBuilder::new(pat)
        .case_insensitive(true)
        .literal_separator(false)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| BifrostError::invalid_query(format!("bad metadata pattern '{pat}': {e}")))
}

impl Directive {
    pub fn parse(line: &str) -> Result<Self> {
        let open = line.find('{').ok_or_else(|| {
            BifrostError::invalid_query(format!("metadata directive missing '{{': {line}"))
        })?;
        let close = line.rfind('}').ok_or_else(|| {
            BifrostError::invalid_query(format!("metadata directive missing '}}': {line}"))
        })?;
        if close < open {
            return Err(BifrostError::invalid_query(format!(
                "malformed metadata directive: {line}"
            )));
        }

        let head = line[..open].trim();
        let body = &line[open + 1..close];

        let (pattern, predicate) = match head.split_once('|') {
            Some((p, pred)) => (p.trim(), Some(parse_predicate(pred.trim())?)),
            None => (head, None),
        };

        let segments: Vec<&str> = pattern.split('.').map(str::trim).collect();
        let (schema_pat, table_pat, column_pat) = match segments.as_slice() {
            [schema, table] => (glob(schema)?, glob(table)?, None),
            [schema, table, column] => (glob(schema)?, glob(table)?, Some(glob(column)?)),
            _ => {
                return Err(BifrostError::invalid_query(format!(
                    "metadata pattern must be schema.table or schema.table.column: {pattern}"
                )));
            }
        };

        let mut attrs = Vec::new();
        for entry in body.split(';') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (key, value) = entry.split_once(':').ok_or_else(|| {
                BifrostError::invalid_query(format!("metadata entry missing ':': {entry}"))
            })?;
            attrs.push((key.trim().to_string(), value.trim().to_string()));
        }

        Ok(Self {
            raw: line.to_string(),
            schema_pat,
            table_pat,
            column_pat,
            predicate,
            attrs,
        })
    }

    pub fn parse_all(lines: &[String]) -> Result<Vec<Self>> {
        lines.iter().map(|l| Self::parse(l)).collect()
    }

    fn matches_table(&self, table: &TableMeta) -> bool {
        if !self.schema_pat.is_match(&table.schema) || !self.table_pat.is_match(&table.name) {
            return false;
        }
        match &self.predicate {
            Some(Predicate::HasColumn(col)) => table
                .columns
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(col)),
            None => true,
        }
    }
}

fn parse_predicate(s: &str) -> Result<Predicate> {
    if let Some(inner) = s.strip_prefix("has(").and_then(|r| r.strip_suffix(')')) {
        return Ok(Predicate::HasColumn(inner.trim().to_string()));
    }
    Err(BifrostError::invalid_query(format!(
        "unknown metadata predicate: {s}"
    )))
}

/// Applies every matching directive to the table, in order.
pub fn apply(directives: &[Directive], table: &mut TableMeta) {
    for directive in directives {
        if !directive.matches_table(table) {
            continue;
        }
        match &directive.column_pat {
            Some(col_pat) => apply_column_attrs(directive, col_pat, table),
            None => apply_table_attrs(directive, table),
        }
    }
    // A populate(deleted-on) marker alone is enough to flip soft delete on.
    if table.deleted_on_column().is_some() {
        table.soft_delete = true;
    }
}

fn apply_table_attrs(directive: &Directive, table: &mut TableMeta) {
    for (key, value) in &directive.attrs {
        match key.as_str() {
            "visibility" => {
                table.visibility = if value == "hidden" {
                    Visibility::Hidden
                } else {
                    Visibility::Visible
                };
            }
            "label" => table.label_column = Some(value.clone()),
            "default-limit" => match value.parse::<i64>() {
                Ok(n) => table.default_limit = Some(n),
                Err(_) => warn!(directive = %directive.raw, "default-limit is not a number"),
            },
            "delete-type" => table.soft_delete = value == "soft",
            "auto-join" => {
                if value == "off" {
                    // Drops everything accumulated so far; joins declared by
                    // later directives survive, per the ordering rule.
                    table.joins.clear();
                }
            }
            "join" | "foreign-joins" | "dynamic-joins" => match parse_join(value) {
                Ok(join) => {
                    table.joins.retain(|j| j.name != join.name);
                    table.joins.push(join);
                }
                Err(e) => warn!(directive = %directive.raw, error = %e, "ignoring bad join"),
            },
            other => {
                warn!(directive = %directive.raw, key = other, "unknown table metadata key");
            }
        }
    }
}

fn apply_column_attrs(directive: &Directive, col_pat: &GlobMatcher, table: &mut TableMeta) {
    for column in &mut table.columns {
        if !col_pat.is_match(&column.name) {
            continue;
        }
        for (key, value) in &directive.attrs {
            match key.as_str() {
                "populate" => match PopulateRule::parse(value) {
                    Some(rule) => column.populate = Some(rule),
                    None => {
                        warn!(directive = %directive.raw, value = %value, "unknown populate rule")
                    }
                },
                "update" => {
                    if value == "read-only" {
                        column.is_read_only = true;
                    }
                }
                other => {
                    warn!(directive = %directive.raw, key = other, "unknown column metadata key");
                }
            }
        }
    }
}

/// Join declaration grammar:
/// `<name> <kind> <destTable>(<srcCols> -> <destCols>) [via <linkTable>(<linkSrc> -> <linkDest>)]`
/// where `<kind>` is `single`, `many`, or `many-to-many` and column lists
/// are comma separated.
fn parse_join(value: &str) -> Result<JoinMeta> {
    let mut rest = value.trim();

    let (name, tail) = rest.split_once(char::is_whitespace).ok_or_else(|| {
        BifrostError::invalid_query(format!("join declaration too short: {value}"))
    })?;
    rest = tail.trim_start();

    let (kind_str, tail) = rest.split_once(char::is_whitespace).ok_or_else(|| {
        BifrostError::invalid_query(format!("join declaration missing target: {value}"))
    })?;
    rest = tail.trim_start();

    let kind = match kind_str {
        "single" => JoinKind::Single,
        "many" => JoinKind::Many,
        "many-to-many" => JoinKind::ManyToMany,
        other => {
            return Err(BifrostError::invalid_query(format!(
                "unknown join kind '{other}'"
            )));
        }
    };

    let (dest, via) = match rest.split_once(" via ") {
        Some((dest, via)) => (dest.trim(), Some(via.trim())),
        None => (rest, None),
    };

    let (dest_table, source_columns, dest_columns) = parse_table_columns(dest)?;
    if source_columns.is_empty() || source_columns.len() != dest_columns.len() {
        return Err(BifrostError::invalid_query(format!(
            "join column lists must be non-empty and paired: {value}"
        )));
    }

    let (link_table, link_source_columns, link_dest_columns) = match via {
        Some(via) => {
            if kind != JoinKind::ManyToMany {
                return Err(BifrostError::invalid_query(format!(
                    "'via' is only valid for many-to-many joins: {value}"
                )));
            }
            let (table, src, dst) = parse_table_columns(via)?;
            (Some(table), src, dst)
        }
        None => {
            if kind == JoinKind::ManyToMany {
                return Err(BifrostError::invalid_query(format!(
                    "many-to-many joins need a 'via' table: {value}"
                )));
            }
            (None, vec![], vec![])
        }
    };

    let (dest_schema, dest_table) = match dest_table.split_once('.') {
        Some((schema, table)) => (schema.to_string(), table.to_string()),
        None => (String::new(), dest_table),
    };

    Ok(JoinMeta {
        name: name.to_string(),
        kind,
        dest_schema,
        dest_table,
        source_columns,
        dest_columns,
        link_table,
        link_source_columns,
        link_dest_columns,
        foreign_key: None,
    })
}

/// Parses `table(a, b -> c, d)` into (table, [a, b], [c, d]).
fn parse_table_columns(s: &str) -> Result<(String, Vec<String>, Vec<String>)> {
    let open = s.find('(');
    let close = s.rfind(')');
    let (open, close) = match (open, close) {
        (Some(o), Some(c)) if c > o => (o, c),
        _ => {
            return Err(BifrostError::invalid_query(format!(
                "expected table(cols -> cols): {s}"
            )));
        }
    };
    let table = s[..open].trim().to_string();
    let inner = &s[open + 1..close];
    let (src, dst) = inner.split_once("->").ok_or_else(|| {
        BifrostError::invalid_query(format!("join columns need '->': {s}"))
    })?;
    let cols = |part: &str| {
        part.split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
    };
    Ok((table, cols(src), cols(dst)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures;

    fn users() -> TableMeta {
        fixtures::users_departments()
            .table_named("users")
            .unwrap()
            .clone()
    }

    #[test]
    fn parses_table_directive() {
        let d = Directive::parse("*.users { label: name; default-limit: 25 }").unwrap();
        let mut table = users();
        apply(&[d], &mut table);
        assert_eq!(table.label_column.as_deref(), Some("name"));
        assert_eq!(table.default_limit, Some(25));
    }

    #[test]
    fn glob_is_case_insensitive_and_matches_empty_schema() {
        let d = Directive::parse("*.USE* { visibility: hidden }").unwrap();
        let mut table = users();
        apply(&[d], &mut table);
        assert_eq!(table.visibility, Visibility::Hidden);
    }

    #[test]
    fn later_directive_overrides_earlier() {
        let directives = Directive::parse_all(&[
            "*.users { default-limit: 10 }".to_string(),
            "*.users { default-limit: 50 }".to_string(),
        ])
        .unwrap();
        let mut table = users();
        apply(&directives, &mut table);
        assert_eq!(table.default_limit, Some(50));
    }

    #[test]
    fn predicate_gates_application() {
        let hit = Directive::parse("*.*|has(deptId) { label: name }").unwrap();
        let miss = Directive::parse("*.*|has(nonexistent) { default-limit: 1 }").unwrap();
        let mut table = users();
        apply(&[hit, miss], &mut table);
        assert_eq!(table.label_column.as_deref(), Some("name"));
        assert_eq!(table.default_limit, None);
    }

    #[test]
    fn column_directive_sets_populate_and_read_only() {
        let directives = Directive::parse_all(&[
            "*.users.name { update: read-only }".to_string(),
            "*.users.deptId { populate: created-by }".to_string(),
        ])
        .unwrap();
        let mut table = users();
        apply(&directives, &mut table);
        assert!(table.column("name").unwrap().is_read_only);
        assert_eq!(
            table.column("deptId").unwrap().populate,
            Some(PopulateRule::CreatedBy)
        );
    }

    #[test]
    fn deleted_on_marker_enables_soft_delete() {
        let d = Directive::parse("*.users.deptId { populate: deleted-on }").unwrap();
        let mut table = users();
        apply(&[d], &mut table);
        assert!(table.soft_delete);
    }

    #[test]
    fn join_declaration_replaces_same_name() {
        let d = Directive::parse(
            "*.departments { join: members many users(id -> deptId) }",
        )
        .unwrap();
        let mut table = fixtures::users_departments()
            .table_named("departments")
            .unwrap()
            .clone();
        apply(&[d], &mut table);
        let members = table.join("members").unwrap();
        assert_eq!(members.kind, JoinKind::Many);
        assert_eq!(members.dest_table, "users");
        assert_eq!(members.source_columns, vec!["id"]);
        assert_eq!(members.dest_columns, vec!["deptId"]);
        assert_eq!(table.joins.iter().filter(|j| j.name == "members").count(), 1);
    }

    #[test]
    fn many_to_many_join_needs_via() {
        assert!(parse_join("tags many-to-many tags(id -> id)").is_err());
        let join = parse_join(
            "tags many-to-many tags(id -> id) via user_tags(user_id -> tag_id)",
        )
        .unwrap();
        assert_eq!(join.kind, JoinKind::ManyToMany);
        assert_eq!(join.link_table.as_deref(), Some("user_tags"));
        assert_eq!(join.link_source_columns, vec!["user_id"]);
        assert_eq!(join.link_dest_columns, vec!["tag_id"]);
    }

    #[test]
    fn auto_join_off_clears_prior_joins() {
        let directives = Directive::parse_all(&[
            "*.users { auto-join: off }".to_string(),
            "*.users { join: boss single users(deptId -> id) }".to_string(),
        ])
        .unwrap();
        let mut table = users();
        apply(&directives, &mut table);
        assert_eq!(table.joins.len(), 1);
        assert_eq!(table.joins[0].name, "boss");
    }

    #[test]
    fn multi_column_join_pairs() {
        let join =
            parse_join("detail single detail(orderId, lineNo -> orderId, lineNo)").unwrap();
        assert_eq!(join.source_columns.len(), 2);
        assert_eq!(join.dest_columns.len(), 2);
        assert!(parse_join("broken single t(a, b -> c)").is_err());
    }
}
