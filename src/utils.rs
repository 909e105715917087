//! Small helpers shared across the gateway: GraphQL-safe naming and the
//! string form of sort arguments.

/// Strips a foreign-key style suffix (`deptId`, `dept_id`) from a column
/// name, returning the referenced-entity stem. `email` stays `email`.
pub fn strip_id_suffix(name: &str) -> Option<&str> {
    for suffix in ["Id", "ID", "id"] {
        if let Some(stem) = name.strip_suffix(suffix) {
            if stem.is_empty() {
                return None;
            }
            if let Some(stem) = stem.strip_suffix('_') {
                if !stem.is_empty() {
                    return Some(stem);
                }
                return None;
            }
            return Some(stem);
        }
    }
    None
}

/// GraphQL identifiers start with a letter or underscore and contain only
/// letters, digits, and underscores.
pub fn is_valid_graphql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Converts a database table/column name to a valid GraphQL identifier by
/// replacing invalid characters with underscores and prefixing names that
/// start with a digit.
pub fn sanitize_graphql_name(name: &str) -> String {
    if name.is_empty() {
        return "_empty".to_string();
    }

    let mut result = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>();

    if let Some(first) = result.chars().next() {
        if first.is_ascii_digit() {
            result = format!("_{}", result);
        }
    }

    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Parses one sort entry. Two spellings are accepted: sort-enum item names
/// (`name_asc` / `name_desc`) and Directus-style strings (`name`, `+name`,
/// `-name`).
pub fn parse_sort_entry(raw: &str) -> Option<(String, SortDir)> {
    if let Some(col) = raw.strip_suffix("_desc") {
        if !col.is_empty() {
            return Some((col.to_string(), SortDir::Desc));
        }
    }
    if let Some(col) = raw.strip_suffix("_asc") {
        if !col.is_empty() {
            return Some((col.to_string(), SortDir::Asc));
        }
    }
    if let Some(col) = raw.strip_prefix('-') {
        if col.is_empty() {
            return None;
        }
        return Some((col.to_string(), SortDir::Desc));
    }
    let col = raw.strip_prefix('+').unwrap_or(raw);
    if col.is_empty() {
        return None;
    }
    Some((col.to_string(), SortDir::Asc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_id_suffix() {
        assert_eq!(strip_id_suffix("user_id"), Some("user"));
        assert_eq!(strip_id_suffix("deptId"), Some("dept"));
        assert_eq!(strip_id_suffix("claimID"), Some("claim"));
        assert_eq!(strip_id_suffix("email"), None);
        assert_eq!(strip_id_suffix("id"), None);
        assert_eq!(strip_id_suffix("_id"), None);
    }

    #[test]
    fn test_is_valid_graphql_identifier() {
        assert!(is_valid_graphql_identifier("user"));
        assert!(is_valid_graphql_identifier("user_id"));
        assert!(is_valid_graphql_identifier("_internal"));
        assert!(is_valid_graphql_identifier("User123"));

        assert!(!is_valid_graphql_identifier(""));
        assert!(!is_valid_graphql_identifier("123invalid"));
        assert!(!is_valid_graphql_identifier("with-dashes"));
        assert!(!is_valid_graphql_identifier("with spaces"));
    }

    #[test]
    fn test_sanitize_graphql_name() {
        assert_eq!(sanitize_graphql_name("user-profile"), "user_profile");
        assert_eq!(sanitize_graphql_name("123_table"), "_123_table");
        assert_eq!(sanitize_graphql_name("valid_name"), "valid_name");
        assert_eq!(sanitize_graphql_name(""), "_empty");
        assert_eq!(sanitize_graphql_name("user.email"), "user_email");
    }

    #[test]
    fn test_parse_sort_entry() {
        assert_eq!(
            parse_sort_entry("name"),
            Some(("name".to_string(), SortDir::Asc))
        );
        assert_eq!(
            parse_sort_entry("+name"),
            Some(("name".to_string(), SortDir::Asc))
        );
        assert_eq!(
            parse_sort_entry("-id"),
            Some(("id".to_string(), SortDir::Desc))
        );
        assert_eq!(
            parse_sort_entry("name_desc"),
            Some(("name".to_string(), SortDir::Desc))
        );
        assert_eq!(
            parse_sort_entry("name_asc"),
            Some(("name".to_string(), SortDir::Asc))
        );
        assert_eq!(parse_sort_entry(""), None);
        assert_eq!(parse_sort_entry("-"), None);
    }
}
