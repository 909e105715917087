use async_graphql::ErrorExtensions;
use thiserror::Error;

/// Request-level failures surfaced to GraphQL clients as
/// `errors[*].extensions.code`.
#[derive(Debug, Error)]
pub enum BifrostError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("mutation not allowed: {0}")]
    MutationNotAllowed(String),
    #[error("missing primary key: {0}")]
    MissingPk(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("request deadline exceeded")]
    Timeout,
    #[error("request cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

impl BifrostError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidQuery(_) => "INVALID_QUERY",
            Self::InvalidFilter(_) => "INVALID_FILTER",
            Self::MutationNotAllowed(_) => "MUTATION_NOT_ALLOWED",
            Self::MissingPk(_) => "MISSING_PK",
            Self::Db(_) => "DB_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    pub fn invalid_filter(msg: impl Into<String>) -> Self {
        Self::InvalidFilter(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<BifrostError> for async_graphql::Error {
    fn from(err: BifrostError) -> Self {
        let message = match &err {
            // Driver messages carry the engine's SQLSTATE; raw SQL is only
            // ever written to the debug log, never into the response.
            BifrostError::Db(db) => match db.as_database_error() {
                Some(inner) => match inner.code() {
                    Some(state) => format!("database error [{}]: {}", state, inner.message()),
                    None => format!("database error: {}", inner.message()),
                },
                None => format!("database error: {db}"),
            },
            other => other.to_string(),
        };

        async_graphql::Error::new(message)
            .extend_with(|_, ext| ext.set("code", err.code()))
    }
}

pub type Result<T, E = BifrostError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_taxonomy() {
        assert_eq!(BifrostError::invalid_query("x").code(), "INVALID_QUERY");
        assert_eq!(BifrostError::invalid_filter("x").code(), "INVALID_FILTER");
        assert_eq!(
            BifrostError::MutationNotAllowed("v".into()).code(),
            "MUTATION_NOT_ALLOWED"
        );
        assert_eq!(BifrostError::MissingPk("id".into()).code(), "MISSING_PK");
        assert_eq!(BifrostError::Timeout.code(), "TIMEOUT");
        assert_eq!(BifrostError::Cancelled.code(), "CANCELLED");
        assert_eq!(BifrostError::internal("x").code(), "INTERNAL");
    }

    #[test]
    fn graphql_error_carries_code_extension() {
        let err: async_graphql::Error = BifrostError::Timeout.into();
        let ext = err.extensions.expect("extensions set");
        assert_eq!(
            ext.get("code"),
            Some(&async_graphql::Value::from("TIMEOUT"))
        );
    }
}
