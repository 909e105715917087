use std::time::Duration;

use async_graphql::dynamic::SchemaBuilder;
use serde::Deserialize;
use sqlx::AnyPool;
use tracing::{debug, info};

/// Load configuration from a TOML file.
pub fn load_config(config_path: &str) -> anyhow::Result<BifrostConfig> {
    debug!("Loading config from: {}", config_path);

    if std::path::Path::new(config_path).exists() {
        info!("Config file found, loading from: {}", config_path);

        let config_content = std::fs::read_to_string(config_path).map_err(|e| {
            debug!("Failed to read config file: {}", e);
            e
        })?;

        let config: BifrostConfig = toml::from_str(&config_content).map_err(|e| {
            debug!("Failed to parse config file: {}", e);
            e
        })?;

        debug!("Config loaded successfully");
        return Ok(config);
    }

    Err(anyhow::anyhow!("Unable to load config"))
}

#[derive(Deserialize, Clone, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct BifrostConfig {
    pub server: ServerConfig,
    pub graphql: GraphQLConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    /// Ordered metadata directives, applied to the catalog in order.
    pub metadata: Vec<String>,
}

impl BifrostConfig {
    pub fn from_path(path: &str) -> anyhow::Result<Self> {
        load_config(path)
    }
}

#[derive(Deserialize, Clone)]
#[serde(rename_all = "kebab-case", default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Deserialize, Clone, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct GraphQLConfig {
    pub path: Option<String>,
    pub playground_path: Option<String>,
    pub enable_playground: Option<bool>,
    pub limit_depth: Option<usize>,
    pub limit_complexity: Option<usize>,
    pub limit_recursive_depth: Option<usize>,
    pub limit_directives: Option<usize>,
    pub disable_suggestions: Option<bool>,
    pub disable_introspection: Option<bool>,
    pub introspection_only: Option<bool>,
}

impl GraphQLConfig {
    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or("/graphql")
    }

    pub fn playground_path(&self) -> &str {
        self.playground_path.as_deref().unwrap_or("/playground")
    }

    pub fn apply(&self, mut schema: SchemaBuilder) -> SchemaBuilder {
        if let Some(complexity) = self.limit_complexity {
            schema = schema.limit_complexity(complexity);
        }

        if let Some(depth) = self.limit_depth {
            schema = schema.limit_depth(depth);
        }

        if let Some(depth) = self.limit_recursive_depth {
            schema = schema.limit_recursive_depth(depth);
        }

        if let Some(directives) = self.limit_directives {
            schema = schema.limit_directives(directives);
        }

        if self.disable_suggestions.unwrap_or(false) {
            schema = schema.disable_suggestions();
        }

        if self.disable_introspection.unwrap_or(false) {
            schema = schema.disable_introspection();
        }

        if self.introspection_only.unwrap_or(false) {
            schema = schema.introspection_only();
        }

        schema
    }
}

#[derive(Deserialize, Clone)]
#[serde(rename_all = "kebab-case", default)]
pub struct DatabaseConfig {
    pub connection_string: Option<String>,
    pub use_env: Option<bool>,
    pub dialect: String,
    pub default_limit: Option<i64>,
    pub request_timeout_secs: Option<u64>,
    pub max_connections: Option<u32>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            use_env: None,
            dialect: "sqlite".to_string(),
            default_limit: None,
            request_timeout_secs: None,
            max_connections: None,
        }
    }
}

impl DatabaseConfig {
    pub fn default_limit(&self) -> i64 {
        self.default_limit.unwrap_or(100)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(30))
    }

    pub async fn create_connection(&self) -> sqlx::Result<AnyPool> {
        sqlx::any::install_default_drivers();

        let url = match &self.connection_string {
            Some(url) => url.clone(),
            None if self.use_env.unwrap_or(true) => {
                std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://local.db".into())
            }
            None => {
                return Err(sqlx::Error::Configuration(
                    "no connection-string configured and use-env is off".into(),
                ));
            }
        };

        sqlx::pool::PoolOptions::<sqlx::Any>::new()
            .max_connections(self.max_connections.unwrap_or(8))
            .connect(&url)
            .await
    }
}

#[derive(Deserialize, Clone, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct AuthConfig {
    pub enable_auth: Option<bool>,
    pub audit_user_key: Option<String>,
}

impl AuthConfig {
    pub fn enabled(&self) -> bool {
        self.enable_auth.unwrap_or(false)
    }

    pub fn audit_user_key(&self) -> &str {
        self.audit_user_key.as_deref().unwrap_or("sub")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config: BifrostConfig = toml::from_str(
            r#"
            [server]
            host = "127.0.0.1"
            port = 9000

            [graphql]
            path = "/api/graphql"
            limit-depth = 12

            [database]
            connection-string = "sqlite://test.db"
            dialect = "sqlite"
            default-limit = 25

            [auth]
            enable-auth = true
            audit-user-key = "uid"

            metadata = [
              "*.users { label: name }",
            ]
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.graphql.path(), "/api/graphql");
        assert_eq!(config.database.default_limit(), 25);
        assert!(config.auth.enabled());
        assert_eq!(config.auth.audit_user_key(), "uid");
        assert_eq!(config.metadata.len(), 1);
    }

    #[test]
    fn defaults_cover_everything() {
        let config: BifrostConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.graphql.path(), "/graphql");
        assert_eq!(config.graphql.playground_path(), "/playground");
        assert_eq!(config.database.dialect, "sqlite");
        assert_eq!(config.database.default_limit(), 100);
        assert!(!config.auth.enabled());
        assert_eq!(config.auth.audit_user_key(), "sub");
    }
}
