use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_graphql::dynamic::Schema;
use async_graphql::http::GraphiQLSource;
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::{Extension, Router};
use sqlx::AnyPool;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::config::BifrostConfig;
use crate::dialect::{Dialect, DialectKind, dialect_for};
use crate::error::Result;
use crate::metadata::Directive;

pub mod catalog;
pub mod config;
pub mod dialect;
pub mod emit;
pub mod error;
pub mod execute;
pub mod introspect;
pub mod metadata;
pub mod mutation;
pub mod plan;
pub mod resolvers;
pub mod schema;
pub mod typemap;
pub mod utils;

/// Per-process gateway settings shared with every resolver.
pub struct GatewayOptions {
    pub default_limit: i64,
    pub request_timeout: Duration,
    pub audit_user_key: String,
}

/// Snapshot context a schema instance executes against: the catalog it
/// was synthesized from plus the dialect. Reload builds a fresh pair.
pub struct GatewayContext {
    pub catalog: Arc<Catalog>,
    pub dialect: &'static dyn Dialect,
    pub options: GatewayOptions,
}

/// Values the host attaches to a request, at minimum the authenticated
/// subject under the configured audit-user-key.
#[derive(Debug, Clone, Default)]
pub struct UserContext(pub HashMap<String, serde_json::Value>);

impl UserContext {
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }
}

/// The gateway itself: introspect a database, synthesize the GraphQL
/// schema, serve it over HTTP.
pub struct BifrostQL {
    config: BifrostConfig,
}

/// Swappable schema snapshot: readers clone the current schema, a reload
/// publishes a replacement.
pub type SchemaHandle = Arc<RwLock<Schema>>;

#[derive(Clone)]
struct AppState {
    schema: SchemaHandle,
    require_auth: bool,
}

impl BifrostQL {
    pub fn new(config: BifrostConfig) -> Self {
        Self { config }
    }

    pub fn dialect(&self) -> Result<&'static dyn Dialect> {
        Ok(dialect_for(DialectKind::parse(&self.config.database.dialect)?))
    }

    /// Loads a fresh catalog snapshot from the live database.
    pub async fn introspect(&self, pool: &AnyPool) -> Result<Catalog> {
        let directives = Directive::parse_all(&self.config.metadata)?;
        crate::introspect::load_catalog(pool, self.dialect()?, &directives).await
    }

    /// Synthesizes the executable schema for one catalog snapshot.
    pub fn build_schema(&self, catalog: Arc<Catalog>, pool: AnyPool) -> Result<Schema> {
        let dialect = self.dialect()?;
        let synthesized = schema::synthesize(&catalog, dialect.kind())?;

        info!(
            objects = synthesized.objects.len(),
            inputs = synthesized.inputs.len(),
            "building GraphQL schema"
        );

        let mutation_name = synthesized.mutation.as_ref().map(|_| "Mutation");
        let mut builder =
            Schema::build("Query", mutation_name, None::<&str>).register(synthesized.query);
        if let Some(mutation) = synthesized.mutation {
            builder = builder.register(mutation);
        }
        for object in synthesized.objects {
            builder = builder.register(object);
        }
        for input in synthesized.inputs {
            builder = builder.register(input);
        }
        for item in synthesized.enums {
            builder = builder.register(item);
        }

        builder = self.config.graphql.apply(builder);
        builder = builder
            .data(GatewayContext {
                catalog,
                dialect,
                options: GatewayOptions {
                    default_limit: self.config.database.default_limit(),
                    request_timeout: self.config.database.request_timeout(),
                    audit_user_key: self.config.auth.audit_user_key().to_string(),
                },
            })
            .data(pool);

        let built = builder.finish().map_err(|e| {
            crate::error::BifrostError::internal(format!("schema build failed: {e}"))
        })?;
        info!("GraphQL schema ready");
        Ok(built)
    }

    /// Introspects, synthesizes, and wires up the HTTP router. The
    /// returned handle can be refreshed with [`BifrostQL::reload`].
    pub async fn build(
        &self,
        pool: &AnyPool,
    ) -> anyhow::Result<(Router, TcpListener, SchemaHandle)> {
        let catalog = Arc::new(self.introspect(pool).await?);
        let built = self.build_schema(catalog, pool.clone())?;

        let handle: SchemaHandle = Arc::new(RwLock::new(built));
        let state = AppState {
            schema: handle.clone(),
            require_auth: self.config.auth.enabled(),
        };

        let path = self.config.graphql.path().to_string();
        let mut router = Router::new().route(
            &path,
            axum::routing::post(graphql_handler).with_state(state.clone()),
        );

        if self.config.graphql.enable_playground.unwrap_or(true) {
            let endpoint = path.clone();
            router = router.route(
                self.config.graphql.playground_path(),
                axum::routing::get(move || async move {
                    Html(GraphiQLSource::build().endpoint(&endpoint).finish())
                }),
            );
        }

        let listener = TcpListener::bind(format!(
            "{}:{}",
            self.config.server.host, self.config.server.port
        ))
        .await?;

        Ok((router, listener, handle))
    }

    /// Rebuilds the catalog and schema and atomically publishes the new
    /// snapshot. Requests already planning keep the snapshot they hold.
    pub async fn reload(&self, handle: &SchemaHandle, pool: &AnyPool) -> Result<()> {
        let catalog = Arc::new(self.introspect(pool).await?);
        let built = self.build_schema(catalog, pool.clone())?;
        match handle.write() {
            Ok(mut guard) => *guard = built,
            Err(_) => {
                return Err(crate::error::BifrostError::internal(
                    "schema lock poisoned during reload",
                ));
            }
        }
        info!("catalog reloaded");
        Ok(())
    }
}

/// POST handler: enforces the auth gate, forwards the host-provided user
/// context into request data, and executes against the current schema
/// snapshot.
async fn graphql_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    user: Option<Extension<UserContext>>,
    req: GraphQLRequest,
) -> Response {
    if state.require_auth && !has_bearer_token(&headers) {
        warn!("rejecting unauthenticated request");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let schema = match state.schema.read() {
        Ok(guard) => guard.clone(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let mut request = req.into_inner();
    if let Some(Extension(user)) = user {
        request = request.data(user);
    }

    GraphQLResponse::from(schema.execute(request).await).into_response()
}

fn has_bearer_token(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("Bearer ") && v.len() > "Bearer ".len())
        .unwrap_or(false)
}
