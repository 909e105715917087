use std::sync::Arc;

use bifrostql::BifrostQL;
use bifrostql::config::BifrostConfig;
use bifrostql::dialect::DialectKind;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = BifrostConfig::from_path(&cli.config)?;

    if DialectKind::parse(&config.database.dialect)? == DialectKind::SqlServer {
        anyhow::bail!(
            "sql-server statement generation is supported, but no SQL Server driver ships \
             with sqlx; configure postgres, mysql, or sqlite"
        );
    }

    match cli.command {
        Commands::Serve => serve_command(config).await,
        Commands::Introspect { output } => introspect_command(config, output).await,
    }
}

async fn serve_command(config: BifrostConfig) -> anyhow::Result<()> {
    let pool = config.database.create_connection().await?;
    let gateway = BifrostQL::new(config);

    // A failed catalog load here propagates and exits non-zero.
    let (router, listener, _schema) = gateway.build(&pool).await?;

    info!(addr = %listener.local_addr()?, "gateway listening");
    axum::serve(listener, router).await?;

    Ok(())
}

async fn introspect_command(config: BifrostConfig, output: Option<String>) -> anyhow::Result<()> {
    let pool = config.database.create_connection().await?;
    let gateway = BifrostQL::new(config);

    let catalog = Arc::new(gateway.introspect(&pool).await?);
    let schema = gateway.build_schema(catalog, pool.clone())?;
    let sdl = schema.sdl();

    match output {
        Some(file_path) => {
            std::fs::write(&file_path, &sdl)?;
            info!(path = %file_path, "GraphQL schema written");
        }
        None => println!("{sdl}"),
    }

    Ok(())
}
