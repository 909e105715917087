use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "A GraphQL gateway for relational databases", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", env = "BIFROSTQL_CONFIG")]
    pub config: String,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the GraphQL gateway
    Serve,
    /// Introspect the database and print the synthesized GraphQL schema
    Introspect {
        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
}
