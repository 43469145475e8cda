//! Rashomon Admin CLI
//!
//! A thin command-line front end over `rashomon_store::StorageEngine`,
//! standing in for the out-of-scope HTTP bucket layer: every subcommand
//! here maps directly onto one facade method call.
//!
//! Runs against an in-memory `FakeCqlDriver` — there is no live-cluster
//! driver wired up by default (see `rashomon_store::driver::scylla`,
//! feature-gated behind `scylla-driver`), so each invocation starts from an
//! empty store. Useful for exercising schema/query shapes by hand; not a
//! substitute for a real deployment's driver wiring.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value as JsonValue;
use tracing::Level;

use rashomon_store::driver::fake::FakeCqlDriver;
use rashomon_store::facade::{DeleteRequest, GetRequest, Proj, PutCondition, PutRequest};
use rashomon_store::{StorageEngine, TableSchema};

#[derive(Parser)]
#[command(name = "rashomon")]
#[command(author = "Rashomon Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Administrative CLI for the Rashomon storage engine", long_about = None)]
struct Cli {
    /// Enable verbose (debug-level) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a table from a JSON schema file
    CreateTable {
        /// Reverse-dotted domain, e.g. `org.wikipedia.en`
        domain: String,
        /// Path to a JSON-encoded `TableSchema`
        schema: PathBuf,
    },

    /// Fetch a table's stored schema
    GetSchema { domain: String, table: String },

    /// Insert or update a row
    Put {
        domain: String,
        table: String,
        /// JSON object of attribute -> value
        attributes: String,
        /// Require the primary key not already exist
        #[arg(long)]
        if_not_exists: bool,
    },

    /// Query rows by primary key or secondary index
    Get {
        domain: String,
        table: String,
        /// JSON object of attribute -> value or {op: arg}
        predicate: String,
        /// Secondary index name, if reading through an index
        #[arg(long)]
        index: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Delete a row by primary key
    Delete {
        domain: String,
        table: String,
        /// JSON object of primary-key attribute -> value
        primary_key: String,
    },

    /// Drop a table's keyspace
    DropTable { domain: String, table: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let engine = StorageEngine::new(Arc::new(FakeCqlDriver::new()));

    match cli.command {
        Commands::CreateTable { domain, schema } => {
            let raw = std::fs::read_to_string(&schema)
                .with_context(|| format!("reading schema file {}", schema.display()))?;
            let schema: TableSchema = serde_json::from_str(&raw).context("parsing schema JSON")?;
            engine.create_table(&domain, &schema).await?;
            println!("{{\"status\":201}}");
        }

        Commands::GetSchema { domain, table } => {
            let schema = engine.get_schema(&domain, &table).await?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }

        Commands::Put {
            domain,
            table,
            attributes,
            if_not_exists,
        } => {
            let attributes: BTreeMap<String, JsonValue> =
                serde_json::from_str(&attributes).context("parsing attributes JSON")?;
            let if_condition = if_not_exists.then_some(PutCondition::NotExists);
            let outcome = engine
                .put(
                    &domain,
                    PutRequest {
                        table,
                        attributes,
                        if_condition,
                        consistency: Default::default(),
                    },
                )
                .await?;
            println!("{:?}", outcome);
        }

        Commands::Get {
            domain,
            table,
            predicate,
            index,
            limit,
        } => {
            let attributes: BTreeMap<String, JsonValue> =
                serde_json::from_str(&predicate).context("parsing predicate JSON")?;
            let result = engine
                .get(
                    &domain,
                    GetRequest {
                        table,
                        index,
                        attributes,
                        proj: Proj::All,
                        order: None,
                        limit,
                        consistency: Default::default(),
                    },
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&result.items)?);
        }

        Commands::Delete {
            domain,
            table,
            primary_key,
        } => {
            let primary_key: BTreeMap<String, JsonValue> =
                serde_json::from_str(&primary_key).context("parsing primary key JSON")?;
            engine
                .delete(
                    &domain,
                    DeleteRequest {
                        table,
                        primary_key,
                        consistency: Default::default(),
                    },
                )
                .await?;
            println!("{{\"status\":200}}");
        }

        Commands::DropTable { domain, table } => {
            engine.drop_table(&domain, &table).await?;
            println!("{{\"status\":200}}");
        }
    }

    Ok(())
}
