//! Loader Service - Loads order and product extracts into the sales warehouse
//!
//! Responsibilities:
//! - Read a CSV or spreadsheet extract
//! - Normalize rows and derive customer/product identities
//! - Stage the batch, merge dimensions, insert facts
//! - Record every run in etl_runs
//!
//! Re-running the same extract never duplicates dimension rows.

mod config;
mod date_dim;
mod dimensions;
mod error;
mod facts;
mod identity;
mod normalize;
mod pipeline;
mod products;
mod source;
mod staging;
mod warehouse;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{DateSource, DbConfig, FactDedup, LoadConfig, DEFAULT_CHUNK_SIZE};
use crate::error::FieldIssue;
use crate::pipeline::{OrderLoadSummary, ProductLoadSummary};
use crate::source::InputFormat;
use crate::warehouse::memory::MemoryWarehouse;
use crate::warehouse::postgres::PgWarehouse;
use crate::warehouse::{RunKind, RunOutcome, RunStart, RunStatus, Warehouse};

#[derive(Parser, Debug)]
#[command(name = "loader", about = "Loads order and product extracts into the sales warehouse")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load an order/shipment export into staging, dimensions and fact_sales
    Orders {
        #[command(flatten)]
        input: InputArgs,

        /// Timestamp that attributes a sale to a calendar day
        #[arg(long, env = "FACT_DATE_SOURCE", value_enum, default_value_t = DateSource::SubmitTime)]
        date_source: DateSource,

        /// Skip facts whose key is already loaded
        #[arg(long, value_enum, default_value_t = FactDedup::None)]
        fact_dedup: FactDedup,
    },
    /// Load a product master extract into dim_product
    Products {
        #[command(flatten)]
        input: InputArgs,
    },
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Extract to load (.csv, .xls or .xlsx)
    #[arg(long, env = "INPUT_PATH")]
    input: PathBuf,

    /// Worksheet name (default: first sheet)
    #[arg(long)]
    sheet: Option<String>,

    /// Rows per INSERT statement
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Dry run - load into an in-memory warehouse, don't touch the database
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Summary {
    Orders(OrderLoadSummary),
    Products(ProductLoadSummary),
}

impl Summary {
    fn print(&self) {
        match self {
            Summary::Orders(s) => {
                println!("Rows normalized: {}", s.normalize.rows);
                for issue in FieldIssue::ALL {
                    let count = s.normalize.issue_count(issue);
                    if count > 0 {
                        println!("  {}: {} ({})", issue.key(), count, issue);
                    }
                }
                println!("Rows staged: {}", s.staged);
                println!("Platforms inserted: {}", s.platforms_inserted);
                println!(
                    "Products inserted: {}, updated: {}",
                    s.products.inserted, s.products.updated
                );
                println!(
                    "Customers inserted: {}, updated: {}",
                    s.customers.inserted, s.customers.updated
                );
                println!("Dates inserted: {}", s.dates_inserted);
                println!("Facts inserted: {}", s.facts_inserted);
                println!("Staged rows without a fact: {}", s.rows_without_fact());
            }
            Summary::Products(s) => {
                println!("Rows read: {}", s.rows_read);
                println!("Rows staged: {}", s.staged);
                println!("Rows without a product key: {}", s.dropped_without_key);
                println!(
                    "Products inserted: {}, updated: {}",
                    s.products.inserted, s.products.updated
                );
            }
        }
    }
}

/// `sha256:<hex>` of the file's bytes.
async fn fingerprint(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read input file {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("sha256:{:x}", hasher.finalize()))
}

/// Run one load inside the etl_runs bracket.
async fn execute<W: Warehouse>(
    warehouse: &mut W,
    kind: RunKind,
    config: &LoadConfig,
    input: &InputArgs,
    content_hash: String,
) -> Result<Summary> {
    warehouse.ensure_schema().await?;
    let run_id = warehouse
        .begin_run(&RunStart {
            kind,
            input_path: input.input.display().to_string(),
            content_hash,
        })
        .await?;
    info!(%run_id, kind = kind.as_str(), "run started");

    let result = async {
        let table = source::read_table(&input.input, input.sheet.as_deref()).await?;
        println!("Columns: {}", table.headers.len());
        println!("Rows: {}", table.rows.len());

        let summary = match kind {
            RunKind::Orders => {
                Summary::Orders(pipeline::run_orders(warehouse, config, table).await?)
            }
            RunKind::Products => {
                Summary::Products(pipeline::run_products(warehouse, config, table).await?)
            }
        };
        Ok::<Summary, anyhow::Error>(summary)
    }
    .await;

    let outcome = match &result {
        Ok(summary) => RunOutcome {
            status: RunStatus::Ok,
            error: None,
            detail: serde_json::json!({ "config": config, "summary": summary }),
        },
        Err(e) => {
            error!(%run_id, error = %e, "run failed");
            RunOutcome {
                status: RunStatus::Failed,
                error: Some(format!("{:#}", e)),
                detail: serde_json::json!({ "config": config }),
            }
        }
    };
    warehouse.finish_run(run_id, &outcome).await?;

    result
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("loader=info")),
        )
        .init();

    let cli = Cli::parse();
    let (kind, input, config) = match cli.command {
        Command::Orders {
            input,
            date_source,
            fact_dedup,
        } => {
            let config = LoadConfig {
                date_source,
                fact_dedup,
                chunk_size: input.chunk_size,
            };
            (RunKind::Orders, input, config)
        }
        Command::Products { input } => {
            let config = LoadConfig {
                chunk_size: input.chunk_size,
                ..LoadConfig::default()
            };
            (RunKind::Products, input, config)
        }
    };

    println!("=== Sales Warehouse Loader ===");
    println!("Load: {}", kind.as_str());
    println!("Input: {}", input.input.display());
    println!("Mode: {}", if input.dry_run { "dry-run" } else { "live" });
    if kind == RunKind::Orders {
        println!("Date source: {}", config.date_source.column());
    }

    InputFormat::detect(&input.input)?;
    let content_hash = fingerprint(&input.input).await?;
    println!("Hash: {}", content_hash);

    let summary = if input.dry_run {
        let mut warehouse = MemoryWarehouse::default();
        execute(&mut warehouse, kind, &config, &input, content_hash).await?
    } else {
        let db = DbConfig::from_env()?;
        let mut warehouse = PgWarehouse::connect(&db).await?;
        execute(&mut warehouse, kind, &config, &input, content_hash).await?
    };

    println!("\n=== Load Complete ===");
    summary.print();
    if input.dry_run {
        println!("\nDry run - nothing written to the database");
    }

    Ok(())
}
