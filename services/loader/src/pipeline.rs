//! Run orchestration. Steps execute strictly in order; the first error
//! aborts the run and leaves earlier steps committed. Callers create the
//! schema first (`Warehouse::ensure_schema`).

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::LoadConfig;
use crate::date_dim::{self, batch_range};
use crate::dimensions::{MergeCounts, ProductSource};
use crate::normalize::{normalize_orders, NormalizeReport};
use crate::products::{self, AttributeColumns};
use crate::source::RawTable;
use crate::staging::stage_orders;
use crate::warehouse::Warehouse;

#[derive(Debug, Clone, Serialize)]
pub struct OrderLoadSummary {
    pub normalize: NormalizeReport,
    pub staged: u64,
    pub platforms_inserted: u64,
    pub products: MergeCounts,
    pub customers: MergeCounts,
    pub dates_inserted: u64,
    pub facts_inserted: u64,
}

impl OrderLoadSummary {
    /// Staged rows that produced no fact (unresolved, undated or deduplicated).
    pub fn rows_without_fact(&self) -> u64 {
        self.staged.saturating_sub(self.facts_inserted)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductLoadSummary {
    pub rows_read: usize,
    pub staged: u64,
    pub dropped_without_key: usize,
    pub attribute_columns: AttributeColumns,
    pub products: MergeCounts,
}

/// Load an order export: normalize, stage, merge platform, product and
/// customer dimensions, cover the date range, then insert facts.
pub async fn run_orders<W: Warehouse>(
    warehouse: &mut W,
    config: &LoadConfig,
    table: RawTable,
) -> Result<OrderLoadSummary> {
    let (records, normalize) = normalize_orders(&table);
    info!(rows = normalize.rows, "normalized order rows");
    if !normalize.missing_columns.is_empty() {
        info!(columns = ?normalize.missing_columns, "expected columns absent, treated as null");
    }
    debug!(
        issues = ?normalize.issues,
        null_product_keys = normalize.null_product_keys,
        "normalization issues"
    );

    let batch = stage_orders(&records);
    let staged = warehouse.stage_orders(&batch, config.chunk_size).await?;

    let platforms_inserted = warehouse.upsert_platforms().await?;
    let products = warehouse.upsert_products(ProductSource::OrderExport).await?;
    let customers = warehouse.upsert_customers().await?;

    let (min, max) = batch_range(&batch, config.date_source);
    let dates_inserted = date_dim::ensure_covers(warehouse, min, max, config.chunk_size).await?;

    let facts_inserted = warehouse
        .insert_facts(config.date_source, config.fact_dedup)
        .await?;

    Ok(OrderLoadSummary {
        normalize,
        staged,
        platforms_inserted,
        products,
        customers,
        dates_inserted,
        facts_inserted,
    })
}

/// Load a product master extract into `dim_product`.
pub async fn run_products<W: Warehouse>(
    warehouse: &mut W,
    config: &LoadConfig,
    mut table: RawTable,
) -> Result<ProductLoadSummary> {
    products::map_master_headers(&mut table);
    let (rows, attribute_columns) = products::stage_products(&table);
    let dropped_without_key = table.rows.len() - rows.len();
    if dropped_without_key > 0 {
        info!(rows = dropped_without_key, "dropped product rows without a key");
    }

    let staged = warehouse.stage_products(&rows, config.chunk_size).await?;
    let products = warehouse
        .upsert_products(ProductSource::ProductMaster)
        .await?;

    Ok(ProductLoadSummary {
        rows_read: table.rows.len(),
        staged,
        dropped_without_key,
        attribute_columns,
        products,
    })
}
