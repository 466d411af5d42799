//! The warehouse seam: one method per mutating pipeline step.
//!
//! Each method is its own unit of work. A failure inside one step leaves the
//! steps before it committed.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use uuid::Uuid;

use crate::config::{DateSource, FactDedup};
use crate::date_dim::DatePoint;
use crate::dimensions::{MergeCounts, ProductSource};
use crate::products::StagedProduct;
use crate::staging::StagedOrder;

/// What a run is loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Orders,
    Products,
}

impl RunKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RunKind::Orders => "orders",
            RunKind::Products => "products",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunStart {
    pub kind: RunKind,
    pub input_path: String,
    /// `sha256:<hex>` of the input file.
    pub content_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Ok,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Ok => "ok",
            RunStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub error: Option<String>,
    pub detail: serde_json::Value,
}

#[allow(async_fn_in_trait)]
pub trait Warehouse {
    /// Create every table the loader touches, if absent.
    async fn ensure_schema(&mut self) -> Result<()>;

    async fn begin_run(&mut self, run: &RunStart) -> Result<Uuid>;

    async fn finish_run(&mut self, run_id: Uuid, outcome: &RunOutcome) -> Result<()>;

    /// Clear `stg_order_export_raw` and write the batch. Returns rows staged.
    async fn stage_orders(&mut self, rows: &[StagedOrder], chunk_size: usize) -> Result<u64>;

    /// Clear `stg_product_master` and write the batch. Returns rows staged.
    async fn stage_products(&mut self, rows: &[StagedProduct], chunk_size: usize) -> Result<u64>;

    /// Insert staged platform names not yet in `dim_platform`.
    async fn upsert_platforms(&mut self) -> Result<u64>;

    async fn upsert_products(&mut self, source: ProductSource) -> Result<MergeCounts>;

    async fn upsert_customers(&mut self) -> Result<MergeCounts>;

    /// Insert the points whose date is not yet in `dim_date`.
    async fn ensure_dates(&mut self, points: &[DatePoint], chunk_size: usize) -> Result<u64>;

    /// Insert qualifying staged rows into `fact_sales`. Returns rows inserted.
    async fn insert_facts(&mut self, source: DateSource, dedup: FactDedup) -> Result<u64>;
}
