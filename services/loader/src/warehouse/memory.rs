//! In-memory warehouse used by `--dry-run` and by the tests.

use anyhow::{bail, Result};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

use super::{RunOutcome, RunStart, Warehouse};
use crate::config::{DateSource, FactDedup};
use crate::date_dim::DatePoint;
use crate::dimensions::{
    customer_candidates, master_product_candidates, merge_dimension, order_product_candidates,
    platform_candidates, CustomerAttributes, MergeCounts, ProductAttributes, ProductSource,
};
use crate::facts::{plan_facts, FactRow};
use crate::products::StagedProduct;
use crate::staging::StagedOrder;

#[derive(Debug, Clone)]
pub struct MemoryRun {
    pub start: RunStart,
    pub outcome: Option<RunOutcome>,
}

#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    pub staged_orders: Vec<StagedOrder>,
    pub staged_products: Vec<StagedProduct>,
    pub platforms: BTreeMap<String, i32>,
    pub products: BTreeMap<String, ProductAttributes>,
    pub product_ids: BTreeMap<String, i32>,
    pub customers: BTreeMap<i64, CustomerAttributes>,
    pub dates: BTreeMap<NaiveDate, DatePoint>,
    pub facts: Vec<FactRow>,
    pub runs: BTreeMap<Uuid, MemoryRun>,
}

impl MemoryWarehouse {
    fn assign_product_ids(&mut self) {
        for key in self.products.keys() {
            if !self.product_ids.contains_key(key) {
                let next = self.product_ids.len() as i32 + 1;
                self.product_ids.insert(key.clone(), next);
            }
        }
    }
}

impl Warehouse for MemoryWarehouse {
    async fn ensure_schema(&mut self) -> Result<()> {
        Ok(())
    }

    async fn begin_run(&mut self, run: &RunStart) -> Result<Uuid> {
        let run_id = Uuid::new_v4();
        self.runs.insert(
            run_id,
            MemoryRun {
                start: run.clone(),
                outcome: None,
            },
        );
        Ok(run_id)
    }

    async fn finish_run(&mut self, run_id: Uuid, outcome: &RunOutcome) -> Result<()> {
        match self.runs.get_mut(&run_id) {
            Some(run) => {
                debug!(
                    kind = run.start.kind.as_str(),
                    status = outcome.status.as_str(),
                    "in-memory run finished"
                );
                run.outcome = Some(outcome.clone());
                Ok(())
            }
            None => bail!("unknown run {}", run_id),
        }
    }

    async fn stage_orders(&mut self, rows: &[StagedOrder], _chunk_size: usize) -> Result<u64> {
        self.staged_orders = rows.to_vec();
        Ok(rows.len() as u64)
    }

    async fn stage_products(&mut self, rows: &[StagedProduct], _chunk_size: usize) -> Result<u64> {
        self.staged_products = rows.to_vec();
        Ok(rows.len() as u64)
    }

    async fn upsert_platforms(&mut self) -> Result<u64> {
        let mut inserted = 0;
        for name in platform_candidates(&self.staged_orders) {
            if !self.platforms.contains_key(&name) {
                let next = self.platforms.len() as i32 + 1;
                self.platforms.insert(name, next);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn upsert_products(&mut self, source: ProductSource) -> Result<MergeCounts> {
        let candidates = match source {
            ProductSource::OrderExport => order_product_candidates(&self.staged_orders),
            ProductSource::ProductMaster => master_product_candidates(&self.staged_products),
        };
        let counts = merge_dimension(&mut self.products, candidates, |stored, staged| {
            stored.coalesce_from(staged)
        });
        self.assign_product_ids();
        Ok(counts)
    }

    async fn upsert_customers(&mut self) -> Result<MergeCounts> {
        let candidates = customer_candidates(&self.staged_orders);
        Ok(merge_dimension(
            &mut self.customers,
            candidates,
            |stored, staged| stored.backfill_from(staged),
        ))
    }

    async fn ensure_dates(&mut self, points: &[DatePoint], _chunk_size: usize) -> Result<u64> {
        let mut inserted = 0;
        for point in points {
            if !self.dates.contains_key(&point.date) {
                self.dates.insert(point.date, point.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn insert_facts(&mut self, source: DateSource, dedup: FactDedup) -> Result<u64> {
        let new_facts = plan_facts(
            &self.staged_orders,
            source,
            &self.platforms,
            &self.product_ids,
            dedup,
            &self.facts,
        );
        let inserted = new_facts.len() as u64;
        self.facts.extend(new_facts);
        Ok(inserted)
    }
}
