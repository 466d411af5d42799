//! Dimension merge rules for Platform, Product and Customer.
//!
//! Candidates are computed from the staged batch once per natural key. When
//! several staged rows share a key, each attribute takes the value of the
//! latest row (highest `row_no`) that has one. `PgWarehouse` expresses the
//! same rule in SQL; `MemoryWarehouse` calls these functions directly.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::products::StagedProduct;
use crate::staging::StagedOrder;

/// Gender recorded for customers first seen by the loader.
pub const NEW_CUSTOMER_GENDER: &str = "Unknown";

/// Where product candidates come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductSource {
    /// Keys only; the order export carries no product attributes.
    OrderExport,
    /// Keys plus attributes from `stg_product_master`.
    ProductMaster,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeCounts {
    pub inserted: u64,
    pub updated: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductAttributes {
    pub english_name: Option<String>,
    pub chinese_name: Option<String>,
    pub customer_code: Option<String>,
    pub category: Option<String>,
}

impl ProductAttributes {
    /// Coalesce backfill: every non-null staged value replaces the stored
    /// one. Returns whether anything changed.
    pub fn coalesce_from(&mut self, staged: &ProductAttributes) -> bool {
        let mut changed = false;
        changed |= overwrite_if_some(&mut self.english_name, &staged.english_name);
        changed |= overwrite_if_some(&mut self.chinese_name, &staged.chinese_name);
        changed |= overwrite_if_some(&mut self.customer_code, &staged.customer_code);
        changed |= overwrite_if_some(&mut self.category, &staged.category);
        changed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomerAttributes {
    pub state_code: Option<String>,
    pub postal_code: Option<String>,
}

impl CustomerAttributes {
    /// Backfill a customer that is missing its state or postal code.
    /// Non-null staged values then replace both stored fields; complete
    /// customers are left alone.
    pub fn backfill_from(&mut self, staged: &CustomerAttributes) -> bool {
        if self.state_code.is_some() && self.postal_code.is_some() {
            return false;
        }
        let mut changed = false;
        changed |= overwrite_if_some(&mut self.state_code, &staged.state_code);
        changed |= overwrite_if_some(&mut self.postal_code, &staged.postal_code);
        changed
    }
}

fn overwrite_if_some(stored: &mut Option<String>, staged: &Option<String>) -> bool {
    match staged {
        Some(v) if stored.as_ref() != Some(v) => {
            *stored = Some(v.clone());
            true
        }
        _ => false,
    }
}

/// Keep `latest` unless `value` is present; rows arrive in `row_no` order.
fn latest_non_null(latest: &mut Option<String>, value: Option<&str>) {
    if let Some(v) = value {
        *latest = Some(v.to_string());
    }
}

// =============================================================================
// CANDIDATES
// =============================================================================

fn in_row_order<T>(rows: &[T], row_no: impl Fn(&T) -> i64) -> Vec<&T> {
    let mut ordered: Vec<&T> = rows.iter().collect();
    ordered.sort_by_key(|r| row_no(r));
    ordered
}

/// Distinct non-empty platform names.
pub fn platform_candidates(staged: &[StagedOrder]) -> BTreeSet<String> {
    staged
        .iter()
        .filter_map(|s| s.record.platform())
        .map(str::to_string)
        .collect()
}

/// Distinct product keys from the order export, all attributes null.
pub fn order_product_candidates(staged: &[StagedOrder]) -> BTreeMap<String, ProductAttributes> {
    staged
        .iter()
        .filter_map(|s| s.record.product_key.clone())
        .map(|key| (key, ProductAttributes::default()))
        .collect()
}

/// Distinct product keys from the product master, with latest-non-null
/// attributes per key.
pub fn master_product_candidates(
    staged: &[StagedProduct],
) -> BTreeMap<String, ProductAttributes> {
    let mut out: BTreeMap<String, ProductAttributes> = BTreeMap::new();
    for row in in_row_order(staged, |r| r.row_no) {
        let attrs = out.entry(row.main_sku_code.clone()).or_default();
        latest_non_null(&mut attrs.english_name, row.english_name.as_deref());
        latest_non_null(&mut attrs.chinese_name, row.chinese_name.as_deref());
        latest_non_null(&mut attrs.customer_code, row.customer_code.as_deref());
        latest_non_null(&mut attrs.category, row.category.as_deref());
    }
    out
}

/// Distinct customer ids with latest-non-null state and postal code.
pub fn customer_candidates(staged: &[StagedOrder]) -> BTreeMap<i64, CustomerAttributes> {
    let mut out: BTreeMap<i64, CustomerAttributes> = BTreeMap::new();
    for row in in_row_order(staged, |r| r.row_no) {
        let attrs = out.entry(row.record.customer_id).or_default();
        latest_non_null(&mut attrs.state_code, row.record.state_code.as_deref());
        latest_non_null(&mut attrs.postal_code, row.record.postal_code());
    }
    out
}

// =============================================================================
// MERGE
// =============================================================================

/// Insert absent keys with their candidate attributes; run `update` on keys
/// already present and count the ones it reports as changed.
pub fn merge_dimension<K, A, F>(
    stored: &mut BTreeMap<K, A>,
    candidates: BTreeMap<K, A>,
    update: F,
) -> MergeCounts
where
    K: Ord,
    F: Fn(&mut A, &A) -> bool,
{
    let mut counts = MergeCounts::default();
    for (key, staged) in candidates {
        match stored.get_mut(&key) {
            Some(existing) => {
                if update(existing, &staged) {
                    counts.updated += 1;
                }
            }
            None => {
                stored.insert(key, staged);
                counts.inserted += 1;
            }
        }
    }
    counts
}
