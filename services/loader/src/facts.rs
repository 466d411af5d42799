//! Fact rows: the join-filter rule and the optional dedup key.
//!
//! A staged row becomes a fact only when its chosen date is set and both its
//! platform name and product key resolve to dimension ids. Everything else
//! stays in staging.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::config::{DateSource, FactDedup};
use crate::staging::StagedOrder;

/// No price source feeds the loader.
pub const REVENUE: f64 = 0.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactRow {
    pub order_id: Option<String>,
    pub date_id: NaiveDate,
    pub product_id: i32,
    pub customer_id: i64,
    pub platform_id: i32,
    pub units: i32,
    pub revenue: f64,
    pub state_code: Option<String>,
}

/// Resolve one staged row, or `None` if any of date, platform or product is
/// missing.
pub fn resolve(
    staged: &StagedOrder,
    source: DateSource,
    platform_ids: &BTreeMap<String, i32>,
    product_ids: &BTreeMap<String, i32>,
) -> Option<FactRow> {
    let record = &staged.record;
    let date_id = source.pick(record)?.date();
    let platform_id = *platform_ids.get(record.platform()?)?;
    let product_id = *product_ids.get(record.product_key.as_deref()?)?;
    Some(FactRow {
        order_id: record.order_no().map(str::to_string),
        date_id,
        product_id,
        customer_id: record.customer_id,
        platform_id,
        units: record.goods_number,
        revenue: REVENUE,
        state_code: record.state_code.clone(),
    })
}

/// Facts the batch adds to `existing`, in staging order.
pub fn plan_facts(
    staged: &[StagedOrder],
    source: DateSource,
    platform_ids: &BTreeMap<String, i32>,
    product_ids: &BTreeMap<String, i32>,
    dedup: FactDedup,
    existing: &[FactRow],
) -> Vec<FactRow> {
    let mut ordered: Vec<&StagedOrder> = staged.iter().collect();
    ordered.sort_by_key(|s| s.row_no);

    let mut seen: HashSet<(String, Option<i32>)> =
        existing.iter().filter_map(|f| dedup_key(f, dedup)).collect();

    ordered
        .into_iter()
        .filter_map(|s| resolve(s, source, platform_ids, product_ids))
        .filter(|fact| match dedup_key(fact, dedup) {
            Some(key) => seen.insert(key),
            None => true,
        })
        .collect()
}

/// Rows with no order id never collide.
fn dedup_key(fact: &FactRow, dedup: FactDedup) -> Option<(String, Option<i32>)> {
    let order_id = fact.order_id.clone()?;
    match dedup {
        FactDedup::None => None,
        FactDedup::OrderId => Some((order_id, None)),
        FactDedup::OrderLine => Some((order_id, Some(fact.product_id))),
    }
}
