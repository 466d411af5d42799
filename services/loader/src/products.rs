//! Product master extracts: header mapping and staging rows for
//! `stg_product_master`.

use serde::Serialize;
use tracing::{debug, info};

use crate::identity;
use crate::normalize::field;
use crate::source::RawTable;
use crate::staging::{clamp_opt, clamp_to_chars};

const MAIN_SKU_CODE_WIDTH: usize = 120;
const ENGLISH_NAME_WIDTH: usize = 255;
const CHINESE_NAME_WIDTH: usize = 255;
const CUSTOMER_CODE_WIDTH: usize = 100;
const CATEGORY_WIDTH: usize = 100;

/// One product master row bound for staging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedProduct {
    pub row_no: i64,
    pub main_sku_code: String,
    pub english_name: Option<String>,
    pub chinese_name: Option<String>,
    pub customer_code: Option<String>,
    pub category: Option<String>,
}

/// Source columns picked for each product attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttributeColumns {
    pub english_name: Option<String>,
    pub chinese_name: Option<String>,
    pub customer_code: Option<String>,
    pub category: Option<String>,
}

impl AttributeColumns {
    /// Case-insensitive substring match; the last matching column wins.
    pub fn detect(headers: &[String]) -> Self {
        Self {
            english_name: last_header(headers, &["english", "name"]),
            chinese_name: last_header(headers, &["chinese", "name"]),
            customer_code: last_header(headers, &["customer", "code"]),
            category: last_header(headers, &["category"]),
        }
    }
}

fn last_header(headers: &[String], needles: &[&str]) -> Option<String> {
    headers
        .iter()
        .rev()
        .find(|h| {
            let lower = h.to_lowercase();
            needles.iter().all(|n| lower.contains(n))
        })
        .cloned()
}

/// Map product master headers onto the order vocabulary: `mainskucode`
/// becomes `masterSku` and `second_sku` becomes `sku`, each only when the
/// target is not already present.
pub fn map_master_headers(table: &mut RawTable) {
    for (lower, target) in [("mainskucode", field::MASTER_SKU), ("second_sku", field::SKU)] {
        let source = table
            .headers
            .iter()
            .find(|h| h.to_lowercase() == lower)
            .cloned();
        if let Some(source) = source {
            if table.alias_column(&source, target) {
                debug!(from = %source, to = target, "mapped product master column");
            }
        }
    }
}

/// Build staging rows: trim values, derive the product key, drop rows
/// without one, truncate to column widths.
pub fn stage_products(table: &RawTable) -> (Vec<StagedProduct>, AttributeColumns) {
    let columns = AttributeColumns::detect(&table.headers);
    info!(
        english_name = ?columns.english_name,
        chinese_name = ?columns.chinese_name,
        customer_code = ?columns.customer_code,
        category = ?columns.category,
        "product attribute mapping"
    );

    let mut row_no = 0;
    let staged = table
        .rows
        .iter()
        .filter_map(|raw| {
            let key = identity::product_key(raw.get(field::MASTER_SKU), raw.get(field::SKU))?;
            let attr = |col: &Option<String>, width: usize| {
                let value = col.as_deref().and_then(|c| raw.get(c)).map(str::trim);
                clamp_opt(value.filter(|v| !v.is_empty()), width)
            };
            row_no += 1;
            Some(StagedProduct {
                row_no,
                main_sku_code: clamp_to_chars(&key, MAIN_SKU_CODE_WIDTH),
                english_name: attr(&columns.english_name, ENGLISH_NAME_WIDTH),
                chinese_name: attr(&columns.chinese_name, CHINESE_NAME_WIDTH),
                customer_code: attr(&columns.customer_code, CUSTOMER_CODE_WIDTH),
                category: attr(&columns.category, CATEGORY_WIDTH),
            })
        })
        .collect();
    (staged, columns)
}
