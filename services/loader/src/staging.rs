//! Staging: the transient holding area between cleaning and the warehouse
//! merge.
//!
//! Every string bound for a staging column is cut to that column's declared
//! width here, before any statement runs, so an over-long value is truncated
//! instead of failing the insert.

use crate::normalize::CleanedRecord;

/// A text column of `stg_order_export_raw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextColumn {
    /// Normalized input header the value comes from.
    pub field: &'static str,
    /// Column name in the staging table.
    pub column: &'static str,
    /// Declared VARCHAR width.
    pub width: usize,
}

const fn col(field: &'static str, column: &'static str, width: usize) -> TextColumn {
    TextColumn {
        field,
        column,
        width,
    }
}

/// Pass-through text columns, in staging-table order.
pub const TEXT_COLUMNS: &[TextColumn] = &[
    col("orderNo", "order_no", 100),
    col("orderType", "order_type", 100),
    col("orderRealStatus", "order_real_status", 50),
    col("platformOrderNo", "platform_order_no", 100),
    col("commercePlatform", "commerce_platform", 50),
    col("name", "name", 255),
    col("country", "country", 50),
    col("city", "city", 120),
    col("postalCode", "postal_code", 20),
    col("contactNo", "contact_no", 60),
    col("urgent_orders", "urgent_orders", 50),
    col("oneReference", "one_reference", 120),
    col("twoReference", "two_reference", 120),
    col("oneAddress", "one_address", 255),
    col("twoAddress", "two_address", 255),
    col("houseNo", "house_no", 50),
    col("masterSku", "master_sku", 100),
    col("email", "email", 255),
    col("companyName", "company_name", 255),
    col("volume", "volume", 50),
    col("actualWeight", "actual_weight", 50),
    col("serviceProvider", "service_provider", 50),
    col("trackNo", "track_no", 60),
    col("expressDeliveryService", "express_delivery_service", 100),
    col("outBoundSource", "out_bound_source", 100),
    col("logisticsStatus", "logistics_status", 120),
    col("trackNoReason", "track_no_reason", 255),
    col("sku", "sku", 120),
    col("batch_number", "batch_number", 120),
    col("serial_number", "serial_number", 120),
    col("inventory_type", "inventory_type", 120),
    col("length", "length", 50),
    col("width", "width", 50),
    col("high", "high", 50),
    col("remarks", "remarks", 255),
];

pub const STATE_CODE_WIDTH: usize = 2;
pub const PRODUCT_KEY_WIDTH: usize = 120;

/// Cut `value` to at most `width` characters (not bytes).
pub fn clamp_to_chars(value: &str, width: usize) -> String {
    match value.char_indices().nth(width) {
        Some((byte_idx, _)) => value[..byte_idx].to_string(),
        None => value.to_string(),
    }
}

pub fn clamp_opt(value: Option<&str>, width: usize) -> Option<String> {
    value.map(|v| clamp_to_chars(v, width))
}

/// A cleaned record as it sits in staging, tagged with its position in the
/// batch. `row_no` orders "latest" when merges pick one value per key.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedOrder {
    pub row_no: i64,
    pub record: CleanedRecord,
}

/// Truncate every string field of every record and number the batch from 1.
pub fn stage_orders(records: &[CleanedRecord]) -> Vec<StagedOrder> {
    records
        .iter()
        .enumerate()
        .map(|(idx, record)| StagedOrder {
            row_no: idx as i64 + 1,
            record: fit_to_columns(record),
        })
        .collect()
}

fn fit_to_columns(record: &CleanedRecord) -> CleanedRecord {
    let mut fitted = record.clone();
    for column in TEXT_COLUMNS {
        if let Some(value) = fitted.text.get_mut(column.field) {
            if value.chars().count() > column.width {
                *value = clamp_to_chars(value, column.width);
            }
        }
    }
    fitted.state_code = clamp_opt(record.state_code.as_deref(), STATE_CODE_WIDTH);
    fitted.product_key = clamp_opt(record.product_key.as_deref(), PRODUCT_KEY_WIDTH);
    fitted
}

/// Largest number of rows one multi-row INSERT may carry without exceeding
/// the PostgreSQL bind-parameter limit.
pub fn rows_per_statement(chunk_size: usize, columns_per_row: usize) -> usize {
    const MAX_BIND_PARAMS: usize = 65_535;
    let cap = MAX_BIND_PARAMS / columns_per_row.max(1);
    chunk_size.clamp(1, cap.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_order;
    use crate::normalize::NormalizeReport;
    use crate::source::RawRecord;

    #[test]
    fn test_clamp_to_chars_ascii() {
        assert_eq!(clamp_to_chars("abcdef", 3), "abc");
        assert_eq!(clamp_to_chars("abc", 3), "abc");
        assert_eq!(clamp_to_chars("ab", 3), "ab");
        assert_eq!(clamp_to_chars("", 3), "");
    }

    #[test]
    fn test_clamp_to_chars_multibyte() {
        assert_eq!(clamp_to_chars("商品名称测试", 4), "商品名称");
        assert_eq!(clamp_to_chars("Zoë", 3), "Zoë");
        assert_eq!(clamp_to_chars("Zoëy", 3), "Zoë");
    }

    #[test]
    fn test_column_widths_unique_fields() {
        let mut fields: Vec<_> = TEXT_COLUMNS.iter().map(|c| c.field).collect();
        fields.sort_unstable();
        fields.dedup();
        assert_eq!(fields.len(), TEXT_COLUMNS.len());
    }

    #[test]
    fn test_stage_orders_truncates_silently() {
        let long_platform = "P".repeat(80);
        let long_sku = "S".repeat(200);
        let raw = RawRecord::from_pairs([
            ("commercePlatform", long_platform.as_str()),
            ("sku", long_sku.as_str()),
            ("postalCode", "123456789012345678901234"),
        ]);
        let cleaned = normalize_order(&raw, &mut NormalizeReport::default());
        let staged = stage_orders(&[cleaned.clone()]);

        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].row_no, 1);
        let rec = &staged[0].record;
        assert_eq!(rec.text("commercePlatform").unwrap().len(), 50);
        assert_eq!(rec.text("sku").unwrap().len(), 120);
        assert_eq!(rec.text("postalCode").unwrap(), "12345678901234567890");
        assert_eq!(rec.product_key.as_deref().unwrap().len(), 120);
        // identity was derived before truncation
        assert_eq!(rec.customer_id, cleaned.customer_id);
    }

    #[test]
    fn test_stage_orders_numbers_rows() {
        let rows: Vec<_> = (0..3)
            .map(|_| normalize_order(&RawRecord::default(), &mut NormalizeReport::default()))
            .collect();
        let staged = stage_orders(&rows);
        let numbers: Vec<i64> = staged.iter().map(|s| s.row_no).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_rows_per_statement_caps_bind_params() {
        assert_eq!(rows_per_statement(1000, 46), 1000);
        assert_eq!(rows_per_statement(5000, 46), 65_535 / 46);
        assert_eq!(rows_per_statement(0, 8), 1);
    }
}
