//! Normalizer: raw text rows in, typed cleaned records out.
//!
//! Normalization never fails a row. Each field parser below is a total
//! function returning `Result<_, FieldIssue>`; `normalize_order` swaps every
//! `Err` for the issue's fallback and tallies it in a `NormalizeReport`.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::error::{Fallback, FieldIssue};
use crate::identity;
use crate::source::{RawRecord, RawTable};
use crate::staging::TEXT_COLUMNS;

/// Normalized header names the pipeline reads directly.
pub mod field {
    pub const ORDER_NO: &str = "orderNo";
    pub const COMMERCE_PLATFORM: &str = "commercePlatform";
    pub const NAME: &str = "name";
    pub const ONE_ADDRESS: &str = "oneAddress";
    pub const POSTAL_CODE: &str = "postalCode";
    pub const HOUSE_NO: &str = "houseNo";
    pub const STATE: &str = "State";
    pub const MASTER_SKU: &str = "masterSku";
    pub const SKU: &str = "sku";
    pub const VOLUME: &str = "volume";
    pub const ACTUAL_WEIGHT: &str = "actualWeight";
    pub const GOODS_NUMBER: &str = "goodsNumber";
    pub const CREATE_TIME: &str = "createTime";
    pub const SUBMIT_TIME: &str = "submitTime";
    pub const DELIVERY_TIME: &str = "deliveryTime";
    pub const PICKING_TIME: &str = "pickingTime";
}

/// Columns the order export is expected to carry. Any that are absent are
/// treated as all-null.
pub const EXPECTED_COLUMNS: &[&str] = &[
    field::ORDER_NO,
    field::COMMERCE_PLATFORM,
    field::NAME,
    field::ONE_ADDRESS,
    field::POSTAL_CODE,
    field::MASTER_SKU,
    field::SKU,
    field::CREATE_TIME,
    field::SUBMIT_TIME,
    field::VOLUME,
    field::ACTUAL_WEIGHT,
    field::GOODS_NUMBER,
];

const HEADER_RENAMES: &[(&str, &str)] = &[
    ("Urgent_Orders", "urgent_orders"),
    ("Batch_Number", "batch_number"),
    ("Serial_Number", "serial_number"),
    ("Inventory_Type", "inventory_type"),
];

/// Units recorded when the quantity column is absent or blank.
pub const DEFAULT_QUANTITY: i32 = 1;

/// Strict timestamp layout tried before anything else.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Years a timestamp may carry. Anything outside is a typo, not a sale.
pub const TIMESTAMP_YEARS: std::ops::RangeInclusive<i32> = 1677..=2262;

const FALLBACK_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%d.%m.%Y %H:%M:%S",
];

const FALLBACK_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%Y%m%d"];

fn leading_numeral_re() -> &'static Regex {
    static LEADING_NUMERAL_RE: OnceLock<Regex> = OnceLock::new();
    LEADING_NUMERAL_RE
        .get_or_init(|| Regex::new(r"([0-9]+(?:\.[0-9]+)?)").expect("valid numeral regex"))
}

fn state_code_re() -> &'static Regex {
    static STATE_CODE_RE: OnceLock<Regex> = OnceLock::new();
    STATE_CODE_RE.get_or_init(|| Regex::new(r"^[A-Z]{2}$").expect("valid state code regex"))
}

// =============================================================================
// HEADERS
// =============================================================================

/// Trim, drop byte-order marks, and turn spaces and hyphens into underscores.
/// Casing is preserved.
pub fn normalize_header(raw: &str) -> String {
    raw.replace('\u{feff}', "")
        .trim()
        .replace([' ', '-'], "_")
}

/// `normalize_header` followed by the fixed rename map.
pub fn canonical_header(raw: &str) -> String {
    let normalized = normalize_header(raw);
    HEADER_RENAMES
        .iter()
        .find(|(from, _)| *from == normalized)
        .map(|(_, to)| to.to_string())
        .unwrap_or(normalized)
}

// =============================================================================
// FIELD PARSERS
// =============================================================================

/// Parse a timestamp: the strict layout first, then a short list of common
/// layouts, RFC 3339, and bare dates (read as midnight). Years outside
/// `TIMESTAMP_YEARS` degrade like any other unparsable value.
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, FieldIssue> {
    parse_any_timestamp(value)
        .filter(|ts| TIMESTAMP_YEARS.contains(&ts.year()))
        .ok_or(FieldIssue::UnparsableTimestamp)
}

fn parse_any_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim_matches(|c: char| matches!(c, '\t' | '\r' | '\n' | ' '));

    if let Ok(ts) = NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT) {
        return Some(ts);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.naive_local());
    }
    if let Some(ts) = FALLBACK_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
    {
        return Some(ts);
    }
    FALLBACK_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .map(|d| d.and_time(NaiveTime::MIN))
}

/// Render a timestamp so that `parse_timestamp` reads it back unchanged.
pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()
}

/// First decimal numeral in a unit-suffixed measure: `"8.9523ft3"` is 8.9523.
pub fn extract_measure(value: &str) -> Result<f64, FieldIssue> {
    leading_numeral_re()
        .find(value)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .ok_or(FieldIssue::NonNumericMeasure)
}

/// Uppercased, trimmed two-letter code.
pub fn state_code(value: &str) -> Result<String, FieldIssue> {
    let code = value.trim().to_uppercase();
    if state_code_re().is_match(&code) {
        Ok(code)
    } else {
        Err(FieldIssue::InvalidStateCode)
    }
}

/// Integer quantity. Decimal text is truncated toward zero.
pub fn parse_quantity(value: &str) -> Result<i32, FieldIssue> {
    let value = value.trim();
    if let Ok(n) = value.parse::<i64>() {
        return i32::try_from(n).map_err(|_| FieldIssue::InvalidQuantity);
    }
    match value.parse::<f64>() {
        Ok(f) if f.is_finite() && f.trunc() >= i32::MIN as f64 && f.trunc() <= i32::MAX as f64 => {
            Ok(f.trunc() as i32)
        }
        _ => Err(FieldIssue::InvalidQuantity),
    }
}

// =============================================================================
// CLEANED RECORD
// =============================================================================

/// Typed derivative of one order-export row.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedRecord {
    /// Pass-through text keyed by normalized header (only non-empty values).
    pub text: BTreeMap<&'static str, String>,
    pub create_time: Option<NaiveDateTime>,
    pub submit_time: Option<NaiveDateTime>,
    pub delivery_time: Option<NaiveDateTime>,
    pub picking_time: Option<NaiveDateTime>,
    pub volume_num: Option<f64>,
    pub actual_weight_num: Option<f64>,
    pub state_code: Option<String>,
    pub goods_number: i32,
    pub customer_id: i64,
    pub product_key: Option<String>,
}

impl CleanedRecord {
    pub fn text(&self, field: &str) -> Option<&str> {
        self.text.get(field).map(String::as_str)
    }

    pub fn order_no(&self) -> Option<&str> {
        self.text(field::ORDER_NO)
    }

    pub fn platform(&self) -> Option<&str> {
        self.text(field::COMMERCE_PLATFORM)
    }

    pub fn postal_code(&self) -> Option<&str> {
        self.text(field::POSTAL_CODE)
    }

    /// Back to a raw row that normalizes to this same record.
    pub fn to_raw(&self) -> RawRecord {
        let mut pairs: Vec<(&str, String)> = self
            .text
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();

        for (name, ts) in [
            (field::CREATE_TIME, self.create_time),
            (field::SUBMIT_TIME, self.submit_time),
            (field::DELIVERY_TIME, self.delivery_time),
            (field::PICKING_TIME, self.picking_time),
        ] {
            pairs.push((name, ts.map(format_timestamp).unwrap_or_default()));
        }
        pairs.push((field::STATE, self.state_code.clone().unwrap_or_default()));
        pairs.push((field::GOODS_NUMBER, self.goods_number.to_string()));

        RawRecord::from_pairs(pairs)
    }
}

/// Counts of what normalization had to repair.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizeReport {
    pub rows: usize,
    pub issues: BTreeMap<&'static str, usize>,
    pub missing_columns: Vec<String>,
    pub null_product_keys: usize,
}

impl NormalizeReport {
    fn record(&mut self, issue: FieldIssue) {
        *self.issues.entry(issue.key()).or_default() += 1;
    }

    pub fn issue_count(&self, issue: FieldIssue) -> usize {
        self.issues.get(issue.key()).copied().unwrap_or(0)
    }

    /// Keep the value, or note the issue and fall back to null.
    fn degrade<T>(&mut self, parsed: Option<Result<T, FieldIssue>>) -> Option<T> {
        match parsed {
            Some(Ok(v)) => Some(v),
            Some(Err(issue)) => {
                self.record(issue);
                None
            }
            None => None,
        }
    }
}

/// Normalize a single order-export row.
pub fn normalize_order(raw: &RawRecord, report: &mut NormalizeReport) -> CleanedRecord {
    report.rows += 1;

    let text: BTreeMap<&'static str, String> = TEXT_COLUMNS
        .iter()
        .filter_map(|c| raw.get(c.field).map(|v| (c.field, v.to_string())))
        .collect();

    let create_time = report.degrade(raw.get(field::CREATE_TIME).map(parse_timestamp));
    let submit_time = report.degrade(raw.get(field::SUBMIT_TIME).map(parse_timestamp));
    let delivery_time = report.degrade(raw.get(field::DELIVERY_TIME).map(parse_timestamp));
    let picking_time = report.degrade(raw.get(field::PICKING_TIME).map(parse_timestamp));

    let volume_num = report.degrade(raw.get(field::VOLUME).map(extract_measure));
    let actual_weight_num = report.degrade(raw.get(field::ACTUAL_WEIGHT).map(extract_measure));

    // A State column, when present, is authoritative even where it is blank.
    let state_source = if raw.has_column(field::STATE) {
        raw.get(field::STATE)
    } else {
        raw.get(field::HOUSE_NO)
    };
    let state_code = report.degrade(state_source.map(state_code));

    let goods_number = match raw.get(field::GOODS_NUMBER).map(parse_quantity) {
        Some(Ok(n)) => n,
        Some(Err(issue)) => {
            report.record(issue);
            match issue.fallback() {
                Fallback::Value(n) => n,
                Fallback::Null => DEFAULT_QUANTITY,
            }
        }
        None => DEFAULT_QUANTITY,
    };

    let customer_id = identity::customer_id(
        raw.get(field::NAME),
        raw.get(field::ONE_ADDRESS),
        raw.get(field::POSTAL_CODE),
    );
    let product_key = identity::product_key(raw.get(field::MASTER_SKU), raw.get(field::SKU));
    if product_key.is_none() {
        report.null_product_keys += 1;
    }

    CleanedRecord {
        text,
        create_time,
        submit_time,
        delivery_time,
        picking_time,
        volume_num,
        actual_weight_num,
        state_code,
        goods_number,
        customer_id,
        product_key,
    }
}

/// Normalize a whole order export.
pub fn normalize_orders(table: &RawTable) -> (Vec<CleanedRecord>, NormalizeReport) {
    let mut report = NormalizeReport {
        missing_columns: EXPECTED_COLUMNS
            .iter()
            .filter(|c| !table.has_column(c))
            .map(|c| c.to_string())
            .collect(),
        ..Default::default()
    };
    let records = table
        .rows
        .iter()
        .map(|raw| normalize_order(raw, &mut report))
        .collect();
    (records, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::parse_csv;
    use chrono::{Datelike, Timelike};

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).unwrap()
    }

    // -------------------------------------------------------------------------
    // HEADER TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("  order No "), "order_No");
        assert_eq!(normalize_header("\u{feff}createTime"), "createTime");
        assert_eq!(normalize_header("track-No Reason"), "track_No_Reason");
    }

    #[test]
    fn test_canonical_header_renames() {
        assert_eq!(canonical_header("Urgent Orders"), "urgent_orders");
        assert_eq!(canonical_header("Inventory-Type"), "inventory_type");
        assert_eq!(canonical_header("sku"), "sku");
    }

    // -------------------------------------------------------------------------
    // TIMESTAMP TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_timestamp_strict() {
        assert_eq!(
            parse_timestamp("2024-01-30 08:15:00").unwrap(),
            ts("2024-01-30 08:15:00")
        );
    }

    #[test]
    fn test_parse_timestamp_strips_tabs() {
        assert_eq!(
            parse_timestamp("2024-01-30 08:15:00\t\r\n").unwrap(),
            ts("2024-01-30 08:15:00")
        );
    }

    #[test]
    fn test_parse_timestamp_fallback_layouts() {
        assert_eq!(
            parse_timestamp("2024/01/30 08:15").unwrap(),
            ts("2024-01-30 08:15:00")
        );
        assert_eq!(
            parse_timestamp("01/30/2024 08:15:00").unwrap(),
            ts("2024-01-30 08:15:00")
        );
        assert_eq!(
            parse_timestamp("2024-01-30T08:15:00Z").unwrap(),
            ts("2024-01-30 08:15:00")
        );
        let date_only = parse_timestamp("2024-01-30").unwrap();
        assert_eq!(date_only.date().day(), 30);
        assert_eq!(date_only.hour(), 0);
    }

    #[test]
    fn test_parse_timestamp_fractional_round_trip() {
        let parsed = parse_timestamp("2024-01-30 08:15:00.250").unwrap();
        assert_eq!(parse_timestamp(&format_timestamp(parsed)).unwrap(), parsed);
        assert_eq!(format_timestamp(ts("2024-01-30 08:15:00")), "2024-01-30 08:15:00");
    }

    #[test]
    fn test_parse_timestamp_unparsable() {
        assert_eq!(
            parse_timestamp("not a date"),
            Err(FieldIssue::UnparsableTimestamp)
        );
        assert_eq!(
            parse_timestamp("2024-13-45 99:00:00"),
            Err(FieldIssue::UnparsableTimestamp)
        );
    }

    #[test]
    fn test_parse_timestamp_outlier_years() {
        assert_eq!(
            parse_timestamp("0001-01-01 00:00:00"),
            Err(FieldIssue::UnparsableTimestamp)
        );
        assert_eq!(
            parse_timestamp("+20240-01-30 10:00:00"),
            Err(FieldIssue::UnparsableTimestamp)
        );
        assert!(parse_timestamp("1677-12-31 00:00:00").is_ok());
        assert!(parse_timestamp("2262-01-01 00:00:00").is_ok());
    }

    // -------------------------------------------------------------------------
    // MEASURE TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_extract_measure() {
        assert_eq!(extract_measure("8.9523ft3"), Ok(8.9523));
        assert_eq!(extract_measure("78.2641lb"), Ok(78.2641));
        assert_eq!(extract_measure("5.2901ft³"), Ok(5.2901));
        assert_eq!(extract_measure("12"), Ok(12.0));
        assert_eq!(extract_measure("N/A"), Err(FieldIssue::NonNumericMeasure));
    }

    // -------------------------------------------------------------------------
    // STATE CODE TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_state_code() {
        assert_eq!(state_code("ca"), Ok("CA".to_string()));
        assert_eq!(state_code("  TX "), Ok("TX".to_string()));
        assert_eq!(state_code("California"), Err(FieldIssue::InvalidStateCode));
        assert_eq!(state_code("C1"), Err(FieldIssue::InvalidStateCode));
    }

    #[test]
    fn test_state_code_from_house_no_when_no_state_column() {
        let raw = RawRecord::from_pairs([("houseNo", "ny")]);
        let rec = normalize_order(&raw, &mut NormalizeReport::default());
        assert_eq!(rec.state_code.as_deref(), Some("NY"));
    }

    #[test]
    fn test_state_column_wins_over_house_no() {
        let raw = RawRecord::from_pairs([("State", "California"), ("houseNo", "CA")]);
        let mut report = NormalizeReport::default();
        let rec = normalize_order(&raw, &mut report);
        assert_eq!(rec.state_code, None);
        assert_eq!(report.issue_count(FieldIssue::InvalidStateCode), 1);
    }

    // -------------------------------------------------------------------------
    // QUANTITY TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("3"), Ok(3));
        assert_eq!(parse_quantity(" 4 "), Ok(4));
        assert_eq!(parse_quantity("2.0"), Ok(2));
        assert_eq!(parse_quantity("2.7"), Ok(2));
        assert_eq!(parse_quantity("many"), Err(FieldIssue::InvalidQuantity));
        assert_eq!(parse_quantity("NaN"), Err(FieldIssue::InvalidQuantity));
        assert_eq!(
            parse_quantity("99999999999"),
            Err(FieldIssue::InvalidQuantity)
        );
    }

    #[test]
    fn test_quantity_defaults_to_one() {
        let mut report = NormalizeReport::default();
        let missing = normalize_order(&RawRecord::default(), &mut report);
        assert_eq!(missing.goods_number, 1);

        let bad = normalize_order(&RawRecord::from_pairs([("goodsNumber", "x")]), &mut report);
        assert_eq!(bad.goods_number, 1);
        assert_eq!(report.issue_count(FieldIssue::InvalidQuantity), 1);
    }

    // -------------------------------------------------------------------------
    // RECORD TESTS
    // -------------------------------------------------------------------------

    const ORDERS_CSV: &str = "\
orderNo,commercePlatform,name,oneAddress,postalCode,masterSku,sku,submitTime,createTime,volume,actualWeight,State,goodsNumber
A-1,Amazon,Jane Doe,12 Main St,90210,,SKU-9,2024-01-30 10:00:00,2024-01-29 09:00:00,8.9523ft3,78.2641lb,ca,2
A-2,Amazon,Jane Doe,12 Main St,90210,MS-1,SKU-9,bad,2024-01-29 09:00:00,N/A,N/A,California,x
";

    #[test]
    fn test_normalize_orders_typed_fields() {
        let table = parse_csv(ORDERS_CSV).unwrap();
        let (records, report) = normalize_orders(&table);

        assert_eq!(records.len(), 2);
        let first = &records[0];
        assert_eq!(first.order_no(), Some("A-1"));
        assert_eq!(first.platform(), Some("Amazon"));
        assert_eq!(first.submit_time, Some(ts("2024-01-30 10:00:00")));
        assert_eq!(first.volume_num, Some(8.9523));
        assert_eq!(first.actual_weight_num, Some(78.2641));
        assert_eq!(first.state_code.as_deref(), Some("CA"));
        assert_eq!(first.goods_number, 2);
        assert_eq!(first.product_key.as_deref(), Some("SKU-9"));

        let second = &records[1];
        assert_eq!(second.submit_time, None);
        assert_eq!(second.volume_num, None);
        assert_eq!(second.state_code, None);
        assert_eq!(second.goods_number, 1);
        assert_eq!(second.product_key.as_deref(), Some("MS-1"));
        assert_eq!(second.customer_id, first.customer_id);

        assert_eq!(report.rows, 2);
        assert_eq!(report.issue_count(FieldIssue::UnparsableTimestamp), 1);
        assert_eq!(report.issue_count(FieldIssue::NonNumericMeasure), 2);
        assert_eq!(report.issue_count(FieldIssue::InvalidStateCode), 1);
        assert_eq!(report.issue_count(FieldIssue::InvalidQuantity), 1);
        assert!(report.missing_columns.is_empty());
    }

    #[test]
    fn test_missing_columns_synthesized_as_null() {
        let table = parse_csv("orderNo\nA-1\n").unwrap();
        let (records, report) = normalize_orders(&table);

        let rec = &records[0];
        assert_eq!(rec.platform(), None);
        assert_eq!(rec.submit_time, None);
        assert_eq!(rec.product_key, None);
        assert_eq!(rec.goods_number, 1);
        assert_eq!(rec.customer_id, identity::customer_id(None, None, None));
        assert!(report.missing_columns.contains(&"goodsNumber".to_string()));
        assert_eq!(report.null_product_keys, 1);
    }

    #[test]
    fn test_blank_identity_fields_hash_as_absent() {
        let table = parse_csv("name,oneAddress,postalCode\n  ,1 Elm ,\t\n").unwrap();
        let (records, _) = normalize_orders(&table);
        assert_eq!(
            records[0].customer_id,
            identity::customer_id(None, Some("1 Elm"), None)
        );
    }

    #[test]
    fn test_normalization_idempotent() {
        let table = parse_csv(ORDERS_CSV).unwrap();
        let (records, _) = normalize_orders(&table);
        for rec in &records {
            let again = normalize_order(&rec.to_raw(), &mut NormalizeReport::default());
            assert_eq!(&again, rec);
        }
    }

    #[test]
    fn test_normalization_idempotent_house_no_state() {
        let raw = RawRecord::from_pairs([("houseNo", "tx"), ("name", "Bo")]);
        let rec = normalize_order(&raw, &mut NormalizeReport::default());
        let again = normalize_order(&rec.to_raw(), &mut NormalizeReport::default());
        assert_eq!(again, rec);
    }
}
