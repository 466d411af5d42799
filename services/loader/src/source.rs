//! Raw tabular input: CSV text or a spreadsheet, first row = header.
//!
//! Every cell is kept as text. Headers go through `normalize::canonical_header`
//! so the rest of the pipeline sees one vocabulary regardless of spacing,
//! hyphens or a leading byte-order mark.

use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::LoadError;
use crate::normalize::{canonical_header, format_timestamp};

/// Supported input containers, decided by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Csv,
    Workbook,
}

impl InputFormat {
    pub fn detect(path: &Path) -> Result<Self, LoadError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => Ok(InputFormat::Csv),
            "xls" | "xlsx" => Ok(InputFormat::Workbook),
            _ => Err(LoadError::UnsupportedInput {
                path: path.display().to_string(),
            }),
        }
    }
}

/// One input row. Present columns map to their (trimmed) cell text; a column
/// that exists with an empty cell reads as missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    cells: HashMap<String, String>,
}

impl RawRecord {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut cells = HashMap::new();
        for (k, v) in pairs {
            // First occurrence of a duplicated header wins.
            cells.entry(k.into()).or_insert_with(|| v.into());
        }
        Self { cells }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .get(column)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.cells.contains_key(column)
    }

    pub fn set(&mut self, column: &str, value: impl Into<String>) {
        self.cells.insert(column.to_string(), value.into());
    }
}

/// A whole input file.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawRecord>,
}

impl RawTable {
    pub fn has_column(&self, column: &str) -> bool {
        self.headers.iter().any(|h| h == column)
    }

    /// Copy `from` into `to` for every row, if `from` exists and `to` does not.
    pub fn alias_column(&mut self, from: &str, to: &str) -> bool {
        if !self.has_column(from) || self.has_column(to) {
            return false;
        }
        for row in &mut self.rows {
            let value = row.cells.get(from).cloned().unwrap_or_default();
            row.set(to, value);
        }
        self.headers.push(to.to_string());
        true
    }

    fn from_rows(raw_headers: Vec<String>, body: Vec<Vec<String>>) -> Self {
        let headers: Vec<String> = raw_headers.iter().map(|h| canonical_header(h)).collect();
        let rows = body
            .into_iter()
            .map(|values| {
                RawRecord::from_pairs(
                    headers
                        .iter()
                        .cloned()
                        .zip(values.into_iter().chain(std::iter::repeat(String::new())))
                        .filter(|(h, _)| !h.is_empty()),
                )
            })
            .collect();
        Self {
            headers: headers.into_iter().filter(|h| !h.is_empty()).collect(),
            rows,
        }
    }
}

/// Read the input file named by `path`.
pub async fn read_table(path: &Path, sheet: Option<&str>) -> Result<RawTable> {
    match InputFormat::detect(path)? {
        InputFormat::Csv => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read input file {}", path.display()))?;
            parse_csv_bytes(&bytes)
        }
        InputFormat::Workbook => read_workbook(path, sheet),
    }
}

/// Decode as UTF-8 (dropping a BOM, replacing invalid sequences) and parse.
pub fn parse_csv_bytes(bytes: &[u8]) -> Result<RawTable> {
    let (content, malformed) = encoding_rs::UTF_8.decode_with_bom_removal(bytes);
    if malformed {
        warn!("input contains invalid UTF-8; offending bytes replaced");
    }
    parse_csv(&content)
}

/// Parse delimited text. Cells are trimmed; short rows are padded with
/// missing values.
pub fn parse_csv(content: &str) -> Result<RawTable> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV headers")?
        .iter()
        .map(str::to_string)
        .collect();

    let mut body = Vec::new();
    for (line_idx, result) in reader.records().enumerate() {
        match result {
            Ok(record) => body.push(record.iter().map(str::to_string).collect()),
            Err(e) => warn!(line = line_idx + 2, error = %e, "skipping unreadable CSV line"),
        }
    }

    debug!(columns = headers.len(), rows = body.len(), "parsed CSV input");
    Ok(RawTable::from_rows(headers, body))
}

/// Read one worksheet (the named one, else the first).
pub fn read_workbook(path: &Path, sheet: Option<&str>) -> Result<RawTable> {
    let mut workbook: calamine::Sheets<_> =
        open_workbook_auto(path).context("Failed to open workbook")?;

    let sheet_names = workbook.sheet_names().to_vec();
    let sheet_name = match sheet {
        Some(wanted) => sheet_names
            .iter()
            .find(|s| s.as_str() == wanted)
            .cloned()
            .ok_or_else(|| LoadError::MissingSheet {
                sheet: wanted.to_string(),
                available: sheet_names.join(", "),
            })?,
        None => sheet_names
            .first()
            .cloned()
            .ok_or_else(|| LoadError::EmptyWorkbook {
                path: path.display().to_string(),
            })?,
    };

    let range = workbook
        .worksheet_range(&sheet_name)
        .with_context(|| format!("Failed to read sheet '{}'", sheet_name))?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header_row) => header_row.iter().map(cell_text).collect(),
        None => return Ok(RawTable::default()),
    };
    let body: Vec<Vec<String>> = rows.map(|r| r.iter().map(cell_text).collect()).collect();

    debug!(sheet = %sheet_name, columns = headers.len(), rows = body.len(), "parsed workbook input");
    Ok(RawTable::from_rows(headers, body))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Float(f) => format!("{}", f),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.as_datetime().map(format_timestamp).unwrap_or_default(),
    }
}
