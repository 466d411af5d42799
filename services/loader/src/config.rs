use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::ValueEnum;
use serde::Serialize;

use crate::normalize::CleanedRecord;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Database settings, read from the environment (after `.env`).
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub db_url: String,
    pub max_connections: u32,
}

impl DbConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            db_url: std::env::var("DB_URL").context("DB_URL env var missing")?,
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
        })
    }
}

/// Which timestamp attributes a sale to a calendar day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DateSource {
    #[default]
    SubmitTime,
    CreateTime,
}

impl DateSource {
    /// Staging column holding the chosen timestamp.
    pub fn column(self) -> &'static str {
        match self {
            DateSource::SubmitTime => "submit_time",
            DateSource::CreateTime => "create_time",
        }
    }

    pub fn pick(self, record: &CleanedRecord) -> Option<NaiveDateTime> {
        match self {
            DateSource::SubmitTime => record.submit_time,
            DateSource::CreateTime => record.create_time,
        }
    }
}

/// Fact-level dedup key. `None` appends every qualifying staged row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FactDedup {
    #[default]
    None,
    OrderId,
    OrderLine,
}

/// Settings the pipeline needs, passed in explicitly.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LoadConfig {
    pub date_source: DateSource,
    pub fact_dedup: FactDedup,
    pub chunk_size: usize,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            date_source: DateSource::default(),
            fact_dedup: FactDedup::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{normalize_order, NormalizeReport};
    use crate::source::RawRecord;

    #[test]
    fn test_defaults() {
        let cfg = LoadConfig::default();
        assert_eq!(cfg.date_source, DateSource::SubmitTime);
        assert_eq!(cfg.fact_dedup, FactDedup::None);
        assert_eq!(cfg.chunk_size, 1000);
    }

    #[test]
    fn test_date_source_pick() {
        let raw = RawRecord::from_pairs([
            ("submitTime", "2024-01-30 10:00:00"),
            ("createTime", "2024-01-29 09:00:00"),
        ]);
        let rec = normalize_order(&raw, &mut NormalizeReport::default());
        assert_eq!(
            DateSource::SubmitTime.pick(&rec).map(|t| t.to_string()),
            Some("2024-01-30 10:00:00".to_string())
        );
        assert_eq!(
            DateSource::CreateTime.pick(&rec).map(|t| t.to_string()),
            Some("2024-01-29 09:00:00".to_string())
        );
        assert_eq!(DateSource::CreateTime.column(), "create_time");
    }

    #[test]
    fn test_value_enum_names() {
        assert_eq!(
            DateSource::from_str("create-time", false).unwrap(),
            DateSource::CreateTime
        );
        assert_eq!(
            FactDedup::from_str("order-line", false).unwrap(),
            FactDedup::OrderLine
        );
    }
}
