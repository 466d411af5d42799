//! Calendar dimension.
//!
//! Every attribute of a `DatePoint` is a function of the date itself, so
//! rows are inserted once and never updated.

use anyhow::Result;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;
use tracing::info;

use crate::config::DateSource;
use crate::error::LoadError;
use crate::staging::StagedOrder;
use crate::warehouse::Warehouse;

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatePoint {
    pub date: NaiveDate,
    pub year: i16,
    pub quarter: i16,
    pub month: i16,
    pub month_name: &'static str,
    pub day: i16,
    /// ISO numbering, Monday = 1 through Sunday = 7.
    pub day_of_week: i16,
    pub is_weekend: bool,
}

impl DatePoint {
    pub fn new(date: NaiveDate) -> Result<Self, LoadError> {
        let year = i16::try_from(date.year()).map_err(|_| LoadError::YearOutOfRange { date })?;
        let month = date.month();
        let weekday = date.weekday();
        Ok(Self {
            date,
            year,
            quarter: ((month - 1) / 3 + 1) as i16,
            month: month as i16,
            month_name: MONTH_NAMES[date.month0() as usize],
            day: date.day() as i16,
            day_of_week: weekday.number_from_monday() as i16,
            is_weekend: matches!(weekday, Weekday::Sat | Weekday::Sun),
        })
    }
}

/// One point per day of the inclusive range; empty when `min > max`.
pub fn calendar(min: NaiveDate, max: NaiveDate) -> Result<Vec<DatePoint>, LoadError> {
    min.iter_days()
        .take_while(|d| *d <= max)
        .map(DatePoint::new)
        .collect()
}

/// Earliest and latest day of the chosen timestamp across the staged batch.
pub fn batch_range(
    staged: &[StagedOrder],
    source: DateSource,
) -> (Option<NaiveDate>, Option<NaiveDate>) {
    let days = || {
        staged
            .iter()
            .filter_map(|s| source.pick(&s.record))
            .map(|ts| ts.date())
    };
    (days().min(), days().max())
}

/// Make sure the date dimension has a row for every day in `[min, max]`.
/// Does nothing when either bound is unknown. Returns the rows added.
pub async fn ensure_covers<W: Warehouse>(
    warehouse: &mut W,
    min: Option<NaiveDate>,
    max: Option<NaiveDate>,
    chunk_size: usize,
) -> Result<u64> {
    let (Some(min), Some(max)) = (min, max) else {
        info!("no dated rows in batch, date dimension unchanged");
        return Ok(0);
    };
    let points = calendar(min, max)?;
    let added = warehouse.ensure_dates(&points, chunk_size).await?;
    info!(from = %min, to = %max, days = points.len(), inserted = added, "date dimension covered");
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{normalize_order, NormalizeReport};
    use crate::source::RawRecord;
    use crate::staging::stage_orders;
    use crate::warehouse::memory::MemoryWarehouse;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // -------------------------------------------------------------------------
    // CALENDAR TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_calendar_inclusive_range() {
        let points = calendar(day(2024, 1, 30), day(2024, 2, 2)).unwrap();
        let dates: Vec<NaiveDate> = points.iter().map(|p| p.date).collect();
        assert_eq!(
            dates,
            vec![
                day(2024, 1, 30),
                day(2024, 1, 31),
                day(2024, 2, 1),
                day(2024, 2, 2)
            ]
        );
        assert!(points.iter().all(|p| !p.is_weekend));
    }

    #[test]
    fn test_calendar_attributes() {
        let points = calendar(day(2024, 1, 30), day(2024, 2, 4)).unwrap();
        let dow: Vec<i16> = points.iter().map(|p| p.day_of_week).collect();
        assert_eq!(dow, vec![2, 3, 4, 5, 6, 7]);

        let sat = &points[4];
        assert_eq!(sat.date, day(2024, 2, 3));
        assert!(sat.is_weekend);
        assert!(points[5].is_weekend);

        let feb1 = &points[2];
        assert_eq!(feb1.month, 2);
        assert_eq!(feb1.month_name, "February");
        assert_eq!(feb1.quarter, 1);
        assert_eq!(feb1.year, 2024);
        assert_eq!(feb1.day, 1);
    }

    #[test]
    fn test_quarters() {
        assert_eq!(DatePoint::new(day(2024, 3, 31)).unwrap().quarter, 1);
        assert_eq!(DatePoint::new(day(2024, 4, 1)).unwrap().quarter, 2);
        assert_eq!(DatePoint::new(day(2024, 9, 30)).unwrap().quarter, 3);
        assert_eq!(DatePoint::new(day(2024, 12, 31)).unwrap().quarter, 4);
    }

    #[test]
    fn test_year_outside_smallint_rejected() {
        assert!(matches!(
            DatePoint::new(day(40000, 1, 1)),
            Err(LoadError::YearOutOfRange { .. })
        ));
    }

    #[test]
    fn test_calendar_empty_when_reversed() {
        assert!(calendar(day(2024, 2, 2), day(2024, 1, 30)).unwrap().is_empty());
        assert_eq!(calendar(day(2024, 2, 2), day(2024, 2, 2)).unwrap().len(), 1);
    }

    #[test]
    fn test_batch_range_uses_chosen_column() {
        let rows = [
            [("submitTime", "2024-02-02 10:00:00"), ("createTime", "2024-01-01 00:00:00")],
            [("submitTime", "2024-01-30 23:59:59"), ("createTime", "2024-01-05 00:00:00")],
        ];
        let records: Vec<_> = rows
            .iter()
            .map(|r| normalize_order(&RawRecord::from_pairs(*r), &mut NormalizeReport::default()))
            .collect();
        let staged = stage_orders(&records);

        assert_eq!(
            batch_range(&staged, DateSource::SubmitTime),
            (Some(day(2024, 1, 30)), Some(day(2024, 2, 2)))
        );
        assert_eq!(
            batch_range(&staged, DateSource::CreateTime),
            (Some(day(2024, 1, 1)), Some(day(2024, 1, 5)))
        );
        assert_eq!(batch_range(&[], DateSource::SubmitTime), (None, None));
    }

    // -------------------------------------------------------------------------
    // ENSURE COVERS TESTS
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_ensure_covers_no_duplicates() {
        let mut wh = MemoryWarehouse::default();
        let added = ensure_covers(&mut wh, Some(day(2024, 1, 30)), Some(day(2024, 2, 2)), 1000)
            .await
            .unwrap();
        assert_eq!(added, 4);

        let again = ensure_covers(&mut wh, Some(day(2024, 1, 28)), Some(day(2024, 2, 3)), 2)
            .await
            .unwrap();
        assert_eq!(again, 3);
        assert_eq!(wh.dates.len(), 7);
    }

    #[tokio::test]
    async fn test_ensure_covers_noop_without_bounds() {
        let mut wh = MemoryWarehouse::default();
        assert_eq!(ensure_covers(&mut wh, None, Some(day(2024, 1, 1)), 10).await.unwrap(), 0);
        assert_eq!(ensure_covers(&mut wh, Some(day(2024, 1, 1)), None, 10).await.unwrap(), 0);
        assert!(wh.dates.is_empty());
    }
}
