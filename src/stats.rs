//! Derived statistics over the ledger.
//!
//! Everything here is a pure function of the record slice; nothing is cached.
//! Dates are compared the way they are stored: day buckets match on the
//! formatted date string, month buckets ignore the year.

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

use crate::{format_date, parse_date, DebtRecord};

/// Default window of the daily chart.
pub const DEFAULT_DAY_WINDOW: usize = 30;
/// Default window of the yearly chart.
pub const DEFAULT_YEAR_WINDOW: usize = 5;
/// Largest daily window, about ten years.
pub const MAX_DAY_WINDOW: usize = 3660;
/// Largest yearly window.
pub const MAX_YEAR_WINDOW: usize = 100;

pub const MONTH_LABELS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub total: u64,
    pub paid: u64,
    pub unpaid: u64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayBucket {
    pub date: String,
    pub amount: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct YearBucket {
    pub year: i32,
    pub amount: u64,
}

/// Sums for the current day, month and year.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PeriodSummary {
    pub today: u64,
    pub this_month: u64,
    pub this_year: u64,
}

/// Single pass over the records, split by `paid`.
pub fn totals(records: &[DebtRecord]) -> Totals {
    records.iter().fold(Totals::default(), |mut acc, r| {
        acc.total = acc.total.saturating_add(r.amount);
        if r.paid {
            acc.paid = acc.paid.saturating_add(r.amount);
        } else {
            acc.unpaid = acc.unpaid.saturating_add(r.amount);
        }
        acc.count += 1;
        acc
    })
}

/// Rounded share of `part` in `total`, 0 for an empty total.
pub fn percent_of(part: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    ((part as f64 / total as f64) * 100.0).round() as u64
}

/// The last `window` days ending at `today`, oldest first, capped at [`MAX_DAY_WINDOW`].
pub fn bucket_by_day(
    records: &[DebtRecord],
    window: usize,
    today: NaiveDate,
    date_format: &str,
) -> Vec<DayBucket> {
    (0..window.min(MAX_DAY_WINDOW))
        .rev()
        .map(|days_back| {
            let day = today - Duration::days(days_back as i64);
            let label = format_date(day, date_format);
            let amount = records
                .iter()
                .filter(|r| r.date_created.trim() == label)
                .fold(0u64, |sum, r| sum.saturating_add(r.amount));
            DayBucket { date: label, amount }
        })
        .collect()
}

/// Sums by calendar month of `date_created`; years alias into the same bucket.
pub fn bucket_by_month(records: &[DebtRecord], date_format: &str) -> [u64; 12] {
    let mut months = [0u64; 12];
    for record in records {
        if let Some(date) = parse_date(&record.date_created, date_format) {
            let slot = &mut months[date.month0() as usize];
            *slot = slot.saturating_add(record.amount);
        }
    }
    months
}

/// The last `window` years ending at `current_year`, oldest first, capped at [`MAX_YEAR_WINDOW`].
pub fn bucket_by_year(
    records: &[DebtRecord],
    window: usize,
    current_year: i32,
    date_format: &str,
) -> Vec<YearBucket> {
    if window == 0 {
        return Vec::new();
    }
    let first_year = current_year - window.min(MAX_YEAR_WINDOW) as i32 + 1;
    let mut buckets: Vec<YearBucket> = (first_year..=current_year)
        .map(|year| YearBucket { year, amount: 0 })
        .collect();

    for record in records {
        let Some(date) = parse_date(&record.date_created, date_format) else {
            continue;
        };
        let offset = date.year() - first_year;
        if let Some(bucket) = usize::try_from(offset).ok().and_then(|i| buckets.get_mut(i)) {
            bucket.amount = bucket.amount.saturating_add(record.amount);
        }
    }
    buckets
}

pub fn period_summary(records: &[DebtRecord], today: NaiveDate, date_format: &str) -> PeriodSummary {
    let today_label = format_date(today, date_format);
    records.iter().fold(PeriodSummary::default(), |mut acc, r| {
        if r.date_created.trim() == today_label {
            acc.today = acc.today.saturating_add(r.amount);
        }
        if let Some(date) = parse_date(&r.date_created, date_format) {
            if date.year() == today.year() {
                acc.this_year = acc.this_year.saturating_add(r.amount);
                if date.month() == today.month() {
                    acc.this_month = acc.this_month.saturating_add(r.amount);
                }
            }
        }
        acc
    })
}

/// Everything the `stats` command shows.
#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub totals: Totals,
    pub paid_percent: u64,
    pub unpaid_percent: u64,
    pub paid_count: usize,
    pub unpaid_count: usize,
    pub periods: PeriodSummary,
    pub daily: Vec<DayBucket>,
    pub monthly: [u64; 12],
    pub yearly: Vec<YearBucket>,
}

impl Statistics {
    pub fn compute(
        records: &[DebtRecord],
        today: NaiveDate,
        date_format: &str,
        day_window: usize,
        year_window: usize,
    ) -> Self {
        let totals = totals(records);
        let paid_count = records.iter().filter(|r| r.paid).count();
        Statistics {
            paid_percent: percent_of(totals.paid, totals.total),
            unpaid_percent: percent_of(totals.unpaid, totals.total),
            paid_count,
            unpaid_count: records.len() - paid_count,
            periods: period_summary(records, today, date_format),
            daily: bucket_by_day(records, day_window, today, date_format),
            monthly: bucket_by_month(records, date_format),
            yearly: bucket_by_year(records, year_window, today.year(), date_format),
            totals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FMT: &str = "%d.%m.%Y";

    fn record(amount: u64, paid: bool, date: &str) -> DebtRecord {
        DebtRecord {
            id: format!("{}-{}", amount, date),
            name: "X".into(),
            phone: String::new(),
            amount,
            date_created: date.into(),
            paid,
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn totals_split_by_paid() {
        let records = vec![record(100, true, ""), record(50, false, "")];
        assert_eq!(
            totals(&records),
            Totals {
                total: 150,
                paid: 100,
                unpaid: 50,
                count: 2
            }
        );
    }

    #[test]
    fn totals_parts_always_sum_to_total() {
        let records: Vec<DebtRecord> = (0..25u64)
            .map(|i| record(i * 37 % 11, i % 3 == 0, ""))
            .collect();
        let t = totals(&records);
        assert_eq!(t.paid + t.unpaid, t.total);
        assert_eq!(totals(&[]), Totals::default());
    }

    #[test]
    fn day_buckets_match_formatted_strings() {
        let today = day(2026, 10, 18);
        let records = vec![
            record(10, false, "18.10.2026"),
            record(5, false, "17.10.2026"),
            record(7, false, "2026-10-18"),
            record(1, false, "01.01.2020"),
        ];
        let buckets = bucket_by_day(&records, 3, today, FMT);
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].date, "16.10.2026");
        assert_eq!(buckets[1].amount, 5);
        // ISO-formatted date is not string-equal to the day label
        assert_eq!(buckets[2].amount, 10);
    }

    #[test]
    fn month_buckets_ignore_year() {
        let records = vec![
            record(10, false, "05.03.2025"),
            record(20, false, "09.03.2026"),
            record(4, false, "garbage"),
            record(1, false, "31.12.2026"),
        ];
        let months = bucket_by_month(&records, FMT);
        assert_eq!(months[2], 30);
        assert_eq!(months[11], 1);
        assert_eq!(months.iter().sum::<u64>(), 31);
    }

    #[test]
    fn year_buckets_cover_window() {
        let records = vec![
            record(10, false, "05.03.2022"),
            record(20, false, "09.03.2026"),
            record(3, false, "09.03.2021"),
            record(4, false, "09.03.2027"),
        ];
        let years = bucket_by_year(&records, 5, 2026, FMT);
        assert_eq!(years.first().map(|y| y.year), Some(2022));
        assert_eq!(years[0].amount, 10);
        assert_eq!(years[4], YearBucket { year: 2026, amount: 20 });
        assert_eq!(years.iter().map(|y| y.amount).sum::<u64>(), 30);
    }

    #[test]
    fn zero_amounts_contribute_nothing() {
        let records = vec![record(0, false, "18.10.2026")];
        let today = day(2026, 10, 18);
        assert_eq!(bucket_by_day(&records, 1, today, FMT)[0].amount, 0);
        assert_eq!(totals(&records).count, 1);
    }

    #[test]
    fn period_summary_and_percentages() {
        let today = day(2026, 10, 18);
        let records = vec![
            record(100, true, "18.10.2026"),
            record(50, false, "02.10.2026"),
            record(25, false, "02.02.2026"),
            record(5, false, "02.10.2025"),
        ];
        let summary = period_summary(&records, today, FMT);
        assert_eq!(summary.today, 100);
        assert_eq!(summary.this_month, 150);
        assert_eq!(summary.this_year, 175);

        let stats = Statistics::compute(&records, today, FMT, 7, 5);
        assert_eq!(stats.paid_percent, 56);
        assert_eq!(stats.unpaid_percent, 44);
        assert_eq!(stats.paid_count, 1);
        assert_eq!(stats.daily.len(), 7);
        assert_eq!(percent_of(1, 0), 0);
    }

    #[test]
    fn oversized_windows_are_capped() {
        let today = day(2026, 10, 18);
        let records = vec![record(9, false, "18.10.2026")];

        let days = bucket_by_day(&records, 200_000_000, today, FMT);
        assert_eq!(days.len(), MAX_DAY_WINDOW);
        assert_eq!(days.last().map(|d| d.amount), Some(9));

        let years = bucket_by_year(&records, usize::MAX, 2026, FMT);
        assert_eq!(years.len(), MAX_YEAR_WINDOW);
        assert_eq!(years.last(), Some(&YearBucket { year: 2026, amount: 9 }));
        assert!(bucket_by_year(&records, 0, 2026, FMT).is_empty());
    }
}
