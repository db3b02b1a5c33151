use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime};
use wx_types::{DateRange, GapReport, LocationId, MissingRange};

/// Days of `range` with no stored hour, ascending.
pub fn missing_days(range: DateRange, existing: &BTreeSet<NaiveDate>) -> Vec<NaiveDate> {
    range.days().filter(|day| !existing.contains(day)).collect()
}

/// Coalesce sorted days into runs of consecutive days.
pub fn coalesce_missing(days: &[NaiveDate]) -> Vec<MissingRange> {
    let Some((&first, rest)) = days.split_first() else {
        return Vec::new();
    };

    let mut ranges = Vec::new();
    let mut start = first;
    let mut prev = first;
    for &day in rest {
        if (day - prev).num_days() > 1 {
            ranges.push(MissingRange::new(start, prev));
            start = day;
        }
        prev = day;
    }
    ranges.push(MissingRange::new(start, prev));
    ranges
}

/// Build the completeness report for one location.
///
/// `timestamps` are the stored hours of the location; hours outside `range`
/// are ignored and duplicates count once.
pub fn analyze(location_id: LocationId, range: DateRange, timestamps: &[NaiveDateTime]) -> GapReport {
    let hours: BTreeSet<NaiveDateTime> = timestamps
        .iter()
        .copied()
        .filter(|ts| range.contains(ts.date()))
        .collect();
    let existing: BTreeSet<NaiveDate> = hours.iter().map(|ts| ts.date()).collect();

    let missing = missing_days(range, &existing);
    let missing_ranges = coalesce_missing(&missing);

    let expected_hours = range.expected_hours();
    let existing_hours = hours.len();
    let completeness_rate = if expected_hours == 0 {
        0.0
    } else {
        let rate = existing_hours as f64 / expected_hours as f64 * 100.0;
        (rate * 100.0).round() / 100.0
    };

    GapReport {
        location_id,
        range,
        total_days: range.day_count(),
        existing_days: existing.len(),
        missing_days: missing.len(),
        expected_hours,
        existing_hours,
        completeness_rate,
        existing_dates: existing.into_iter().collect(),
        missing_dates: missing,
        missing_ranges,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jan(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn full_day(day: u32) -> Vec<NaiveDateTime> {
        (0..24).map(|h| jan(day).and_hms_opt(h, 0, 0).unwrap()).collect()
    }

    #[test]
    fn test_coalesce_consecutive_runs() {
        let missing: Vec<_> = [1, 2, 3, 7, 8, 10].into_iter().map(jan).collect();
        let ranges = coalesce_missing(&missing);

        assert_eq!(
            ranges,
            vec![
                MissingRange { start: jan(1), end: jan(3), days: 3 },
                MissingRange { start: jan(7), end: jan(8), days: 2 },
                MissingRange { start: jan(10), end: jan(10), days: 1 },
            ]
        );
        assert!(coalesce_missing(&[]).is_empty());
    }

    #[test]
    fn test_missing_days_over_range() {
        let range = DateRange::new(jan(1), jan(10)).unwrap();
        let existing: BTreeSet<_> = [4, 5, 6, 9].into_iter().map(jan).collect();
        let missing = missing_days(range, &existing);
        let numbers: Vec<u32> = missing.iter().map(|d| chrono::Datelike::day(d)).collect();
        assert_eq!(numbers, vec![1, 2, 3, 7, 8, 10]);
    }

    #[test]
    fn test_completeness_is_scored_in_hours() {
        let range = DateRange::new(jan(1), jan(2)).unwrap();
        let mut stored = full_day(1);
        stored.extend(full_day(2).into_iter().take(10));

        let report = analyze(LocationId(1), range, &stored);
        assert_eq!(report.expected_hours, 48);
        assert_eq!(report.existing_hours, 34);
        assert_eq!(report.existing_days, 2);
        assert_eq!(report.missing_days, 0);
        assert!((report.completeness_rate - 70.83).abs() < 1e-9);
        assert!(report.missing_ranges.is_empty());
        assert!(!report.is_complete());
    }

    #[test]
    fn test_empty_store_is_one_missing_range() {
        let range = DateRange::new(jan(1), jan(10)).unwrap();
        let report = analyze(LocationId(7), range, &[]);

        assert_eq!(report.total_days, 10);
        assert_eq!(report.completeness_rate, 0.0);
        assert_eq!(report.missing_ranges, vec![MissingRange::new(jan(1), jan(10))]);
    }

    #[test]
    fn test_hours_outside_range_are_ignored() {
        let range = DateRange::new(jan(2), jan(2)).unwrap();
        let mut stored = full_day(1);
        stored.extend(full_day(2));
        stored.extend(full_day(2));

        let report = analyze(LocationId(1), range, &stored);
        assert_eq!(report.existing_hours, 24);
        assert_eq!(report.completeness_rate, 100.0);
        assert!(report.is_complete());
    }
}
