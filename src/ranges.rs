use chrono::NaiveDate;

use crate::error::GatherError;

/// Inclusive, transient span of calendar days. Derived from the cache gap
/// scan; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        self.start.iter_days().take_while(move |day| *day <= end)
    }
}

/// Parse the `YYYY/MM/DD` literal format used on the CLI and in Gmail
/// search queries.
pub fn parse_cli_date(input: &str) -> Result<NaiveDate, GatherError> {
    NaiveDate::parse_from_str(input.trim(), "%Y/%m/%d").map_err(|_| GatherError::InvalidDate {
        input: input.to_owned(),
    })
}

/// Collapse a set of days into the minimal list of contiguous inclusive
/// ranges, sorted ascending. Returned ranges are disjoint with at least
/// one gap day between them.
pub fn collapse_date_ranges(mut dates: Vec<NaiveDate>) -> Vec<DateRange> {
    dates.sort();
    dates.dedup();

    let mut ranges = Vec::new();
    let mut iter = dates.into_iter();
    let Some(first) = iter.next() else {
        return ranges;
    };

    let mut start = first;
    let mut prev = first;
    for day in iter {
        if prev.succ_opt() == Some(day) {
            prev = day;
            continue;
        }
        ranges.push(DateRange { start, end: prev });
        start = day;
        prev = day;
    }
    ranges.push(DateRange { start, end: prev });
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn parse_cli_date_accepts_slash_format_only() {
        assert_eq!(parse_cli_date("2024/02/01").unwrap(), d("2024-02-01"));
        assert!(matches!(
            parse_cli_date("2024-02-01"),
            Err(GatherError::InvalidDate { .. })
        ));
        assert!(parse_cli_date("yesterday").is_err());
    }

    #[test]
    fn collapse_empty_input() {
        assert!(collapse_date_ranges(Vec::new()).is_empty());
    }

    #[test]
    fn collapse_merges_consecutive_days() {
        let ranges = collapse_date_ranges(vec![
            d("2024-01-03"),
            d("2024-01-01"),
            d("2024-01-02"),
            d("2024-01-02"),
        ]);
        assert_eq!(
            ranges,
            vec![DateRange {
                start: d("2024-01-01"),
                end: d("2024-01-03"),
            }]
        );
    }

    #[test]
    fn collapse_splits_on_gaps() {
        let ranges = collapse_date_ranges(vec![
            d("2024-01-01"),
            d("2024-01-02"),
            d("2024-01-04"),
            d("2024-01-07"),
        ]);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0].end, d("2024-01-02"));
        assert_eq!(ranges[1].start, d("2024-01-04"));
        assert_eq!(ranges[1].end, d("2024-01-04"));
        assert_eq!(ranges[2].start, d("2024-01-07"));

        // Minimality: adjacent returned ranges always have a gap day.
        for pair in ranges.windows(2) {
            assert!(pair[0].end.succ_opt().unwrap() < pair[1].start);
        }
    }

    #[test]
    fn collapse_covers_every_input_day_exactly_once() {
        let days = vec![d("2024-02-01"), d("2024-02-02"), d("2024-02-05")];
        let ranges = collapse_date_ranges(days.clone());
        let union: Vec<NaiveDate> = ranges.iter().flat_map(DateRange::days).collect();
        assert_eq!(union, days);
    }

    #[test]
    fn range_days_is_inclusive() {
        let range = DateRange {
            start: d("2024-03-30"),
            end: d("2024-04-01"),
        };
        let days: Vec<NaiveDate> = range.days().collect();
        assert_eq!(days, vec![d("2024-03-30"), d("2024-03-31"), d("2024-04-01")]);
    }
}
