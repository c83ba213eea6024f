use chrono::{DateTime, Datelike, Duration, Months, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Bucket width for rollups and trend queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Week,
    Month,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "day" | "daily" => Some(Granularity::Day),
            "week" | "weekly" => Some(Granularity::Week),
            "month" | "monthly" => Some(Granularity::Month),
            _ => None,
        }
    }

    /// Start of the calendar period containing `ts`.
    /// Days start at midnight UTC, weeks on Monday, months on the 1st.
    pub fn floor(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let date = ts.date_naive();
        let start = match self {
            Granularity::Day => date,
            Granularity::Week => {
                date - Duration::days(date.weekday().num_days_from_monday() as i64)
            }
            Granularity::Month => date - Duration::days(date.day0() as i64),
        };
        start.and_time(NaiveTime::MIN).and_utc()
    }

    /// Start of the period following the one that begins at `period_start`.
    pub fn next_start(&self, period_start: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Granularity::Day => period_start + Duration::days(1),
            Granularity::Week => period_start + Duration::days(7),
            Granularity::Month => period_start
                .checked_add_months(Months::new(1))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Split `[start, end)` into consecutive calendar periods. The first and last
    /// periods are clipped to the range, so the result covers it exactly with no
    /// gaps or overlaps. Empty when `start >= end`.
    pub fn partition(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        let mut periods = Vec::new();
        let mut cursor = start;

        while cursor < end {
            let next = self.next_start(self.floor(cursor)).min(end);
            periods.push((cursor, next));
            cursor = next;
        }

        periods
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_granularity_roundtrip() {
        for g in [Granularity::Day, Granularity::Week, Granularity::Month] {
            assert_eq!(Granularity::from_str(g.as_str()), Some(g));
        }
        assert_eq!(Granularity::from_str("Monthly"), Some(Granularity::Month));
        assert_eq!(Granularity::from_str("year"), None);
    }

    #[test]
    fn test_floor() {
        // 2024-01-10 is a Wednesday
        let t = ts("2024-01-10T15:30:00Z");
        assert_eq!(Granularity::Day.floor(t), ts("2024-01-10T00:00:00Z"));
        assert_eq!(Granularity::Week.floor(t), ts("2024-01-08T00:00:00Z"));
        assert_eq!(Granularity::Month.floor(t), ts("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_next_start_crosses_year() {
        let dec = ts("2023-12-01T00:00:00Z");
        assert_eq!(Granularity::Month.next_start(dec), ts("2024-01-01T00:00:00Z"));
        let feb = ts("2024-02-01T00:00:00Z");
        assert_eq!(Granularity::Month.next_start(feb), ts("2024-03-01T00:00:00Z"));
    }

    #[test]
    fn test_partition_clips_both_ends() {
        let start = ts("2024-01-15T12:00:00Z");
        let end = ts("2024-03-10T00:00:00Z");
        let periods = Granularity::Month.partition(start, end);

        assert_eq!(
            periods,
            vec![
                (start, ts("2024-02-01T00:00:00Z")),
                (ts("2024-02-01T00:00:00Z"), ts("2024-03-01T00:00:00Z")),
                (ts("2024-03-01T00:00:00Z"), end),
            ]
        );
    }

    #[test]
    fn test_partition_is_contiguous() {
        let start = ts("2024-01-03T06:00:00Z");
        let end = ts("2024-02-29T18:00:00Z");

        for g in [Granularity::Day, Granularity::Week, Granularity::Month] {
            let periods = g.partition(start, end);
            assert_eq!(periods.first().map(|p| p.0), Some(start));
            assert_eq!(periods.last().map(|p| p.1), Some(end));
            for pair in periods.windows(2) {
                assert_eq!(pair[0].1, pair[1].0, "gap or overlap at {}", g);
            }
        }
    }

    #[test]
    fn test_partition_empty_range() {
        let t = ts("2024-01-01T00:00:00Z");
        assert!(Granularity::Day.partition(t, t).is_empty());
    }
}
