use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, SubsecRound, Utc};

use crate::error::{DanError, Result};

pub const DAY_FORMAT: &str = "%Y-%m-%d";

pub fn format_day(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

pub fn parse_day(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DAY_FORMAT).map_err(|e| {
        DanError::InvalidRequest(format!("invalid day '{}': {} (expected YYYY-MM-DD)", value, e))
    })
}

/// Split a day into the zero-padded (date, month, year) triple the draw
/// provider expects.
pub fn format_day_for_api(day: NaiveDate) -> (String, String, String) {
    (
        format!("{:02}", day.day()),
        format!("{:02}", day.month()),
        day.year().to_string(),
    )
}

pub fn reference_offset(hours: i32) -> Result<FixedOffset> {
    FixedOffset::east_opt(hours * 3600).ok_or_else(|| {
        DanError::InvalidRequest(format!("UTC offset of {} hours is out of range", hours))
    })
}

/// Calendar day of `instant` in the reference timezone. 23:59 and 00:01 of
/// the same local day map to the same date.
pub fn calendar_day(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    instant.with_timezone(&offset).date_naive()
}

/// Current time truncated to microseconds, the precision timestamps are
/// stored with.
pub fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// A write timestamp strictly after `previous`, so compare-and-swap on
/// `updated_at` always observes a change.
pub fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = now_micros();
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

pub fn days_in_range(start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>> {
    if end < start {
        return Err(DanError::InvalidRequest(format!(
            "range end {} is before start {}",
            format_day(end),
            format_day(start)
        )));
    }
    Ok(start.iter_days().take_while(|d| *d <= end).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn late_and_early_instants_share_a_calendar_day() {
        let offset = reference_offset(7).unwrap();
        // 23:59 and 00:01 local on 2025-01-10 / 2025-01-11 at +07:00.
        let late = Utc.with_ymd_and_hms(2025, 1, 10, 16, 59, 0).unwrap();
        let early = Utc.with_ymd_and_hms(2025, 1, 9, 17, 1, 0).unwrap();

        assert_eq!(calendar_day(late, offset), NaiveDate::from_ymd_opt(2025, 1, 10).unwrap());
        assert_eq!(calendar_day(early, offset), NaiveDate::from_ymd_opt(2025, 1, 10).unwrap());
    }

    #[test]
    fn parse_day_rejects_garbage() {
        assert!(parse_day("2025-13-01").is_err());
        assert!(parse_day("10/01/2025").is_err());
        assert_eq!(parse_day(" 2025-01-10 ").unwrap(), NaiveDate::from_ymd_opt(2025, 1, 10).unwrap());
    }

    #[test]
    fn api_triple_is_zero_padded() {
        let day = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        assert_eq!(
            format_day_for_api(day),
            ("01".to_string(), "02".to_string(), "2025".to_string())
        );
    }

    #[test]
    fn next_timestamp_is_strictly_increasing() {
        let future = Utc::now() + Duration::hours(1);
        assert!(next_timestamp(future) > future);
    }

    #[test]
    fn days_in_range_is_inclusive() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 30).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 2, 2).unwrap();
        assert_eq!(days_in_range(start, end).unwrap().len(), 4);
        assert!(days_in_range(end, start).is_err());
    }
}
