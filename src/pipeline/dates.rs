//! In-body transaction dates.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

/// Two-digit years below this land in the 2000s, the rest in the 1900s.
pub const YEAR_PIVOT: u32 = 50;

/// Expand a 2-digit year; 4-digit years pass through.
pub fn expand_year(year: u32) -> i32 {
    match year {
        0..YEAR_PIVOT => 2000 + year as i32,
        YEAR_PIVOT..100 => 1900 + year as i32,
        _ => year as i32,
    }
}

/// Build a calendar date from day, 1-based month and 2- or 4-digit year.
/// An impossible date (31-02, month 13) yields `None`.
pub fn calendar_date(day: u32, month: u32, year: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(expand_year(year), month, day)
}

/// Resolve `occurred_at` from an optional body date and the receipt time.
///
/// No body date: the receipt time. Same calendar day as the receipt: the
/// receipt keeps its time of day. Any other day: midnight UTC of that day,
/// but never later than the receipt. An alert dated in the sender's local
/// day can be received while UTC is still on the previous day.
pub fn resolve_occurred_at(body_date: Option<NaiveDate>, received_at: DateTime<Utc>) -> DateTime<Utc> {
    match body_date {
        None => received_at,
        Some(date) if date == received_at.date_naive() => received_at,
        Some(date) => date.and_time(NaiveTime::MIN).and_utc().min(received_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn two_digit_years_pivot() {
        assert_eq!(expand_year(26), 2026);
        assert_eq!(expand_year(0), 2000);
        assert_eq!(expand_year(49), 2049);
        assert_eq!(expand_year(50), 1950);
        assert_eq!(expand_year(71), 1971);
        assert_eq!(expand_year(99), 1999);
    }

    #[test]
    fn four_digit_year_passes_through() {
        assert_eq!(expand_year(2025), 2025);
    }

    #[test]
    fn day_month_year_tokens() {
        assert_eq!(
            calendar_date(9, 1, 26),
            NaiveDate::from_ymd_opt(2026, 1, 9)
        );
        assert_eq!(
            calendar_date(9, 1, 71),
            NaiveDate::from_ymd_opt(1971, 1, 9)
        );
    }

    #[test]
    fn impossible_dates_rejected() {
        assert!(calendar_date(31, 2, 26).is_none());
        assert!(calendar_date(1, 13, 26).is_none());
        assert!(calendar_date(0, 1, 26).is_none());
    }

    #[test]
    fn occurred_at_defaults_to_receipt() {
        let received = Utc.with_ymd_and_hms(2026, 1, 9, 8, 0, 0).unwrap();
        assert_eq!(resolve_occurred_at(None, received), received);
    }

    #[test]
    fn same_day_keeps_receipt_time() {
        let received = Utc.with_ymd_and_hms(2026, 1, 9, 8, 0, 0).unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 1, 9);
        assert_eq!(resolve_occurred_at(date, received), received);
    }

    #[test]
    fn earlier_day_is_midnight() {
        let received = Utc.with_ymd_and_hms(2026, 1, 10, 1, 30, 0).unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 1, 9);
        assert_eq!(
            resolve_occurred_at(date, received),
            Utc.with_ymd_and_hms(2026, 1, 9, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn later_local_day_is_clamped_to_receipt() {
        // 19:00 UTC is already the next day in IST.
        let received = Utc.with_ymd_and_hms(2026, 1, 9, 19, 0, 0).unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 1, 10);
        assert_eq!(resolve_occurred_at(date, received), received);
    }
}
