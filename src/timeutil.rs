// =============================================================================
// ET-shifted time helpers
// =============================================================================
//
// The wire format encodes every trade timestamp as "ET wall-clock reading,
// encoded as if it were UTC". That convention makes session boundaries
// constant integers year-round regardless of the US DST transition, at the
// cost of needing an explicit
// offset whenever we cross back to a real UTC instant (e.g. a client-supplied
// scrubber timestamp on the replay endpoint).
// =============================================================================

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::America::New_York;

/// Pre-market session open (ET wall clock).
pub const PRE_MARKET_OPEN: NaiveTime = NaiveTime::from_hms_opt(4, 0, 0).unwrap();
/// Regular session open (ET wall clock).
pub const REGULAR_OPEN: NaiveTime = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
/// Regular session close (ET wall clock).
pub const REGULAR_CLOSE: NaiveTime = NaiveTime::from_hms_opt(16, 0, 0).unwrap();
/// Post-market session close (ET wall clock).
pub const POST_MARKET_CLOSE: NaiveTime = NaiveTime::from_hms_opt(20, 0, 0).unwrap();

/// Encode `date` at ET wall-clock `time` as ET-shifted milliseconds: build the
/// naive `(Y,M,D,h,m,s)` tuple and interpret it as UTC.
pub fn et_shifted_ms(date: NaiveDate, time: NaiveTime) -> i64 {
    NaiveDateTime::new(date, time).and_utc().timestamp_millis()
}

/// `open930ET` for `date`.
pub fn open_930_et_ms(date: NaiveDate) -> i64 {
    et_shifted_ms(date, REGULAR_OPEN)
}

/// 4 PM ET close for `date`.
pub fn close_4pm_et_ms(date: NaiveDate) -> i64 {
    et_shifted_ms(date, REGULAR_CLOSE)
}

/// 8 PM ET post-market end for `date`.
pub fn post_market_end_et_ms(date: NaiveDate) -> i64 {
    et_shifted_ms(date, POST_MARKET_CLOSE)
}

/// 4 AM ET pre-market open for `date`.
pub fn pre_market_start_et_ms(date: NaiveDate) -> i64 {
    et_shifted_ms(date, PRE_MARKET_OPEN)
}

/// The post-market supplement window `[4PM ET(date), 8PM ET(date)]`,
/// inclusive of both bounds (`t <= postEnd`).
pub fn post_market_window(date: NaiveDate) -> (i64, i64) {
    (close_4pm_et_ms(date), post_market_end_et_ms(date))
}

/// The signed offset (milliseconds) that converts a real-UTC instant
/// occurring on `date`'s ET calendar day into its ET-shifted encoding:
/// `et_shifted = real_utc + et_offset_ms(date)`.
///
/// Computed at local noon to stay well clear of the DST transition itself
/// (which never occurs at midday in the US).
pub fn et_offset_ms(date: NaiveDate) -> i64 {
    let noon = NaiveDateTime::new(date, NaiveTime::from_hms_opt(12, 0, 0).unwrap());
    let localized = New_York.from_local_datetime(&noon).single().unwrap_or_else(|| {
        New_York
            .from_local_datetime(&noon)
            .earliest()
            .expect("noon is never ambiguous/nonexistent in US ET")
    });
    let offset_seconds = localized.offset().fix().local_minus_utc() as i64;
    offset_seconds * 1000
}

/// Recover the ET calendar date that an ET-shifted timestamp falls on.
pub fn et_date_from_shifted_ms(ts_ms: i64) -> NaiveDate {
    let secs = ts_ms.div_euclid(1000);
    let nanos = (ts_ms.rem_euclid(1000) * 1_000_000) as u32;
    chrono::DateTime::from_timestamp(secs, nanos)
        .expect("valid timestamp")
        .naive_utc()
        .date()
}

/// Recover the ET wall-clock time-of-day that an ET-shifted timestamp falls on.
pub fn et_time_of_day(ts_ms: i64) -> NaiveTime {
    let secs = ts_ms.div_euclid(1000);
    let nanos = (ts_ms.rem_euclid(1000) * 1_000_000) as u32;
    chrono::DateTime::from_timestamp(secs, nanos)
        .expect("valid timestamp")
        .naive_utc()
        .time()
}

/// Today's ET calendar date, as observed from a real-UTC instant.
pub fn current_et_date(now: chrono::DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&New_York).date_naive()
}

/// Convert a real-UTC millisecond timestamp (as returned by external APIs —
/// RSS `pubDate`, social-media `CreatedAt`) into its ET wall-clock
/// time-of-day, for session-bucketing news articles. Unlike
/// `et_time_of_day`, the input here is a genuine UTC instant, not an
/// ET-shifted one.
pub fn real_utc_ms_to_et_time(ts_ms: i64) -> NaiveTime {
    let secs = ts_ms.div_euclid(1000);
    let nanos = (ts_ms.rem_euclid(1000) * 1_000_000) as u32;
    chrono::DateTime::from_timestamp(secs, nanos)
        .expect("valid timestamp")
        .with_timezone(&New_York)
        .time()
}

/// Format a date the way universe/trade-universe/news files key on it:
/// `YYYY-MM-DD`.
pub fn date_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}-{:02}", date.year(), date.month(), date.day())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_930_is_constant_across_dst() {
        // Jan 15 (EST) and Jul 15 (EDT) both encode 9:30 the same way because
        // the encoding treats ET wall clock as UTC directly.
        let winter = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let summer = NaiveDate::from_ymd_opt(2024, 7, 15).unwrap();
        let winter_open = open_930_et_ms(winter);
        let summer_open = open_930_et_ms(summer);
        // Same time-of-day offset from midnight on their respective dates.
        assert_eq!(
            winter_open - et_shifted_ms(winter, NaiveTime::from_hms_opt(0, 0, 0).unwrap()),
            summer_open - et_shifted_ms(summer, NaiveTime::from_hms_opt(0, 0, 0).unwrap())
        );
    }

    #[test]
    fn post_market_window_spans_4pm_to_8pm() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let (start, end) = post_market_window(date);
        assert_eq!(start, close_4pm_et_ms(date));
        assert_eq!(end, post_market_end_et_ms(date));
        assert!(end > start);
    }

    #[test]
    fn offset_differs_between_est_and_edt() {
        let winter = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let summer = NaiveDate::from_ymd_opt(2024, 7, 15).unwrap();
        assert_ne!(et_offset_ms(winter), et_offset_ms(summer));
    }

    #[test]
    fn offset_is_negative_in_winter() {
        let winter = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(et_offset_ms(winter), -18_000_000);
    }

    #[test]
    fn roundtrip_date_from_shifted_ms() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 20).unwrap();
        let ts = open_930_et_ms(date);
        assert_eq!(et_date_from_shifted_ms(ts), date);
        assert_eq!(et_time_of_day(ts), REGULAR_OPEN);
    }
}
