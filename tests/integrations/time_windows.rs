//! Wall-clock matching of time intervals and slots.

use chrono::{Duration, FixedOffset, NaiveTime, TimeZone, Utc, Weekday};
use incidentcast::time_window::{TimeInterval, TimeSlot};

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::fixtures::monday_at;

fn hms(h: u32, m: u32, s: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, s).unwrap()
}

#[test]
fn test_interval_bounds_are_inclusive() {
    let interval = TimeInterval::new(Weekday::Mon, hms(0, 30, 0), hms(0, 30, 1)).unwrap();

    assert!(!interval.contains(&monday_at(0, 29, 59)));
    assert!(interval.contains(&monday_at(0, 30, 0)));
    assert!(interval.contains(&monday_at(0, 30, 1)));
    assert!(!interval.contains(&monday_at(0, 30, 2)));
}

#[test]
fn test_interval_ignores_other_weekdays() {
    let interval = TimeInterval::new(Weekday::Mon, hms(0, 30, 0), hms(0, 30, 1)).unwrap();
    let tuesday = monday_at(0, 30, 0) + Duration::days(1);
    assert!(!interval.contains(&tuesday));
}

#[test]
fn test_slot_matches_any_interval() {
    let slot = TimeSlot::new(1, 1, "night")
        .with_interval(TimeInterval::new(Weekday::Mon, hms(0, 30, 0), hms(0, 30, 1)).unwrap())
        .with_interval(TimeInterval::new(Weekday::Mon, hms(0, 30, 3), hms(0, 31, 0)).unwrap());

    assert!(!slot.contains(&monday_at(0, 30, 2)));
    assert!(slot.contains(&monday_at(0, 30, 3)));
    assert!(slot.contains(&monday_at(0, 31, 0)));
}

#[test]
fn test_empty_slot_matches_nothing() {
    let slot = TimeSlot::new(1, 1, "never");
    assert!(!slot.contains(&monday_at(12, 0, 0)));
}

#[test]
fn test_matching_uses_local_wall_clock() {
    // Monday 23:30 UTC is Tuesday 01:30 at +02:00.
    let slot = TimeSlot::new(1, 1, "tuesday early")
        .with_interval(TimeInterval::new(Weekday::Tue, hms(1, 0, 0), hms(2, 0, 0)).unwrap());
    let instant = Utc.with_ymd_and_hms(2024, 1, 1, 23, 30, 0).unwrap();

    assert!(!slot.contains(&instant));
    let oslo_summer = FixedOffset::east_opt(2 * 3600).unwrap();
    assert!(slot.contains(&instant.with_timezone(&oslo_summer)));
}

#[test]
fn test_inverted_interval_is_rejected() {
    let err = TimeInterval::new(Weekday::Fri, hms(10, 0, 0), hms(9, 0, 0)).unwrap_err();
    assert_eq!(err.code(), "invalid_time_interval");
}
