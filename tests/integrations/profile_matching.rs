//! Notification profile evaluation against the in-memory stores.

use chrono::{Duration, FixedOffset, NaiveTime, Utc, Weekday};
use incidentcast::core::{AlertStore, PreferenceStore};
use incidentcast::filter::FilterCriteria;
use incidentcast::profile::{self, ProfileRecord};
use incidentcast::time_window::{TimeInterval, TimeSlot};

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::fixtures::{monday_at, new_alert, Stores};

const OWNER: u64 = 1;
const S1: u64 = 10;
const S2: u64 = 20;

fn sources(id: u64) -> String {
    format!(r#"{{"sourceIds":[{id}],"objectTypeIds":[],"parentObjectIds":[],"problemTypeIds":[]}}"#)
}

fn always_profile(stores: &Stores, filters: &[(u64, &str)]) -> ProfileRecord {
    stores
        .preferences
        .save_time_slot(TimeSlot::always(1, OWNER, "always"))
        .unwrap();
    let mut record = ProfileRecord::new(1, OWNER, 1);
    for (id, spec) in filters {
        stores
            .preferences
            .save_filter(*id, OWNER, &format!("filter {id}"), spec)
            .unwrap();
        record = record.with_filter(*id);
    }
    stores.preferences.save_profile(record).unwrap()
}

#[tokio::test]
async fn test_current_matches_selects_by_source() {
    let stores = Stores::new();
    let spec = sources(S1);
    always_profile(&stores, &[(1, spec.as_str())]);

    let a1 = stores.alerts.create(new_alert(Utc::now(), S1, 1, None, 1));
    let _a2 = stores.alerts.create(new_alert(Utc::now(), S2, 1, None, 1));

    let profile = stores.preferences.notification_profile(OWNER, 1).await.unwrap();
    let matches = profile.current_matches(stores.alerts.as_ref()).await.unwrap();
    assert_eq!(matches, vec![a1]);
}

#[tokio::test]
async fn test_wildcard_filter_and_empty_filter_set() {
    let stores = Stores::new();
    let any = FilterCriteria::any().to_json();
    always_profile(&stores, &[(1, any.as_str())]);
    let a = stores.alerts.create(new_alert(monday_at(9, 0, 0), S1, 1, None, 1));
    let b = stores.alerts.create(new_alert(monday_at(10, 0, 0), S2, 2, Some(5), 3));

    let profile = stores.preferences.notification_profile(OWNER, 1).await.unwrap();
    let matches = profile.current_matches(stores.alerts.as_ref()).await.unwrap();
    assert_eq!(matches, vec![b.clone(), a.clone()]);

    // The same profile without filters matches nothing.
    let mut bare = profile.clone();
    bare.filters.clear();
    assert!(bare.current_matches(stores.alerts.as_ref()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_resolved_and_inactive_are_excluded() {
    let stores = Stores::new();
    let any = FilterCriteria::any().to_json();
    always_profile(&stores, &[(1, any.as_str())]);
    let open = stores.alerts.create(new_alert(Utc::now(), S1, 1, None, 1));
    let closed = stores.alerts.create(new_alert(Utc::now(), S1, 1, None, 1));
    stores.alerts.resolve(closed.pk).unwrap();

    let mut profile = stores.preferences.notification_profile(OWNER, 1).await.unwrap();
    assert_eq!(
        profile.current_matches(stores.alerts.as_ref()).await.unwrap(),
        vec![open]
    );

    profile.active = false;
    assert!(profile.current_matches(stores.alerts.as_ref()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_multiple_filters_union_without_duplicates() {
    let stores = Stores::new();
    let by_source = sources(S1);
    always_profile(
        &stores,
        &[
            (1, by_source.as_str()),
            (2, r#"{"sourceIds":[],"objectTypeIds":[7],"parentObjectIds":[],"problemTypeIds":[]}"#),
        ],
    );
    let both = stores.alerts.create(new_alert(monday_at(1, 0, 0), S1, 7, None, 1));
    let second_only = stores.alerts.create(new_alert(monday_at(2, 0, 0), S2, 7, None, 1));
    stores.alerts.create(new_alert(monday_at(3, 0, 0), S2, 8, None, 1));

    let profile = stores.preferences.notification_profile(OWNER, 1).await.unwrap();
    let matches = profile.current_matches(stores.alerts.as_ref()).await.unwrap();
    assert_eq!(matches, vec![second_only, both]);
}

#[tokio::test]
async fn test_owner_timezone_shifts_slot() {
    let stores = Stores::new();
    let morning = TimeSlot::new(1, OWNER, "monday morning").with_interval(
        TimeInterval::new(
            Weekday::Mon,
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        )
        .unwrap(),
    );
    stores.preferences.save_time_slot(morning).unwrap();
    stores
        .preferences
        .save_filter(1, OWNER, "all", &FilterCriteria::any().to_json())
        .unwrap();
    stores
        .preferences
        .save_profile(ProfileRecord::new(1, OWNER, 1).with_filter(1))
        .unwrap();

    // 06:30 UTC is 08:30 at +02:00.
    let alert = stores.alerts.create(new_alert(monday_at(6, 30, 0), S1, 1, None, 1));

    let profile = stores.preferences.notification_profile(OWNER, 1).await.unwrap();
    assert!(!profile.relevant_now(&alert));

    stores
        .preferences
        .set_timezone(OWNER, FixedOffset::east_opt(2 * 3600).unwrap());
    let profile = stores.preferences.notification_profile(OWNER, 1).await.unwrap();
    assert!(profile.relevant_now(&alert));
    assert_eq!(
        profile.current_matches(stores.alerts.as_ref()).await.unwrap(),
        vec![alert]
    );
}

#[tokio::test]
async fn test_profiles_are_owner_scoped() {
    let stores = Stores::new();
    always_profile(&stores, &[]);
    let err = stores.preferences.notification_profile(OWNER + 1, 1).await.unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn test_preview_is_restartable_and_open_only() {
    let stores = Stores::new();
    let newer = stores.alerts.create(new_alert(Utc::now(), S1, 1, None, 1));
    let older = stores
        .alerts
        .create(new_alert(Utc::now() - Duration::hours(1), S1, 1, None, 1));
    let resolved = stores.alerts.create(new_alert(Utc::now(), S1, 1, None, 1));
    stores.alerts.resolve(resolved.pk).unwrap();

    let criteria = FilterCriteria::from_json(&sources(S1)).unwrap();
    let first = profile::preview(stores.alerts.as_ref(), &criteria).await.unwrap();
    let second = profile::preview(stores.alerts.as_ref(), &criteria).await.unwrap();
    assert_eq!(first, vec![newer, older]);
    assert_eq!(first, second);
    assert_eq!(stores.alerts.active_alerts(1).await.unwrap().len(), 1);
}
