use crate::helpers::{spawn_engine, tempest_snapshot, T};
use aggregator::FieldName;
use time::macros::date;
use time::Duration;

#[tokio::test]
async fn daily_extremes_track_high_and_low_through_the_day() {
    let t = spawn_engine();
    t.metar.fail();
    t.nws.fail();

    let mut now = T;
    for (step, temp) in [(0, 21.0), (1, 27.0), (1, 18.0), (1, 24.0)] {
        now = t.advance(Duration::hours(step));
        t.tempest.respond(Ok(
            tempest_snapshot(now).with_value(FieldName::Temperature, temp, now)
        ));
        let obs = t.engine.aggregate(t.kspb()).await;
        assert!(obs.daily_extremes.is_some());
    }
    assert_eq!(now, T + Duration::hours(3));

    let record = t
        .engine
        .daily_extremes("kspb", date!(2024 - 07 - 01))
        .await
        .unwrap()
        .expect("record for the local day");
    assert_eq!(record.high, Some(27.0));
    assert_eq!(record.high_obs_time, Some(T + Duration::hours(1)));
    assert_eq!(record.low, Some(18.0));
    assert_eq!(record.low_obs_time, Some(T + Duration::hours(2)));
    assert_eq!(record.peak_gust, Some(14.0));
}

#[tokio::test]
async fn extremes_survive_a_fully_stale_cycle() {
    let t = spawn_engine();
    t.metar.fail();
    t.nws.fail();
    t.tempest.respond(Ok(tempest_snapshot(T)));
    t.engine.aggregate(t.kspb()).await;

    t.tempest.fail();
    t.advance(Duration::hours(5));
    let obs = t.engine.aggregate(t.kspb()).await;

    assert!(obs.is_degraded());
    let extremes = obs.daily_extremes.expect("historical extremes still reported");
    assert_eq!(extremes.high, Some(21.0));
    assert_eq!(extremes.high_obs_time, Some(T));
}

#[tokio::test]
async fn new_local_day_starts_a_fresh_record() {
    let t = spawn_engine();
    t.metar.fail();
    t.nws.fail();
    t.tempest.respond(Ok(tempest_snapshot(T)));
    t.engine.aggregate(t.kspb()).await;

    // 12:30 past local midnight.
    let now = t.advance(Duration::minutes(12 * 60 + 30));
    t.tempest.respond(Ok(
        tempest_snapshot(now).with_value(FieldName::Temperature, 12.5, now)
    ));
    let obs = t.engine.aggregate(t.kspb()).await;

    let today = obs.daily_extremes.expect("record for the new day");
    assert_eq!(today.date_key, date!(2024 - 07 - 02));
    assert_eq!(today.high, Some(12.5));
    assert_eq!(today.low, Some(12.5));

    let yesterday = t
        .engine
        .daily_extremes("kspb", date!(2024 - 07 - 01))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(yesterday.high, Some(21.0));
}
