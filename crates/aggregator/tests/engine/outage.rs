use crate::helpers::{metar_snapshot, nws_snapshot, spawn_engine, tempest_snapshot, T};
use aggregator::{ExternalSignals, FieldName, SourceId, SourceType, WeatherSnapshot};
use time::Duration;

fn webcam(age_minutes: i64) -> ExternalSignals {
    let mut signals = ExternalSignals::default();
    signals
        .ages
        .insert("webcam".to_string(), Some(Duration::minutes(age_minutes)));
    signals
}

#[tokio::test]
async fn outage_coalesces_across_a_brief_recovery() {
    let t = spawn_engine();
    t.tempest.respond(Ok(tempest_snapshot(T)));
    t.metar.respond(Ok(metar_snapshot(T)));
    t.nws.respond(Ok(nws_snapshot(T)));
    let obs = t.engine.aggregate(t.kspb()).await;
    assert!(obs.outage.is_none());

    t.tempest.fail();
    t.metar.fail();
    t.nws.fail();

    t.advance(Duration::minutes(60));
    let obs = t.engine.aggregate(t.kspb()).await;
    assert!(obs.outage.is_none(), "sources only an hour old");

    t.advance(Duration::minutes(31));
    let obs = t.engine.aggregate(t.kspb()).await;
    let started = obs.outage.expect("every feed past the threshold");
    assert_eq!(started.started_at, T, "outage dates from the last delivery");
    assert!(started.is_active());

    // A webcam frame arrives, then goes quiet again.
    t.advance(Duration::minutes(9));
    let obs = t.engine.aggregate_with_signals(t.kspb(), &webcam(1)).await;
    let flicker = obs.outage.expect("kept through the grace period");
    assert_eq!(flicker.recovered_at, Some(T + Duration::minutes(100)));

    t.advance(Duration::minutes(10));
    let obs = t.engine.aggregate_with_signals(t.kspb(), &webcam(95)).await;
    let resumed = obs.outage.expect("outage resumed");
    assert!(resumed.is_active());
    assert_eq!(resumed.started_at, T);

    let persisted = t.engine.outage_state("kspb").await.unwrap().unwrap();
    assert_eq!(persisted, resumed);
}

#[tokio::test]
async fn outage_clears_after_sustained_recovery() {
    let t = spawn_engine();
    t.metar.fail();
    t.nws.fail();
    t.tempest.respond(Ok(tempest_snapshot(T)));
    t.engine.aggregate(t.kspb()).await;

    t.tempest.fail();
    t.advance(Duration::minutes(91));
    assert!(t.engine.aggregate(t.kspb()).await.outage.is_some());

    let now = t.advance(Duration::minutes(9));
    t.tempest.respond(Ok(tempest_snapshot(now)));
    let obs = t.engine.aggregate(t.kspb()).await;
    assert_eq!(obs.outage.and_then(|o| o.recovered_at), Some(now));

    let later = t.advance(Duration::minutes(90));
    t.tempest.respond(Ok(tempest_snapshot(later)));
    let obs = t.engine.aggregate(t.kspb()).await;
    assert!(obs.outage.is_none());
    assert!(t.engine.outage_state("kspb").await.unwrap().is_none());
}

#[tokio::test]
async fn future_stamped_data_does_not_hold_off_an_outage() {
    let t = spawn_engine();
    t.metar.fail();
    t.nws.fail();
    t.tempest.respond(Ok(tempest_snapshot(T)));
    t.engine.aggregate(t.kspb()).await;

    t.advance(Duration::minutes(10));
    t.tempest.respond(Ok(tempest_snapshot(T + Duration::days(1))));
    let obs = t.engine.aggregate(t.kspb()).await;
    assert_eq!(obs.validation_issues.len(), 6);
    assert!(obs.is_degraded(), "future readings are never selected");
    assert!(obs.outage.is_none());

    t.tempest.fail();
    t.advance(Duration::minutes(90));
    let obs = t.engine.aggregate(t.kspb()).await;
    let outage = obs.outage.expect("tempest last delivered usable data at T");
    assert_eq!(outage.started_at, T);
    assert!(outage.is_active());
}

#[tokio::test]
async fn sensor_sending_only_rejected_values_counts_as_down() {
    let t = spawn_engine();
    t.metar.fail();
    t.nws.fail();
    t.tempest.respond(Ok(tempest_snapshot(T)));
    t.engine.aggregate(t.kspb()).await;

    let mut obs = None;
    for _ in 0..4 {
        let now = t.advance(Duration::minutes(30));
        t.tempest.respond(Ok(WeatherSnapshot::new(
            SourceId::from("upstream"),
            SourceType::PrimarySensor,
            now,
        )
        .with_value(FieldName::Temperature, 500.0, now)));
        obs = Some(t.engine.aggregate(t.kspb()).await);
    }

    let obs = obs.expect("four cycles ran");
    assert!(obs.is_degraded());
    assert_eq!(obs.validation_issues.len(), 1);
    let outage = obs.outage.expect("two hours without usable data");
    assert_eq!(outage.started_at, T);
}

#[tokio::test]
async fn status_query_drops_outage_once_grace_expires_between_cycles() {
    let t = spawn_engine();
    t.metar.fail();
    t.nws.fail();
    t.tempest.respond(Ok(tempest_snapshot(T)));
    t.engine.aggregate(t.kspb()).await;

    t.tempest.fail();
    t.advance(Duration::minutes(91));
    assert!(t.engine.aggregate(t.kspb()).await.outage.is_some());

    let now = t.advance(Duration::minutes(1));
    t.tempest.respond(Ok(tempest_snapshot(now)));
    t.engine.aggregate(t.kspb()).await;
    assert!(t.engine.outage_state("kspb").await.unwrap().is_some());

    t.advance(Duration::minutes(90));
    assert!(t.engine.outage_state("kspb").await.unwrap().is_none());
}
